// src/config/mod.rs

//! Job files.
//!
//! - `model.rs`: the TOML/JSON data model and the `[config]` section.
//! - `loader.rs`: reading a file from disk.
//! - `validate.rs`: checks run while turning a raw file into a [`JobFile`].

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{DEFAULT_JOB_FILE, default_job_path, load_and_validate, load_from_path};
pub use model::{ConfigSection, JobFile, RawJobFile};
