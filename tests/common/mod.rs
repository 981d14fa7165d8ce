#![allow(dead_code, unused_imports)]

pub use jobflow_test_utils::builders;
pub use jobflow_test_utils::fakes;
pub use jobflow_test_utils::{init_tracing, with_timeout};
