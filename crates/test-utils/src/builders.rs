#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use jobflow::job::{Evaluation, Job, SituationPerceiver};
use jobflow::runner::RunnerSettings;
use jobflow::types::{Parameters, keys};

/// Parameters from `(key, value)` pairs.
pub fn params<const N: usize>(pairs: [(&str, &str); N]) -> Parameters {
    pairs.into_iter().collect()
}

/// Plain master whose steps run one after the other.
pub fn serial_master(steps: Vec<Arc<Job>>) -> Arc<Job> {
    let master = Job::plain(Parameters::new());
    for step in steps {
        master.add_step(step);
    }
    master
}

/// Plain master with `threads` threads; every step is marked parallelizable.
pub fn parallel_master(threads: usize, steps: Vec<Arc<Job>>) -> Arc<Job> {
    let threads = threads.to_string();
    let master = Job::plain(params([(keys::NUMTHREADS, threads.as_str())]));
    for step in steps {
        step.set_parallelizable(true);
        master.add_step(step);
    }
    master
}

/// Evaluation job looking at `focus`.
pub fn evaluator(focus: &Arc<Job>, perceiver: Arc<dyn SituationPerceiver>) -> Arc<Job> {
    Job::evaluation(Evaluation::focusing_on(focus, perceiver), Parameters::new())
}

/// Monitoring job looking at `focus`: first tick right away, then every
/// `period`.
pub fn monitor(
    focus: &Arc<Job>,
    perceiver: Arc<dyn SituationPerceiver>,
    period: Duration,
) -> Arc<Job> {
    let millis = period.as_millis().to_string();
    Job::monitoring(
        Evaluation::focusing_on(focus, perceiver),
        params([
            (keys::INITIALDELAY, "0"),
            (keys::PERIOD, millis.as_str()),
            (keys::PERIOD_UNITS, "MILLISECONDS"),
        ]),
    )
}

/// Settings with a short poll period so tests react quickly.
pub fn fast_settings(threads: usize, walltime: Option<Duration>) -> RunnerSettings {
    RunnerSettings {
        walltime,
        wait_step: Some(Duration::from_millis(20)),
        threads,
    }
}
