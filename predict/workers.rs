//! Phase-scoped worker pools.
//!
//! Each parallel phase (enrichment scoring, chunked prediction) gets its own rayon
//! pool. The pool lives exactly as long as the call to [`with_phase_pool`]: it is
//! built on entry and dropped before the function returns, whether the phase
//! succeeded, failed, or unwound.

use std::fmt;
use thiserror::Error;

/// The parallel phases of a run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Scoring,
    Prediction,
}

impl Phase {
    pub fn describe(self) -> &'static str {
        match self {
            Self::Scoring => "enrichment scoring",
            Self::Prediction => "prediction",
        }
    }

    fn thread_prefix(self) -> &'static str {
        match self {
            Self::Scoring => "virpred-score",
            Self::Prediction => "virpred-predict",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.describe())
    }
}

#[derive(Error, Debug)]
#[error("Could not start {threads} worker threads for {phase}: {source}")]
pub struct WorkerPoolError {
    pub phase: Phase,
    pub threads: usize,
    #[source]
    pub source: rayon::ThreadPoolBuildError,
}

/// Runs `work` inside a freshly built pool of `threads` workers.
///
/// Every rayon parallel iterator used inside `work` executes on this pool. The first
/// error returned by `work` is propagated unchanged; a pool that cannot be built is
/// converted into the phase's own error type.
pub fn with_phase_pool<T, E, F>(threads: usize, phase: Phase, work: F) -> Result<T, E>
where
    F: FnOnce() -> Result<T, E> + Send,
    T: Send,
    E: Send + From<WorkerPoolError>,
{
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(threads.max(1))
        .thread_name(move |idx| format!("{}-{idx}", phase.thread_prefix()))
        .build()
        .map_err(|source| WorkerPoolError {
            phase,
            threads,
            source,
        })?;

    log::debug!("Started {} workers for {phase}", pool.current_num_threads());
    let outcome = pool.install(work);
    drop(pool);
    log::debug!("Released workers for {phase}");
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use rayon::prelude::*;

    #[derive(Debug)]
    enum PhaseFailure {
        Pool,
        Work,
    }

    impl From<WorkerPoolError> for PhaseFailure {
        fn from(_: WorkerPoolError) -> Self {
            PhaseFailure::Pool
        }
    }

    #[test]
    fn work_runs_on_requested_number_of_threads() {
        let threads = with_phase_pool(3, Phase::Scoring, || {
            Ok::<_, PhaseFailure>(rayon::current_num_threads())
        })
        .unwrap();
        assert_eq!(threads, 3);
    }

    #[test]
    fn worker_failure_aborts_the_phase() {
        let result: Result<Vec<usize>, PhaseFailure> =
            with_phase_pool(2, Phase::Prediction, || {
                (0..16usize)
                    .into_par_iter()
                    .map(|i| if i == 7 { Err(PhaseFailure::Work) } else { Ok(i) })
                    .collect()
            });
        assert!(matches!(result, Err(PhaseFailure::Work)));
    }
}
