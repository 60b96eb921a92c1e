//! Built-in vocabularies
//!
//! ```text
//!   task:       pending | running | stopping | canceling      (mutex)
//!                                    ├── stopping_with_exception ┐
//!                                    └── stopping_with_canceled  ┘ (mutex)
//!
//!   job-step:   task + running ── stepping | leaping          (mutex)
//!                              └─ reverse
//! ```
//!
//! Both are registered once, on first use, and shared process-wide.

use std::sync::{Arc, LazyLock};

use super::member::Flag;
use super::vocabulary::Vocabulary;
use crate::error::FlagResult;

pub const PENDING: &str = "pending";
pub const RUNNING: &str = "running";
pub const STOPPING: &str = "stopping";
pub const CANCELING: &str = "canceling";
pub const STOPPING_WITH_EXCEPTION: &str = "stopping_with_exception";
pub const STOPPING_WITH_CANCELED: &str = "stopping_with_canceled";

pub const STEPPING: &str = "stepping";
pub const LEAPING: &str = "leaping";
pub const REVERSE: &str = "reverse";

static TASK: LazyLock<Arc<Vocabulary>> =
    LazyLock::new(|| Arc::new(build_task("task").expect("task vocabulary is well-formed")));

static JOB_STEP: LazyLock<Arc<Vocabulary>> =
    LazyLock::new(|| Arc::new(build_job_step().expect("job-step vocabulary is well-formed")));

/// Lifecycle flags shared by fetchers and the monitor
pub fn task_vocabulary() -> Arc<Vocabulary> {
    Arc::clone(&TASK)
}

/// Lifecycle plus traversal-phase flags used by index jobs
pub fn job_step_vocabulary() -> Arc<Vocabulary> {
    Arc::clone(&JOB_STEP)
}

fn build_task(name: &str) -> FlagResult<Vocabulary> {
    let vocab = Vocabulary::new(name);
    vocab.register([
        Flag::new(PENDING)?.with_aliases("pend")?,
        Flag::new(RUNNING)?.with_aliases("run")?,
        Flag::new(STOPPING)?.with_aliases("stop")?,
        Flag::new(CANCELING)?.with_aliases("cancel")?,
        Flag::new(STOPPING_WITH_EXCEPTION)?
            .with_aliases("swe")?
            .with_parents(STOPPING)?,
        Flag::new(STOPPING_WITH_CANCELED)?
            .with_aliases("swc")?
            .with_parents(STOPPING)?,
    ])?;
    vocab.add_mutex_group(&[PENDING, RUNNING, STOPPING, CANCELING])?;
    vocab.add_mutex_group(&[STOPPING_WITH_EXCEPTION, STOPPING_WITH_CANCELED])?;
    Ok(vocab)
}

fn build_job_step() -> FlagResult<Vocabulary> {
    let vocab = build_task("job-step")?;
    vocab.register([
        Flag::new(STEPPING)?.with_parents(RUNNING)?,
        Flag::new(LEAPING)?.with_parents(RUNNING)?,
        Flag::new(REVERSE)?.with_parents(RUNNING)?,
    ])?;
    vocab.add_mutex_group(&[STEPPING, LEAPING])?;
    Ok(vocab)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FlagError;
    use crate::flag::FlagGroup;

    #[test]
    fn test_task_aliases() {
        let vocab = task_vocabulary();
        assert_eq!(vocab.lookup("swe").unwrap().name(), Some(STOPPING_WITH_EXCEPTION));
        assert_eq!(vocab.lookup("cancel").unwrap().name(), Some(CANCELING));
        assert!(vocab.lookup(STEPPING).is_err());
    }

    #[test]
    fn test_task_lifecycle() {
        let group = FlagGroup::new(task_vocabulary(), PENDING).unwrap();
        group.replace(PENDING, RUNNING).unwrap();
        assert!(matches!(group.set(STOPPING), Err(FlagError::MutexConflict { .. })));

        group.replace(RUNNING, "swc").unwrap();
        assert!(group.all_strict([STOPPING, STOPPING_WITH_CANCELED]));
        assert!(group.set("swe").is_err());
    }

    #[test]
    fn test_job_step_phases() {
        let group = FlagGroup::new(job_step_vocabulary(), PENDING).unwrap();
        group.replace(PENDING, STEPPING).unwrap();
        assert!(group.all_strict([RUNNING, STEPPING]));

        group.replace(STEPPING, [LEAPING, REVERSE]).unwrap();
        assert!(group.all_strict([RUNNING, LEAPING, REVERSE]));
        assert!(group.set(STEPPING).is_err());

        // Leaving running drops every phase flag with it
        group.replace(RUNNING, STOPPING).unwrap();
        assert!(group.all_strict(STOPPING));
    }
}
