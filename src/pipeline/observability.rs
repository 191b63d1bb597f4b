use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use super::quality::QualityResult;
use super::{RunState, Stage};

/// Events emitted while a pipeline run progresses.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    /// The run moved between lifecycle states.
    Transition { from: RunState, to: RunState },
    StageStarted { stage: Stage },
    StageFinished { stage: Stage, elapsed: Duration },
    /// A stage failed; the run stops here.
    StageFailed { stage: Stage, message: String },
    /// One quality rule was evaluated.
    RuleEvaluated(QualityResult),
    /// The session was released. `clean` is false if closing reported an error.
    SessionClosed { clean: bool },
}

/// Observer interface for pipeline runs.
///
/// Implementors can record metrics, collect results, or trigger alerts. Logging already happens
/// through `tracing`; observers are for programmatic consumers.
pub trait PipelineObserver: Send + Sync {
    fn on_event(&self, event: &PipelineEvent);
}

/// Ignores every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl PipelineObserver for NoopObserver {
    fn on_event(&self, _event: &PipelineEvent) {}
}

/// An observer that fans out events to a list of observers.
#[derive(Default)]
pub struct CompositeObserver {
    observers: Vec<Arc<dyn PipelineObserver>>,
}

impl CompositeObserver {
    pub fn new(observers: Vec<Arc<dyn PipelineObserver>>) -> Self {
        Self { observers }
    }
}

impl fmt::Debug for CompositeObserver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompositeObserver")
            .field("observers_len", &self.observers.len())
            .finish()
    }
}

impl PipelineObserver for CompositeObserver {
    fn on_event(&self, event: &PipelineEvent) {
        for o in &self.observers {
            o.on_event(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    struct Counting(Mutex<usize>);

    impl PipelineObserver for Counting {
        fn on_event(&self, _event: &PipelineEvent) {
            *self.0.lock().unwrap() += 1;
        }
    }

    #[test]
    fn composite_fans_out_to_every_observer() {
        let a = Arc::new(Counting::default());
        let b = Arc::new(Counting::default());
        let composite =
            CompositeObserver::new(vec![a.clone() as Arc<dyn PipelineObserver>, b.clone()]);
        composite.on_event(&PipelineEvent::StageStarted {
            stage: Stage::LoadRaw,
        });
        composite.on_event(&PipelineEvent::SessionClosed { clean: true });
        assert_eq!(*a.0.lock().unwrap(), 2);
        assert_eq!(*b.0.lock().unwrap(), 2);
        assert!(format!("{composite:?}").contains("observers_len: 2"));
    }
}
