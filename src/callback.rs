//! Lifecycle callbacks
//!
//! Callbacks are registered on the trainer as an explicit ordered list and
//! invoked synchronously, in registration order. An error from any callback
//! aborts the current operation.

use std::fmt;

use crate::backend::ModelSnapshot;
use crate::result::TrainingResult;
use crate::Result;

/// Trainer lifecycle points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleEvent {
    /// Before the first batch, after the initial snapshot
    TrainingStart,
    /// After each train batch
    BatchEnd,
    /// After validation at the end of each epoch
    EpochEnd,
    /// After the last epoch
    TrainingEnd,
    /// Before the test pass
    TestStart,
    /// After the test pass
    TestEnd,
}

impl LifecycleEvent {
    /// Invoke the matching hook on `callback`.
    ///
    /// # Errors
    ///
    /// Propagates the callback's error.
    pub fn notify<C: Callback + ?Sized>(
        self,
        callback: &mut C,
        result: &TrainingResult,
        model: &dyn ModelSnapshot,
    ) -> Result<()> {
        match self {
            Self::TrainingStart => callback.training_start(result, model),
            Self::BatchEnd => callback.batch_end(result, model),
            Self::EpochEnd => callback.epoch_end(result, model),
            Self::TrainingEnd => callback.training_end(result, model),
            Self::TestStart => callback.test_start(result, model),
            Self::TestEnd => callback.test_end(result, model),
        }
    }
}

impl fmt::Display for LifecycleEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::TrainingStart => "training_start",
            Self::BatchEnd => "batch_end",
            Self::EpochEnd => "epoch_end",
            Self::TrainingEnd => "training_end",
            Self::TestStart => "test_start",
            Self::TestEnd => "test_end",
        };
        f.write_str(name)
    }
}

/// Listener for trainer lifecycle events. Every hook defaults to a no-op.
///
/// `model` is only valid for the duration of the call; do not retain
/// anything borrowed from it.
#[allow(unused_variables)]
pub trait Callback {
    /// Training is starting.
    ///
    /// # Errors
    ///
    /// Any error aborts training.
    fn training_start(&mut self, result: &TrainingResult, model: &dyn ModelSnapshot) -> Result<()> {
        Ok(())
    }

    /// Training finished its last epoch.
    ///
    /// # Errors
    ///
    /// Any error is returned from `train`.
    fn training_end(&mut self, result: &TrainingResult, model: &dyn ModelSnapshot) -> Result<()> {
        Ok(())
    }

    /// An epoch (including its validation pass) finished.
    ///
    /// # Errors
    ///
    /// Any error aborts training.
    fn epoch_end(&mut self, result: &TrainingResult, model: &dyn ModelSnapshot) -> Result<()> {
        Ok(())
    }

    /// A train batch finished.
    ///
    /// # Errors
    ///
    /// Any error aborts training.
    fn batch_end(&mut self, result: &TrainingResult, model: &dyn ModelSnapshot) -> Result<()> {
        Ok(())
    }

    /// The test pass is starting.
    ///
    /// # Errors
    ///
    /// Any error aborts the test pass.
    fn test_start(&mut self, result: &TrainingResult, model: &dyn ModelSnapshot) -> Result<()> {
        Ok(())
    }

    /// The test pass finished.
    ///
    /// # Errors
    ///
    /// Any error is returned from `test`.
    fn test_end(&mut self, result: &TrainingResult, model: &dyn ModelSnapshot) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullModel;

    impl ModelSnapshot for NullModel {
        fn serialize(&self) -> Result<Vec<u8>> {
            Ok(Vec::new())
        }
    }

    #[derive(Default)]
    struct Recorder(Vec<String>);

    impl Callback for Recorder {
        fn batch_end(&mut self, _: &TrainingResult, _: &dyn ModelSnapshot) -> Result<()> {
            self.0.push("batch".into());
            Ok(())
        }

        fn test_end(&mut self, _: &TrainingResult, _: &dyn ModelSnapshot) -> Result<()> {
            self.0.push("test".into());
            Ok(())
        }
    }

    #[test]
    fn test_notify_routes_to_matching_hook() {
        let mut cb = Recorder::default();
        let result = TrainingResult::new();
        for event in [
            LifecycleEvent::TrainingStart,
            LifecycleEvent::BatchEnd,
            LifecycleEvent::TestEnd,
        ] {
            event.notify(&mut cb, &result, &NullModel).unwrap();
        }
        assert_eq!(cb.0, vec!["batch", "test"]);
    }

    #[test]
    fn test_event_display() {
        assert_eq!(LifecycleEvent::EpochEnd.to_string(), "epoch_end");
    }
}
