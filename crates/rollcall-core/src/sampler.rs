//! Face sampling: fault isolation around the detection/matching engine.

use crate::types::{Detection, SampleResult};
use std::panic::{self, AssertUnwindSafe};
use thiserror::Error;

/// Error type engines report through [`FaceEngine::analyze`].
pub type EngineError = Box<dyn std::error::Error + Send + Sync>;

/// Opaque detection + gallery matching over one frame.
pub trait FaceEngine<F> {
    fn analyze(&mut self, frame: &F) -> Result<Vec<Detection>, EngineError>;
}

#[derive(Error, Debug)]
pub enum SampleFailure {
    #[error("engine error: {0}")]
    Engine(EngineError),
    #[error("engine panicked: {0}")]
    Panicked(String),
}

/// Turns a raw frame into a face count plus resolved identities.
pub struct FaceSampler<E> {
    engine: E,
    failures: u64,
}

impl<E> FaceSampler<E> {
    pub fn new(engine: E) -> Self {
        Self {
            engine,
            failures: 0,
        }
    }

    /// Number of samples absorbed as failures so far.
    pub fn failures(&self) -> u64 {
        self.failures
    }

    pub fn sample<F>(&mut self, frame: &F) -> Result<SampleResult, SampleFailure>
    where
        E: FaceEngine<F>,
    {
        // A panic inside the engine must not take the session loop with it.
        let engine = &mut self.engine;
        let detections = match panic::catch_unwind(AssertUnwindSafe(|| engine.analyze(frame))) {
            Ok(Ok(detections)) => detections,
            Ok(Err(e)) => return Err(SampleFailure::Engine(e)),
            Err(payload) => return Err(SampleFailure::Panicked(panic_message(&*payload))),
        };
        Ok(normalize(detections))
    }

    /// [`sample`](Self::sample), with any failure treated as a zero-face frame.
    pub fn sample_or_empty<F>(&mut self, frame: &F) -> SampleResult
    where
        E: FaceEngine<F>,
    {
        match self.sample(frame) {
            Ok(result) => result,
            Err(e) => {
                self.failures += 1;
                tracing::debug!(error = %e, failures = self.failures, "sample failed; treating as empty");
                SampleResult::empty()
            }
        }
    }
}

fn normalize(detections: Vec<Detection>) -> SampleResult {
    let face_count = detections.len();
    let identities = detections
        .into_iter()
        .filter_map(|d| d.identity)
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
        .collect();
    SampleResult {
        face_count,
        identities,
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Engine replaying a scripted response per call.
    struct Scripted(Vec<Result<Vec<Detection>, String>>);

    impl FaceEngine<u32> for Scripted {
        fn analyze(&mut self, _frame: &u32) -> Result<Vec<Detection>, EngineError> {
            match self.0.remove(0) {
                Ok(d) => Ok(d),
                Err(msg) => Err(msg.into()),
            }
        }
    }

    struct Panicking;

    impl FaceEngine<u32> for Panicking {
        fn analyze(&mut self, frame: &u32) -> Result<Vec<Detection>, EngineError> {
            panic!("malformed frame {frame}");
        }
    }

    #[test]
    fn test_counts_all_faces_but_keeps_only_resolved() {
        let mut sampler = FaceSampler::new(Scripted(vec![Ok(vec![
            Detection::known("alice", 0.9),
            Detection::unknown(0.8),
            Detection::known("", 0.7),
            Detection::known("  ", 0.6),
            Detection::known("bob", 0.5),
        ])]));
        let result = sampler.sample(&0).unwrap();
        assert_eq!(result.face_count, 5);
        assert_eq!(result.identities, vec!["alice".to_string(), "bob".to_string()]);
    }

    #[test]
    fn test_no_faces() {
        let mut sampler = FaceSampler::new(Scripted(vec![Ok(vec![])]));
        assert_eq!(sampler.sample(&0).unwrap(), SampleResult::empty());
    }

    #[test]
    fn test_engine_error_is_reported() {
        let mut sampler = FaceSampler::new(Scripted(vec![Err("matcher offline".into())]));
        let err = sampler.sample(&0).unwrap_err();
        assert!(matches!(err, SampleFailure::Engine(_)));
        assert!(err.to_string().contains("matcher offline"));
    }

    #[test]
    fn test_engine_error_absorbed_as_empty() {
        let mut sampler = FaceSampler::new(Scripted(vec![
            Err("transient".into()),
            Ok(vec![Detection::known("carol", 0.9)]),
        ]));
        assert_eq!(sampler.sample_or_empty(&0), SampleResult::empty());
        assert_eq!(sampler.failures(), 1);
        assert_eq!(sampler.sample_or_empty(&1).identities, vec!["carol".to_string()]);
    }

    #[test]
    fn test_engine_panic_is_contained() {
        let mut sampler = FaceSampler::new(Panicking);
        match sampler.sample(&42) {
            Err(SampleFailure::Panicked(msg)) => assert!(msg.contains("malformed frame 42")),
            other => panic!("expected panic failure, got {other:?}"),
        }
        assert_eq!(sampler.sample_or_empty(&43), SampleResult::empty());
        assert_eq!(sampler.failures(), 1);
    }
}
