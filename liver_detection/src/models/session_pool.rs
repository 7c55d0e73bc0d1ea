use super::ModelError;
use ort::session::{builder::GraphOptimizationLevel, Session};
use std::{
    path::Path,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    },
};

/// Round-robin pool of sessions over the same model file. A session is
/// locked for the duration of one `run`.
pub(crate) struct SessionPool {
    sessions: Vec<Mutex<Session>>,
    counter: AtomicUsize,
}

impl SessionPool {
    pub(crate) fn from_file(path: &Path, num_instances: usize) -> Result<Self, ModelError> {
        let sessions = (0..num_instances.max(1))
            .map(|_| {
                let session = Session::builder()?
                    .with_optimization_level(GraphOptimizationLevel::Level3)?
                    .commit_from_file(path)?;
                Ok(Mutex::new(session))
            })
            .collect::<Result<Vec<_>, ort::Error>>()?;

        tracing::info!("Created {} ONNX sessions for {:?}", sessions.len(), path);

        Ok(Self {
            sessions,
            counter: AtomicUsize::new(0),
        })
    }

    pub(crate) fn run<T>(
        &self,
        f: impl FnOnce(&mut Session) -> Result<T, ModelError>,
    ) -> Result<T, ModelError> {
        let index = self.counter.fetch_add(1, Ordering::SeqCst) % self.sessions.len();
        let mut session = self.sessions[index]
            .lock()
            .map_err(|e| ModelError::SessionPoisoned(e.to_string()))?;

        tracing::debug!("Handling request with session {}", index);
        f(&mut session)
    }
}
