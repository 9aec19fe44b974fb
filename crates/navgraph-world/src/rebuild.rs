//! Debounced background graph rebuilds
//!
//! Requests collapse into a single pending slot. A rebuild runs on its own
//! worker thread and reports back over a channel; the owner polls once per
//! tick and installs the result.

use navgraph::{AgentType, GeometryInput, GraphSettings, GridGraph};
use navgraph_common::{Error, Result};
use std::io;
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::thread::{self, JoinHandle};

/// Called with `true` once a requested rebuild is installed, `false` if it failed
pub type RebuildCallback = Box<dyn FnOnce(bool) + Send>;

type RebuildJob = Box<dyn FnOnce() + Send>;

struct RunningRebuild {
    receiver: Receiver<Result<GridGraph>>,
    callback: Option<RebuildCallback>,
    worker: Option<JoinHandle<()>>,
}

/// A finished rebuild waiting to be installed
pub(crate) struct FinishedRebuild {
    pub result: Result<GridGraph>,
    pub callback: Option<RebuildCallback>,
}

#[derive(Default)]
pub(crate) struct RebuildQueue {
    /// `Some(None)` is a request without a callback
    pending: Option<Option<RebuildCallback>>,
    running: Option<RunningRebuild>,
    started: u64,
}

impl RebuildQueue {
    /// Records a request, returning true if it replaced one not yet started
    pub fn enqueue(&mut self, callback: Option<RebuildCallback>) -> bool {
        let replaced = self.pending.replace(callback).is_some();
        if replaced {
            log::debug!("Replaced pending navigation graph rebuild request");
        }
        replaced
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Rebuilds started so far
    pub fn started(&self) -> u64 {
        self.started
    }

    /// Starts the pending request on a worker unless one is already running
    pub fn start(
        &mut self,
        input: &GeometryInput,
        settings: &GraphSettings,
        agent_types: &[AgentType],
    ) -> Result<bool> {
        self.start_with(input, settings, agent_types, |job| {
            thread::Builder::new()
                .name("navgraph-rebuild".to_string())
                .spawn(job)
        })
    }

    /// [`RebuildQueue::start`] with the worker launched by `spawn`
    ///
    /// If the worker cannot be launched the request is dropped and its
    /// callback is told the rebuild failed.
    fn start_with<S>(
        &mut self,
        input: &GeometryInput,
        settings: &GraphSettings,
        agent_types: &[AgentType],
        spawn: S,
    ) -> Result<bool>
    where
        S: FnOnce(RebuildJob) -> io::Result<JoinHandle<()>>,
    {
        if self.running.is_some() {
            return Ok(false);
        }
        let Some(callback) = self.pending.take() else {
            return Ok(false);
        };

        let (sender, receiver) = mpsc::channel();
        let input = input.clone();
        let settings = settings.clone();
        let agent_types = agent_types.to_vec();
        let spawned = spawn(Box::new(move || {
            let result = input.create_graph(&settings, &agent_types, None);
            // The owner may have been dropped meanwhile
            let _ = sender.send(result);
        }));
        let worker = match spawned {
            Ok(worker) => worker,
            Err(e) => {
                log::warn!("Failed to start navigation graph rebuild: {}", e);
                if let Some(callback) = callback {
                    callback(false);
                }
                return Err(e.into());
            }
        };

        self.started += 1;
        log::debug!("Started navigation graph rebuild {}", self.started);
        self.running = Some(RunningRebuild {
            receiver,
            callback,
            worker: Some(worker),
        });
        Ok(true)
    }

    /// Collects the running rebuild if it has finished, waiting for it when `block` is set
    pub fn poll(&mut self, block: bool) -> Option<FinishedRebuild> {
        let running = self.running.as_mut()?;
        let result = if block {
            running
                .receiver
                .recv()
                .map_err(|_| Error::Build("rebuild worker stopped".to_string()))
        } else {
            match running.receiver.try_recv() {
                Ok(result) => Ok(result),
                Err(TryRecvError::Empty) => return None,
                Err(TryRecvError::Disconnected) => {
                    Err(Error::Build("rebuild worker stopped".to_string()))
                }
            }
        };
        // Flatten the channel result into the build result
        let result = match result {
            Ok(Ok(graph)) => Ok(graph),
            Ok(Err(e)) | Err(e) => Err(e),
        };

        let mut running = self.running.take()?;
        if let Some(worker) = running.worker.take() {
            if worker.join().is_err() {
                log::warn!("Navigation graph rebuild worker panicked");
            }
        }
        Some(FinishedRebuild {
            result,
            callback: running.callback.take(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use navgraph::TriMesh;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;

    fn plane_input() -> GeometryInput {
        GeometryInput::from_mesh(TriMesh::flat_plane(10.0, 0.0))
    }

    #[test]
    fn test_failed_spawn_reports_to_callback() {
        let mut queue = RebuildQueue::default();
        let reported = Arc::new(AtomicUsize::new(0));
        let failed = Arc::new(AtomicBool::new(false));
        let (count, flag) = (reported.clone(), failed.clone());
        queue.enqueue(Some(Box::new(move |ok| {
            count.fetch_add(1, Ordering::SeqCst);
            flag.store(!ok, Ordering::SeqCst);
        })));

        let result = queue.start_with(
            &plane_input(),
            &GraphSettings::default(),
            &[AgentType::default()],
            |_job| Err(io::Error::other("no threads left")),
        );
        assert!(matches!(result, Err(Error::Io(_))));
        assert_eq!(reported.load(Ordering::SeqCst), 1);
        assert!(failed.load(Ordering::SeqCst));
        assert!(!queue.has_pending());
        assert!(!queue.is_running());
        assert_eq!(queue.started(), 0);
    }

    #[test]
    fn test_start_runs_pending_request() {
        let mut queue = RebuildQueue::default();
        let input = plane_input();
        let settings = GraphSettings::default();
        let agents = [AgentType::default()];
        assert!(!queue.start(&input, &settings, &agents).unwrap());

        queue.enqueue(None);
        assert!(queue.start(&input, &settings, &agents).unwrap());
        assert!(queue.is_running());
        // Only one rebuild runs at a time
        queue.enqueue(None);
        assert!(!queue.start(&input, &settings, &agents).unwrap());

        let finished = queue.poll(true).unwrap();
        assert!(finished.result.is_ok());
        assert!(finished.callback.is_none());
        assert_eq!(queue.started(), 1);
        assert!(queue.has_pending());
    }
}
