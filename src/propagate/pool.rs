//! Background worker pool for propagation jobs

use super::{PropagationReport, Propagator};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

enum Job {
    Propagate(i64),
    Shutdown,
}

/// How a propagation job ended
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PropagationOutcome {
    Completed { report: PropagationReport },
    /// The material was deleted before the job ran
    Missing,
    Failed { error: String },
}

/// Published once per finished job
#[derive(Debug, Clone, Serialize)]
pub struct PropagationEvent {
    pub material_id: i64,
    #[serde(flatten)]
    pub outcome: PropagationOutcome,
}

/// Cheap handle for scheduling propagation; never blocks
#[derive(Clone)]
pub struct PropagationQueue {
    tx: mpsc::UnboundedSender<Job>,
}

impl PropagationQueue {
    /// Queue propagation of `material_id`. Returns false once the pool has stopped.
    pub fn schedule(&self, material_id: i64) -> bool {
        match self.tx.send(Job::Propagate(material_id)) {
            Ok(()) => {
                debug!(material_id, "Scheduled propagation");
                true
            }
            Err(_) => {
                warn!(material_id, "Propagation pool stopped, job dropped");
                false
            }
        }
    }
}

/// Fixed set of tokio workers draining a shared job queue
pub struct PropagationPool {
    queue: PropagationQueue,
    events: broadcast::Sender<PropagationEvent>,
    workers: Vec<JoinHandle<()>>,
}

impl PropagationPool {
    /// Spawn `workers` tasks on the current runtime
    pub fn start(propagator: Propagator, workers: usize, events_capacity: usize) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(events_capacity.max(1));
        let jobs = Arc::new(Mutex::new(rx));
        let count = workers.max(1);

        let handles = (0..count)
            .map(|worker| {
                tokio::spawn(worker_loop(
                    worker,
                    propagator.clone(),
                    Arc::clone(&jobs),
                    events.clone(),
                ))
            })
            .collect();

        info!(workers = count, "Propagation pool started");

        Self {
            queue: PropagationQueue { tx },
            events,
            workers: handles,
        }
    }

    pub fn queue(&self) -> PropagationQueue {
        self.queue.clone()
    }

    /// Receive events for jobs finishing after this call
    pub fn subscribe(&self) -> broadcast::Receiver<PropagationEvent> {
        self.events.subscribe()
    }

    /// Finish every job queued so far, then stop the workers
    pub async fn shutdown(self) {
        for _ in 0..self.workers.len() {
            let _ = self.queue.tx.send(Job::Shutdown);
        }
        for handle in self.workers {
            if let Err(e) = handle.await {
                error!(error = %e, "Propagation worker panicked");
            }
        }
        info!("Propagation pool stopped");
    }
}

async fn worker_loop(
    worker: usize,
    propagator: Propagator,
    jobs: Arc<Mutex<mpsc::UnboundedReceiver<Job>>>,
    events: broadcast::Sender<PropagationEvent>,
) {
    loop {
        let job = {
            let mut rx = jobs.lock().await;
            rx.recv().await
        };

        let material_id = match job {
            Some(Job::Propagate(id)) => id,
            Some(Job::Shutdown) | None => break,
        };

        debug!(worker, material_id, "Propagation job started");
        let outcome = match propagator.propagate_id(material_id).await {
            Ok(Some(report)) => PropagationOutcome::Completed { report },
            Ok(None) => PropagationOutcome::Missing,
            Err(e) => {
                error!(worker, material_id, error = %e, "Propagation failed");
                PropagationOutcome::Failed {
                    error: e.to_string(),
                }
            }
        };

        // No subscribers is fine
        let _ = events.send(PropagationEvent {
            material_id,
            outcome,
        });
    }
    debug!(worker, "Propagation worker exiting");
}
