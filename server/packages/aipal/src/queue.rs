//! FIFO execution per conversation.
//!
//! Every conversation gets a worker task that drains its own channel, one job
//! at a time. Workers exit once their channel is empty and are spawned again
//! on the next enqueue, so idle conversations hold no resources.

use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard};

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error};

use aipal_error::Result;

struct Job {
    task: BoxFuture<'static, Result<()>>,
    done: oneshot::Sender<()>,
}

type Workers = Arc<Mutex<HashMap<String, mpsc::UnboundedSender<Job>>>>;

/// Resolves once the enqueued task has settled, whatever its outcome.
#[derive(Debug)]
pub struct QueueTicket {
    done: oneshot::Receiver<()>,
}

impl QueueTicket {
    pub async fn wait(self) {
        let _ = self.done.await;
    }
}

#[derive(Clone, Default)]
pub struct PerConversationQueue {
    workers: Workers,
}

impl std::fmt::Debug for PerConversationQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PerConversationQueue")
            .field("active", &self.active())
            .finish()
    }
}

fn lock(workers: &Workers) -> MutexGuard<'_, HashMap<String, mpsc::UnboundedSender<Job>>> {
    workers.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl PerConversationQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedules `task` after every task previously enqueued for the same
    /// conversation. Must be called from within a Tokio runtime.
    pub fn enqueue<F>(&self, conversation_id: &str, task: F) -> QueueTicket
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        let (done, ticket) = oneshot::channel();
        let mut job = Job {
            task: task.boxed(),
            done,
        };

        let mut workers = lock(&self.workers);
        if let Some(sender) = workers.get(conversation_id) {
            match sender.send(job) {
                Ok(()) => return QueueTicket { done: ticket },
                Err(mpsc::error::SendError(returned)) => job = returned,
            }
        }

        let (sender, receiver) = mpsc::unbounded_channel();
        // The receiver is alive until the worker below drops it.
        let _ = sender.send(job);
        workers.insert(conversation_id.to_string(), sender);
        drop(workers);

        debug!(conversation_id = %conversation_id, "queue worker started");
        tokio::spawn(run_worker(
            conversation_id.to_string(),
            receiver,
            self.workers.clone(),
        ));
        QueueTicket { done: ticket }
    }

    /// Number of conversations with a live worker.
    pub fn active(&self) -> usize {
        lock(&self.workers).len()
    }
}

async fn run_worker(conversation_id: String, mut receiver: mpsc::UnboundedReceiver<Job>, workers: Workers) {
    loop {
        let job = match receiver.try_recv() {
            Ok(job) => job,
            Err(_) => {
                // Enqueue sends while holding the map lock, so an empty
                // channel observed under the lock stays empty.
                let mut map = lock(&workers);
                match receiver.try_recv() {
                    Ok(job) => job,
                    Err(_) => {
                        map.remove(&conversation_id);
                        debug!(conversation_id = %conversation_id, "queue worker idle, exiting");
                        return;
                    }
                }
            }
        };

        match AssertUnwindSafe(job.task).catch_unwind().await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                error!(conversation_id = %conversation_id, error = %err, "queued task failed");
            }
            Err(_) => {
                error!(conversation_id = %conversation_id, "queued task panicked");
            }
        }
        let _ = job.done.send(());
    }
}
