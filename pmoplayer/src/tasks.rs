//! File de travaux d'arrière-plan d'une session
//!
//! Les gestionnaires d'évènements ne bloquent jamais sur les E/S : ils
//! soumettent leurs écritures ici. Un unique worker exécute les travaux dans
//! l'ordre de soumission, sans exception : une file en retard grossit (et le
//! signale dans les journaux) plutôt que de réordonner les écritures.
//!
//! Tout est rattaché au jeton d'annulation de la session : [`BackgroundTasks::shutdown`]
//! laisse d'abord la file se vider, puis annule ce qui reste.

use futures::future::BoxFuture;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, trace, warn};

use crate::errors::{PlayerError, Result};

pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

enum Job {
    Run {
        label: &'static str,
        work: BoxFuture<'static, ()>,
    },
    Flush(oneshot::Sender<()>),
}

pub struct BackgroundTasks {
    sender: mpsc::UnboundedSender<Job>,
    backlog: Arc<AtomicUsize>,
    capacity: usize,
    tracker: TaskTracker,
    token: CancellationToken,
}

impl BackgroundTasks {
    /// Démarre le worker. Doit être appelé depuis un runtime tokio.
    ///
    /// `capacity` est le retard au-delà duquel la file est signalée comme
    /// saturée ; les travaux suivants sont tout de même acceptés, dans l'ordre.
    pub fn new(capacity: usize) -> Result<Self> {
        let runtime = Handle::try_current().map_err(|e| PlayerError::NoRuntime(e.to_string()))?;
        let (sender, receiver) = mpsc::unbounded_channel();
        let backlog = Arc::new(AtomicUsize::new(0));
        let tracker = TaskTracker::new();
        let token = CancellationToken::new();
        tracker.spawn_on(worker(receiver, backlog.clone(), token.clone()), &runtime);
        Ok(Self {
            sender,
            backlog,
            capacity: capacity.max(1),
            tracker,
            token,
        })
    }

    /// Jeton annulé à la fermeture de la session
    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn is_shut_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Travaux soumis et pas encore terminés
    pub fn backlog(&self) -> usize {
        self.backlog.load(Ordering::SeqCst)
    }

    /// Soumet un travail. Un échec est journalisé puis oublié.
    pub fn submit<F>(&self, label: &'static str, work: F)
    where
        F: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        if self.token.is_cancelled() {
            debug!(task = label, "Background task dropped, session closed");
            return;
        }
        let work: BoxFuture<'static, ()> = Box::pin(async move {
            if let Err(e) = work.await {
                warn!(task = label, "Background task failed: {:#}", e);
            }
        });

        let pending = self.backlog.fetch_add(1, Ordering::SeqCst) + 1;
        if pending == self.capacity + 1 {
            warn!(task = label, capacity = self.capacity, "Background queue saturated, writes delayed");
        }
        if self.sender.send(Job::Run { label, work }).is_err() {
            self.backlog.fetch_sub(1, Ordering::SeqCst);
            debug!(task = label, "Background queue closed, task dropped");
        }
    }

    /// Attend que tous les travaux soumis avant l'appel soient terminés
    pub async fn flush(&self) {
        let (tx, rx) = oneshot::channel();
        if self.sender.send(Job::Flush(tx)).is_ok() {
            let _ = rx.await;
        }
    }

    /// Vide la file (dans la limite de `grace`), puis annule le reste
    pub async fn shutdown(&self, grace: Duration) {
        if self.token.is_cancelled() {
            return;
        }
        if tokio::time::timeout(grace, self.flush()).await.is_err() {
            warn!(?grace, backlog = self.backlog(), "Background queue not drained in time, cancelling");
        }
        self.token.cancel();
        self.tracker.close();
        self.tracker.wait().await;
    }
}

async fn worker(
    mut receiver: mpsc::UnboundedReceiver<Job>,
    backlog: Arc<AtomicUsize>,
    token: CancellationToken,
) {
    loop {
        let job = tokio::select! {
            biased;
            _ = token.cancelled() => break,
            job = receiver.recv() => match job {
                Some(job) => job,
                None => break,
            },
        };

        match job {
            Job::Run { label, work } => {
                trace!(task = label, "running background task");
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = work => {}
                }
                backlog.fetch_sub(1, Ordering::SeqCst);
            }
            Job::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
    receiver.close();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[tokio::test]
    async fn test_tasks_run_in_submission_order() {
        let tasks = BackgroundTasks::new(4).unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for i in 0..3 {
            let seen = seen.clone();
            tasks.submit("record", async move {
                tokio::time::sleep(Duration::from_millis(5 * (3 - i))).await;
                seen.lock().unwrap().push(i);
                Ok(())
            });
        }
        tasks.flush().await;
        assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_saturated_queue_keeps_write_order() {
        let tasks = BackgroundTasks::new(1).unwrap();
        let positions = Arc::new(Mutex::new(Vec::new()));
        for position in 1..=4u64 {
            let positions = positions.clone();
            tasks.submit("update_position", async move {
                if position == 1 {
                    tokio::time::sleep(Duration::from_millis(30)).await;
                }
                positions.lock().unwrap().push(position);
                Ok(())
            });
        }
        assert_eq!(tasks.backlog(), 4);

        tasks.flush().await;
        assert_eq!(*positions.lock().unwrap(), vec![1, 2, 3, 4]);
        assert_eq!(tasks.backlog(), 0);
    }

    #[tokio::test]
    async fn test_failures_are_swallowed() {
        let tasks = BackgroundTasks::new(4).unwrap();
        tasks.submit("fail", async { Err(anyhow::anyhow!("disk full")) });
        let ran = Arc::new(Mutex::new(false));
        let flag = ran.clone();
        tasks.submit("after", async move {
            *flag.lock().unwrap() = true;
            Ok(())
        });
        tasks.flush().await;
        assert!(*ran.lock().unwrap());
    }

    #[tokio::test]
    async fn test_shutdown_cancels_stuck_work() {
        let tasks = BackgroundTasks::new(4).unwrap();
        let token = tasks.cancellation_token();
        tasks.submit("stuck", async {
            futures::future::pending::<()>().await;
            Ok(())
        });
        tasks.shutdown(Duration::from_millis(20)).await;
        assert!(token.is_cancelled());

        // Plus rien n'est accepté
        tasks.submit("late", async { Ok(()) });
        assert!(tasks.is_shut_down());
    }
}
