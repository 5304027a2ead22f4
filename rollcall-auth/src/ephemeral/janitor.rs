//! Shared background sweeper for ephemeral stores.
//!
//! One task owns the list of registered stores. Registration and
//! deregistration are messages to that task, so the list is never shared and
//! a deregistration acknowledgement guarantees no sweep of that store is in
//! flight.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Smallest accepted sweep interval.
const MIN_INTERVAL: Duration = Duration::from_millis(10);

/// Something the janitor can sweep.
pub trait Sweep: Send + Sync + 'static {
    /// Drop expired entries, returning how many were removed.
    fn sweep(&self) -> usize;
}

enum Command {
    Register {
        id: u64,
        target: Weak<dyn Sweep>,
    },
    Deregister {
        id: u64,
        ack: oneshot::Sender<()>,
    },
}

struct Inner {
    commands: mpsc::UnboundedSender<Command>,
    next_id: AtomicU64,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

/// Handle to the sweeper task. Cheap to clone.
#[derive(Clone)]
pub struct Janitor {
    inner: Arc<Inner>,
}

impl Janitor {
    /// Spawn the sweeper on the current tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn start(interval: Duration) -> Self {
        let interval = interval.max(MIN_INTERVAL);
        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let task = tokio::spawn(run(rx, cancel.clone(), interval));
        tracing::debug!(interval = ?interval, "Janitor started");

        Self {
            inner: Arc::new(Inner {
                commands: tx,
                next_id: AtomicU64::new(1),
                cancel,
                task: Mutex::new(Some(task)),
            }),
        }
    }

    /// Register a sweep target.
    ///
    /// Targets that have been dropped are pruned on the next tick.
    pub fn register(&self, target: Weak<dyn Sweep>) -> Registration {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        // A stopped janitor simply never sweeps the target
        let _ = self.inner.commands.send(Command::Register { id, target });
        Registration {
            id,
            commands: self.inner.commands.clone(),
        }
    }

    pub fn is_running(&self) -> bool {
        !self.inner.cancel.is_cancelled()
    }

    /// Stop the sweeper and wait for its task to exit.
    pub async fn shutdown(&self) {
        self.inner.cancel.cancel();
        let task = self.inner.task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "Janitor task ended abnormally");
            }
        }
    }
}

impl std::fmt::Debug for Janitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Janitor")
            .field("running", &self.is_running())
            .finish()
    }
}

/// Ticket returned by [`Janitor::register`].
#[derive(Debug)]
pub struct Registration {
    id: u64,
    commands: mpsc::UnboundedSender<Command>,
}

impl Registration {
    /// Remove the target and wait until the janitor acknowledges it.
    pub async fn deregister(self) {
        let (ack, done) = oneshot::channel();
        if self
            .commands
            .send(Command::Deregister { id: self.id, ack })
            .is_err()
        {
            return;
        }
        // Err means the janitor stopped, which also means no sweep is running
        let _ = done.await;
    }
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Register { id, .. } => f.debug_struct("Register").field("id", id).finish(),
            Self::Deregister { id, .. } => f.debug_struct("Deregister").field("id", id).finish(),
        }
    }
}

async fn run(
    mut commands: mpsc::UnboundedReceiver<Command>,
    cancel: CancellationToken,
    interval: Duration,
) {
    let mut targets: HashMap<u64, Weak<dyn Sweep>> = HashMap::new();
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => break,

            command = commands.recv() => match command {
                Some(Command::Register { id, target }) => {
                    targets.insert(id, target);
                }
                Some(Command::Deregister { id, ack }) => {
                    targets.remove(&id);
                    let _ = ack.send(());
                }
                None => break,
            },

            _ = ticker.tick() => {
                let mut removed = 0;
                targets.retain(|_, target| match target.upgrade() {
                    Some(store) => {
                        removed += store.sweep();
                        true
                    }
                    None => false,
                });
                if removed > 0 {
                    tracing::debug!(removed, stores = targets.len(), "Swept expired entries");
                }
            }
        }
    }

    tracing::debug!("Janitor stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct Counter {
        sweeps: AtomicUsize,
    }

    impl Sweep for Counter {
        fn sweep(&self) -> usize {
            self.sweeps.fetch_add(1, Ordering::SeqCst);
            0
        }
    }

    fn weak(counter: &Arc<Counter>) -> Weak<dyn Sweep> {
        let target: Arc<dyn Sweep> = counter.clone();
        Arc::downgrade(&target)
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_janitor_keeps_ticking() {
        let janitor = Janitor::start(Duration::from_secs(1));
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(janitor.is_running());
        janitor.shutdown().await;
        assert!(!janitor.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_registered_targets_are_swept() {
        let janitor = Janitor::start(Duration::from_secs(1));
        let a = Arc::new(Counter::default());
        let b = Arc::new(Counter::default());
        let _ra = janitor.register(weak(&a));
        let _rb = janitor.register(weak(&b));

        tokio::time::sleep(Duration::from_millis(3500)).await;

        assert_eq!(a.sweeps.load(Ordering::SeqCst), 3);
        assert_eq!(b.sweeps.load(Ordering::SeqCst), 3);
        janitor.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_deregistered_target_is_not_swept() {
        let janitor = Janitor::start(Duration::from_secs(1));
        let counter = Arc::new(Counter::default());
        let registration = janitor.register(weak(&counter));

        tokio::time::sleep(Duration::from_millis(1500)).await;
        registration.deregister().await;
        let after_close = counter.sweeps.load(Ordering::SeqCst);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(counter.sweeps.load(Ordering::SeqCst), after_close);
        assert_eq!(after_close, 1);
        janitor.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_target_is_pruned() {
        let janitor = Janitor::start(Duration::from_secs(1));
        let counter = Arc::new(Counter::default());
        let target = weak(&counter);
        let _registration = janitor.register(target.clone());
        drop(counter);

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(target.upgrade().is_none());
        janitor.shutdown().await;
    }

    #[tokio::test]
    async fn test_deregister_after_shutdown_returns() {
        let janitor = Janitor::start(Duration::from_secs(60));
        let counter = Arc::new(Counter::default());
        let registration = janitor.register(weak(&counter));

        janitor.shutdown().await;
        tokio::time::timeout(Duration::from_secs(1), registration.deregister())
            .await
            .expect("deregister must not hang once the janitor stopped");
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_registration() {
        let janitor = Janitor::start(Duration::from_secs(1));
        let counters: Vec<Arc<Counter>> = (0..16).map(|_| Arc::new(Counter::default())).collect();

        let handles: Vec<_> = counters
            .iter()
            .map(|c| {
                let janitor = janitor.clone();
                let target = weak(c);
                tokio::spawn(async move { janitor.register(target) })
            })
            .collect();
        let mut registrations = Vec::new();
        for handle in handles {
            registrations.push(handle.await.unwrap());
        }

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(counters
            .iter()
            .all(|c| c.sweeps.load(Ordering::SeqCst) == 1));

        for registration in registrations {
            registration.deregister().await;
        }
        janitor.shutdown().await;
    }
}
