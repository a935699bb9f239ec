use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use futures::future::{BoxFuture, FutureExt};
use tokio::signal;
use tokio::task::JoinHandle;

pub type CleanupFuture = BoxFuture<'static, ()>;
type CleanupFn = Box<dyn FnOnce() -> CleanupFuture + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CleanupId(u64);

struct Entry {
    id: CleanupId,
    label: String,
    action: CleanupFn,
}

/// Cleanup actions pending for the lifetime of a run.
///
/// Whoever starts a run registers its teardown here and unregisters it once
/// its own teardown has finished. The interrupt handler calls [`run_all`],
/// which drains the list, so each action fires at most once.
///
/// [`run_all`]: CleanupRegistry::run_all
#[derive(Default)]
pub struct CleanupRegistry {
    next_id: AtomicU64,
    entries: Mutex<Vec<Entry>>,
}

impl CleanupRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F, Fut>(&self, label: &str, action: F) -> CleanupId
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let id = CleanupId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let action: CleanupFn = Box::new(move || action().boxed());
        self.lock().push(Entry {
            id,
            label: label.to_string(),
            action,
        });
        tracing::debug!(label, "Registered cleanup");
        id
    }

    /// Drop a registration without running it. Returns false if it was
    /// already gone (ran or unregistered).
    pub fn unregister(&self, id: CleanupId) -> bool {
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|e| e.id != id);
        before != entries.len()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run every pending action, most recent first. Returns how many ran.
    pub async fn run_all(&self) -> usize {
        let entries: Vec<Entry> = std::mem::take(&mut *self.lock());
        let count = entries.len();
        for entry in entries.into_iter().rev() {
            tracing::info!(label = %entry.label, "Running cleanup");
            (entry.action)().await;
        }
        count
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Entry>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Wait for an interrupt (SIGINT or SIGTERM). Returns the signal name.
pub async fn wait_for_interrupt() -> &'static str {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => "SIGINT",
        _ = terminate => "SIGTERM",
    }
}

/// Spawn the process-wide interrupt handler.
///
/// The first interrupt runs every registered cleanup and exits with 130. A
/// second interrupt while cleanup is still running exits immediately.
pub fn install_interrupt_handler(registry: Arc<CleanupRegistry>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let signal = wait_for_interrupt().await;
        tracing::warn!(signal, pending = registry.len(), "Interrupted, tearing down");
        eprintln!("\nInterrupted. Cleaning up (press Ctrl+C again to force exit)...");

        tokio::select! {
            count = registry.run_all() => {
                tracing::info!(count, "Cleanup after interrupt complete");
                std::process::exit(130);
            }
            signal = wait_for_interrupt() => {
                eprintln!("Received {signal} during cleanup, forcing exit. Run `spindle containers --clean --force` to remove leftovers.");
                std::process::exit(130);
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counting(counter: &Arc<AtomicUsize>) -> impl FnOnce() -> CleanupFuture + Send + 'static {
        let counter = Arc::clone(counter);
        move || {
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
            .boxed()
        }
    }

    #[tokio::test]
    async fn test_run_all_drains_registry() {
        let registry = CleanupRegistry::new();
        let counter = Arc::new(AtomicUsize::new(0));
        registry.register("a", counting(&counter));
        registry.register("b", counting(&counter));

        assert_eq!(registry.run_all().await, 2);
        assert_eq!(counter.load(Ordering::SeqCst), 2);
        assert!(registry.is_empty());

        // A second pass has nothing left to run.
        assert_eq!(registry.run_all().await, 0);
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_unregister_prevents_run() {
        let registry = CleanupRegistry::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let id = registry.register("env", counting(&counter));

        assert!(registry.unregister(id));
        assert!(!registry.unregister(id));
        assert_eq!(registry.run_all().await, 0);
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_run_all_is_lifo() {
        let registry = CleanupRegistry::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for name in ["first", "second"] {
            let order = Arc::clone(&order);
            registry.register(name, move || async move {
                order.lock().unwrap().push(name);
            });
        }
        registry.run_all().await;
        assert_eq!(*order.lock().unwrap(), vec!["second", "first"]);
    }
}
