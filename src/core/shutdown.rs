//! Process shutdown coordination
//!
//! Signals escalate: the first interrupt asks for a graceful drain, the
//! second for an immediate close, and a third exits the process.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::broadcast;

use crate::deliver::ShutdownMode;

/// Exit status used when the user interrupts a shutdown that is already running.
pub const INTERRUPTED_EXIT_CODE: i32 = 130;

/// Fans a shutdown request out to every subscriber.
#[derive(Clone)]
pub struct ShutdownCoordinator {
    shutdown_tx: broadcast::Sender<ShutdownMode>,
    requests: Arc<AtomicUsize>,
}

impl ShutdownCoordinator {
    pub fn new() -> (Self, broadcast::Receiver<ShutdownMode>) {
        let (shutdown_tx, shutdown_rx) = broadcast::channel(8);
        let coordinator = Self {
            shutdown_tx,
            requests: Arc::new(AtomicUsize::new(0)),
        };
        (coordinator, shutdown_rx)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ShutdownMode> {
        self.shutdown_tx.subscribe()
    }

    /// Records one shutdown request and returns the mode it maps to.
    pub fn trigger_shutdown(&self) -> ShutdownMode {
        let previous = self.requests.fetch_add(1, Ordering::AcqRel);
        let mode = if previous == 0 {
            ShutdownMode::Graceful
        } else {
            ShutdownMode::Immediate
        };
        let _ = self.shutdown_tx.send(mode);
        mode
    }

    pub fn is_shutdown_requested(&self) -> bool {
        self.requests.load(Ordering::Acquire) > 0
    }

    pub fn request_count(&self) -> usize {
        self.requests.load(Ordering::Acquire)
    }

    /// Runs `future_fn` with signal handlers installed for the duration.
    pub async fn guard<F, Fut, R, E>(future_fn: F) -> Result<R, E>
    where
        F: FnOnce(Self, broadcast::Receiver<ShutdownMode>) -> Fut,
        Fut: std::future::Future<Output = Result<R, E>>,
    {
        let (coordinator, shutdown_rx) = Self::new();
        setup_signal_handlers(coordinator.clone());
        future_fn(coordinator, shutdown_rx).await
    }

    fn on_signal(&self, name: &str) {
        if self.request_count() >= 2 {
            log::warn!("{} received again; exiting", name);
            std::process::exit(INTERRUPTED_EXIT_CODE);
        }
        let mode = self.trigger_shutdown();
        log::info!("{} received; {} shutdown requested", name, mode);
    }
}

/// Logs and exits the process. Used for conditions the process cannot survive.
pub fn fatal_exit(code: i32) -> ! {
    log::error!("fatal condition, exiting with status {}", code);
    log::logger().flush();
    std::process::exit(code)
}

fn setup_signal_handlers(coordinator: ShutdownCoordinator) {
    #[cfg(unix)]
    {
        // SAFETY: restoring the default disposition for SIGPIPE has no preconditions
        unsafe {
            libc::signal(libc::SIGPIPE, libc::SIG_DFL);
        }

        use tokio::signal::unix::{signal, SignalKind};
        let signals = [
            ("SIGTERM", SignalKind::terminate()),
            ("SIGHUP", SignalKind::hangup()),
            ("SIGQUIT", SignalKind::quit()),
        ];

        for (name, kind) in signals {
            let coordinator = coordinator.clone();
            tokio::spawn(async move {
                if let Ok(mut sig) = signal(kind) {
                    while sig.recv().await.is_some() {
                        coordinator.on_signal(name);
                    }
                }
            });
        }
    }

    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            coordinator.on_signal("Ctrl-C");
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{timeout, Duration};

    #[tokio::test]
    async fn test_coordinator_starts_idle() {
        let (coordinator, _rx) = ShutdownCoordinator::new();
        assert!(!coordinator.is_shutdown_requested());
        assert_eq!(coordinator.request_count(), 0);
    }

    #[tokio::test]
    async fn test_second_request_escalates_to_immediate() {
        let (coordinator, mut rx) = ShutdownCoordinator::new();

        assert_eq!(coordinator.trigger_shutdown(), ShutdownMode::Graceful);
        assert_eq!(coordinator.trigger_shutdown(), ShutdownMode::Immediate);
        assert!(coordinator.is_shutdown_requested());

        let first = timeout(Duration::from_millis(100), rx.recv()).await.unwrap();
        let second = timeout(Duration::from_millis(100), rx.recv()).await.unwrap();
        assert_eq!(first.unwrap(), ShutdownMode::Graceful);
        assert_eq!(second.unwrap(), ShutdownMode::Immediate);
    }

    #[tokio::test]
    async fn test_every_subscriber_is_notified() {
        let (coordinator, _rx) = ShutdownCoordinator::new();
        let mut a = coordinator.subscribe();
        let mut b = coordinator.clone().subscribe();

        coordinator.trigger_shutdown();

        assert!(timeout(Duration::from_millis(100), a.recv()).await.is_ok());
        assert!(timeout(Duration::from_millis(100), b.recv()).await.is_ok());
    }

    #[tokio::test]
    async fn test_guard_runs_future() {
        let result = ShutdownCoordinator::guard(|coordinator, mut shutdown_rx| async move {
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_millis(20)) => {
                    Ok::<bool, &str>(coordinator.is_shutdown_requested())
                }
                _ = shutdown_rx.recv() => Err("interrupted"),
            }
        })
        .await;

        assert_eq!(result, Ok(false));
    }
}
