//! Interrupt handling
//!
//! An interrupt does not cancel runtime calls that are already in flight.
//! It only stops new work from being started; the controller then unwinds
//! what the current batch brought up. A second interrupt exits at once.

use crate::error::ExitStatus;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared interrupt flag
#[derive(Debug, Clone, Default)]
pub struct Interrupt(Arc<AtomicBool>);

impl Interrupt {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_triggered(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Trigger this flag on the first SIGINT or SIGTERM; exit the process
    /// on the second
    pub fn listen(&self) {
        let interrupt = self.clone();
        tokio::spawn(async move {
            match interrupt.escalate(wait_for_shutdown_signal).await {
                Ok(()) => {
                    tracing::error!("Interrupted again; exiting without cleanup");
                    std::process::exit(ExitStatus::Aborted.code());
                }
                Err(e) => tracing::debug!("Signal handler unavailable: {}", e),
            }
        });
    }

    /// Trigger on the first signal from `next_signal`, return on the second
    async fn escalate<F, Fut>(&self, mut next_signal: F) -> std::io::Result<()>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::io::Result<()>>,
    {
        next_signal().await?;
        tracing::warn!("Interrupted; finishing in-flight operations (interrupt again to exit now)");
        self.trigger();
        next_signal().await
    }
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result,
        _ = sigterm.recv() => Ok(()),
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_the_flag() {
        let interrupt = Interrupt::new();
        let other = interrupt.clone();
        assert!(!other.is_triggered());

        interrupt.trigger();
        assert!(other.is_triggered());
    }

    #[tokio::test]
    async fn test_second_signal_ends_the_watch() {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel::<()>();
        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        let interrupt = Interrupt::new();

        let watcher = {
            let interrupt = interrupt.clone();
            tokio::spawn(async move {
                interrupt
                    .escalate(|| {
                        let rx = Arc::clone(&rx);
                        async move {
                            rx.lock().await.recv().await;
                            Ok(())
                        }
                    })
                    .await
            })
        };

        tx.send(()).unwrap();
        while !interrupt.is_triggered() {
            tokio::task::yield_now().await;
        }
        assert!(!watcher.is_finished());

        tx.send(()).unwrap();
        assert!(watcher.await.unwrap().is_ok());
    }
}
