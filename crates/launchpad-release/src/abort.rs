//! Operator abort, as seen by a running driver.

use std::future::Future;

use tokio::sync::watch;

/// Create the sending half kept by the orchestrator and the signal handed
/// to the driver. `raised` seeds the signal with a persisted abort flag.
pub fn abort_channel(raised: bool) -> (watch::Sender<bool>, AbortSignal) {
    let (tx, rx) = watch::channel(raised);
    (tx, AbortSignal { rx })
}

/// A signal that follows an existing sender.
pub fn signal_for(tx: &watch::Sender<bool>) -> AbortSignal {
    AbortSignal { rx: tx.subscribe() }
}

#[derive(Debug, Clone)]
pub struct AbortSignal {
    rx: watch::Receiver<bool>,
}

impl AbortSignal {
    /// A signal that is never raised.
    pub fn never() -> Self {
        abort_channel(false).1
    }

    pub fn is_raised(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once the abort is raised. Never resolves if the sender is
    /// gone without raising it.
    pub async fn raised(&self) {
        let mut rx = self.rx.clone();
        if rx.wait_for(|raised| *raised).await.is_err() {
            std::future::pending::<()>().await;
        }
    }

    /// Run `fut` unless the abort is raised first. Only waits go through
    /// here; cluster mutations always run to completion.
    pub async fn guard<F: Future>(&self, fut: F) -> Option<F::Output> {
        tokio::select! {
            biased;
            _ = self.raised() => None,
            out = fut => Some(out),
        }
    }
}
