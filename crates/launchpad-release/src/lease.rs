//! Scoped ownership of a namespace lease.
//!
//! A [`LeaseGuard`] renews its lease in the background while the execution
//! runs and releases it when dropped, on every exit path. If a renewal
//! finds the lease taken over, the guard reports it as lost and the driver
//! stops touching the namespace.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use launchpad_core::config::LeaseConfig;
use launchpad_core::epoch_millis;
use launchpad_state::{NamespaceLease, StateStore};

pub struct LeaseGuard {
    store: StateStore,
    namespace: String,
    execution_id: String,
    holder: String,
    lost: Arc<AtomicBool>,
    renewer: JoinHandle<()>,
}

impl LeaseGuard {
    /// Take ownership of an acquired lease and start renewing it.
    pub fn start(store: StateStore, lease: &NamespaceLease, config: &LeaseConfig) -> Self {
        let lost = Arc::new(AtomicBool::new(false));
        let renewer = tokio::spawn(renew_loop(
            store.clone(),
            lease.namespace.clone(),
            lease.execution_id.clone(),
            lease.holder.clone(),
            config.clone(),
            lost.clone(),
        ));
        debug!(namespace = %lease.namespace, execution = %lease.execution_id, "lease guard started");
        Self {
            store,
            namespace: lease.namespace.clone(),
            execution_id: lease.execution_id.clone(),
            holder: lease.holder.clone(),
            lost,
            renewer,
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// True once a renewal found the lease owned by someone else.
    pub fn is_lost(&self) -> bool {
        self.lost.load(Ordering::SeqCst)
    }
}

impl Drop for LeaseGuard {
    fn drop(&mut self) {
        self.renewer.abort();
        match self
            .store
            .release_lease(&self.namespace, &self.execution_id, &self.holder)
        {
            Ok(true) => debug!(namespace = %self.namespace, "lease released by guard"),
            Ok(false) => {}
            Err(e) => error!(namespace = %self.namespace, error = %e, "failed to release lease"),
        }
    }
}

async fn renew_loop(
    store: StateStore,
    namespace: String,
    execution_id: String,
    holder: String,
    config: LeaseConfig,
    lost: Arc<AtomicBool>,
) {
    let ttl_ms = config.ttl().as_millis() as u64;
    let mut ticker = tokio::time::interval(config.renew_interval());
    // The first tick completes immediately; the lease was just written.
    ticker.tick().await;
    loop {
        ticker.tick().await;
        match store.renew_lease(&namespace, &execution_id, &holder, ttl_ms, epoch_millis()) {
            Ok(true) => debug!(%namespace, execution = %execution_id, "lease renewed"),
            Ok(false) => {
                warn!(%namespace, execution = %execution_id, "lease lost to another holder");
                lost.store(true, Ordering::SeqCst);
                return;
            }
            Err(e) => error!(%namespace, error = %e, "lease renewal failed"),
        }
    }
}
