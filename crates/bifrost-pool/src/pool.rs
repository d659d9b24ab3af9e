//! Rotating credential pool.
//!
//! Lock layering, outermost first:
//!   1. `slots` RwLock — held only to read or reshape the slot vector
//!      (admin mutations). Never held across an await that touches a
//!      slot mutex.
//!   2. per-slot `tokio::sync::Mutex<Credential>` — guards the mutable
//!      auth/quota fields. Refreshes happen while holding it, which is
//!      what serializes concurrent refreshes of the same credential.
//!   3. `hot` atomic — index of the last credential that worked. Racy
//!      by design: a stale read just means one extra scan.
//!
//! Cancellation: a caller dropped mid-refresh drops the backend future
//! before any state is written, so the credential keeps its pre-refresh
//! token.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use bifrost_core::config::AuthTokenEntry;
use bifrost_core::error::{BifrostError, Result};

use crate::credential::{Credential, UsageLimits};

/// Consecutive refresh failures before a credential is disabled.
pub const MAX_REFRESH_FAILURES: u32 = 5;

/// Quota snapshots older than this are re-polled.
pub const QUOTA_MAX_AGE_SECS: i64 = 300;

/// Maintenance sweep cadence.
pub const MAINTENANCE_INTERVAL_SECS: u64 = 300;

const NO_HOT: usize = usize::MAX;

/// A fresh access token from the upstream auth endpoint.
#[derive(Debug, Clone)]
pub struct RefreshedToken {
    pub access_token: String,
    pub expires_at: DateTime<Utc>,
}

/// Result of polling the upstream usage endpoint.
#[derive(Debug, Clone)]
pub struct QuotaSnapshot {
    pub limits: UsageLimits,
    pub owner_email: Option<String>,
}

/// The pool's window onto the network: token refresh and quota polls.
/// The HTTP implementation lives in the upstream client crate; tests
/// substitute a mock.
#[async_trait]
pub trait AuthBackend: Send + Sync {
    async fn refresh(&self, credential: &Credential) -> Result<RefreshedToken>;
    async fn poll_quota(&self, access_token: &str) -> Result<QuotaSnapshot>;
}

/// What `acquire()` hands to a request task. Holds copies, not
/// references: the pool owns all credential state.
#[derive(Debug, Clone)]
pub struct Lease {
    pub credential_id: String,
    pub access_token: String,
}

struct Slot {
    id: String,
    state: Mutex<Credential>,
}

pub struct CredentialPool {
    slots: RwLock<Vec<Arc<Slot>>>,
    hot: AtomicUsize,
    backend: Arc<dyn AuthBackend>,
}

impl CredentialPool {
    pub fn new(entries: &[AuthTokenEntry], backend: Arc<dyn AuthBackend>) -> Self {
        let slots = entries
            .iter()
            .map(|entry| {
                Arc::new(Slot {
                    id: entry.id.clone(),
                    state: Mutex::new(Credential::from_entry(entry)),
                })
            })
            .collect();
        Self {
            slots: RwLock::new(slots),
            hot: AtomicUsize::new(NO_HOT),
            backend,
        }
    }

    /// Acquire a usable credential, refreshing and polling quota as
    /// needed. Tries the hot slot first without scanning.
    pub async fn acquire(&self) -> Result<Lease> {
        let now = Utc::now();
        let slots = self.slots.read().await.clone();

        // Hot fast path: most requests land here.
        let hot = self.hot.load(Ordering::Relaxed);
        if let Some(slot) = slots.get(hot) {
            let mut cred = slot.state.lock().await;
            if cred.usable(now) && !cred.needs_refresh(now) {
                cred.last_used = Some(now);
                return Ok(Lease {
                    credential_id: cred.id.clone(),
                    access_token: cred.access_token.clone(),
                });
            }
        }

        // Slow path: scan in configuration order.
        for (index, slot) in slots.iter().enumerate() {
            let mut cred = slot.state.lock().await;
            if !cred.enabled {
                continue;
            }

            if cred.needs_refresh(now) && !self.refresh_locked(&mut cred).await {
                continue;
            }
            if cred.quota_stale(now, Duration::seconds(QUOTA_MAX_AGE_SECS)) {
                self.poll_quota_locked(&mut cred).await;
            }

            if cred.usable(now) {
                self.hot.store(index, Ordering::Relaxed);
                cred.last_used = Some(now);
                return Ok(Lease {
                    credential_id: cred.id.clone(),
                    access_token: cred.access_token.clone(),
                });
            }
        }

        Err(BifrostError::NoCredentialAvailable(
            "no enabled credential has a live token and remaining quota".to_string(),
        ))
    }

    /// Report the outcome of a request made with a leased credential.
    pub async fn release(&self, credential_id: &str, succeeded: bool) {
        let Some(slot) = self.slot_by_id(credential_id).await else {
            return;
        };
        let mut cred = slot.state.lock().await;
        cred.last_used = Some(Utc::now());
        if succeeded {
            cred.error_count = 0;
        } else {
            cred.error_count += 1;
        }
    }

    /// Refresh while the slot mutex is held. Returns whether the
    /// credential is still worth considering.
    async fn refresh_locked(&self, cred: &mut Credential) -> bool {
        debug!(credential = %cred.id, "refreshing access token");
        match self.backend.refresh(cred).await {
            Ok(token) => {
                cred.access_token = token.access_token;
                cred.expires_at = Some(token.expires_at);
                cred.error_count = 0;
                info!(
                    credential = %cred.id,
                    token = %cred.token_preview(),
                    expires_at = %token.expires_at,
                    "access token refreshed"
                );
                true
            }
            Err(e) => {
                cred.error_count += 1;
                warn!(
                    credential = %cred.id,
                    failures = cred.error_count,
                    error = %e,
                    "token refresh failed"
                );
                if cred.error_count >= MAX_REFRESH_FAILURES {
                    cred.enabled = false;
                    warn!(
                        credential = %cred.id,
                        "credential disabled after {MAX_REFRESH_FAILURES} consecutive refresh failures"
                    );
                }
                false
            }
        }
    }

    /// Poll quota while the slot mutex is held. A transient failure
    /// keeps the previous snapshot and flags the poll as errored.
    async fn poll_quota_locked(&self, cred: &mut Credential) {
        match self.backend.poll_quota(&cred.access_token).await {
            Ok(snapshot) => {
                cred.quota = Some(snapshot.limits);
                if let Some(email) = snapshot.owner_email {
                    cred.owner_email = email;
                }
                cred.last_quota_poll = Some(Utc::now());
                cred.last_poll_error = false;
            }
            Err(e) => {
                warn!(credential = %cred.id, error = %e, "quota poll failed");
                cred.last_poll_error = true;
            }
        }
    }

    /// One maintenance pass: preemptive refresh, stale-quota polling,
    /// and eviction of a no-longer-usable hot credential.
    pub async fn sweep(&self) {
        let now = Utc::now();
        let slots = self.slots.read().await.clone();

        for (index, slot) in slots.iter().enumerate() {
            let mut cred = slot.state.lock().await;
            if !cred.enabled {
                self.evict_hot_if(index);
                continue;
            }
            if cred.needs_refresh(now) {
                self.refresh_locked(&mut cred).await;
            }
            if cred.quota_stale(now, Duration::seconds(QUOTA_MAX_AGE_SECS)) {
                self.poll_quota_locked(&mut cred).await;
            }
            if !cred.usable(now) {
                self.evict_hot_if(index);
            }
        }
    }

    fn evict_hot_if(&self, index: usize) {
        // only clear the hot slot if it still points at this credential
        let _ = self
            .hot
            .compare_exchange(index, NO_HOT, Ordering::Relaxed, Ordering::Relaxed);
    }

    /// Background maintenance loop; spawn once at startup.
    pub async fn run_maintenance(self: Arc<Self>) {
        let mut ticker =
            tokio::time::interval(std::time::Duration::from_secs(MAINTENANCE_INTERVAL_SECS));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // the first tick fires immediately; skip it so startup isn't
        // serialized behind a full sweep
        ticker.tick().await;
        loop {
            ticker.tick().await;
            debug!("credential pool maintenance sweep");
            self.sweep().await;
        }
    }

    // ── Admin mutations ─────────────────────────────────────────────

    pub async fn insert(&self, entry: &AuthTokenEntry) {
        let mut slots = self.slots.write().await;
        slots.push(Arc::new(Slot {
            id: entry.id.clone(),
            state: Mutex::new(Credential::from_entry(entry)),
        }));
    }

    pub async fn remove(&self, credential_id: &str) -> bool {
        let mut slots = self.slots.write().await;
        let before = slots.len();
        slots.retain(|slot| slot.id != credential_id);
        let removed = slots.len() != before;
        if removed {
            // indices shifted; drop the fast path until the next acquire
            self.hot.store(NO_HOT, Ordering::Relaxed);
        }
        removed
    }

    /// Snapshot of every credential's state, for status reporting.
    pub async fn snapshot(&self) -> Vec<Credential> {
        let slots = self.slots.read().await.clone();
        let mut out = Vec::with_capacity(slots.len());
        for slot in slots {
            out.push(slot.state.lock().await.clone());
        }
        out
    }

    /// Run a closure against one credential's locked state. Admin and
    /// test hook; request paths use `acquire`/`release`.
    pub async fn with_credential<F, T>(&self, credential_id: &str, f: F) -> Option<T>
    where
        F: FnOnce(&mut Credential) -> T,
    {
        let slot = self.slot_by_id(credential_id).await?;
        let mut cred = slot.state.lock().await;
        Some(f(&mut cred))
    }

    async fn slot_by_id(&self, credential_id: &str) -> Option<Arc<Slot>> {
        self.slots
            .read()
            .await
            .iter()
            .find(|slot| slot.id == credential_id)
            .cloned()
    }
}
