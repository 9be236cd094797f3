//! # Outbox
//!
//! Durable queue of remote writes. Local writes complete first; the matching
//! [`Mutation`] is queued here and delivered in FIFO order by
//! [`Outbox::drain`], either from the background [`OutboxWorker`] or at the
//! start of a sync.
//!
//! A retryable failure (unreachable, timeout, 5xx) keeps the entry at the
//! head of the queue with an exponential backoff, so later writes never
//! overtake earlier ones. Such an entry is never dropped however long the
//! outage lasts; past `alert_after_attempts` every failure is logged as an
//! error. Only permanent failures move to the dead-letter list.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;

use crate::storage::collections::{DeadLetters, OutboxQueue, Users};
use crate::storage::remote::{Mutation, OutboxEntry, RemoteError, RemoteGateway};
use crate::storage::RecordStore;

#[derive(Debug, Clone, PartialEq)]
pub struct OutboxConfig {
    /// Failed deliveries after which retries are logged as errors
    pub alert_after_attempts: u32,
    pub backoff_ms: u64,
    pub backoff_factor: u64,
    pub max_backoff_ms: u64,
    /// Worker wake-up interval when nothing notifies it
    pub poll_interval_secs: u64,
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self {
            alert_after_attempts: 8,
            backoff_ms: 1000,
            backoff_factor: 2,
            max_backoff_ms: 60_000,
            poll_interval_secs: 30,
        }
    }
}

impl OutboxConfig {
    /// Delay after the `attempts`-th failure: backoff_ms * factor^(attempts-1), capped
    pub fn backoff_for(&self, attempts: u32) -> Duration {
        let exponent = attempts.saturating_sub(1);
        let exponential = self
            .backoff_ms
            .saturating_mul(self.backoff_factor.saturating_pow(exponent));
        Duration::from_millis(exponential.min(self.max_backoff_ms))
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DrainReport {
    pub delivered: usize,
    pub remaining: usize,
    pub dead_lettered: usize,
}

#[derive(Clone)]
pub struct Outbox {
    store: RecordStore,
    gateway: RemoteGateway,
    config: OutboxConfig,
    notify: Arc<Notify>,
    drain_lock: Arc<Mutex<()>>,
}

impl Outbox {
    pub fn new(store: RecordStore, gateway: RemoteGateway, config: OutboxConfig) -> Self {
        Self {
            store,
            gateway,
            config,
            notify: Arc::new(Notify::new()),
            drain_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Queue a mutation and wake the worker
    pub async fn enqueue(&self, mutation: Mutation) -> Result<OutboxEntry> {
        let kind = mutation.kind();
        let entry = self
            .store
            .append::<OutboxQueue, _>(OutboxEntry::new(mutation))
            .await?;
        tracing::debug!(entry_id = %entry.id, kind, "Queued remote mutation");
        self.notify.notify_one();
        Ok(entry)
    }

    pub async fn pending(&self) -> Result<Vec<OutboxEntry>> {
        self.store.read::<OutboxQueue>().await
    }

    pub async fn pending_count(&self) -> Result<usize> {
        Ok(self.pending().await?.len())
    }

    pub async fn dead_letters(&self) -> Result<Vec<OutboxEntry>> {
        self.store.read::<DeadLetters>().await
    }

    /// Time until the head entry may be retried; `None` when the queue is empty
    pub async fn time_until_due(&self) -> Result<Option<Duration>> {
        let queue = self.pending().await?;
        Ok(queue.first().map(|entry| match entry.next_attempt_at {
            Some(at) => (at - Utc::now()).to_std().unwrap_or(Duration::ZERO),
            None => Duration::ZERO,
        }))
    }

    /// Deliver queued mutations in order.
    ///
    /// With `respect_backoff` an entry still inside its backoff window stops
    /// the drain without a delivery attempt. Only one drain runs at a time.
    pub async fn drain(&self, respect_backoff: bool) -> Result<DrainReport> {
        let _guard = self.drain_lock.lock().await;
        let mut report = DrainReport::default();

        loop {
            let head = match self.pending().await?.into_iter().next() {
                Some(entry) => entry,
                None => break,
            };
            if respect_backoff && !head.is_due(Utc::now()) {
                break;
            }

            match self.gateway.apply(&head.mutation).await {
                Ok(()) => {
                    self.store.remove::<OutboxQueue, _>(&head.id).await?;
                    report.delivered += 1;
                }
                Err(e) if e.is_retryable() => {
                    let attempts = head.attempts.saturating_add(1);
                    let delay = self.config.backoff_for(attempts);
                    let next_attempt_at = Utc::now()
                        + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());
                    self.reschedule(&head, attempts, e.to_string(), next_attempt_at).await?;
                    if attempts >= self.config.alert_after_attempts {
                        tracing::error!(
                            entry_id = %head.id,
                            kind = head.mutation.kind(),
                            attempts,
                            backoff_ms = delay.as_millis() as u64,
                            error = %e,
                            "Remote push still failing, local changes are waiting"
                        );
                    } else {
                        tracing::warn!(
                            entry_id = %head.id,
                            kind = head.mutation.kind(),
                            attempts,
                            backoff_ms = delay.as_millis() as u64,
                            error = %e,
                            "Remote push failed, will retry"
                        );
                    }
                    break;
                }
                Err(e) => {
                    if let (Mutation::CreateUser { user }, RemoteError::UserExists(_)) = (&head.mutation, &e) {
                        self.flag_registration_conflict(&user.user_id).await?;
                    }
                    let mut dead = head.clone();
                    dead.attempts += 1;
                    dead.last_error = Some(e.to_string());
                    self.store
                        .modify::<DeadLetters, _, _>(move |list| list.push(dead))
                        .await?;
                    self.store.remove::<OutboxQueue, _>(&head.id).await?;
                    report.dead_lettered += 1;
                    tracing::error!(
                        entry_id = %head.id,
                        kind = head.mutation.kind(),
                        error = %e,
                        "Remote push abandoned, moved to dead letters"
                    );
                }
            }
        }

        report.remaining = self.pending_count().await?;
        Ok(report)
    }

    /// A user registered offline lost the id to someone who registered
    /// remotely first; the local account must no longer log in
    async fn flag_registration_conflict(&self, user_id: &str) -> Result<()> {
        tracing::warn!(user_id, "Offline registration collided with an existing remote user");
        let user_id = user_id.to_string();
        self.store
            .modify::<Users, _, _>(move |users| {
                if let Some(user) = users.get_mut(&user_id) {
                    user.registration_conflict = true;
                }
            })
            .await
    }

    async fn reschedule(
        &self,
        entry: &OutboxEntry,
        attempts: u32,
        error: String,
        next_attempt_at: DateTime<Utc>,
    ) -> Result<()> {
        let id = entry.id.clone();
        self.store
            .modify::<OutboxQueue, _, _>(move |queue| {
                if let Some(queued) = queue.iter_mut().find(|e| e.id == id) {
                    queued.attempts = attempts;
                    queued.last_error = Some(error);
                    queued.next_attempt_at = Some(next_attempt_at);
                }
            })
            .await
    }
}

/// Background task delivering the outbox
pub struct OutboxWorker {
    handle: JoinHandle<()>,
}

impl OutboxWorker {
    pub fn spawn(outbox: Outbox) -> Self {
        let notify = outbox.notify.clone();
        let poll = Duration::from_secs(outbox.config.poll_interval_secs.max(1));

        let handle = tokio::spawn(async move {
            tracing::info!(poll_secs = poll.as_secs(), "Outbox worker started");
            loop {
                let wait = match outbox.time_until_due().await {
                    Ok(Some(due)) => due.min(poll),
                    Ok(None) => poll,
                    Err(e) => {
                        tracing::error!(error = %e, "Failed to inspect outbox");
                        poll
                    }
                };

                tokio::select! {
                    _ = notify.notified() => {}
                    _ = tokio::time::sleep(wait) => {}
                }

                match outbox.drain(true).await {
                    Ok(report) if report.delivered > 0 || report.dead_lettered > 0 => {
                        tracing::info!(
                            delivered = report.delivered,
                            dead_lettered = report.dead_lettered,
                            remaining = report.remaining,
                            "Outbox drained"
                        );
                    }
                    Ok(_) => {}
                    Err(e) => tracing::error!(error = %e, "Outbox drain failed"),
                }
            }
        });

        Self { handle }
    }

    pub fn shutdown(self) {
        self.handle.abort();
    }
}
