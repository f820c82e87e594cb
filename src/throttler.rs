use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info};

use crate::classifier::classify;
use crate::clock::{Clock, SystemClock};
use crate::error::{ThrottlerError, ThrottlerResult};
use crate::record::TrialRecord;
use crate::store::TrialStore;
use crate::throttle_config::ThrottleConfig;
use crate::token::{bearer_token, TokenDecoder};

/// Outcome of applying the throttling policy to one attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// First sighting, a new window was opened.
    Created(TrialRecord),
    /// Attempt counted inside the budget.
    Counted(TrialRecord),
    /// Budget reached after the window lapsed, a new window was opened.
    Reset(TrialRecord),
    /// Budget reached inside the window.
    Blocked(TrialRecord),
    /// An active block rejected the attempt; nothing to write.
    Rejected,
}

impl Transition {
    pub fn allowed(&self) -> bool {
        matches!(
            self,
            Transition::Created(_) | Transition::Counted(_) | Transition::Reset(_)
        )
    }

    /// The record to persist, if the transition changed anything.
    pub fn record(&self) -> Option<&TrialRecord> {
        match self {
            Transition::Created(record)
            | Transition::Counted(record)
            | Transition::Reset(record)
            | Transition::Blocked(record) => Some(record),
            Transition::Rejected => None,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Transition::Created(_) => "created",
            Transition::Counted(_) => "counted",
            Transition::Reset(_) => "reset",
            Transition::Blocked(_) => "blocked",
            Transition::Rejected => "rejected",
        }
    }
}

/// Throttle engine shared by every request handler.
pub struct Throttler {
    store: Arc<dyn TrialStore<TrialRecord>>,
    decoder: Arc<dyn TokenDecoder>,
    clock: Arc<dyn Clock>,
    config: ThrottleConfig,
    store_timeout: Option<Duration>,
    locks: IdentityLocks,
}

impl Throttler {
    /// Rejects invalid budgets and windows up front.
    pub fn new(
        config: ThrottleConfig,
        store: Arc<dyn TrialStore<TrialRecord>>,
        decoder: Arc<dyn TokenDecoder>,
    ) -> ThrottlerResult<Self> {
        config.check()?;

        info!(
            backend = store.backend(),
            ip_try_max = config.ip_try_max,
            jwt_try_max = config.jwt_try_max,
            "throttle engine ready"
        );

        Ok(Self {
            store,
            decoder,
            clock: Arc::new(SystemClock),
            config,
            store_timeout: None,
            locks: IdentityLocks::default(),
        })
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Bound the whole read-modify-write of one attempt.
    pub fn with_store_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.store_timeout = timeout;
        self
    }

    pub fn config(&self) -> &ThrottleConfig {
        &self.config
    }

    pub fn backend(&self) -> &'static str {
        self.store.backend()
    }

    pub async fn ping(&self) -> ThrottlerResult<()> {
        self.store.ping().await
    }

    /// Count one attempt for `identity` and decide whether it may proceed.
    ///
    /// Storage failures are returned as errors, never folded into the
    /// decision. Attempts for the same identity are serialised inside this
    /// process so concurrent requests cannot lose increments.
    pub async fn track_access(&self, identity: &str) -> ThrottlerResult<bool> {
        match self.store_timeout {
            Some(limit) => tokio::time::timeout(limit, self.track_access_serialized(identity))
                .await
                .map_err(|_| ThrottlerError::Timeout(limit))?,
            None => self.track_access_serialized(identity).await,
        }
    }

    async fn track_access_serialized(&self, identity: &str) -> ThrottlerResult<bool> {
        let _slot = self.locks.acquire(identity).await;

        let existing = self.store.get(identity).await?;
        let transition = self.apply(identity, existing, self.clock.now());

        if let Some(record) = transition.record() {
            self.store.set(identity, record).await?;
        }

        debug!(
            identity = %identity,
            transition = transition.name(),
            "tracked access"
        );
        if let Transition::Blocked(record) = &transition {
            info!(
                identity = %identity,
                kind = %record.kind,
                tries = record.tries,
                "identity blocked"
            );
        }

        Ok(transition.allowed())
    }

    /// Apply the policy to the stored state of `identity` at `now`.
    pub fn apply(
        &self,
        identity: &str,
        existing: Option<TrialRecord>,
        now: DateTime<Utc>,
    ) -> Transition {
        let mut record = match existing {
            None => {
                let kind = classify(identity);
                return Transition::Created(TrialRecord::new(kind, now, self.config.window(kind)));
            }
            Some(record) if record.is_blocked(now) => return Transition::Rejected,
            Some(record) => record,
        };

        let tries = record.record_attempt();
        if tries < self.config.try_max(record.kind) {
            return Transition::Counted(record);
        }

        if record.window_expired(now) {
            let kind = record.kind;
            Transition::Reset(TrialRecord::new(kind, now, self.config.window(kind)))
        } else {
            record.block(now, self.config.block_duration);
            Transition::Blocked(record)
        }
    }

    /// True when `header` is `Bearer <token>` and the token decodes.
    pub fn valid_token(&self, header: &str) -> bool {
        self.token_identity(header).is_some()
    }

    /// Throttling identity for an accepted bearer token: its subject, or the
    /// raw token when the subject claim is missing.
    pub fn token_identity(&self, header: &str) -> Option<String> {
        let token = bearer_token(header)?;
        match self.decoder.decode(token) {
            Ok(claims) => Some(claims.sub.unwrap_or_else(|| token.to_string())),
            Err(err) => {
                debug!(error = %err, "rejected bearer token");
                None
            }
        }
    }
}

/// Per-identity mutexes, dropped again once nobody holds or waits on them.
#[derive(Default)]
struct IdentityLocks {
    slots: DashMap<String, Arc<Mutex<()>>>,
}

impl IdentityLocks {
    async fn acquire(&self, identity: &str) -> IdentityGuard<'_> {
        let slot = self
            .slots
            .entry(identity.to_string())
            .or_default()
            .value()
            .clone();
        let ticket = SlotTicket {
            locks: self,
            identity: identity.to_string(),
            slot,
        };
        let guard = ticket.slot.clone().lock_owned().await;
        IdentityGuard {
            _guard: guard,
            _ticket: ticket,
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.slots.len()
    }
}

// Field order matters: the mutex is released before the ticket cleans up.
struct IdentityGuard<'a> {
    _guard: OwnedMutexGuard<()>,
    _ticket: SlotTicket<'a>,
}

struct SlotTicket<'a> {
    locks: &'a IdentityLocks,
    identity: String,
    slot: Arc<Mutex<()>>,
}

impl Drop for SlotTicket<'_> {
    fn drop(&mut self) {
        // One reference in the map plus ours means the slot is idle.
        self.locks.slots.remove_if(&self.identity, |_, slot| {
            Arc::ptr_eq(slot, &self.slot) && Arc::strong_count(slot) == 2
        });
    }
}
