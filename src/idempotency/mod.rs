//! Idempotency Executor: guarantees exactly-once completion per key under
//! concurrent callers.
//!
//! Grounded on `src/interfaces/snapshot_store.rs` (async-trait storage
//! interface) and `src/storage/mock/snapshot_store.rs` (`RwLock<HashMap<..>>`
//! in-memory reference implementation) for the `Store`/`MemoryStore` split.

mod memory;

pub use memory::MemoryStore;

use crate::action::LazyAction;
use crate::error::BoxError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;
use tracing::{info, warn};

/// What waiting callers do when they observe an `InFlight` claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum OnPending {
    /// Poll the store until the in-flight record resolves or its lease
    /// expires, then re-claim.
    Wait,
    /// Fail immediately with `IN_FLIGHT`.
    Fail,
    /// Overwrite the pending record and execute anyway.
    Force,
}

/// `{success_ttl, failure_ttl, pending_lease, on_pending, input_fingerprint}`.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Policy {
    pub success_ttl: Duration,
    pub failure_ttl: Duration,
    pub pending_lease: Duration,
    pub on_pending: OnPending,
    pub input_fingerprint: bool,
    /// How often a `WAIT` caller polls the store while a sibling executes.
    pub poll_interval: Duration,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            success_ttl: Duration::from_secs(300),
            failure_ttl: Duration::from_secs(60),
            pending_lease: Duration::from_secs(30),
            on_pending: OnPending::Wait,
            input_fingerprint: false,
            poll_interval: Duration::from_millis(20),
        }
    }
}

impl Policy {
    pub fn with_ttl(mut self, success_ttl: Duration, failure_ttl: Duration) -> Self {
        self.success_ttl = success_ttl;
        self.failure_ttl = failure_ttl;
        self
    }

    pub fn with_on_pending(mut self, on_pending: OnPending) -> Self {
        self.on_pending = on_pending;
        self
    }

    pub fn with_input_fingerprint(mut self, enabled: bool) -> Self {
        self.input_fingerprint = enabled;
        self
    }

    pub fn with_pending_lease(mut self, lease: Duration) -> Self {
        self.pending_lease = lease;
        self
    }
}

/// `{status, value, input_hash, inserted_at, completed_at}`.
#[derive(Debug, Clone)]
pub struct IdempotencyRecord<T> {
    pub status: RecordStatus,
    pub value: Option<T>,
    pub error: Option<String>,
    pub input_hash: Option<Vec<u8>>,
    pub inserted_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordStatus {
    Pending,
    Done,
    Failed,
}

/// Outcome of [`Store::claim`].
pub enum ClaimOutcome<T> {
    Claimed,
    AlreadyDone(T),
    InFlight,
    CollidedInputHash,
    Failed(IdempotencyRecord<T>),
}

/// Storage contract a keyed operation's claims are checked against. `claim`
/// MUST be atomic: of concurrently racing claims on the same key, exactly
/// one returns `Claimed`.
#[async_trait]
pub trait Store<T>: Send + Sync
where
    T: Clone + Send + Sync,
{
    async fn claim(&self, key: &str, now: DateTime<Utc>, input_hash: Option<Vec<u8>>) -> ClaimOutcome<T>;
    async fn complete(&self, key: &str, value: T);
    async fn fail(&self, key: &str, error: String);
    async fn get(&self, key: &str) -> Option<IdempotencyRecord<T>>;
    async fn purge_expired(&self, now: DateTime<Utc>, policy: &Policy);
}

/// Error kinds surfaced at the idempotency boundary.
#[derive(Debug, thiserror::Error)]
pub enum IdempotencyError {
    #[error("key reused with different input")]
    Conflict,
    #[error("operation already in flight")]
    InFlight,
    #[error("key previously failed: {message}")]
    PreviouslyFailed { message: String },
    #[error("operation failed: {0}")]
    OperationFailed(BoxError),
    #[error("store error: {0}")]
    StoreError(BoxError),
    #[error("pending lease expired while waiting")]
    StaleLease,
}

/// `{value, from_cache, key}` returned on success.
#[derive(Debug, Clone)]
pub struct IdempotentOutcome<T> {
    pub value: T,
    pub from_cache: bool,
    pub key: String,
}

/// `{key_fn, operation, store, policy}`.
pub struct IdempotencyExecutor<Input, T, E>
where
    T: Clone + Send + Sync,
{
    key_fn: Box<dyn Fn(&Input) -> String + Send + Sync>,
    fingerprint_fn: Option<Box<dyn Fn(&Input) -> Vec<u8> + Send + Sync>>,
    operation: Box<dyn Fn(&Input) -> LazyAction<T, E> + Send + Sync>,
    store: Box<dyn Store<T>>,
    policy: Policy,
}

impl<Input, T, E> IdempotencyExecutor<Input, T, E>
where
    Input: Send + Sync,
    T: Clone + Send + Sync + 'static,
    E: std::error::Error + Send + Sync + 'static,
{
    pub async fn run(&self, input: Input) -> Result<IdempotentOutcome<T>, IdempotencyError> {
        let key = (self.key_fn)(&input);
        let hash = if self.policy.input_fingerprint {
            Some(match &self.fingerprint_fn {
                Some(f) => f(&input),
                None => fingerprint_key(&key),
            })
        } else {
            None
        };

        let deadline = Utc::now() + chrono::Duration::from_std(self.policy.pending_lease).unwrap_or_default();

        loop {
            let now = Utc::now();
            match self.store.claim(&key, now, hash.clone()).await {
                ClaimOutcome::Claimed => {
                    info!(key = %key, "idempotency claim acquired");
                    return self.execute(&key, input).await;
                }
                ClaimOutcome::AlreadyDone(value) => {
                    return Ok(IdempotentOutcome {
                        value,
                        from_cache: true,
                        key,
                    });
                }
                ClaimOutcome::InFlight => match self.policy.on_pending {
                    OnPending::Fail => return Err(IdempotencyError::InFlight),
                    OnPending::Force => {
                        warn!(key = %key, "forcing re-claim over in-flight record");
                        return self.execute(&key, input).await;
                    }
                    OnPending::Wait => {
                        if Utc::now() >= deadline {
                            // Eventual progress over a stuck lease: re-claim
                            // rather than surface StaleLease. Still await the
                            // poll interval first so a holder whose lease the
                            // store hasn't yet expired doesn't turn this into
                            // a busy spin.
                            warn!(key = %key, "pending lease expired, re-claiming");
                            tokio::time::sleep(self.policy.poll_interval).await;
                            continue;
                        }
                        tokio::time::sleep(self.policy.poll_interval).await;
                        if let Some(record) = self.store.get(&key).await {
                            match record.status {
                                RecordStatus::Done => {
                                    return Ok(IdempotentOutcome {
                                        value: record.value.expect("done record missing value"),
                                        from_cache: true,
                                        key,
                                    });
                                }
                                RecordStatus::Failed => {
                                    return Err(IdempotencyError::PreviouslyFailed {
                                        message: record.error.unwrap_or_default(),
                                    });
                                }
                                RecordStatus::Pending => continue,
                            }
                        }
                    }
                },
                ClaimOutcome::CollidedInputHash => return Err(IdempotencyError::Conflict),
                ClaimOutcome::Failed(record) => {
                    let expires_at = record.inserted_at
                        + chrono::Duration::from_std(self.policy.failure_ttl).unwrap_or_default();
                    if expires_at > now {
                        return Err(IdempotencyError::PreviouslyFailed {
                            message: record.error.unwrap_or_default(),
                        });
                    }
                    // expired failure record: loop around to re-claim
                }
            }
        }
    }

    async fn execute(&self, key: &str, input: Input) -> Result<IdempotentOutcome<T>, IdempotencyError> {
        let action = (self.operation)(&input);
        match action.run().await {
            Ok(value) => {
                self.store.complete(key, value.clone()).await;
                Ok(IdempotentOutcome {
                    value,
                    from_cache: false,
                    key: key.to_string(),
                })
            }
            Err(error) => {
                self.store.fail(key, error.to_string()).await;
                Err(IdempotencyError::OperationFailed(Box::new(error)))
            }
        }
    }
}

/// Fallback fingerprint when no `.fingerprint(..)` was registered: derived
/// from the claim key alone, so it never actually detects a collision.
/// Callers who need real payload-sensitive collision detection must supply
/// `.fingerprint(..)` explicitly, since `Input` carries no `Hash` bound by
/// default.
fn fingerprint_key(key: &str) -> Vec<u8> {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    hasher.finish().to_le_bytes().to_vec()
}

/// Builder: `idempotent(op).key(key_fn).policy(policy).store(store).build()`.
pub struct IdempotencyExecutorBuilder<Input, T, E>
where
    T: Clone + Send + Sync,
{
    key_fn: Option<Box<dyn Fn(&Input) -> String + Send + Sync>>,
    fingerprint_fn: Option<Box<dyn Fn(&Input) -> Vec<u8> + Send + Sync>>,
    operation: Box<dyn Fn(&Input) -> LazyAction<T, E> + Send + Sync>,
    store: Option<Box<dyn Store<T>>>,
    policy: Policy,
}

pub fn idempotent<Input, T, E>(
    operation: impl Fn(&Input) -> LazyAction<T, E> + Send + Sync + 'static,
) -> IdempotencyExecutorBuilder<Input, T, E>
where
    T: Clone + Send + Sync,
{
    IdempotencyExecutorBuilder {
        key_fn: None,
        fingerprint_fn: None,
        operation: Box::new(operation),
        store: None,
        policy: Policy::default(),
    }
}

impl<Input, T, E> IdempotencyExecutorBuilder<Input, T, E>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn key(mut self, key_fn: impl Fn(&Input) -> String + Send + Sync + 'static) -> Self {
        self.key_fn = Some(Box::new(key_fn));
        self
    }

    /// Registers a payload-sensitive fingerprint function, used when
    /// `policy.input_fingerprint` is set to detect key reuse with a
    /// different input.
    pub fn fingerprint(mut self, fingerprint_fn: impl Fn(&Input) -> Vec<u8> + Send + Sync + 'static) -> Self {
        self.fingerprint_fn = Some(Box::new(fingerprint_fn));
        self
    }

    pub fn policy(mut self, policy: Policy) -> Self {
        self.policy = policy;
        self
    }

    pub fn store(mut self, store: impl Store<T> + 'static) -> Self {
        self.store = Some(Box::new(store));
        self
    }

    pub fn build(self) -> IdempotencyExecutor<Input, T, E> {
        IdempotencyExecutor {
            key_fn: self.key_fn.expect("idempotency executor requires .key(..)"),
            fingerprint_fn: self.fingerprint_fn,
            operation: self.operation,
            store: self.store.expect("idempotency executor requires .store(..)"),
            policy: self.policy,
        }
    }
}

#[cfg(test)]
#[path = "tests.rs"]
mod tests;
