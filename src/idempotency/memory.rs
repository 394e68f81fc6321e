//! `MemoryStore`: the in-memory reference [`Store`] implementation.
//!
//! Grounded on `src/storage/mock/snapshot_store.rs`'s map-behind-a-lock
//! shape, but using `dashmap::DashMap` (the pack's concurrent-map crate,
//! not the teacher's) so that `claim` can check-and-set atomically without
//! holding a lock across an `.await` point.

use super::{ClaimOutcome, IdempotencyRecord, Policy, RecordStatus, Store};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::time::Duration;

/// An in-process, per-key-locking reference store. TTLs here govern how
/// long this store itself considers a record fresh; pass the same values
/// used by the executor's [`Policy`] to keep the two in sync.
pub struct MemoryStore<T> {
    records: DashMap<String, IdempotencyRecord<T>>,
    success_ttl: Duration,
    failure_ttl: Duration,
    pending_lease: Duration,
}

impl<T> MemoryStore<T> {
    pub fn new(success_ttl: Duration, failure_ttl: Duration, pending_lease: Duration) -> Self {
        Self {
            records: DashMap::new(),
            success_ttl,
            failure_ttl,
            pending_lease,
        }
    }

    pub fn from_policy(policy: &Policy) -> Self {
        Self::new(policy.success_ttl, policy.failure_ttl, policy.pending_lease)
    }
}

#[async_trait]
impl<T> Store<T> for MemoryStore<T>
where
    T: Clone + Send + Sync,
{
    async fn claim(&self, key: &str, now: DateTime<Utc>, input_hash: Option<Vec<u8>>) -> ClaimOutcome<T> {
        match self.records.entry(key.to_string()) {
            Entry::Vacant(vacant) => {
                vacant.insert(IdempotencyRecord {
                    status: RecordStatus::Pending,
                    value: None,
                    error: None,
                    input_hash,
                    inserted_at: now,
                    completed_at: None,
                });
                ClaimOutcome::Claimed
            }
            Entry::Occupied(mut occupied) => {
                let existing = occupied.get().clone();

                if let (Some(a), Some(b)) = (&existing.input_hash, &input_hash) {
                    if a != b {
                        return ClaimOutcome::CollidedInputHash;
                    }
                }

                match existing.status {
                    RecordStatus::Done => {
                        let expires = chrono_add(existing.completed_at.unwrap_or(existing.inserted_at), self.success_ttl);
                        if expires > now {
                            ClaimOutcome::AlreadyDone(
                                existing.value.clone().expect("done record missing value"),
                            )
                        } else {
                            occupied.insert(IdempotencyRecord {
                                status: RecordStatus::Pending,
                                value: None,
                                error: None,
                                input_hash,
                                inserted_at: now,
                                completed_at: None,
                            });
                            ClaimOutcome::Claimed
                        }
                    }
                    RecordStatus::Failed => {
                        let expires = chrono_add(existing.completed_at.unwrap_or(existing.inserted_at), self.failure_ttl);
                        if expires > now {
                            ClaimOutcome::Failed(existing)
                        } else {
                            occupied.insert(IdempotencyRecord {
                                status: RecordStatus::Pending,
                                value: None,
                                error: None,
                                input_hash,
                                inserted_at: now,
                                completed_at: None,
                            });
                            ClaimOutcome::Claimed
                        }
                    }
                    RecordStatus::Pending => {
                        let expires = chrono_add(existing.inserted_at, self.pending_lease);
                        if expires > now {
                            ClaimOutcome::InFlight
                        } else {
                            // Lease expired with no terminal status recorded
                            // (the holder crashed or hung): re-claim so a
                            // WAIT-ing caller makes eventual progress instead
                            // of spinning against a dead holder forever.
                            occupied.insert(IdempotencyRecord {
                                status: RecordStatus::Pending,
                                value: None,
                                error: None,
                                input_hash,
                                inserted_at: now,
                                completed_at: None,
                            });
                            ClaimOutcome::Claimed
                        }
                    }
                }
            }
        }
    }

    async fn complete(&self, key: &str, value: T) {
        let now = Utc::now();
        self.records
            .entry(key.to_string())
            .and_modify(|r| {
                r.status = RecordStatus::Done;
                r.value = Some(value.clone());
                r.completed_at = Some(now);
            })
            .or_insert_with(|| IdempotencyRecord {
                status: RecordStatus::Done,
                value: Some(value),
                error: None,
                input_hash: None,
                inserted_at: now,
                completed_at: Some(now),
            });
    }

    async fn fail(&self, key: &str, error: String) {
        let now = Utc::now();
        self.records
            .entry(key.to_string())
            .and_modify(|r| {
                r.status = RecordStatus::Failed;
                r.error = Some(error.clone());
                r.completed_at = Some(now);
            })
            .or_insert_with(|| IdempotencyRecord {
                status: RecordStatus::Failed,
                value: None,
                error: Some(error),
                input_hash: None,
                inserted_at: now,
                completed_at: Some(now),
            });
    }

    async fn get(&self, key: &str) -> Option<IdempotencyRecord<T>> {
        self.records.get(key).map(|r| r.clone())
    }

    async fn purge_expired(&self, now: DateTime<Utc>, policy: &Policy) {
        self.records.retain(|_, record| match record.status {
            RecordStatus::Done => {
                chrono_add(record.completed_at.unwrap_or(record.inserted_at), policy.success_ttl) > now
            }
            RecordStatus::Failed => {
                chrono_add(record.completed_at.unwrap_or(record.inserted_at), policy.failure_ttl) > now
            }
            RecordStatus::Pending => {
                chrono_add(record.inserted_at, policy.pending_lease) > now
            }
        });
    }
}

fn chrono_add(ts: DateTime<Utc>, duration: Duration) -> DateTime<Utc> {
    ts + chrono::Duration::from_std(duration).unwrap_or_default()
}
