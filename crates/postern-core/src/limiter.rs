use chrono::{Duration, Local, NaiveDate};
use serde::Serialize;

use crate::config::Config;
use crate::enrich::{Enricher, Lookup};
use crate::fingerprint;
use crate::store::{KvStore, StoreError, UsageDb, UsageRecord, UsageStore};

/// Admission decision for one send attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Decision {
    pub allowed: bool,
    pub remaining_messages: u32,
}

/// Current local calendar day, `YYYY-MM-DD`. Day buckets follow the local
/// clock, so the quota resets at local midnight.
pub fn current_day() -> String {
    Local::now().format("%Y-%m-%d").to_string()
}

/// At-most-N-per-day admission control keyed by device fingerprint.
///
/// Callers check with [`can_send_message`](Self::can_send_message) before a
/// send attempt and call [`record_message_sent`](Self::record_message_sent)
/// once the send is dispatched. Day rollover is detected lazily: a record
/// whose reset day is not today counts as zero, with no timer involved.
///
/// This is a soft limiter. Two processes sharing the slot read-modify-write
/// it independently and can each admit a message off the same stale count;
/// that is accepted — the limiter is a deterrent, not an enforcement
/// boundary. For the same reason every failure mode degrades toward
/// allowing the message: a broken limiter must not take the contact path
/// down with it.
pub struct MessageLimiter<S: KvStore> {
    store: UsageStore<S>,
    config: Config,
    enricher: Option<Enricher>,
}

impl<S: KvStore> MessageLimiter<S> {
    pub fn new(kv: S, config: Config) -> Self {
        let enricher = config.enrich_enabled.then(Enricher::new);
        Self {
            store: UsageStore::new(kv),
            config,
            enricher,
        }
    }

    /// May this device send another message today?
    ///
    /// Read-only and idempotent; never mutates the stored database. Total:
    /// storage and fingerprint failures have already degraded to safe
    /// defaults by the time a count is in hand.
    pub async fn can_send_message(&self) -> Decision {
        let day = current_day();
        let fingerprint = fingerprint::generate();
        self.decide(&day, &fingerprint)
    }

    /// Record one dispatched message against today's bucket.
    ///
    /// Call only after the send was handed to the outbound channel. A
    /// storage write failure is logged and swallowed — the increment is
    /// lost, never surfaced to the caller.
    pub async fn record_message_sent(&self) {
        let day = current_day();
        let fingerprint = fingerprint::generate();
        let lookup = match &self.enricher {
            Some(enricher) => Some(enricher.lookup().await),
            None => None,
        };
        self.record(&day, &fingerprint, lookup);
    }

    /// Decoded view of the stored usage database.
    pub fn snapshot(&self) -> UsageDb {
        self.store.load()
    }

    /// Drop all stored usage state.
    pub fn reset(&self) -> Result<(), StoreError> {
        self.store.clear()
    }

    fn decide(&self, day: &str, fingerprint: &str) -> Decision {
        let db = self.store.load();
        // A record from an earlier day is a fresh bucket, same as no record.
        let count = match db.get(fingerprint) {
            Some(record) if record.last_reset == day => record.count,
            _ => 0,
        };

        let max = self.config.max_messages_per_day;
        let decision = Decision {
            allowed: count < max,
            remaining_messages: max.saturating_sub(count),
        };
        tracing::debug!(
            count,
            max,
            allowed = decision.allowed,
            "admission check"
        );
        decision
    }

    fn record(&self, day: &str, fingerprint: &str, lookup: Option<Lookup>) {
        let mut db = self.store.load();

        let record = db
            .entry(fingerprint.to_string())
            .or_insert_with(|| UsageRecord::new_for_day(day));
        if record.last_reset != day {
            // New day: the old bucket is discarded wholesale.
            *record = UsageRecord::new_for_day(day);
        }
        record.count += 1;

        if let Some(lookup) = lookup {
            if record.security_token.is_none() {
                record.security_token = Some(uuid::Uuid::new_v4().to_string());
            }
            record.ips.insert(lookup.ip);
            record.locations.insert(lookup.location);
        }

        tracing::info!(count = record.count, day, "message recorded");

        prune_stale(&mut db, day, self.config.retention_days);

        if let Err(e) = self.store.save(&db) {
            tracing::error!(error = %e, "failed to persist usage database — increment lost");
        }
    }
}

/// Evict entries whose reset day is older than the retention window, or
/// does not parse as a day at all. Keeps the database from accumulating one
/// entry per historical fingerprint forever.
fn prune_stale(db: &mut UsageDb, today: &str, retention_days: i64) {
    let Ok(today) = NaiveDate::parse_from_str(today, "%Y-%m-%d") else {
        return;
    };
    let cutoff = today - Duration::days(retention_days);

    db.retain(|fingerprint, record| {
        let keep = matches!(
            NaiveDate::parse_from_str(&record.last_reset, "%Y-%m-%d"),
            Ok(day) if day >= cutoff
        );
        if !keep {
            tracing::debug!(%fingerprint, last_reset = %record.last_reset, "evicting stale usage entry");
        }
        keep
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, SLOT_KEY};
    use std::path::PathBuf;

    const FP: &str = "fp-under-test";
    const TODAY: &str = "2026-08-07";
    const YESTERDAY: &str = "2026-08-06";

    fn test_config() -> Config {
        Config {
            data_dir: PathBuf::from("/nonexistent"),
            max_messages_per_day: 3,
            retention_days: 30,
            enrich_enabled: false,
        }
    }

    fn limiter() -> MessageLimiter<MemoryStore> {
        MessageLimiter::new(MemoryStore::new(), test_config())
    }

    #[test]
    fn fresh_device_has_full_quota() {
        let limiter = limiter();
        let decision = limiter.decide(TODAY, FP);
        assert_eq!(
            decision,
            Decision {
                allowed: true,
                remaining_messages: 3
            }
        );
    }

    #[test]
    fn quota_exhausts_after_max_records() {
        let limiter = limiter();
        for _ in 0..3 {
            limiter.record(TODAY, FP, None);
        }
        let decision = limiter.decide(TODAY, FP);
        assert_eq!(
            decision,
            Decision {
                allowed: false,
                remaining_messages: 0
            }
        );
    }

    #[test]
    fn remaining_decreases_by_one_per_record() {
        let limiter = limiter();
        for expected in (1..=3u32).rev() {
            assert_eq!(limiter.decide(TODAY, FP).remaining_messages, expected);
            limiter.record(TODAY, FP, None);
        }
        assert_eq!(limiter.decide(TODAY, FP).remaining_messages, 0);
    }

    #[test]
    fn check_is_idempotent() {
        let limiter = limiter();
        limiter.record(TODAY, FP, None);
        let first = limiter.decide(TODAY, FP);
        for _ in 0..5 {
            assert_eq!(limiter.decide(TODAY, FP), first);
        }
    }

    #[test]
    fn stale_record_counts_as_absent_for_check() {
        let limiter = limiter();
        for _ in 0..3 {
            limiter.record(YESTERDAY, FP, None);
        }
        // Exhausted yesterday — today is a fresh bucket.
        let decision = limiter.decide(TODAY, FP);
        assert_eq!(
            decision,
            Decision {
                allowed: true,
                remaining_messages: 3
            }
        );
    }

    #[test]
    fn stale_record_is_replaced_on_record() {
        let limiter = limiter();
        for _ in 0..3 {
            limiter.record(YESTERDAY, FP, None);
        }
        limiter.record(TODAY, FP, None);

        let db = limiter.snapshot();
        let record = db.get(FP).unwrap();
        assert_eq!(record.count, 1);
        assert_eq!(record.last_reset, TODAY);
    }

    #[test]
    fn unchecked_records_still_clamp_remaining() {
        let limiter = limiter();
        // A caller that never checks can push the count past the max.
        for _ in 0..5 {
            limiter.record(TODAY, FP, None);
        }
        let decision = limiter.decide(TODAY, FP);
        assert!(!decision.allowed);
        assert_eq!(decision.remaining_messages, 0);
    }

    #[test]
    fn devices_are_independent() {
        let limiter = limiter();
        for _ in 0..3 {
            limiter.record(TODAY, FP, None);
        }
        assert!(!limiter.decide(TODAY, FP).allowed);
        assert!(limiter.decide(TODAY, "some-other-device").allowed);
    }

    #[test]
    fn corrupt_slot_recovers_to_fresh_quota() {
        let kv = MemoryStore::new();
        kv.set(SLOT_KEY, "}}garbage{{").unwrap();
        let limiter = MessageLimiter::new(kv, test_config());
        assert_eq!(
            limiter.decide(TODAY, FP),
            Decision {
                allowed: true,
                remaining_messages: 3
            }
        );
    }

    #[test]
    fn recording_prunes_entries_past_retention() {
        let limiter = limiter();
        limiter.record("2026-06-01", "fp-ancient", None);
        limiter.record(YESTERDAY, "fp-recent", None);
        limiter.record(TODAY, FP, None);

        let db = limiter.snapshot();
        assert!(!db.contains_key("fp-ancient"));
        assert!(db.contains_key("fp-recent"));
        assert!(db.contains_key(FP));
    }

    #[test]
    fn prune_drops_unparseable_reset_days() {
        let mut db = UsageDb::new();
        db.insert(
            "fp-bad".to_string(),
            UsageRecord::new_for_day("not-a-date"),
        );
        db.insert("fp-good".to_string(), UsageRecord::new_for_day(TODAY));

        prune_stale(&mut db, TODAY, 30);
        assert!(!db.contains_key("fp-bad"));
        assert!(db.contains_key("fp-good"));
    }

    #[test]
    fn enrichment_results_land_in_audit_fields() {
        let limiter = limiter();
        let lookup = Lookup {
            ip: "203.0.113.9".to_string(),
            location: "Berlin, Germany".to_string(),
        };
        limiter.record(TODAY, FP, Some(lookup.clone()));
        limiter.record(TODAY, FP, Some(lookup));

        let db = limiter.snapshot();
        let record = db.get(FP).unwrap();
        assert_eq!(record.count, 2);
        assert_eq!(record.ips.len(), 1);
        assert!(record.ips.contains("203.0.113.9"));
        assert!(record.locations.contains("Berlin, Germany"));
        assert!(record.security_token.is_some());
    }

    #[test]
    fn audit_fields_never_change_the_decision() {
        let limiter = limiter();
        let lookup = Lookup {
            ip: crate::enrich::UNKNOWN.to_string(),
            location: crate::enrich::UNKNOWN.to_string(),
        };
        limiter.record(TODAY, FP, Some(lookup));
        assert_eq!(limiter.decide(TODAY, FP).remaining_messages, 2);
    }

    #[test]
    fn write_failure_is_swallowed() {
        struct ReadOnlyStore(MemoryStore);
        impl KvStore for ReadOnlyStore {
            fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
                self.0.get(key)
            }
            fn set(&self, _key: &str, _value: &str) -> Result<(), StoreError> {
                Err(StoreError::Io(std::io::Error::new(
                    std::io::ErrorKind::PermissionDenied,
                    "slot is read-only",
                )))
            }
            fn remove(&self, key: &str) -> Result<(), StoreError> {
                self.0.remove(key)
            }
        }

        let limiter = MessageLimiter::new(ReadOnlyStore(MemoryStore::new()), test_config());
        // Must not panic; the increment is simply lost.
        limiter.record(TODAY, FP, None);
        assert_eq!(limiter.decide(TODAY, FP).remaining_messages, 3);
    }

    #[tokio::test]
    async fn public_api_checks_and_records_for_this_device() {
        let limiter = limiter();

        let before = limiter.can_send_message().await;
        assert!(before.allowed);
        assert_eq!(before.remaining_messages, 3);

        limiter.record_message_sent().await;

        let after = limiter.can_send_message().await;
        assert_eq!(after.remaining_messages, 2);
    }
}
