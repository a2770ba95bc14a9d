//! Attendance ledger: duplicate suppression for Present marks.
//!
//! The ledger owns the set of (person, subject) pairs already marked present.
//! It is seeded once from the store's history and lives for the whole
//! process; the set, not the store, decides whether a Present mark is new.
//! Sightings in this process are tracked separately so the absent sweep
//! judges the current run, not the whole history.

use crate::types::{AttendanceEvent, AttendanceStatus, PresenceKey};
use chrono::NaiveDateTime;
use std::collections::HashSet;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("store backend: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("corrupt record: {0}")]
    Corrupt(String),
}

impl StoreError {
    pub fn backend(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Backend(Box::new(err))
    }
}

/// Append-only sink for attendance events.
pub trait AttendanceStore {
    fn record_event(&self, event: &AttendanceEvent) -> Result<(), StoreError>;

    /// Every (person, subject) pair with at least one Present event.
    fn present_keys(&self) -> Result<Vec<PresenceKey>, StoreError>;
}

/// Result of a Present mark.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkOutcome {
    Marked,
    AlreadyMarked,
}

pub struct AttendanceLedger<S> {
    store: S,
    marked: HashSet<PresenceKey>,
    sighted: HashSet<PresenceKey>,
}

impl<S: AttendanceStore> AttendanceLedger<S> {
    /// Seed the ledger from the store's Present history.
    pub fn initialize(store: S) -> Result<Self, StoreError> {
        let prior = store.present_keys()?;
        let ledger = Self::with_prior(store, prior);
        tracing::info!(seeded = ledger.len(), "attendance ledger initialized");
        Ok(ledger)
    }

    pub fn with_prior(store: S, prior: impl IntoIterator<Item = PresenceKey>) -> Self {
        Self {
            store,
            marked: prior.into_iter().collect(),
            sighted: HashSet::new(),
        }
    }

    /// Record `person` present for `subject` unless already recorded.
    ///
    /// On a failed store write the key is forgotten again so the next
    /// sighting retries.
    pub fn mark_present(
        &mut self,
        person: &str,
        subject: &str,
        at: NaiveDateTime,
    ) -> Result<MarkOutcome, StoreError> {
        let key = PresenceKey::new(person, subject);
        if self.marked.contains(&key) {
            self.sighted.insert(key);
            return Ok(MarkOutcome::AlreadyMarked);
        }
        self.marked.insert(key.clone());

        let event = AttendanceEvent {
            person: key.person.clone(),
            subject: key.subject.clone(),
            status: AttendanceStatus::Present,
            timestamp: at,
        };
        if let Err(e) = self.store.record_event(&event) {
            self.marked.remove(&key);
            return Err(e);
        }
        self.sighted.insert(key);

        tracing::info!(person, subject, "attendance marked");
        Ok(MarkOutcome::Marked)
    }

    /// Record a non-Present status. Never deduplicated; a Present status is
    /// routed through [`mark_present`](Self::mark_present).
    pub fn mark_other(
        &mut self,
        person: &str,
        subject: &str,
        status: AttendanceStatus,
        at: NaiveDateTime,
    ) -> Result<MarkOutcome, StoreError> {
        if status == AttendanceStatus::Present {
            return self.mark_present(person, subject, at);
        }
        self.store.record_event(&AttendanceEvent {
            person: person.to_string(),
            subject: subject.to_string(),
            status,
            timestamp: at,
        })?;
        tracing::info!(person, subject, %status, "attendance recorded");
        Ok(MarkOutcome::Marked)
    }

    /// Mark every roster member not seen for `subject` in this run as Absent.
    ///
    /// Presence seeded from history does not count; a person present on an
    /// earlier day is still swept when missing today.
    ///
    /// Returns the names written. Failed writes are logged and skipped.
    pub fn sweep_absent<'a>(
        &mut self,
        subject: &str,
        roster: impl IntoIterator<Item = &'a str>,
        at: NaiveDateTime,
    ) -> Vec<String> {
        let mut absent = Vec::new();
        for person in roster {
            if self.sighted.contains(&PresenceKey::new(person, subject)) {
                continue;
            }
            match self.mark_other(person, subject, AttendanceStatus::Absent, at) {
                Ok(_) => absent.push(person.to_string()),
                Err(e) => tracing::warn!(person, subject, error = %e, "failed to record absence"),
            }
        }
        absent
    }

    pub fn is_marked(&self, person: &str, subject: &str) -> bool {
        self.marked.contains(&PresenceKey::new(person, subject))
    }

    pub fn len(&self) -> usize {
        self.marked.len()
    }

    pub fn is_empty(&self) -> bool {
        self.marked.is_empty()
    }

    pub fn store(&self) -> &S {
        &self.store
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::cell::{Cell, RefCell};

    /// In-memory store recording every write.
    #[derive(Default)]
    pub(crate) struct MemoryStore {
        pub events: RefCell<Vec<AttendanceEvent>>,
        pub fail_writes: Cell<bool>,
    }

    impl AttendanceStore for MemoryStore {
        fn record_event(&self, event: &AttendanceEvent) -> Result<(), StoreError> {
            if self.fail_writes.get() {
                return Err(StoreError::Corrupt("write rejected".into()));
            }
            self.events.borrow_mut().push(event.clone());
            Ok(())
        }

        fn present_keys(&self) -> Result<Vec<PresenceKey>, StoreError> {
            Ok(self
                .events
                .borrow()
                .iter()
                .filter(|e| e.status == AttendanceStatus::Present)
                .map(|e| PresenceKey::new(&e.person, &e.subject))
                .collect())
        }
    }

    fn at(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    fn present_count(store: &MemoryStore, person: &str, subject: &str) -> usize {
        store
            .events
            .borrow()
            .iter()
            .filter(|e| {
                e.status == AttendanceStatus::Present && e.person == person && e.subject == subject
            })
            .count()
    }

    #[test]
    fn test_mark_present_dedups() {
        let mut ledger = AttendanceLedger::with_prior(MemoryStore::default(), []);

        let calls = [
            ("alice", "Math"),
            ("bob", "Math"),
            ("alice", "Math"),
            ("alice", "Science"),
            ("bob", "Math"),
            ("alice", "Math"),
        ];
        let outcomes: Vec<_> = calls
            .iter()
            .map(|(p, s)| ledger.mark_present(p, s, at(9, 5)).unwrap())
            .collect();

        assert_eq!(
            outcomes,
            vec![
                MarkOutcome::Marked,
                MarkOutcome::Marked,
                MarkOutcome::AlreadyMarked,
                MarkOutcome::Marked,
                MarkOutcome::AlreadyMarked,
                MarkOutcome::AlreadyMarked,
            ]
        );
        let store = ledger.store();
        assert_eq!(store.events.borrow().len(), 3);
        assert_eq!(present_count(store, "alice", "Math"), 1);
        assert_eq!(present_count(store, "bob", "Math"), 1);
        assert_eq!(present_count(store, "alice", "Science"), 1);
    }

    #[test]
    fn test_seeded_ledger_suppresses_history() {
        let store = MemoryStore::default();
        store.record_event(&AttendanceEvent {
            person: "A".into(),
            subject: "Math".into(),
            status: AttendanceStatus::Present,
            timestamp: at(8, 0),
        }).unwrap();
        store.record_event(&AttendanceEvent {
            person: "B".into(),
            subject: "Science".into(),
            status: AttendanceStatus::Present,
            timestamp: at(8, 0),
        }).unwrap();

        let mut ledger = AttendanceLedger::initialize(store).unwrap();
        assert_eq!(ledger.len(), 2);
        assert_eq!(
            ledger.mark_present("A", "Math", at(9, 0)).unwrap(),
            MarkOutcome::AlreadyMarked
        );
        assert_eq!(ledger.store().events.borrow().len(), 2);

        // Same person, different subject is a new key.
        assert_eq!(
            ledger.mark_present("A", "Science", at(9, 0)).unwrap(),
            MarkOutcome::Marked
        );
    }

    #[test]
    fn test_absent_history_does_not_seed() {
        let store = MemoryStore::default();
        store.record_event(&AttendanceEvent {
            person: "A".into(),
            subject: "Math".into(),
            status: AttendanceStatus::Absent,
            timestamp: at(8, 0),
        }).unwrap();
        let mut ledger = AttendanceLedger::initialize(store).unwrap();
        assert!(ledger.is_empty());
        assert_eq!(
            ledger.mark_present("A", "Math", at(9, 0)).unwrap(),
            MarkOutcome::Marked
        );
    }

    #[test]
    fn test_failed_write_is_retried() {
        let mut ledger = AttendanceLedger::with_prior(MemoryStore::default(), []);
        ledger.store().fail_writes.set(true);
        assert!(ledger.mark_present("alice", "Math", at(9, 0)).is_err());
        assert!(!ledger.is_marked("alice", "Math"));

        ledger.store().fail_writes.set(false);
        assert_eq!(
            ledger.mark_present("alice", "Math", at(9, 1)).unwrap(),
            MarkOutcome::Marked
        );
        assert_eq!(ledger.store().events.borrow().len(), 1);
    }

    #[test]
    fn test_mark_other_never_dedups() {
        let mut ledger = AttendanceLedger::with_prior(MemoryStore::default(), []);
        ledger.mark_other("carol", "Math", AttendanceStatus::Absent, at(9, 0)).unwrap();
        ledger.mark_other("carol", "Math", AttendanceStatus::Absent, at(10, 0)).unwrap();
        ledger.mark_other("carol", "Math", AttendanceStatus::Late, at(10, 0)).unwrap();
        assert_eq!(ledger.store().events.borrow().len(), 3);
        assert!(!ledger.is_marked("carol", "Math"));
    }

    #[test]
    fn test_mark_other_present_goes_through_dedup() {
        let mut ledger = AttendanceLedger::with_prior(
            MemoryStore::default(),
            [PresenceKey::new("dave", "Math")],
        );
        let outcome = ledger
            .mark_other("dave", "Math", AttendanceStatus::Present, at(9, 0))
            .unwrap();
        assert_eq!(outcome, MarkOutcome::AlreadyMarked);
        assert!(ledger.store().events.borrow().is_empty());
    }

    #[test]
    fn test_sweep_absent_skips_present() {
        let mut ledger = AttendanceLedger::with_prior(MemoryStore::default(), []);
        ledger.mark_present("alice", "Math", at(9, 5)).unwrap();

        let absent = ledger.sweep_absent("Math", ["alice", "bob", "carol"], at(9, 30));
        assert_eq!(absent, vec!["bob".to_string(), "carol".to_string()]);

        let events = ledger.store().events.borrow();
        assert_eq!(events.len(), 3);
        assert!(events[1..]
            .iter()
            .all(|e| e.status == AttendanceStatus::Absent && e.subject == "Math"));
    }

    #[test]
    fn test_sweep_absent_ignores_seeded_history() {
        let mut ledger = AttendanceLedger::with_prior(
            MemoryStore::default(),
            [PresenceKey::new("alice", "Math"), PresenceKey::new("bob", "Math")],
        );
        // bob shows up again today; alice only attended on an earlier day.
        assert_eq!(
            ledger.mark_present("bob", "Math", at(9, 5)).unwrap(),
            MarkOutcome::AlreadyMarked
        );

        let absent = ledger.sweep_absent("Math", ["alice", "bob"], at(9, 30));
        assert_eq!(absent, vec!["alice".to_string()]);
        assert!(ledger.is_marked("alice", "Math"));
    }

    #[test]
    fn test_failed_present_write_is_not_a_sighting() {
        let mut ledger = AttendanceLedger::with_prior(MemoryStore::default(), []);
        ledger.store().fail_writes.set(true);
        assert!(ledger.mark_present("carol", "Math", at(9, 5)).is_err());
        ledger.store().fail_writes.set(false);

        let absent = ledger.sweep_absent("Math", ["carol"], at(9, 30));
        assert_eq!(absent, vec!["carol".to_string()]);
    }
}
