//! Debounced attendance decisions.
//!
//! A subject is marked present only after `required_attempts` accepted
//! recognitions, counted per subject. The counter survives intervening
//! rejections and is dropped once attendance is recorded, or when the subject
//! has not been seen for `attempt_window`.

use chrono::{DateTime, Local};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::storage::{AttendanceRecord, AttendanceStore, InsertOutcome, SubjectId};

pub const DEFAULT_CONFIDENCE_THRESHOLD: f64 = 50.0;
pub const DEFAULT_REQUIRED_ATTEMPTS: u32 = 3;
pub const DEFAULT_ATTEMPT_WINDOW: Duration = Duration::from_secs(60);

/// Output of an external identity matcher for one face.
#[derive(Clone, Debug, PartialEq)]
pub struct RecognitionCandidate {
    pub subject_id: Option<SubjectId>,
    /// Distance-like score: lower is better, 0 is a perfect match.
    pub confidence: f64,
    pub timestamp: DateTime<Local>,
}

impl RecognitionCandidate {
    pub fn new(subject_id: Option<SubjectId>, confidence: f64) -> Self {
        Self::at(subject_id, confidence, Local::now())
    }

    pub fn at(subject_id: Option<SubjectId>, confidence: f64, timestamp: DateTime<Local>) -> Self {
        Self {
            subject_id,
            confidence,
            timestamp,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum AttendanceStatus {
    Detecting { attempt: u32, required: u32 },
    Verified,
    AlreadyMarked,
    Unknown,
    Error,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RecognitionResult {
    pub subject_id: Option<SubjectId>,
    pub name: Option<String>,
    pub confidence: f64,
    pub status: AttendanceStatus,
    pub message: String,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TrackerSettings {
    /// Candidates scoring above this are rejected.
    pub confidence_threshold: f64,
    pub required_attempts: u32,
    pub attempt_window: Duration,
}

impl Default for TrackerSettings {
    fn default() -> Self {
        Self {
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            required_attempts: DEFAULT_REQUIRED_ATTEMPTS,
            attempt_window: DEFAULT_ATTEMPT_WINDOW,
        }
    }
}

#[derive(Clone, Copy, Debug)]
struct Attempt {
    count: u32,
    last_seen: DateTime<Local>,
}

pub struct VerificationTracker<S: AttendanceStore + ?Sized> {
    store: Arc<S>,
    settings: TrackerSettings,
    session_id: String,
    attempts: Mutex<HashMap<SubjectId, Attempt>>,
}

impl<S: AttendanceStore + ?Sized> VerificationTracker<S> {
    pub fn new(store: Arc<S>, settings: TrackerSettings, session_id: impl Into<String>) -> Self {
        Self {
            store,
            settings: TrackerSettings {
                required_attempts: settings.required_attempts.max(1),
                ..settings
            },
            session_id: session_id.into(),
            attempts: Mutex::new(HashMap::new()),
        }
    }

    pub fn settings(&self) -> &TrackerSettings {
        &self.settings
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Pending attempt count for `id`; `None` when nothing is pending.
    pub fn pending_attempts(&self, id: SubjectId) -> Option<u32> {
        self.lock_attempts().get(&id).map(|a| a.count)
    }

    pub fn process(&self, candidate: &RecognitionCandidate) -> RecognitionResult {
        let subject_id = match candidate.subject_id {
            Some(id) if candidate.confidence <= self.settings.confidence_threshold => id,
            _ => {
                return self.result(candidate, None, AttendanceStatus::Unknown, "Face not recognized");
            }
        };

        let name = match self.store.subject_name(subject_id) {
            Ok(Some(name)) => name,
            Ok(None) => {
                log::warn!("SubjectNotFound: subject {} has no roster entry", subject_id);
                return self.result(
                    candidate,
                    None,
                    AttendanceStatus::Error,
                    "Student not found in database",
                );
            }
            Err(err) => {
                log::error!("subject lookup failed for {}: {:#}", subject_id, err);
                return self.result(candidate, None, AttendanceStatus::Error, "Database error");
            }
        };

        // Everything from the record lookup to the insert runs under the
        // attempt lock, so a sighting that lost a race sees the winner's record.
        let mut attempts = self.lock_attempts();
        self.expire_stale(&mut attempts, candidate.timestamp);

        let date = candidate.timestamp.date_naive();
        match self.store.has_record_on(subject_id, date) {
            Ok(true) => {
                attempts.remove(&subject_id);
                return self.result(
                    candidate,
                    Some(name),
                    AttendanceStatus::AlreadyMarked,
                    "Attendance already recorded today",
                );
            }
            Ok(false) => {}
            Err(err) => {
                log::error!("attendance lookup failed for {}: {:#}", subject_id, err);
                return self.result(candidate, Some(name), AttendanceStatus::Error, "Database error");
            }
        }

        let entry = attempts.entry(subject_id).or_insert(Attempt {
            count: 0,
            last_seen: candidate.timestamp,
        });
        entry.count += 1;
        entry.last_seen = candidate.timestamp;
        let count = entry.count;
        let required = self.settings.required_attempts;

        if count < required {
            return self.result(
                candidate,
                Some(name),
                AttendanceStatus::Detecting {
                    attempt: count,
                    required,
                },
                &format!("Verifying... ({}/{})", count, required),
            );
        }

        let record = AttendanceRecord {
            subject_id,
            date,
            time: candidate.timestamp.time(),
            session_id: self.session_id.clone(),
        };
        match self.store.insert_record(&record) {
            Ok(InsertOutcome::Inserted) => {
                attempts.remove(&subject_id);
                log::info!("attendance marked for {} ({})", name, subject_id);
                self.result(
                    candidate,
                    Some(name),
                    AttendanceStatus::Verified,
                    "Attendance marked successfully!",
                )
            }
            Ok(InsertOutcome::Duplicate) => {
                attempts.remove(&subject_id);
                self.result(
                    candidate,
                    Some(name),
                    AttendanceStatus::AlreadyMarked,
                    "Attendance already recorded today",
                )
            }
            Err(err) => {
                log::error!("StorageWriteFailure: subject {}: {:#}", subject_id, err);
                self.result(
                    candidate,
                    Some(name),
                    AttendanceStatus::Error,
                    "Failed to record attendance",
                )
            }
        }
    }

    fn expire_stale(&self, attempts: &mut HashMap<SubjectId, Attempt>, now: DateTime<Local>) {
        let window = self.settings.attempt_window;
        attempts.retain(|_, attempt| match (now - attempt.last_seen).to_std() {
            Ok(age) => age <= window,
            // Seen "after" now: clock skew between candidates, keep it.
            Err(_) => true,
        });
    }

    fn lock_attempts(&self) -> MutexGuard<'_, HashMap<SubjectId, Attempt>> {
        self.attempts
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn result(
        &self,
        candidate: &RecognitionCandidate,
        name: Option<String>,
        status: AttendanceStatus,
        message: &str,
    ) -> RecognitionResult {
        RecognitionResult {
            subject_id: candidate.subject_id,
            name,
            confidence: candidate.confidence,
            status,
            message: message.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryAttendanceStore;
    use anyhow::{anyhow, Result};
    use chrono::{NaiveDate, TimeZone};

    fn tracker() -> VerificationTracker<InMemoryAttendanceStore> {
        let store = InMemoryAttendanceStore::new();
        store.add_subject(7, "Ada", true).unwrap();
        VerificationTracker::new(Arc::new(store), TrackerSettings::default(), "session-test")
    }

    fn at(secs: u32) -> DateTime<Local> {
        Local
            .with_ymd_and_hms(2024, 3, 4, 10, 0, 0)
            .single()
            .unwrap()
            + chrono::Duration::seconds(secs as i64)
    }

    #[test]
    fn three_sightings_mark_attendance() {
        let tracker = tracker();
        let seen = |s| tracker.process(&RecognitionCandidate::at(Some(7), 10.0, at(s)));

        let first = seen(0);
        assert_eq!(
            first.status,
            AttendanceStatus::Detecting {
                attempt: 1,
                required: 3
            }
        );
        assert_eq!(first.message, "Verifying... (1/3)");
        assert_eq!(first.name.as_deref(), Some("Ada"));
        assert_eq!(
            seen(1).status,
            AttendanceStatus::Detecting {
                attempt: 2,
                required: 3
            }
        );
        assert_eq!(seen(2).status, AttendanceStatus::Verified);
        assert_eq!(tracker.pending_attempts(7), None);
        assert_eq!(seen(3).status, AttendanceStatus::AlreadyMarked);

        let records = tracker.store().records().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].session_id, "session-test");
    }

    #[test]
    fn weak_match_is_unknown_and_leaves_counter() {
        let tracker = tracker();
        tracker.process(&RecognitionCandidate::at(Some(7), 10.0, at(0)));

        let result = tracker.process(&RecognitionCandidate::at(Some(7), 50.5, at(1)));
        assert_eq!(result.status, AttendanceStatus::Unknown);
        assert_eq!(result.name, None);
        assert_eq!(tracker.pending_attempts(7), Some(1));

        let missing = tracker.process(&RecognitionCandidate::at(None, 0.0, at(2)));
        assert_eq!(missing.status, AttendanceStatus::Unknown);
        assert_eq!(tracker.pending_attempts(7), Some(1));
    }

    #[test]
    fn threshold_is_inclusive() {
        let tracker = tracker();
        let result = tracker.process(&RecognitionCandidate::at(Some(7), 50.0, at(0)));
        assert!(matches!(result.status, AttendanceStatus::Detecting { attempt: 1, .. }));
    }

    #[test]
    fn unknown_subject_is_error() {
        let tracker = tracker();
        let result = tracker.process(&RecognitionCandidate::at(Some(99), 5.0, at(0)));
        assert_eq!(result.status, AttendanceStatus::Error);
        assert_eq!(result.message, "Student not found in database");
        assert_eq!(tracker.pending_attempts(99), None);
    }

    #[test]
    fn stale_attempts_expire() {
        let tracker = tracker();
        tracker.process(&RecognitionCandidate::at(Some(7), 10.0, at(0)));
        tracker.process(&RecognitionCandidate::at(Some(7), 10.0, at(30)));
        assert_eq!(tracker.pending_attempts(7), Some(2));

        let result = tracker.process(&RecognitionCandidate::at(Some(7), 10.0, at(120)));
        assert_eq!(
            result.status,
            AttendanceStatus::Detecting {
                attempt: 1,
                required: 3
            }
        );
    }

    struct FailingWrites(InMemoryAttendanceStore);

    impl AttendanceStore for FailingWrites {
        fn subject_name(&self, id: SubjectId) -> Result<Option<String>> {
            self.0.subject_name(id)
        }
        fn has_record_on(&self, id: SubjectId, date: NaiveDate) -> Result<bool> {
            self.0.has_record_on(id, date)
        }
        fn insert_record(&self, _record: &AttendanceRecord) -> Result<InsertOutcome> {
            Err(anyhow!("disk full"))
        }
        fn count_records_on(&self, date: NaiveDate) -> Result<u64> {
            self.0.count_records_on(date)
        }
        fn count_active_subjects(&self) -> Result<u64> {
            self.0.count_active_subjects()
        }
        fn log_system_event(&self, level: &str, message: &str, module: Option<&str>) -> Result<()> {
            self.0.log_system_event(level, message, module)
        }
    }

    #[test]
    fn write_failure_keeps_counter() {
        let inner = InMemoryAttendanceStore::new();
        inner.add_subject(7, "Ada", true).unwrap();
        let store: Arc<dyn AttendanceStore> = Arc::new(FailingWrites(inner));
        let tracker = VerificationTracker::new(store, TrackerSettings::default(), "s");

        for s in 0..2 {
            tracker.process(&RecognitionCandidate::at(Some(7), 1.0, at(s)));
        }
        let result = tracker.process(&RecognitionCandidate::at(Some(7), 1.0, at(2)));
        assert_eq!(result.status, AttendanceStatus::Error);
        assert_eq!(tracker.pending_attempts(7), Some(3));
    }

    #[test]
    fn concurrent_final_sightings_record_once() {
        let tracker = tracker();
        for s in 0..2 {
            tracker.process(&RecognitionCandidate::at(Some(7), 10.0, at(s)));
        }

        let barrier = std::sync::Barrier::new(8);
        let (tracker, barrier) = (&tracker, &barrier);
        let statuses: Vec<AttendanceStatus> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    scope.spawn(move || {
                        barrier.wait();
                        tracker
                            .process(&RecognitionCandidate::at(Some(7), 10.0, at(2)))
                            .status
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        let verified = statuses
            .iter()
            .filter(|s| **s == AttendanceStatus::Verified)
            .count();
        assert_eq!(verified, 1, "{statuses:?}");
        assert!(statuses
            .iter()
            .all(|s| matches!(s, AttendanceStatus::Verified | AttendanceStatus::AlreadyMarked)));
        assert_eq!(tracker.pending_attempts(7), None);
        assert_eq!(tracker.store().records().unwrap().len(), 1);
    }

    #[test]
    fn status_serializes_with_state_tag() {
        let json = serde_json::to_value(AttendanceStatus::Detecting {
            attempt: 1,
            required: 3,
        })
        .unwrap();
        assert_eq!(json["state"], "detecting");
        assert_eq!(json["attempt"], 1);
        let json = serde_json::to_value(AttendanceStatus::AlreadyMarked).unwrap();
        assert_eq!(json["state"], "already_marked");
    }
}
