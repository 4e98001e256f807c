use anyhow::Result;
use chrono::{Local, TimeZone};
use std::sync::Arc;
use tempfile::tempdir;

use attendance_kernel::{
    AttendanceStatus, AttendanceStore, RecognitionCandidate, SqliteAttendanceStore,
    TrackerSettings, VerificationTracker,
};

fn tracker_with_subject(
    dir: &tempfile::TempDir,
) -> Result<VerificationTracker<dyn AttendanceStore>> {
    let store = SqliteAttendanceStore::open(dir.path().join("attendance.db"))?;
    store.add_subject(7, "Ada Lovelace", true)?;
    let store: Arc<dyn AttendanceStore> = Arc::new(store);
    Ok(VerificationTracker::new(
        store,
        TrackerSettings {
            confidence_threshold: 50.0,
            required_attempts: 3,
            ..TrackerSettings::default()
        },
        "session-0123456789abcdef",
    ))
}

#[test]
fn repeated_sightings_record_attendance_once() -> Result<()> {
    let dir = tempdir()?;
    let tracker = tracker_with_subject(&dir)?;
    let base = Local
        .with_ymd_and_hms(2024, 9, 2, 8, 55, 0)
        .single()
        .expect("unambiguous local time");

    let statuses: Vec<AttendanceStatus> = (0..4)
        .map(|i| {
            let at = base + chrono::Duration::seconds(i);
            tracker
                .process(&RecognitionCandidate::at(Some(7), 10.0, at))
                .status
        })
        .collect();

    assert_eq!(
        statuses,
        vec![
            AttendanceStatus::Detecting {
                attempt: 1,
                required: 3
            },
            AttendanceStatus::Detecting {
                attempt: 2,
                required: 3
            },
            AttendanceStatus::Verified,
            AttendanceStatus::AlreadyMarked,
        ]
    );
    let date = base.date_naive();
    assert_eq!(tracker.store().count_records_on(date)?, 1);
    assert!(tracker.store().has_record_on(7, date)?);
    Ok(())
}

#[test]
fn next_day_starts_over() -> Result<()> {
    let dir = tempdir()?;
    let tracker = tracker_with_subject(&dir)?;
    let monday = Local
        .with_ymd_and_hms(2024, 9, 2, 9, 0, 0)
        .single()
        .expect("unambiguous local time");
    for i in 0..3 {
        tracker.process(&RecognitionCandidate::at(
            Some(7),
            5.0,
            monday + chrono::Duration::seconds(i),
        ));
    }

    let tuesday = monday + chrono::Duration::days(1);
    let result = tracker.process(&RecognitionCandidate::at(Some(7), 5.0, tuesday));
    assert_eq!(
        result.status,
        AttendanceStatus::Detecting {
            attempt: 1,
            required: 3
        }
    );
    Ok(())
}

#[test]
fn rejected_candidates_do_not_count() -> Result<()> {
    let dir = tempdir()?;
    let tracker = tracker_with_subject(&dir)?;

    let rejected = tracker.process(&RecognitionCandidate::new(Some(7), 75.0));
    assert_eq!(rejected.status, AttendanceStatus::Unknown);
    assert_eq!(rejected.message, "Face not recognized");
    assert_eq!(tracker.pending_attempts(7), None);

    let accepted = tracker.process(&RecognitionCandidate::new(Some(7), 20.0));
    assert_eq!(accepted.message, "Verifying... (1/3)");
    Ok(())
}
