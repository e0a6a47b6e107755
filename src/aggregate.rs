// 🔗 Aggregator - one wide record per subscriber
// Left join anchored on the subscriber table; course/job rows nobody
// references are quarantined as orphans. Derived fields are recomputed on
// every run and never persisted independently.

use crate::cleaner::{CleanCourse, CleanJob, CleanSubscriber};
use crate::quarantine::{QuarantineReason, QuarantineSink, QuarantinedRecord};
use crate::source::SourceTable;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};

// ============================================================================
// AGGREGATED RECORD
// ============================================================================

/// One row per subscriber: union of all resolvable fields from the three
/// sources plus the derived columns. `uuid` is the primary key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedRecord {
    pub uuid: String,
    pub name: String,
    pub sex: String,
    pub dob: Option<NaiveDate>,
    pub email: Option<String>,
    pub street: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub zip_code: Option<String>,
    pub num_courses_taken: Option<i64>,
    pub hours_spent: Option<f64>,

    // From the courses table (missing when the subscriber has no career path)
    pub career_path_id: Option<i64>,
    pub career_path_name: Option<String>,
    pub hours_to_complete: Option<f64>,

    // From the job history table
    pub job_id: Option<i64>,
    pub job_category: Option<String>,
    pub avg_salary: Option<f64>,

    // Derived fields - pure functions of the columns above
    pub age: Option<i64>,
    pub age_group: Option<i64>,
    pub course_progress_pct: Option<f64>,
}

impl AggregatedRecord {
    /// Content fingerprint for the changelog's field-level diff.
    /// Two records with the same fingerprint are considered unchanged.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(serde_json::to_string(self).unwrap_or_default().as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

// ============================================================================
// DERIVED FIELDS
// ============================================================================

/// Whole years between dob and the run's as-of date; missing dob yields a
/// missing age, never an error
fn derive_age(dob: Option<NaiveDate>, as_of: NaiveDate) -> Option<i64> {
    dob.and_then(|d| as_of.years_since(d)).map(i64::from)
}

/// Age floored to the decade (34 → 30)
fn derive_age_group(age: Option<i64>) -> Option<i64> {
    age.map(|a| (a / 10) * 10)
}

/// Share of the career path completed, as a percentage
fn derive_progress(hours_spent: Option<f64>, hours_to_complete: Option<f64>) -> Option<f64> {
    match (hours_spent, hours_to_complete) {
        (Some(spent), Some(total)) if total > 0.0 => Some(spent / total * 100.0),
        _ => None,
    }
}

// ============================================================================
// AGGREGATOR
// ============================================================================

pub struct Aggregator {
    /// Reference date for age derivation; injected so identical inputs
    /// produce identical outputs
    pub as_of: NaiveDate,
}

impl Aggregator {
    pub fn new(as_of: NaiveDate) -> Self {
        Aggregator { as_of }
    }

    /// Join the three cleaned tables into one record per subscriber.
    ///
    /// A subscriber with no matching course/job still appears with those
    /// fields missing. A course/job referenced by no subscriber is an
    /// orphan and goes to quarantine.
    pub fn aggregate(
        &self,
        subscribers: &[CleanSubscriber],
        courses: &[CleanCourse],
        jobs: &[CleanJob],
        sink: &mut QuarantineSink,
    ) -> Vec<AggregatedRecord> {
        let courses_by_id: HashMap<i64, &CleanCourse> =
            courses.iter().map(|c| (c.career_path_id, c)).collect();
        let jobs_by_id: HashMap<i64, &CleanJob> = jobs.iter().map(|j| (j.job_id, j)).collect();

        let mut referenced_courses: HashSet<i64> = HashSet::new();
        let mut referenced_jobs: HashSet<i64> = HashSet::new();
        let mut records = Vec::with_capacity(subscribers.len());

        for sub in subscribers {
            let course = sub.career_path_id.and_then(|id| {
                referenced_courses.insert(id);
                courses_by_id.get(&id).copied()
            });
            let job = sub.job_id.and_then(|id| {
                referenced_jobs.insert(id);
                jobs_by_id.get(&id).copied()
            });

            let age = derive_age(sub.dob, self.as_of);
            let hours_to_complete = course.and_then(|c| c.hours_to_complete);

            records.push(AggregatedRecord {
                uuid: sub.uuid.clone(),
                name: sub.name.clone(),
                sex: sub.sex.clone(),
                dob: sub.dob,
                email: sub.email.clone(),
                street: sub.street.clone(),
                city: sub.city.clone(),
                state: sub.state.clone(),
                zip_code: sub.zip_code.clone(),
                num_courses_taken: sub.num_courses_taken,
                hours_spent: sub.hours_spent,
                career_path_id: course.map(|c| c.career_path_id),
                career_path_name: course.map(|c| c.career_path_name.clone()),
                hours_to_complete,
                job_id: job.map(|j| j.job_id),
                job_category: job.map(|j| j.job_category.clone()),
                avg_salary: job.and_then(|j| j.avg_salary),
                age,
                age_group: derive_age_group(age),
                course_progress_pct: derive_progress(sub.hours_spent, hours_to_complete),
            });
        }

        // Orphans: dimension rows no subscriber points at
        for course in courses {
            if !referenced_courses.contains(&course.career_path_id) {
                sink.push(QuarantinedRecord::new(
                    SourceTable::Courses,
                    QuarantineReason::OrphanReference {
                        key_column: "career_path_id".to_string(),
                        key: course.career_path_id.to_string(),
                    },
                    serde_json::to_value(course).unwrap_or(Value::Null),
                ));
            }
        }
        for job in jobs {
            if !referenced_jobs.contains(&job.job_id) {
                sink.push(QuarantinedRecord::new(
                    SourceTable::JobHistory,
                    QuarantineReason::OrphanReference {
                        key_column: "job_id".to_string(),
                        key: job.job_id.to_string(),
                    },
                    serde_json::to_value(job).unwrap_or(Value::Null),
                ));
            }
        }

        records
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn as_of() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, 1).unwrap()
    }

    fn subscriber(uuid: &str) -> CleanSubscriber {
        CleanSubscriber {
            uuid: uuid.to_string(),
            name: "Annabel Avery".to_string(),
            sex: "F".to_string(),
            dob: NaiveDate::from_ymd_opt(1991, 3, 10),
            email: Some("annabel@example.com".to_string()),
            street: None,
            city: None,
            state: None,
            zip_code: None,
            job_id: Some(1),
            career_path_id: Some(5),
            num_courses_taken: Some(10),
            hours_spent: Some(10.0),
        }
    }

    fn course(id: i64) -> CleanCourse {
        CleanCourse {
            career_path_id: id,
            career_path_name: "data analytics".to_string(),
            hours_to_complete: Some(20.0),
        }
    }

    fn job(id: i64) -> CleanJob {
        CleanJob {
            job_id: id,
            job_category: "analytics".to_string(),
            avg_salary: Some(86000.0),
        }
    }

    #[test]
    fn test_left_join_with_full_match() {
        let aggregator = Aggregator::new(as_of());
        let mut sink = QuarantineSink::new();

        let records =
            aggregator.aggregate(&[subscriber("u-1")], &[course(5)], &[job(1)], &mut sink);

        assert!(sink.is_empty());
        assert_eq!(records.len(), 1);
        let r = &records[0];
        assert_eq!(r.career_path_name.as_deref(), Some("data analytics"));
        assert_eq!(r.job_category.as_deref(), Some("analytics"));
        assert_eq!(r.age, Some(34));
        assert_eq!(r.age_group, Some(30));
        assert_eq!(r.course_progress_pct, Some(50.0));
    }

    #[test]
    fn test_subscriber_without_match_still_appears() {
        let aggregator = Aggregator::new(as_of());
        let mut sink = QuarantineSink::new();
        let mut sub = subscriber("u-1");
        sub.career_path_id = None;
        sub.job_id = None;

        let records = aggregator.aggregate(&[sub], &[], &[], &mut sink);

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].career_path_name, None);
        assert_eq!(records[0].job_category, None);
        assert!(sink.is_empty());
    }

    #[test]
    fn test_missing_dob_yields_missing_age_not_quarantine() {
        let aggregator = Aggregator::new(as_of());
        let mut sink = QuarantineSink::new();
        let mut sub = subscriber("u-1");
        sub.dob = None;

        let records = aggregator.aggregate(&[sub], &[course(5)], &[job(1)], &mut sink);

        assert!(sink.is_empty());
        assert_eq!(records[0].age, None);
        assert_eq!(records[0].age_group, None);
    }

    #[test]
    fn test_unreferenced_dimension_rows_are_orphans() {
        let aggregator = Aggregator::new(as_of());
        let mut sink = QuarantineSink::new();

        let records = aggregator.aggregate(
            &[subscriber("u-1")],
            &[course(5), course(99)],
            &[job(1), job(42)],
            &mut sink,
        );

        assert_eq!(records.len(), 1);
        assert_eq!(sink.len(), 2);
        assert!(sink
            .records()
            .iter()
            .all(|q| q.reason.code() == "orphan_reference"));
    }

    #[test]
    fn test_dangling_reference_leaves_fields_missing() {
        // Subscriber points at a career path that does not exist
        let aggregator = Aggregator::new(as_of());
        let mut sink = QuarantineSink::new();
        let mut sub = subscriber("u-1");
        sub.career_path_id = Some(999);

        let records = aggregator.aggregate(&[sub], &[], &[job(1)], &mut sink);

        assert_eq!(records[0].career_path_name, None);
        assert_eq!(records[0].course_progress_pct, None);
    }

    #[test]
    fn test_progress_missing_when_dependency_missing() {
        let aggregator = Aggregator::new(as_of());
        let mut sink = QuarantineSink::new();
        let mut sub = subscriber("u-1");
        sub.hours_spent = None;

        let records = aggregator.aggregate(&[sub], &[course(5)], &[job(1)], &mut sink);
        assert_eq!(records[0].course_progress_pct, None);
    }

    #[test]
    fn test_fingerprint_changes_with_content() {
        let aggregator = Aggregator::new(as_of());
        let mut sink = QuarantineSink::new();
        let records =
            aggregator.aggregate(&[subscriber("u-1")], &[course(5)], &[job(1)], &mut sink);

        let original = records[0].fingerprint();
        assert_eq!(original, records[0].fingerprint());

        let mut changed = records[0].clone();
        changed.hours_spent = Some(11.0);
        assert_ne!(original, changed.fingerprint());
    }
}
