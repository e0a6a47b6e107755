// 🧹 Record Cleaner - raw rows → typed clean records
// Per-field policy: missing numeric → flagged missing (never imputed),
// missing categorical → "unknown" sentinel, duplicate identifier → keep
// first occurrence and quarantine the rest.

use crate::quarantine::{QuarantineReason, QuarantineSink, QuarantinedRecord};
use crate::source::{RawRecord, SourceTable};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::collections::HashSet;

/// Sentinel for categorical fields that could not be resolved
pub const UNKNOWN: &str = "unknown";

// ============================================================================
// CLEAN RECORDS
// ============================================================================

/// One subscriber after cleaning. `Option::None` is the explicit missing
/// marker; it survives into the aggregated output untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CleanSubscriber {
    pub uuid: String,
    pub name: String,
    pub sex: String,
    pub dob: Option<NaiveDate>,
    pub email: Option<String>,
    pub street: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub zip_code: Option<String>,
    pub job_id: Option<i64>,
    pub career_path_id: Option<i64>,
    pub num_courses_taken: Option<i64>,
    pub hours_spent: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CleanCourse {
    pub career_path_id: i64,
    pub career_path_name: String,
    pub hours_to_complete: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CleanJob {
    pub job_id: i64,
    pub job_category: String,
    pub avg_salary: Option<f64>,
}

// ============================================================================
// FIELD EXTRACTION HELPERS
// ============================================================================

/// Trimmed, non-empty text or missing
fn get_text(row: &RawRecord, column: &str) -> Option<String> {
    match row.get(column) {
        Some(Value::String(s)) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }
        }
        _ => None,
    }
}

/// Categorical field: missing maps to the explicit "unknown" sentinel
fn get_categorical(row: &RawRecord, column: &str) -> String {
    get_text(row, column).unwrap_or_else(|| UNKNOWN.to_string())
}

/// Whole number stored as INTEGER, REAL, or numeric text.
/// The raw snapshot stores job_id and friends as floats.
fn get_i64(row: &RawRecord, column: &str) -> Option<i64> {
    match row.get(column) {
        Some(Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
        Some(Value::String(s)) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().filter(|f| f.fract() == 0.0).map(|f| f as i64))
        }
        _ => None,
    }
}

fn get_f64(row: &RawRecord, column: &str) -> Option<f64> {
    match row.get(column) {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

/// Dates arrive as `YYYY-MM-DD` text; anything else is flagged missing
fn get_date(row: &RawRecord, column: &str) -> Option<NaiveDate> {
    get_text(row, column).and_then(|s| NaiveDate::parse_from_str(&s, "%Y-%m-%d").ok())
}

/// Contact info is a JSON object embedded as text:
/// `{"mailing_address": "street, city, state, zip", "email": "..."}`
/// Unparseable JSON leaves every contact field missing.
struct ContactInfo {
    email: Option<String>,
    street: Option<String>,
    city: Option<String>,
    state: Option<String>,
    zip_code: Option<String>,
}

fn parse_contact_info(row: &RawRecord) -> ContactInfo {
    let mut contact = ContactInfo {
        email: None,
        street: None,
        city: None,
        state: None,
        zip_code: None,
    };

    let Some(raw) = get_text(row, "contact_info") else {
        return contact;
    };
    let Ok(parsed) = serde_json::from_str::<Value>(&raw) else {
        return contact;
    };

    contact.email = parsed
        .get("email")
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());

    if let Some(address) = parsed.get("mailing_address").and_then(|v| v.as_str()) {
        let mut parts = address.split(',').map(|p| p.trim().to_string());
        contact.street = parts.next().filter(|s| !s.is_empty());
        contact.city = parts.next().filter(|s| !s.is_empty());
        contact.state = parts.next().filter(|s| !s.is_empty());
        contact.zip_code = parts.next().filter(|s| !s.is_empty());
    }

    contact
}

// ============================================================================
// CLEANER
// ============================================================================

pub struct RecordCleaner;

impl RecordCleaner {
    pub fn new() -> Self {
        RecordCleaner
    }

    /// Clean the subscriber table. Duplicate identifiers keep the first
    /// occurrence; the rest are quarantined so the record accounting never
    /// loses a row.
    pub fn clean_subscribers(
        &self,
        rows: &[RawRecord],
        sink: &mut QuarantineSink,
    ) -> Vec<CleanSubscriber> {
        let mut seen: HashSet<String> = HashSet::new();
        let mut clean = Vec::with_capacity(rows.len());

        for row in rows {
            let Some(uuid) = get_text(row, "uuid") else {
                // Validator already rejects these; kept as a backstop
                sink.push(QuarantinedRecord::new(
                    SourceTable::Subscribers,
                    QuarantineReason::NullIdentifier,
                    serde_json::to_value(row).unwrap_or(Value::Null),
                ));
                continue;
            };

            if !seen.insert(uuid.clone()) {
                sink.push(QuarantinedRecord::new(
                    SourceTable::Subscribers,
                    QuarantineReason::DuplicateIdentifier { identifier: uuid },
                    serde_json::to_value(row).unwrap_or(Value::Null),
                ));
                continue;
            }

            let contact = parse_contact_info(row);

            clean.push(CleanSubscriber {
                uuid,
                name: get_categorical(row, "name"),
                sex: get_categorical(row, "sex"),
                dob: get_date(row, "dob"),
                email: contact.email,
                street: contact.street,
                city: contact.city,
                state: contact.state,
                zip_code: contact.zip_code,
                job_id: get_i64(row, "job_id"),
                career_path_id: get_i64(row, "current_career_path_id"),
                num_courses_taken: get_i64(row, "num_course_taken"),
                hours_spent: get_f64(row, "time_spent_hrs"),
            });
        }

        clean
    }

    /// Clean the courses dimension table. Byte-identical duplicate rows are
    /// dropped; a reused key with conflicting fields keeps the first row and
    /// quarantines the conflict.
    pub fn clean_courses(&self, rows: &[RawRecord], sink: &mut QuarantineSink) -> Vec<CleanCourse> {
        let mut clean = Vec::new();
        self.dedupe_dimension(
            rows,
            SourceTable::Courses,
            "career_path_id",
            sink,
            |row, id| {
                clean.push(CleanCourse {
                    career_path_id: id,
                    career_path_name: get_categorical(row, "career_path_name"),
                    hours_to_complete: get_f64(row, "hours_to_complete"),
                });
            },
        );
        clean
    }

    /// Clean the job history dimension table; same duplicate policy as
    /// courses
    pub fn clean_jobs(&self, rows: &[RawRecord], sink: &mut QuarantineSink) -> Vec<CleanJob> {
        let mut clean = Vec::new();
        self.dedupe_dimension(rows, SourceTable::JobHistory, "job_id", sink, |row, id| {
            clean.push(CleanJob {
                job_id: id,
                job_category: get_categorical(row, "job_category"),
                avg_salary: get_f64(row, "avg_salary"),
            });
        });
        clean
    }

    fn dedupe_dimension<F>(
        &self,
        rows: &[RawRecord],
        table: SourceTable,
        key_column: &str,
        sink: &mut QuarantineSink,
        mut accept: F,
    ) where
        F: FnMut(&RawRecord, i64),
    {
        let mut first_by_key: HashMap<i64, &RawRecord> = HashMap::new();

        for row in rows {
            let Some(key) = get_i64(row, key_column) else {
                // Validator already rejects these; kept as a backstop
                sink.push(QuarantinedRecord::new(
                    table,
                    QuarantineReason::NullInNonNullable {
                        column: key_column.to_string(),
                    },
                    serde_json::to_value(row).unwrap_or(Value::Null),
                ));
                continue;
            };

            match first_by_key.get(&key) {
                Some(first) if *first == row => {
                    // Exact duplicate of a dimension row carries no
                    // information; drop it
                }
                Some(_) => {
                    sink.push(QuarantinedRecord::new(
                        table,
                        QuarantineReason::DuplicateIdentifier {
                            identifier: key.to_string(),
                        },
                        serde_json::to_value(row).unwrap_or(Value::Null),
                    ));
                }
                None => {
                    first_by_key.insert(key, row);
                    accept(row, key);
                }
            }
        }
    }
}

impl Default for RecordCleaner {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn subscriber_row(uuid: &str) -> RawRecord {
        let mut row = RawRecord::new();
        row.insert("uuid".to_string(), json!(uuid));
        row.insert("name".to_string(), json!("Annabel Avery"));
        row.insert("dob".to_string(), json!("1991-03-10"));
        row.insert("sex".to_string(), json!("F"));
        row.insert(
            "contact_info".to_string(),
            json!(r#"{"mailing_address": "303 N Timber Key, Irondale, Wisconsin, 84736", "email": "annabel@example.com"}"#),
        );
        row.insert("job_id".to_string(), json!(3.0));
        row.insert("num_course_taken".to_string(), json!(10));
        row.insert("current_career_path_id".to_string(), json!("5"));
        row.insert("time_spent_hrs".to_string(), json!(14.9));
        row
    }

    #[test]
    fn test_clean_subscriber_full_row() {
        let cleaner = RecordCleaner::new();
        let mut sink = QuarantineSink::new();

        let clean = cleaner.clean_subscribers(&[subscriber_row("u-1")], &mut sink);

        assert!(sink.is_empty());
        assert_eq!(clean.len(), 1);
        let s = &clean[0];
        assert_eq!(s.uuid, "u-1");
        assert_eq!(s.dob, NaiveDate::from_ymd_opt(1991, 3, 10));
        assert_eq!(s.email.as_deref(), Some("annabel@example.com"));
        assert_eq!(s.street.as_deref(), Some("303 N Timber Key"));
        assert_eq!(s.city.as_deref(), Some("Irondale"));
        assert_eq!(s.state.as_deref(), Some("Wisconsin"));
        assert_eq!(s.zip_code.as_deref(), Some("84736"));
        assert_eq!(s.job_id, Some(3));
        assert_eq!(s.career_path_id, Some(5));
        assert_eq!(s.num_courses_taken, Some(10));
        assert_eq!(s.hours_spent, Some(14.9));
    }

    #[test]
    fn test_missing_numeric_is_flagged_not_imputed() {
        let cleaner = RecordCleaner::new();
        let mut sink = QuarantineSink::new();
        let mut row = subscriber_row("u-1");
        row.insert("num_course_taken".to_string(), Value::Null);
        row.insert("time_spent_hrs".to_string(), Value::Null);

        let clean = cleaner.clean_subscribers(&[row], &mut sink);

        assert!(sink.is_empty(), "missing numerics must not quarantine");
        assert_eq!(clean[0].num_courses_taken, None);
        assert_eq!(clean[0].hours_spent, None);
    }

    #[test]
    fn test_missing_categorical_maps_to_unknown() {
        let cleaner = RecordCleaner::new();
        let mut sink = QuarantineSink::new();
        let mut row = subscriber_row("u-1");
        row.insert("sex".to_string(), Value::Null);
        row.insert("name".to_string(), json!("   "));

        let clean = cleaner.clean_subscribers(&[row], &mut sink);

        assert_eq!(clean[0].sex, UNKNOWN);
        assert_eq!(clean[0].name, UNKNOWN);
    }

    #[test]
    fn test_unparseable_dob_is_missing() {
        let cleaner = RecordCleaner::new();
        let mut sink = QuarantineSink::new();
        let mut row = subscriber_row("u-1");
        row.insert("dob".to_string(), json!("10/03/1991"));

        let clean = cleaner.clean_subscribers(&[row], &mut sink);

        assert!(sink.is_empty());
        assert_eq!(clean[0].dob, None);
    }

    #[test]
    fn test_unparseable_contact_info_leaves_fields_missing() {
        let cleaner = RecordCleaner::new();
        let mut sink = QuarantineSink::new();
        let mut row = subscriber_row("u-1");
        row.insert("contact_info".to_string(), json!("{not json"));

        let clean = cleaner.clean_subscribers(&[row], &mut sink);

        assert_eq!(clean[0].email, None);
        assert_eq!(clean[0].street, None);
        assert_eq!(clean[0].zip_code, None);
    }

    #[test]
    fn test_short_address_leaves_tail_missing() {
        let cleaner = RecordCleaner::new();
        let mut sink = QuarantineSink::new();
        let mut row = subscriber_row("u-1");
        row.insert(
            "contact_info".to_string(),
            json!(r#"{"mailing_address": "303 N Timber Key, Irondale"}"#),
        );

        let clean = cleaner.clean_subscribers(&[row], &mut sink);

        let s = &clean[0];
        assert_eq!(s.street.as_deref(), Some("303 N Timber Key"));
        assert_eq!(s.city.as_deref(), Some("Irondale"));
        assert_eq!(s.state, None);
        assert_eq!(s.zip_code, None);
    }

    #[test]
    fn test_duplicate_subscriber_keeps_first_quarantines_rest() {
        let cleaner = RecordCleaner::new();
        let mut sink = QuarantineSink::new();
        let first = subscriber_row("u-1");
        let mut second = subscriber_row("u-1");
        second.insert("name".to_string(), json!("Someone Else"));

        let clean = cleaner.clean_subscribers(&[first, second.clone(), second], &mut sink);

        assert_eq!(clean.len(), 1);
        assert_eq!(clean[0].name, "Annabel Avery");
        assert_eq!(sink.len(), 2);
        assert!(sink
            .records()
            .iter()
            .all(|q| q.reason.code() == "duplicate_identifier"));
    }

    #[test]
    fn test_dimension_exact_duplicate_dropped_silently() {
        let cleaner = RecordCleaner::new();
        let mut sink = QuarantineSink::new();

        let mut row = RawRecord::new();
        row.insert("job_id".to_string(), json!(1));
        row.insert("job_category".to_string(), json!("analytics"));
        row.insert("avg_salary".to_string(), json!(86000));

        let clean = cleaner.clean_jobs(&[row.clone(), row], &mut sink);

        assert_eq!(clean.len(), 1);
        assert!(sink.is_empty());
    }

    #[test]
    fn test_dimension_conflicting_duplicate_quarantined() {
        let cleaner = RecordCleaner::new();
        let mut sink = QuarantineSink::new();

        let mut first = RawRecord::new();
        first.insert("career_path_id".to_string(), json!(1));
        first.insert("career_path_name".to_string(), json!("data analytics"));
        first.insert("hours_to_complete".to_string(), json!(20));

        let mut second = first.clone();
        second.insert("hours_to_complete".to_string(), json!(25));

        let clean = cleaner.clean_courses(&[first, second], &mut sink);

        assert_eq!(clean.len(), 1);
        assert_eq!(clean[0].hours_to_complete, Some(20.0));
        assert_eq!(sink.len(), 1);
    }
}
