// 📜 Changelog Writer - append-only, monotonically versioned run log
// One JSON line per successful run: version, timestamp, run id, and the
// added/changed/removed/quarantined counts. Entries are immutable once
// written.

use crate::aggregate::AggregatedRecord;
use crate::error::{PipelineError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;
use uuid::Uuid;

// ============================================================================
// ENTRIES
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangelogEntry {
    pub version: u64,
    pub timestamp: DateTime<Utc>,
    pub run_id: Uuid,
    pub added: usize,
    pub changed: usize,
    pub removed: usize,
    pub quarantined: usize,
}

impl ChangelogEntry {
    pub fn summary(&self) -> String {
        format!(
            "v{}: +{} added, ~{} changed, -{} removed, {} quarantined ({})",
            self.version, self.added, self.changed, self.removed, self.quarantined, self.timestamp
        )
    }
}

// ============================================================================
// DIFF
// ============================================================================

/// Counts of what changed between the previous and the new aggregated set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DiffSummary {
    pub added: usize,
    pub changed: usize,
    pub removed: usize,
}

impl DiffSummary {
    pub fn is_empty(&self) -> bool {
        self.added == 0 && self.changed == 0 && self.removed == 0
    }
}

// ============================================================================
// WRITER
// ============================================================================

pub struct ChangelogWriter;

impl ChangelogWriter {
    /// Field-level diff by identifier: new identifiers count as added,
    /// shared identifiers with a different content fingerprint as changed,
    /// identifiers only in the previous set as removed.
    pub fn diff(previous: &[AggregatedRecord], next: &[AggregatedRecord]) -> DiffSummary {
        let previous_by_id: HashMap<&str, String> = previous
            .iter()
            .map(|r| (r.uuid.as_str(), r.fingerprint()))
            .collect();

        let next_ids: HashSet<&str> = next.iter().map(|r| r.uuid.as_str()).collect();

        let mut summary = DiffSummary::default();

        for record in next {
            match previous_by_id.get(record.uuid.as_str()) {
                None => summary.added += 1,
                Some(old_fingerprint) => {
                    if *old_fingerprint != record.fingerprint() {
                        summary.changed += 1;
                    }
                }
            }
        }

        summary.removed = previous
            .iter()
            .filter(|r| !next_ids.contains(r.uuid.as_str()))
            .count();
        summary
    }

    /// Load all entries; a changelog that does not exist yet is empty
    pub fn load(path: &Path) -> Result<Vec<ChangelogEntry>> {
        if !path.exists() {
            return Ok(Vec::new());
        }

        let contents = fs::read_to_string(path)
            .map_err(|e| PipelineError::ChangelogWrite(format!("read {}: {e}", path.display())))?;

        let mut entries = Vec::new();
        for line in contents.lines().filter(|l| !l.trim().is_empty()) {
            let entry: ChangelogEntry = serde_json::from_str(line).map_err(|e| {
                PipelineError::ChangelogWrite(format!("malformed entry in {}: {e}", path.display()))
            })?;
            entries.push(entry);
        }

        Ok(entries)
    }

    /// Next version is previous + 1; the very first run gets version 1
    pub fn next_version(entries: &[ChangelogEntry]) -> u64 {
        entries.last().map(|e| e.version + 1).unwrap_or(1)
    }

    /// Serialize the existing entries plus the new one as JSON lines.
    /// The caller stages this to a temporary file and renames it into
    /// place, so a crash mid-write never truncates the live changelog.
    pub fn render(entries: &[ChangelogEntry], new_entry: &ChangelogEntry) -> Result<String> {
        let mut out = String::new();
        for entry in entries.iter().chain(std::iter::once(new_entry)) {
            let line = serde_json::to_string(entry)
                .map_err(|e| PipelineError::ChangelogWrite(e.to_string()))?;
            out.push_str(&line);
            out.push('\n');
        }
        Ok(out)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn record(uuid: &str, hours: f64) -> AggregatedRecord {
        AggregatedRecord {
            uuid: uuid.to_string(),
            name: "Annabel Avery".to_string(),
            sex: "F".to_string(),
            dob: NaiveDate::from_ymd_opt(1991, 3, 10),
            email: None,
            street: None,
            city: None,
            state: None,
            zip_code: None,
            num_courses_taken: Some(10),
            hours_spent: Some(hours),
            career_path_id: Some(5),
            career_path_name: Some("data analytics".to_string()),
            hours_to_complete: Some(20.0),
            job_id: Some(1),
            job_category: Some("analytics".to_string()),
            avg_salary: Some(86000.0),
            age: Some(34),
            age_group: Some(30),
            course_progress_pct: Some(hours / 20.0 * 100.0),
        }
    }

    fn entry(version: u64) -> ChangelogEntry {
        ChangelogEntry {
            version,
            timestamp: Utc::now(),
            run_id: Uuid::new_v4(),
            added: 1,
            changed: 0,
            removed: 0,
            quarantined: 0,
        }
    }

    #[test]
    fn test_diff_added_changed_removed() {
        let previous = vec![record("a", 10.0), record("b", 5.0), record("c", 1.0)];
        let next = vec![record("a", 10.0), record("b", 7.5), record("d", 2.0)];

        let diff = ChangelogWriter::diff(&previous, &next);

        assert_eq!(diff.added, 1); // d
        assert_eq!(diff.changed, 1); // b
        assert_eq!(diff.removed, 1); // c
        assert!(!diff.is_empty());
    }

    #[test]
    fn test_diff_identical_sets_is_empty() {
        let previous = vec![record("a", 10.0), record("b", 5.0)];
        let next = previous.clone();

        assert!(ChangelogWriter::diff(&previous, &next).is_empty());
    }

    #[test]
    fn test_diff_first_run_counts_everything_added() {
        let next = vec![record("a", 10.0), record("b", 5.0)];
        let diff = ChangelogWriter::diff(&[], &next);

        assert_eq!(diff.added, 2);
        assert_eq!(diff.changed, 0);
        assert_eq!(diff.removed, 0);
    }

    #[test]
    fn test_diff_tolerates_duplicate_identifiers() {
        // The pipeline guarantees unique identifiers, but diff itself must
        // stay total over any input
        let previous = vec![record("a", 10.0)];
        let next = vec![record("a", 10.0), record("a", 10.0), record("b", 5.0)];

        let diff = ChangelogWriter::diff(&previous, &next);

        assert_eq!(diff.added, 1); // b
        assert_eq!(diff.changed, 0);
        assert_eq!(diff.removed, 0);
    }

    #[test]
    fn test_version_allocation_starts_at_one() {
        assert_eq!(ChangelogWriter::next_version(&[]), 1);
        assert_eq!(ChangelogWriter::next_version(&[entry(1), entry(2)]), 3);
    }

    #[test]
    fn test_render_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("changelog.jsonl");

        let first = entry(1);
        let rendered = ChangelogWriter::render(&[], &first).unwrap();
        fs::write(&path, rendered).unwrap();

        let loaded = ChangelogWriter::load(&path).unwrap();
        assert_eq!(loaded, vec![first.clone()]);

        // Appending preserves prior entries byte-for-byte
        let second = entry(2);
        let rendered = ChangelogWriter::render(&loaded, &second).unwrap();
        fs::write(&path, rendered).unwrap();

        let loaded = ChangelogWriter::load(&path).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0], first);
        assert_eq!(loaded[1], second);
    }

    #[test]
    fn test_load_missing_changelog_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = ChangelogWriter::load(&dir.path().join("nope.jsonl")).unwrap();
        assert!(loaded.is_empty());
    }

    #[test]
    fn test_load_rejects_malformed_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("changelog.jsonl");
        fs::write(&path, "not json\n").unwrap();

        assert!(matches!(
            ChangelogWriter::load(&path),
            Err(PipelineError::ChangelogWrite(_))
        ));
    }
}
