// 💾 Artifact Store - the production-visible output of a run
// A SQLite database (aggregated + quarantine tables) and a sibling
// changelog. Replacement is staged: both files are written fully to
// temporary paths, then renamed over the previous artifacts, so a crash
// mid-write never leaves a partially-written artifact.

use crate::aggregate::AggregatedRecord;
use crate::changelog::{ChangelogEntry, ChangelogWriter};
use crate::error::{PipelineError, Result};
use crate::quarantine::QuarantinedRecord;
use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension};
use std::fs;
use std::path::{Path, PathBuf};

pub const DATABASE_FILE: &str = "subscribers_cleansed.db";
pub const CHANGELOG_FILE: &str = "changelog.jsonl";

pub struct ArtifactStore {
    pub database_path: PathBuf,
    pub changelog_path: PathBuf,
}

impl ArtifactStore {
    pub fn new(output_dir: &Path) -> Self {
        ArtifactStore {
            database_path: output_dir.join(DATABASE_FILE),
            changelog_path: output_dir.join(CHANGELOG_FILE),
        }
    }

    // ========================================================================
    // READING THE PREVIOUS RUN
    // ========================================================================

    /// Previous aggregated set, or empty on the first run
    pub fn load_previous(&self) -> Result<Vec<AggregatedRecord>> {
        if !self.database_path.exists() {
            return Ok(Vec::new());
        }

        let conn = Connection::open(&self.database_path)?;
        let mut stmt = conn.prepare(
            "SELECT uuid, name, sex, dob, email, street, city, state, zip_code,
                    num_courses_taken, hours_spent,
                    career_path_id, career_path_name, hours_to_complete,
                    job_id, job_category, avg_salary,
                    age, age_group, course_progress_pct
             FROM subscribers_aggregated
             ORDER BY uuid",
        )?;

        let records = stmt
            .query_map([], |row| {
                let dob: Option<String> = row.get(3)?;

                Ok(AggregatedRecord {
                    uuid: row.get(0)?,
                    name: row.get(1)?,
                    sex: row.get(2)?,
                    dob: dob.and_then(|s| NaiveDate::parse_from_str(&s, "%Y-%m-%d").ok()),
                    email: row.get(4)?,
                    street: row.get(5)?,
                    city: row.get(6)?,
                    state: row.get(7)?,
                    zip_code: row.get(8)?,
                    num_courses_taken: row.get(9)?,
                    hours_spent: row.get(10)?,
                    career_path_id: row.get(11)?,
                    career_path_name: row.get(12)?,
                    hours_to_complete: row.get(13)?,
                    job_id: row.get(14)?,
                    job_category: row.get(15)?,
                    avg_salary: row.get(16)?,
                    age: row.get(17)?,
                    age_group: row.get(18)?,
                    course_progress_pct: row.get(19)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(records)
    }

    /// Changelog entry the committed database recorded for itself, or
    /// `None` before the first commit
    pub fn load_committed_entry(&self) -> Result<Option<ChangelogEntry>> {
        if !self.database_path.exists() {
            return Ok(None);
        }

        let conn = Connection::open(&self.database_path)?;
        let raw: Option<String> = conn
            .query_row(
                "SELECT value FROM meta WHERE key = 'changelog_entry'",
                [],
                |row| row.get(0),
            )
            .optional()?;

        match raw {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    /// The database is renamed into place before its changelog line, so a
    /// crash or rename failure between the two leaves the changelog one
    /// entry behind the database it describes. This closes that gap by
    /// appending the entry the database recorded for itself. Returns
    /// whether an entry was appended.
    pub fn reconcile_changelog(&self, entries: &mut Vec<ChangelogEntry>) -> Result<bool> {
        let committed = match self.load_committed_entry()? {
            Some(entry) => entry,
            None => return Ok(false),
        };

        let last = entries.last().map(|e| e.version).unwrap_or(0);
        if committed.version <= last {
            return Ok(false);
        }

        let staged = staged_path(&self.changelog_path);
        let rendered = ChangelogWriter::render(entries, &committed)?;
        fs::write(&staged, rendered)
            .map_err(|e| PipelineError::ChangelogWrite(e.to_string()))?;
        fs::rename(&staged, &self.changelog_path)
            .map_err(|e| PipelineError::ChangelogWrite(e.to_string()))?;

        entries.push(committed);
        Ok(true)
    }

    /// Previous quarantine set as a sorted signature, for the driver's
    /// no-op detection. Empty on the first run.
    pub fn load_previous_quarantine(&self) -> Result<Vec<(String, String, String)>> {
        if !self.database_path.exists() {
            return Ok(Vec::new());
        }

        let conn = Connection::open(&self.database_path)?;
        let mut stmt =
            conn.prepare("SELECT source_table, detail, record FROM quarantine")?;

        let mut rows = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get(1)?, row.get(2)?))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        rows.sort();
        Ok(rows)
    }

    // ========================================================================
    // COMMITTING A RUN
    // ========================================================================

    /// Write the new artifacts. Everything is staged first; the renames at
    /// the end are the only operations that touch the live files.
    pub fn commit(
        &self,
        aggregated: &[AggregatedRecord],
        quarantined: &[QuarantinedRecord],
        prior_entries: &[ChangelogEntry],
        new_entry: &ChangelogEntry,
    ) -> Result<()> {
        let staged_db = staged_path(&self.database_path);
        let staged_log = staged_path(&self.changelog_path);

        // Stage the database
        if staged_db.exists() {
            fs::remove_file(&staged_db)?;
        }
        self.write_database(&staged_db, aggregated, quarantined, new_entry)?;

        // Stage the changelog (prior entries preserved verbatim, one line
        // appended)
        let rendered = ChangelogWriter::render(prior_entries, new_entry)?;
        fs::write(&staged_log, rendered)
            .map_err(|e| PipelineError::ChangelogWrite(e.to_string()))?;

        // Promote: database first, then the changelog describing it. The
        // database carries its own changelog entry, so a failure between
        // the two renames is closed by reconcile_changelog on the next run.
        fs::rename(&staged_db, &self.database_path)?;
        fs::rename(&staged_log, &self.changelog_path).map_err(|e| {
            PipelineError::ChangelogWrite(format!(
                "database committed but changelog rename failed, \
                 the next run appends the recorded entry: {e}"
            ))
        })?;

        Ok(())
    }

    fn write_database(
        &self,
        path: &Path,
        aggregated: &[AggregatedRecord],
        quarantined: &[QuarantinedRecord],
        new_entry: &ChangelogEntry,
    ) -> Result<()> {
        let mut conn = Connection::open(path)?;

        // Rollback journal only: WAL would leave sidecar files behind and
        // the staged file must stay self-contained for the rename
        conn.execute_batch(
            "CREATE TABLE subscribers_aggregated (
                uuid TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                sex TEXT NOT NULL,
                dob TEXT,
                email TEXT,
                street TEXT,
                city TEXT,
                state TEXT,
                zip_code TEXT,
                num_courses_taken INTEGER,
                hours_spent REAL,
                career_path_id INTEGER,
                career_path_name TEXT,
                hours_to_complete REAL,
                job_id INTEGER,
                job_category TEXT,
                avg_salary REAL,
                age INTEGER,
                age_group INTEGER,
                course_progress_pct REAL
            );
            CREATE TABLE quarantine (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                source_table TEXT NOT NULL,
                reason TEXT NOT NULL,
                detail TEXT NOT NULL,
                record TEXT NOT NULL
            );
            CREATE TABLE meta (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );",
        )?;

        let tx = conn.transaction()?;

        for record in aggregated {
            tx.execute(
                "INSERT INTO subscribers_aggregated (
                    uuid, name, sex, dob, email, street, city, state, zip_code,
                    num_courses_taken, hours_spent,
                    career_path_id, career_path_name, hours_to_complete,
                    job_id, job_category, avg_salary,
                    age, age_group, course_progress_pct
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20)",
                params![
                    record.uuid,
                    record.name,
                    record.sex,
                    record.dob.map(|d| d.format("%Y-%m-%d").to_string()),
                    record.email,
                    record.street,
                    record.city,
                    record.state,
                    record.zip_code,
                    record.num_courses_taken,
                    record.hours_spent,
                    record.career_path_id,
                    record.career_path_name,
                    record.hours_to_complete,
                    record.job_id,
                    record.job_category,
                    record.avg_salary,
                    record.age,
                    record.age_group,
                    record.course_progress_pct,
                ],
            )?;
        }

        for reject in quarantined {
            tx.execute(
                "INSERT INTO quarantine (source_table, reason, detail, record)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    reject.table.name(),
                    reject.reason.code(),
                    reject.reason.to_string(),
                    serde_json::to_string(&reject.record)?,
                ],
            )?;
        }

        // The database records the changelog entry written alongside it;
        // used to detect a changelog left behind by an interrupted commit
        tx.execute(
            "INSERT INTO meta (key, value) VALUES ('changelog_entry', ?1)",
            params![serde_json::to_string(new_entry)?],
        )?;

        tx.commit()?;
        Ok(())
    }
}

fn staged_path(path: &Path) -> PathBuf {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".staged-{file_name}"))
}

// ============================================================================
// TESTS
// ============================================================================
