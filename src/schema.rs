// 📐 Schema Validator - expected shape of the three source tables
// Structural violations (a whole column missing) are fatal; row-level
// violations are partitioned off into the quarantine sink.

use crate::error::{PipelineError, Result};
use crate::quarantine::{QuarantineReason, QuarantinedRecord};
use crate::source::{RawRecord, RawTable, SourceTable};
use serde_json::Value;

// ============================================================================
// COLUMN TYPES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    /// Free text
    Text,
    /// Whole number; numeric text is accepted and coerced later
    Integer,
    /// Floating point; the source stores several numerics as REAL or text
    Real,
    /// JSON payload stored as text (e.g. contact_info)
    Json,
}

impl ColumnType {
    pub fn name(&self) -> &'static str {
        match self {
            ColumnType::Text => "text",
            ColumnType::Integer => "integer",
            ColumnType::Real => "real",
            ColumnType::Json => "json",
        }
    }

    /// Whether a raw value is coercible to this type. Nulls are handled by
    /// the nullability check, not here.
    fn accepts(&self, value: &Value) -> bool {
        match self {
            ColumnType::Text | ColumnType::Json => value.is_string(),
            ColumnType::Integer => match value {
                Value::Number(n) => {
                    n.is_i64() || n.as_f64().map(|f| f.fract() == 0.0).unwrap_or(false)
                }
                Value::String(s) => {
                    let s = s.trim();
                    s.parse::<i64>().is_ok()
                        || s.parse::<f64>().map(|f| f.fract() == 0.0).unwrap_or(false)
                }
                _ => false,
            },
            ColumnType::Real => match value {
                Value::Number(_) => true,
                Value::String(s) => s.trim().parse::<f64>().is_ok(),
                _ => false,
            },
        }
    }
}

// ============================================================================
// TABLE SCHEMAS
// ============================================================================

#[derive(Debug, Clone)]
pub struct ColumnSpec {
    pub name: &'static str,
    pub column_type: ColumnType,
    pub nullable: bool,
    /// Marks the subscriber identity column; a null here quarantines with
    /// `NullIdentifier` instead of the generic nullability reason
    pub identifier: bool,
}

impl ColumnSpec {
    fn key(name: &'static str, column_type: ColumnType) -> Self {
        ColumnSpec {
            name,
            column_type,
            nullable: false,
            identifier: true,
        }
    }

    /// Non-nullable but not the entity identifier (dimension key columns)
    fn required(name: &'static str, column_type: ColumnType) -> Self {
        ColumnSpec {
            name,
            column_type,
            nullable: false,
            identifier: false,
        }
    }

    fn nullable(name: &'static str, column_type: ColumnType) -> Self {
        ColumnSpec {
            name,
            column_type,
            nullable: true,
            identifier: false,
        }
    }
}

/// Expected schema for one source table
#[derive(Debug, Clone)]
pub struct TableSchema {
    pub table: SourceTable,
    pub columns: Vec<ColumnSpec>,
}

impl TableSchema {
    pub fn subscribers() -> Self {
        TableSchema {
            table: SourceTable::Subscribers,
            columns: vec![
                ColumnSpec::key("uuid", ColumnType::Text),
                ColumnSpec::nullable("name", ColumnType::Text),
                ColumnSpec::nullable("dob", ColumnType::Text),
                ColumnSpec::nullable("sex", ColumnType::Text),
                ColumnSpec::nullable("contact_info", ColumnType::Json),
                ColumnSpec::nullable("job_id", ColumnType::Integer),
                ColumnSpec::nullable("num_course_taken", ColumnType::Integer),
                ColumnSpec::nullable("current_career_path_id", ColumnType::Integer),
                ColumnSpec::nullable("time_spent_hrs", ColumnType::Real),
            ],
        }
    }

    pub fn courses() -> Self {
        TableSchema {
            table: SourceTable::Courses,
            columns: vec![
                ColumnSpec::required("career_path_id", ColumnType::Integer),
                ColumnSpec::nullable("career_path_name", ColumnType::Text),
                ColumnSpec::nullable("hours_to_complete", ColumnType::Real),
            ],
        }
    }

    pub fn job_history() -> Self {
        TableSchema {
            table: SourceTable::JobHistory,
            columns: vec![
                ColumnSpec::required("job_id", ColumnType::Integer),
                ColumnSpec::nullable("job_category", ColumnType::Text),
                ColumnSpec::nullable("avg_salary", ColumnType::Real),
            ],
        }
    }

    pub fn for_table(table: SourceTable) -> Self {
        match table {
            SourceTable::Subscribers => TableSchema::subscribers(),
            SourceTable::Courses => TableSchema::courses(),
            SourceTable::JobHistory => TableSchema::job_history(),
        }
    }
}

// ============================================================================
// VALIDATION
// ============================================================================

/// Result of validating one table: the rows that passed and the rows that
/// were quarantined with a reason
#[derive(Debug)]
pub struct ValidationOutcome {
    pub valid: Vec<RawRecord>,
    pub quarantined: Vec<QuarantinedRecord>,
}

pub struct SchemaValidator;

impl SchemaValidator {
    pub fn new() -> Self {
        SchemaValidator
    }

    /// Validate one raw table against its expected schema.
    ///
    /// Fatal: an expected column entirely absent from the source table.
    /// Extra columns the schema does not know about are ignored.
    /// Row-level: null in a non-nullable column or a non-coercible value
    /// quarantines the row, never the run.
    pub fn validate_table(
        &self,
        schema: &TableSchema,
        table: &RawTable,
    ) -> Result<ValidationOutcome> {
        // Structural precondition first: every expected column must exist
        for spec in &schema.columns {
            if !table.has_column(spec.name) {
                return Err(PipelineError::StructuralSchema {
                    table: schema.table.name().to_string(),
                    column: spec.name.to_string(),
                });
            }
        }

        let mut valid = Vec::with_capacity(table.rows.len());
        let mut quarantined = Vec::new();

        for row in &table.rows {
            match self.check_row(schema, row) {
                None => valid.push(row.clone()),
                Some(reason) => quarantined.push(QuarantinedRecord::new(
                    schema.table,
                    reason,
                    serde_json::to_value(row).unwrap_or(Value::Null),
                )),
            }
        }

        Ok(ValidationOutcome { valid, quarantined })
    }

    /// First violated rule wins; a row needs only one reason to be rejected
    fn check_row(&self, schema: &TableSchema, row: &RawRecord) -> Option<QuarantineReason> {
        for spec in &schema.columns {
            let value = row.get(spec.name).unwrap_or(&Value::Null);

            let is_null =
                value.is_null() || matches!(value, Value::String(s) if s.trim().is_empty());

            if is_null {
                if spec.nullable {
                    continue;
                }
                if spec.identifier {
                    return Some(QuarantineReason::NullIdentifier);
                }
                return Some(QuarantineReason::NullInNonNullable {
                    column: spec.name.to_string(),
                });
            }

            if !spec.column_type.accepts(value) {
                return Some(QuarantineReason::TypeMismatch {
                    column: spec.name.to_string(),
                    expected: spec.column_type.name().to_string(),
                });
            }
        }

        None
    }
}

impl Default for SchemaValidator {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// TESTS
// ============================================================================
