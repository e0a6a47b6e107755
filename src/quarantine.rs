// 🚧 Quarantine Sink - rows excluded from the clean output
// Collects rejects from the validator, cleaner, and aggregator instead of
// aborting the run; the full set is persisted for human review.

use crate::source::SourceTable;
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ============================================================================
// REASON CODES
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum QuarantineReason {
    /// The subscriber identifier column is null or empty
    NullIdentifier,

    /// A non-nullable column holds a null value
    NullInNonNullable { column: String },

    /// A value cannot be coerced to the declared column type
    TypeMismatch { column: String, expected: String },

    /// Identifier already seen in this table; first occurrence wins
    DuplicateIdentifier { identifier: String },

    /// Course/job row referenced by no subscriber
    OrphanReference { key_column: String, key: String },
}

impl QuarantineReason {
    /// Stable machine-readable code, used as the `reason` column of the
    /// quarantine table
    pub fn code(&self) -> &'static str {
        match self {
            QuarantineReason::NullIdentifier => "null_identifier",
            QuarantineReason::NullInNonNullable { .. } => "null_in_non_nullable",
            QuarantineReason::TypeMismatch { .. } => "type_mismatch",
            QuarantineReason::DuplicateIdentifier { .. } => "duplicate_identifier",
            QuarantineReason::OrphanReference { .. } => "orphan_reference",
        }
    }
}

impl std::fmt::Display for QuarantineReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QuarantineReason::NullIdentifier => {
                write!(f, "identifier is null or empty")
            }
            QuarantineReason::NullInNonNullable { column } => {
                write!(f, "null value in non-nullable column `{}`", column)
            }
            QuarantineReason::TypeMismatch { column, expected } => {
                write!(f, "column `{}` is not coercible to {}", column, expected)
            }
            QuarantineReason::DuplicateIdentifier { identifier } => {
                write!(f, "duplicate identifier `{}`, kept first occurrence", identifier)
            }
            QuarantineReason::OrphanReference { key_column, key } => {
                write!(f, "orphan reference: `{}` = {} matches no subscriber", key_column, key)
            }
        }
    }
}

// ============================================================================
// QUARANTINED RECORD
// ============================================================================

/// A rejected row plus the reason it could not be cleaned/aggregated.
/// Never merged back into the aggregated output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuarantinedRecord {
    pub table: SourceTable,
    pub reason: QuarantineReason,
    /// The offending row, serialized as it looked when rejected
    pub record: Value,
}

impl QuarantinedRecord {
    pub fn new(table: SourceTable, reason: QuarantineReason, record: Value) -> Self {
        QuarantinedRecord {
            table,
            reason,
            record,
        }
    }
}

// ============================================================================
// SINK
// ============================================================================

/// Accumulates quarantined records across all pipeline stages
#[derive(Debug, Default)]
pub struct QuarantineSink {
    records: Vec<QuarantinedRecord>,
}

impl QuarantineSink {
    pub fn new() -> Self {
        QuarantineSink::default()
    }

    pub fn push(&mut self, record: QuarantinedRecord) {
        self.records.push(record);
    }

    pub fn extend(&mut self, records: Vec<QuarantinedRecord>) {
        self.records.extend(records);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[QuarantinedRecord] {
        &self.records
    }

    /// Quarantine ratio over the run's total input rows
    pub fn ratio(&self, input_rows: usize) -> f64 {
        if input_rows == 0 {
            return 0.0;
        }
        self.records.len() as f64 / input_rows as f64
    }

    /// Pass/fail decision: the run fails when the ratio exceeds the
    /// configured maximum
    pub fn exceeds(&self, input_rows: usize, max_ratio: f64) -> bool {
        self.ratio(input_rows) > max_ratio
    }

    /// Order-independent signature of the quarantine set, used by the
    /// driver to detect a re-run that would change nothing
    pub fn signature(&self) -> Vec<(String, String, String)> {
        signature_of(&self.records)
    }
}

/// (table, reason detail, serialized record) triples, sorted.
/// JSON objects serialize with sorted keys, so equal sets compare equal.
pub fn signature_of(records: &[QuarantinedRecord]) -> Vec<(String, String, String)> {
    let mut sig: Vec<(String, String, String)> = records
        .iter()
        .map(|q| {
            (
                q.table.name().to_string(),
                q.reason.to_string(),
                serde_json::to_string(&q.record).unwrap_or_default(),
            )
        })
        .collect();
    sig.sort();
    sig
}

// ============================================================================
// TESTS
// ============================================================================
