//! Status envelope codec.
//!
//! The batch job publishes one envelope when it finishes:
//!
//! ```json
//! {"status": "SUCCESS", "tables": [{"table_name": "t1", "columns": {"names": ["a"], "types": ["INT"]}}]}
//! ```
//!
//! Decoding validates the whole document and rejects anything malformed
//! instead of coercing it.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use snafu::{ResultExt, ensure};

use crate::error::{
    ColumnCountMismatchSnafu, DecodeError, DuplicateColumnSnafu, EmptyColumnSnafu,
    EmptyTableNameSnafu, EncodeSnafu, InvalidUtf8Snafu, MalformedJsonSnafu,
    SuccessWithoutTablesSnafu,
};

/// Overall outcome of the batch job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    Success,
    Failed,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Success => "SUCCESS",
            Status::Failed => "FAILED",
        }
    }
}

/// One column of a result set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Column {
    pub name: String,
    pub data_type: String,
}

impl Column {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
        }
    }
}

/// A result set produced by the job and its destination schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableDescriptor {
    pub table_name: String,
    /// Columns in schema order. Names are unique.
    pub columns: Vec<Column>,
}

impl TableDescriptor {
    pub fn new(table_name: impl Into<String>, columns: Vec<Column>) -> Self {
        Self {
            table_name: table_name.into(),
            columns,
        }
    }
}

/// The inter-stage message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusEnvelope {
    pub status: Status,
    pub tables: Vec<TableDescriptor>,
}

impl StatusEnvelope {
    pub fn success(tables: Vec<TableDescriptor>) -> Self {
        Self {
            status: Status::Success,
            tables,
        }
    }

    pub fn failed() -> Self {
        Self {
            status: Status::Failed,
            tables: Vec::new(),
        }
    }

    /// Decode and validate a payload.
    pub fn decode(payload: &[u8]) -> Result<Self, DecodeError> {
        let text = std::str::from_utf8(payload).context(InvalidUtf8Snafu)?;
        let wire: WireEnvelope = serde_json::from_str(text).context(MalformedJsonSnafu)?;
        Self::from_wire(wire)
    }

    /// Validate and encode to the wire format.
    pub fn encode(&self) -> Result<Vec<u8>, DecodeError> {
        self.validate()?;
        serde_json::to_vec(&WireEnvelope::from(self)).context(EncodeSnafu)
    }

    /// Check the envelope's invariants.
    pub fn validate(&self) -> Result<(), DecodeError> {
        ensure!(
            self.status != Status::Success || !self.tables.is_empty(),
            SuccessWithoutTablesSnafu
        );

        for (index, table) in self.tables.iter().enumerate() {
            ensure!(
                !table.table_name.trim().is_empty(),
                EmptyTableNameSnafu { index }
            );
            let mut seen = HashSet::new();
            for column in &table.columns {
                ensure!(
                    !column.name.is_empty() && !column.data_type.is_empty(),
                    EmptyColumnSnafu {
                        table: &table.table_name
                    }
                );
                ensure!(
                    seen.insert(column.name.as_str()),
                    DuplicateColumnSnafu {
                        table: &table.table_name,
                        column: &column.name,
                    }
                );
            }
        }
        Ok(())
    }

    fn from_wire(wire: WireEnvelope) -> Result<Self, DecodeError> {
        let mut tables = Vec::with_capacity(wire.tables.len());
        for table in wire.tables {
            let WireColumns { names, types } = table.columns;
            ensure!(
                names.len() == types.len(),
                ColumnCountMismatchSnafu {
                    table: &table.table_name,
                    names: names.len(),
                    types: types.len(),
                }
            );
            let columns = names
                .into_iter()
                .zip(types)
                .map(|(name, data_type)| Column { name, data_type })
                .collect();
            tables.push(TableDescriptor {
                table_name: table.table_name,
                columns,
            });
        }

        let envelope = Self {
            status: wire.status,
            tables,
        };
        envelope.validate()?;
        Ok(envelope)
    }
}

#[derive(Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct WireEnvelope {
    status: Status,
    #[serde(default)]
    tables: Vec<WireTable>,
}

#[derive(Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct WireTable {
    table_name: String,
    columns: WireColumns,
}

#[derive(Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct WireColumns {
    names: Vec<String>,
    types: Vec<String>,
}

impl From<&StatusEnvelope> for WireEnvelope {
    fn from(envelope: &StatusEnvelope) -> Self {
        Self {
            status: envelope.status,
            tables: envelope
                .tables
                .iter()
                .map(|table| WireTable {
                    table_name: table.table_name.clone(),
                    columns: WireColumns {
                        names: table.columns.iter().map(|c| c.name.clone()).collect(),
                        types: table.columns.iter().map(|c| c.data_type.clone()).collect(),
                    },
                })
                .collect(),
        }
    }
}
