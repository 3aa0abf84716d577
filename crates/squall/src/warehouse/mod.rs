//! Loading result sets into the warehouse.
//!
//! Each table descriptor is resolved to a located artifact and loaded with
//! overwrite semantics into `{project}.{dataset}.{table_name}`. Failures are
//! isolated per table: one bad table never stops the rest of the batch.

pub mod memory;

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::{FutureExt, StreamExt, stream};
use serde::Serialize;
use snafu::ResultExt;
use tracing::{error, info};

use crate::emit;
use crate::envelope::{Column, TableDescriptor};
use crate::error::{ErrorSummary, ListingSnafu, LoadSnafu, PipelineError, ServiceError};
use crate::locator::ArtifactLocator;
use crate::metrics::events::{TableLoadFailed, TableLoaded};
use crate::operation::PendingOperation;
use squall_core::with_deadline;

pub use memory::InMemoryWarehouse;

/// How a load treats existing table contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum WriteMode {
    /// Truncate and replace.
    Overwrite,
}

impl WriteMode {
    /// Provider name of the write disposition.
    pub fn as_str(&self) -> &'static str {
        match self {
            WriteMode::Overwrite => "WRITE_TRUNCATE",
        }
    }
}

/// Format of the loaded files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SourceFormat {
    Parquet,
}

impl SourceFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceFormat::Parquet => "PARQUET",
        }
    }
}

/// Fully qualified destination table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct TableId {
    pub project: String,
    pub dataset: String,
    pub table: String,
}

impl TableId {
    pub fn new(
        project: impl Into<String>,
        dataset: impl Into<String>,
        table: impl Into<String>,
    ) -> Self {
        Self {
            project: project.into(),
            dataset: dataset.into(),
            table: table.into(),
        }
    }
}

impl fmt::Display for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.project, self.dataset, self.table)
    }
}

/// One load operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoadRequest {
    pub source_uri: String,
    pub destination: TableId,
    pub write_mode: WriteMode,
    pub format: SourceFormat,
    /// Destination schema in column order.
    pub schema: Vec<Column>,
}

/// Black-box warehouse service.
#[async_trait]
pub trait WarehouseService: Send + Sync {
    /// Start a load. The operation resolves to the number of rows loaded.
    async fn load(&self, request: &LoadRequest) -> Result<PendingOperation<u64>, ServiceError>;
}

/// Per-table outcome of a load batch.
#[derive(Debug)]
pub struct LoadResult {
    pub table: String,
    pub destination: TableId,
    pub outcome: Result<u64, PipelineError>,
}

impl Serialize for LoadResult {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeStruct;

        let mut state = serializer.serialize_struct("LoadResult", 4)?;
        state.serialize_field("table", &self.table)?;
        state.serialize_field("destination", &self.destination.to_string())?;
        state.serialize_field("rows", &self.rows())?;
        state.serialize_field("error", &self.outcome.as_ref().err().map(ErrorSummary::from))?;
        state.end()
    }
}

impl LoadResult {
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }

    /// Rows loaded, if the load succeeded.
    pub fn rows(&self) -> Option<u64> {
        self.outcome.as_ref().ok().copied()
    }
}

/// Loads every table of a SUCCESS envelope.
pub struct WarehouseLoader {
    service: Arc<dyn WarehouseService>,
    locator: ArtifactLocator,
    project: String,
    dataset: String,
    timeout: Duration,
    concurrency: usize,
}

impl WarehouseLoader {
    pub fn new(
        service: Arc<dyn WarehouseService>,
        locator: ArtifactLocator,
        project: impl Into<String>,
        dataset: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            service,
            locator,
            project: project.into(),
            dataset: dataset.into(),
            timeout,
            concurrency: 1,
        }
    }

    /// Load up to `concurrency` tables at a time. Results keep input order.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Destination of a table.
    pub fn destination(&self, table_name: &str) -> TableId {
        TableId::new(&self.project, &self.dataset, table_name)
    }

    /// Load every table, returning one result per descriptor in input order.
    ///
    /// An empty batch is a contract violation and is rejected.
    pub async fn load_all(
        &self,
        tables: &[TableDescriptor],
    ) -> Result<Vec<LoadResult>, PipelineError> {
        if tables.is_empty() {
            return Err(PipelineError::EmptySuccess);
        }

        info!(
            tables = tables.len(),
            dataset = %self.dataset,
            concurrency = self.concurrency,
            "Loading tables"
        );
        let loads: Vec<_> = tables
            .iter()
            .map(|table| self.load_one(table).boxed())
            .collect();
        let results: Vec<LoadResult> = stream::iter(loads)
            .buffered(self.concurrency)
            .collect()
            .await;

        let failed = results.iter().filter(|r| !r.is_success()).count();
        info!(
            loaded = results.len() - failed,
            failed,
            "Finished loading tables"
        );
        Ok(results)
    }

    async fn load_one(&self, table: &TableDescriptor) -> LoadResult {
        let destination = self.destination(&table.table_name);
        let start = Instant::now();
        let outcome = self.try_load(table, &destination).await;

        match &outcome {
            Ok(rows) => {
                info!(table = %table.table_name, destination = %destination, rows, "Table loaded");
                emit!(TableLoaded {
                    table: table.table_name.clone(),
                    rows: *rows,
                    duration: start.elapsed(),
                });
            }
            Err(e) => {
                error!(table = %table.table_name, destination = %destination, error = %e, "Table load failed");
                emit!(TableLoadFailed {
                    table: table.table_name.clone(),
                    kind: e.kind(),
                });
            }
        }

        LoadResult {
            table: table.table_name.clone(),
            destination,
            outcome,
        }
    }

    async fn try_load(
        &self,
        table: &TableDescriptor,
        destination: &TableId,
    ) -> Result<u64, PipelineError> {
        let prefix = table.table_name.as_str();
        let artifact = self
            .locator
            .locate(prefix)
            .await
            .context(ListingSnafu { prefix })?
            .ok_or_else(|| PipelineError::ArtifactNotFound {
                prefix: prefix.to_string(),
            })?;

        let request = LoadRequest {
            source_uri: self.locator.uri_for(&artifact),
            destination: destination.clone(),
            write_mode: WriteMode::Overwrite,
            format: SourceFormat::Parquet,
            schema: table.columns.clone(),
        };
        info!(table = %table.table_name, source = %request.source_uri, "Starting load");

        let table_label = destination.to_string();
        with_deadline(
            format!("load into {table_label}"),
            self.timeout,
            async {
                let operation = self.service.load(&request).await?;
                operation.wait().await
            },
        )
        .await?
        .context(LoadSnafu { table: table_label })
    }
}
