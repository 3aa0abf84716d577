//! In-memory warehouse.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use super::{LoadRequest, TableId, WarehouseService};
use crate::error::ServiceError;
use crate::operation::{Fault, PendingOperation};

#[derive(Default)]
struct State {
    requests: Vec<LoadRequest>,
    tables: HashMap<TableId, LoadRequest>,
    faults: HashMap<String, Fault>,
}

/// Warehouse that records load requests and keeps the last load per table.
///
/// Loads always overwrite, so a table holds exactly the last request that
/// targeted it.
pub struct InMemoryWarehouse {
    state: Arc<Mutex<State>>,
    rows_per_load: u64,
    latency: Option<Duration>,
}

impl Default for InMemoryWarehouse {
    fn default() -> Self {
        Self {
            state: Arc::default(),
            rows_per_load: 1000,
            latency: None,
        }
    }
}

impl InMemoryWarehouse {
    pub fn new() -> Self {
        Self::default()
    }

    /// Row count reported by every successful load.
    pub fn with_rows_per_load(mut self, rows: u64) -> Self {
        self.rows_per_load = rows;
        self
    }

    /// Make every load take `latency` to complete.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Make loads into `table` fail with `fault`.
    pub fn fail_table(&self, table: impl Into<String>, fault: Fault) {
        lock(&self.state).faults.insert(table.into(), fault);
    }

    /// Remove every injected table fault.
    pub fn clear_failures(&self) {
        lock(&self.state).faults.clear();
    }

    /// Every load request received, in order.
    pub fn requests(&self) -> Vec<LoadRequest> {
        lock(&self.state).requests.clone()
    }

    /// The load that produced the current contents of `table`.
    pub fn contents(&self, table: &TableId) -> Option<LoadRequest> {
        lock(&self.state).tables.get(table).cloned()
    }

    /// Number of tables holding data.
    pub fn table_count(&self) -> usize {
        lock(&self.state).tables.len()
    }
}

fn lock(state: &Mutex<State>) -> std::sync::MutexGuard<'_, State> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl WarehouseService for InMemoryWarehouse {
    async fn load(&self, request: &LoadRequest) -> Result<PendingOperation<u64>, ServiceError> {
        let fault = {
            let mut state = lock(&self.state);
            state.requests.push(request.clone());
            state.faults.get(&request.destination.table).cloned()
        };

        let state = Arc::clone(&self.state);
        let request = request.clone();
        let rows = self.rows_per_load;
        let latency = self.latency;
        let name = format!("load-{}", ulid::Ulid::new());

        Ok(PendingOperation::new(name, async move {
            if let Some(latency) = latency {
                tokio::time::sleep(latency).await;
            }
            if let Some(fault) = fault {
                return Err(fault.raise(&request.destination.to_string()).await);
            }
            lock(&state)
                .tables
                .insert(request.destination.clone(), request);
            Ok(rows)
        }))
    }
}
