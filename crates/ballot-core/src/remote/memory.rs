//! In-process gateway for tests and offline demos.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;

use super::{select_pages, Filter, RemoteGateway};
use crate::error::{Error, Result};

type Table = BTreeMap<String, Value>;

/// A [`RemoteGateway`] holding tables in memory.
///
/// Upserts merge columns into existing rows like PostgREST's
/// `resolution=merge-duplicates`. A batch containing a rejected id fails as a
/// whole, mirroring a single SQL statement.
pub struct MemoryGateway {
    tables: Mutex<HashMap<String, Table>>,
    rejected_ids: Mutex<HashSet<String>>,
    received: Mutex<Vec<(String, Value)>>,
    rpc_calls: Mutex<Vec<(String, Value)>>,
    online: AtomicBool,
    page_size: AtomicUsize,
    pub select_calls: AtomicU64,
    pub page_calls: AtomicU64,
    pub upsert_calls: AtomicU64,
}

impl Default for MemoryGateway {
    fn default() -> Self {
        Self {
            tables: Mutex::new(HashMap::new()),
            rejected_ids: Mutex::new(HashSet::new()),
            received: Mutex::new(Vec::new()),
            rpc_calls: Mutex::new(Vec::new()),
            online: AtomicBool::new(true),
            page_size: AtomicUsize::new(crate::config::DEFAULT_PULL_PAGE_SIZE),
            select_calls: AtomicU64::new(0),
            page_calls: AtomicU64::new(0),
            upsert_calls: AtomicU64::new(0),
        }
    }
}

impl MemoryGateway {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate losing or regaining the network
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    /// Cap rows per page, like PostgREST's `max_rows`
    pub fn set_page_size(&self, page_size: usize) {
        self.page_size.store(page_size.max(1), Ordering::SeqCst);
    }

    /// Make every write touching `id` fail with `RemoteRejected`
    pub async fn reject_id(&self, id: impl Into<String>) {
        self.rejected_ids.lock().await.insert(id.into());
    }

    /// Put rows straight into a table, bypassing counters
    pub async fn seed(&self, table: &str, rows: impl IntoIterator<Item = Value>) {
        let mut tables = self.tables.lock().await;
        let table = tables.entry(table.to_string()).or_default();
        for row in rows {
            if let Some(id) = row_id(&row) {
                table.insert(id, row);
            }
        }
    }

    /// Current rows of a table ordered by id
    pub async fn rows(&self, table: &str) -> Vec<Value> {
        self.tables
            .lock()
            .await
            .get(table)
            .map(|rows| rows.values().cloned().collect())
            .unwrap_or_default()
    }

    /// One row by id
    pub async fn row(&self, table: &str, id: &str) -> Option<Value> {
        self.tables
            .lock()
            .await
            .get(table)
            .and_then(|rows| rows.get(id))
            .cloned()
    }

    /// Every row accepted by `upsert`, in arrival order
    pub async fn received(&self, table: &str) -> Vec<Value> {
        self.received
            .lock()
            .await
            .iter()
            .filter(|(name, _)| name == table)
            .map(|(_, row)| row.clone())
            .collect()
    }

    /// Every RPC invocation, in arrival order
    pub async fn rpc_calls(&self) -> Vec<(String, Value)> {
        self.rpc_calls.lock().await.clone()
    }

    fn ensure_online(&self) -> Result<()> {
        if self.online.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(Error::Unreachable("memory gateway is offline".into()))
        }
    }

    async fn ensure_accepted(&self, table: &str, ids: impl IntoIterator<Item = &str>) -> Result<()> {
        let rejected = self.rejected_ids.lock().await;
        if let Some(id) = ids.into_iter().find(|id| rejected.contains(*id)) {
            return Err(Error::RemoteRejected {
                table: table.to_string(),
                message: format!("row {id} violates a server constraint"),
            });
        }
        Ok(())
    }
}

fn row_id(row: &Value) -> Option<String> {
    row.get("id")
        .and_then(Value::as_str)
        .map(ToString::to_string)
}

fn merge_into(target: &mut Value, patch: &Value) {
    match (target.as_object_mut(), patch.as_object()) {
        (Some(target), Some(patch)) => {
            for (key, value) in patch {
                target.insert(key.clone(), value.clone());
            }
        }
        _ => *target = patch.clone(),
    }
}

#[async_trait]
impl RemoteGateway for MemoryGateway {
    fn page_size(&self) -> usize {
        self.page_size.load(Ordering::SeqCst)
    }

    async fn select_page(
        &self,
        table: &str,
        filter: &Filter,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<Value>> {
        self.page_calls.fetch_add(1, Ordering::Relaxed);
        self.ensure_online()?;
        Ok(self
            .rows(table)
            .await
            .into_iter()
            .filter(|row| filter.matches(row))
            .skip(offset)
            .take(limit.min(self.page_size()))
            .collect())
    }

    async fn select_all(&self, table: &str, filter: &Filter) -> Result<Vec<Value>> {
        self.select_calls.fetch_add(1, Ordering::Relaxed);
        select_pages(self, table, filter).await
    }

    async fn upsert(&self, table: &str, rows: &[Value]) -> Result<()> {
        self.upsert_calls.fetch_add(1, Ordering::Relaxed);
        self.ensure_online()?;

        let mut ids = Vec::with_capacity(rows.len());
        for row in rows {
            let id = row_id(row).ok_or_else(|| Error::RemoteRejected {
                table: table.to_string(),
                message: "row without id".to_string(),
            })?;
            ids.push(id);
        }
        self.ensure_accepted(table, ids.iter().map(String::as_str))
            .await?;

        let mut tables = self.tables.lock().await;
        let stored = tables.entry(table.to_string()).or_default();
        for (id, row) in ids.into_iter().zip(rows) {
            stored
                .entry(id)
                .and_modify(|existing| merge_into(existing, row))
                .or_insert_with(|| row.clone());
        }
        drop(tables);

        self.received
            .lock()
            .await
            .extend(rows.iter().map(|row| (table.to_string(), row.clone())));
        Ok(())
    }

    async fn update(&self, table: &str, id: &str, patch: &Value) -> Result<()> {
        self.ensure_online()?;
        self.ensure_accepted(table, [id]).await?;
        if let Some(row) = self
            .tables
            .lock()
            .await
            .get_mut(table)
            .and_then(|rows| rows.get_mut(id))
        {
            merge_into(row, patch);
        }
        Ok(())
    }

    async fn delete(&self, table: &str, id: &str) -> Result<()> {
        self.ensure_online()?;
        self.ensure_accepted(table, [id]).await?;
        if let Some(rows) = self.tables.lock().await.get_mut(table) {
            rows.remove(id);
        }
        Ok(())
    }

    async fn call(&self, function: &str, args: &Value) -> Result<Value> {
        self.ensure_online()?;
        self.rpc_calls
            .lock()
            .await
            .push((function.to_string(), args.clone()));
        Ok(Value::Null)
    }
}
