//! Remote relational backend.
//!
//! The sync engines only see the [`RemoteGateway`] trait. Rows travel as JSON
//! objects using the remote column names.

mod memory;
mod postgrest;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;

pub use memory::MemoryGateway;
pub use postgrest::PostgrestGateway;

/// Row filter for `select_all`.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Filter {
    /// Every row, tombstones included
    #[default]
    None,
    Eq(String, Value),
    In(String, Vec<Value>),
    IsNull(String),
}

impl Filter {
    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Eq(column.into(), value.into())
    }

    pub fn is_in<V: Into<Value>>(column: impl Into<String>, values: impl IntoIterator<Item = V>) -> Self {
        Self::In(column.into(), values.into_iter().map(Into::into).collect())
    }

    pub fn is_null(column: impl Into<String>) -> Self {
        Self::IsNull(column.into())
    }

    /// Whether `row` passes the filter
    pub fn matches(&self, row: &Value) -> bool {
        let field = |column: &str| row.get(column).unwrap_or(&Value::Null);
        match self {
            Self::None => true,
            Self::Eq(column, value) => field(column) == value,
            Self::In(column, values) => values.contains(field(column)),
            Self::IsNull(column) => field(column).is_null(),
        }
    }
}

/// Remote table access used by the sync layer.
///
/// Implementations map network failures to [`crate::Error::Unreachable`] and
/// server-side refusals to [`crate::Error::RemoteRejected`].
#[async_trait]
pub trait RemoteGateway: Send + Sync {
    /// Rows requested per [`select_page`](Self::select_page) call
    fn page_size(&self) -> usize {
        crate::config::DEFAULT_PULL_PAGE_SIZE
    }

    /// Up to `limit` rows of `table` passing `filter`, ordered by id,
    /// skipping the first `offset`
    async fn select_page(
        &self,
        table: &str,
        filter: &Filter,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<Value>>;

    /// Fetch every row of `table` passing `filter`
    async fn select_all(&self, table: &str, filter: &Filter) -> Result<Vec<Value>> {
        select_pages(self, table, filter).await
    }

    /// Insert or update rows by id
    async fn upsert(&self, table: &str, rows: &[Value]) -> Result<()>;

    /// Patch one row
    async fn update(&self, table: &str, id: &str, patch: &Value) -> Result<()>;

    /// Delete one row
    async fn delete(&self, table: &str, id: &str) -> Result<()>;

    /// Invoke a server-side function
    async fn call(&self, function: &str, args: &Value) -> Result<Value>;
}

/// Page through `table` until a page comes back short.
pub async fn select_pages<G>(gateway: &G, table: &str, filter: &Filter) -> Result<Vec<Value>>
where
    G: RemoteGateway + ?Sized,
{
    let limit = gateway.page_size().max(1);
    let mut rows = Vec::new();
    loop {
        let page = gateway.select_page(table, filter, rows.len(), limit).await?;
        let last = page.len() < limit;
        rows.extend(page);
        if last {
            return Ok(rows);
        }
    }
}
