//! PostgREST client for the hosted backend.

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::RwLock;

use super::{Filter, RemoteGateway};
use crate::config::{normalize_http_url, ClientConfig, DEFAULT_PULL_PAGE_SIZE};
use crate::error::{Error, Result};
use crate::models::{AdminSession, EntityKind};
use crate::util::{compact_text, normalize_text_option};

/// [`RemoteGateway`] over the PostgREST HTTP API.
pub struct PostgrestGateway {
    rest_url: String,
    api_key: String,
    access_token: RwLock<Option<String>>,
    page_size: usize,
    client: reqwest::Client,
}

impl std::fmt::Debug for PostgrestGateway {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("PostgrestGateway")
            .field("rest_url", &self.rest_url)
            .field("api_key", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}

impl PostgrestGateway {
    /// Create a client for `{rest_url}` (already including `/rest/v1`).
    pub fn new(
        rest_url: &str,
        api_key: impl Into<String>,
        timeout: std::time::Duration,
    ) -> Result<Self> {
        let rest_url = normalize_http_url(rest_url, "rest_url")
            .map_err(|error| Error::InvalidInput(error.to_string()))?;
        let api_key = normalize_text_option(Some(api_key.into()))
            .ok_or_else(|| Error::InvalidInput("API key must not be empty".into()))?;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .map_err(|error| Error::InvalidInput(format!("Failed to build HTTP client: {error}")))?;

        Ok(Self {
            rest_url,
            api_key,
            access_token: RwLock::new(None),
            page_size: DEFAULT_PULL_PAGE_SIZE,
            client,
        })
    }

    /// Rows per pull request; keep at or below the server's `max_rows`.
    #[must_use]
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Create a client from configuration; fails when no remote is configured.
    pub fn from_config(config: &ClientConfig) -> Result<Self> {
        let (Some(rest_url), Some(api_key)) = (config.rest_url(), config.supabase_key.clone())
        else {
            return Err(Error::InvalidInput(
                "No remote configured: set SUPABASE_URL and SUPABASE_ANON_KEY".into(),
            ));
        };
        Ok(Self::new(&rest_url, api_key, config.request_timeout)?
            .with_page_size(config.pull_page_size))
    }

    /// Authenticate as the signed-in admin, or as the anon key when `None`
    /// or expired.
    pub async fn set_session(&self, session: Option<&AdminSession>) {
        let token = session
            .filter(|session| !session.is_expired())
            .map(|session| session.access_token.clone());
        *self.access_token.write().await = token;
    }

    /// Base REST URL
    pub fn rest_url(&self) -> &str {
        &self.rest_url
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/{table}", self.rest_url)
    }

    async fn send(&self, table: &str, request: RequestBuilder) -> Result<Response> {
        let token = self
            .access_token
            .read()
            .await
            .clone()
            .unwrap_or_else(|| self.api_key.clone());

        let response = request
            .header("apikey", &self.api_key)
            .bearer_auth(token)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let message = parse_api_error(status, &body);
        if matches!(
            status,
            StatusCode::BAD_GATEWAY | StatusCode::SERVICE_UNAVAILABLE | StatusCode::GATEWAY_TIMEOUT
        ) {
            return Err(Error::Unreachable(message));
        }
        Err(Error::RemoteRejected {
            table: table.to_string(),
            message,
        })
    }

    async fn write(
        &self,
        table: &str,
        method: Method,
        query: &[(String, String)],
        prefer: &str,
        body: &impl serde::Serialize,
    ) -> Result<()> {
        let request = self
            .client
            .request(method, self.table_url(table))
            .query(query)
            .header("Prefer", prefer)
            .json(body);
        self.send(table, request).await?;
        Ok(())
    }
}

#[async_trait]
impl RemoteGateway for PostgrestGateway {
    fn page_size(&self) -> usize {
        self.page_size
    }

    async fn select_page(
        &self,
        table: &str,
        filter: &Filter,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<Value>> {
        let query = page_query(table, filter, offset, limit);
        let request = self.client.get(self.table_url(table)).query(&query);
        let response = self.send(table, request).await?;
        let body = response.text().await.map_err(transport_error)?;
        Ok(serde_json::from_str(&body)?)
    }

    async fn upsert(&self, table: &str, rows: &[Value]) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }
        let query = [("on_conflict".to_string(), "id".to_string())];
        self.write(
            table,
            Method::POST,
            &query,
            "resolution=merge-duplicates,return=minimal",
            &rows,
        )
        .await
    }

    async fn update(&self, table: &str, id: &str, patch: &Value) -> Result<()> {
        let query = [("id".to_string(), format!("eq.{id}"))];
        self.write(table, Method::PATCH, &query, "return=minimal", patch)
            .await
    }

    async fn delete(&self, table: &str, id: &str) -> Result<()> {
        let request = self
            .client
            .delete(self.table_url(table))
            .query(&[("id", format!("eq.{id}"))]);
        self.send(table, request).await?;
        Ok(())
    }

    async fn call(&self, function: &str, args: &Value) -> Result<Value> {
        let request = self
            .client
            .post(format!("{}/rpc/{function}", self.rest_url))
            .json(args);
        let response = self.send(function, request).await?;
        let body = response.text().await.map_err(transport_error)?;
        if body.trim().is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&body)?)
    }
}

fn transport_error(error: reqwest::Error) -> Error {
    Error::Unreachable(error.to_string())
}

/// Query for one stable page; PostgREST truncates at `max_rows` silently
fn page_query(table: &str, filter: &Filter, offset: usize, limit: usize) -> Vec<(String, String)> {
    let mut query = vec![
        ("select".to_string(), "*".to_string()),
        ("order".to_string(), order_for(table)),
        ("limit".to_string(), limit.to_string()),
        ("offset".to_string(), offset.to_string()),
    ];
    query.extend(filter_query(filter));
    query
}

fn order_for(table: &str) -> String {
    EntityKind::from_remote_table(table)
        .map_or(&["id"][..], EntityKind::remote_key)
        .iter()
        .map(|column| format!("{column}.asc"))
        .collect::<Vec<_>>()
        .join(",")
}

/// PostgREST query parameters for a filter
fn filter_query(filter: &Filter) -> Vec<(String, String)> {
    match filter {
        Filter::None => Vec::new(),
        Filter::Eq(column, value) => vec![(column.clone(), format!("eq.{}", scalar(value)))],
        Filter::In(column, values) => {
            let list = values
                .iter()
                .map(|value| match value {
                    Value::String(text) => format!("\"{}\"", text.replace('"', "\\\"")),
                    other => scalar(other),
                })
                .collect::<Vec<_>>()
                .join(",");
            vec![(column.clone(), format!("in.({list})"))]
        }
        Filter::IsNull(column) => vec![(column.clone(), "is.null".to_string())],
    }
}

fn scalar(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: Option<String>,
    message: Option<String>,
}

fn parse_api_error(status: StatusCode, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<ApiErrorBody>(body) {
        if let Some(message) = payload.message.or(payload.error) {
            return format!("{} ({})", message.trim(), status.as_u16());
        }
    }

    let trimmed = compact_text(body);
    if trimmed.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        format!("{} ({})", trimmed, status.as_u16())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    #[test]
    fn builds_postgrest_filters() {
        assert!(filter_query(&Filter::None).is_empty());
        assert_eq!(
            filter_query(&Filter::eq("election_id", "e1")),
            vec![("election_id".to_string(), "eq.e1".to_string())]
        );
        assert_eq!(
            filter_query(&Filter::is_in("election_id", ["e1", "e2"])),
            vec![("election_id".to_string(), "in.(\"e1\",\"e2\")".to_string())]
        );
        assert_eq!(
            filter_query(&Filter::is_in("vote_count", [json!(1), json!(2)])),
            vec![("vote_count".to_string(), "in.(1,2)".to_string())]
        );
        assert_eq!(
            filter_query(&Filter::is_null("deleted_at")),
            vec![("deleted_at".to_string(), "is.null".to_string())]
        );
    }

    #[test]
    fn parse_api_error_prefers_message() {
        let body = r#"{"message":"duplicate key value","code":"23505"}"#;
        assert_eq!(
            parse_api_error(StatusCode::CONFLICT, body),
            "duplicate key value (409)"
        );
        assert_eq!(parse_api_error(StatusCode::FORBIDDEN, ""), "HTTP 403");
        assert_eq!(
            parse_api_error(StatusCode::BAD_REQUEST, "  plain text "),
            "plain text (400)"
        );
    }

    #[test]
    fn page_query_orders_by_table_key() {
        let query = page_query("students", &Filter::eq("registered", true), 2000, 1000);
        assert_eq!(
            query,
            vec![
                ("select".to_string(), "*".to_string()),
                ("order".to_string(), "id.asc".to_string()),
                ("limit".to_string(), "1000".to_string()),
                ("offset".to_string(), "2000".to_string()),
                ("registered".to_string(), "eq.true".to_string()),
            ]
        );
        assert_eq!(
            order_for("candidate_tallies"),
            "election_id.asc,candidate_id.asc"
        );
    }

    #[test]
    fn from_config_uses_configured_page_size() {
        let config = ClientConfig {
            supabase_url: Some("https://project.supabase.co".to_string()),
            supabase_key: Some("anon".to_string()),
            pull_page_size: 200,
            ..ClientConfig::default()
        };
        let gateway = PostgrestGateway::from_config(&config).unwrap();
        assert_eq!(gateway.page_size(), 200);
    }

    #[test]
    fn new_validates_inputs() {
        let timeout = Duration::from_secs(1);
        assert!(PostgrestGateway::new("project.supabase.co", "anon", timeout).is_err());
        assert!(PostgrestGateway::new("https://project.supabase.co/rest/v1", " ", timeout).is_err());

        let gateway =
            PostgrestGateway::new("https://project.supabase.co/rest/v1/", "anon", timeout).unwrap();
        assert_eq!(gateway.rest_url(), "https://project.supabase.co/rest/v1");
        assert_eq!(
            gateway.table_url("elections"),
            "https://project.supabase.co/rest/v1/elections"
        );
        assert!(!format!("{gateway:?}").contains("anon"));
    }

    #[test]
    fn from_config_requires_remote() {
        assert!(PostgrestGateway::from_config(&ClientConfig::default()).is_err());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn refused_connection_is_unreachable() {
        // Nothing listens on the discard port.
        let gateway =
            PostgrestGateway::new("http://127.0.0.1:9/rest/v1", "anon", Duration::from_secs(2))
                .unwrap();
        let error = gateway
            .select_all("elections", &Filter::None)
            .await
            .unwrap_err();
        assert!(error.is_connectivity(), "{error:?}");
    }
}
