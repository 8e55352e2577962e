//! PostgREST-style table client.

use crate::auth::SessionStore;
use crate::config::ClientConfig;
use crate::error::ClientError;
use campus_core::{EntityId, PageRequest, Record, RemoteError, Table};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

/// Error body returned by the REST gateway.
#[derive(Debug, Deserialize)]
struct GatewayError {
    message: String,
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    details: Option<String>,
}

#[derive(Clone)]
pub struct RestClient {
    client: reqwest::Client,
    base_url: String,
    anon_key: Arc<SecretString>,
    sessions: SessionStore,
}

impl RestClient {
    pub fn new(config: &ClientConfig, sessions: SessionStore) -> Result<Self, ClientError> {
        let timeout = Duration::from_millis(config.request_timeout_ms);
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: config.rest_url(),
            anon_key: Arc::new(SecretString::new(config.anon_key.clone().into())),
            sessions,
        })
    }

    pub fn table_url(&self, table: Table) -> String {
        format!("{}/{}", self.base_url, table)
    }

    /// Fetch one window of a table, newest first.
    pub async fn fetch_page<T: Record>(
        &self,
        request: &PageRequest,
    ) -> Result<Vec<T>, ClientError> {
        let response = self
            .client
            .get(self.table_url(T::TABLE))
            .headers(self.headers()?)
            .query(&page_query(T::SELECT, request))
            .send()
            .await?;
        let records: Vec<T> = parse_response(response).await?;
        records.iter().try_for_each(|r| r.validate())?;
        Ok(records)
    }

    /// Fetch one row by id, with the record's joined columns.
    pub async fn fetch_record<T: Record>(&self, id: EntityId) -> Result<Option<T>, ClientError> {
        let response = self
            .client
            .get(self.table_url(T::TABLE))
            .headers(self.headers()?)
            .query(&record_query(T::SELECT, id))
            .send()
            .await?;
        let mut rows: Vec<T> = parse_response(response).await?;
        if rows.is_empty() {
            return Ok(None);
        }
        let record = rows.swap_remove(0);
        record.validate()?;
        Ok(Some(record))
    }

    /// Insert a row and return the canonical record.
    pub async fn insert<T: Record>(&self, draft: &T::Draft) -> Result<T, ClientError> {
        let response = self
            .client
            .post(self.table_url(T::TABLE))
            .headers(self.headers()?)
            .header("prefer", "return=representation")
            .query(&[("select", T::SELECT)])
            .json(draft)
            .send()
            .await?;
        let mut rows: Vec<T> = parse_response(response).await?;
        if rows.is_empty() {
            return Err(RemoteError::decode(format!("insert into {} returned no row", T::TABLE)).into());
        }
        let record = rows.swap_remove(0);
        record.validate()?;
        Ok(record)
    }

    /// Insert an untyped row, discarding the response body.
    pub async fn insert_value(
        &self,
        table: Table,
        row: &serde_json::Value,
    ) -> Result<(), ClientError> {
        let response = self
            .client
            .post(self.table_url(table))
            .headers(self.headers()?)
            .header("prefer", "return=minimal")
            .json(row)
            .send()
            .await?;
        expect_success(response).await
    }

    pub async fn update<T: Record>(&self, id: EntityId, patch: &T::Patch) -> Result<(), ClientError> {
        let response = self
            .client
            .patch(self.table_url(T::TABLE))
            .headers(self.headers()?)
            .query(&id_query(id))
            .json(patch)
            .send()
            .await?;
        expect_success(response).await
    }

    pub async fn delete<T: Record>(&self, id: EntityId) -> Result<(), ClientError> {
        let response = self
            .client
            .delete(self.table_url(T::TABLE))
            .headers(self.headers()?)
            .query(&id_query(id))
            .send()
            .await?;
        expect_success(response).await
    }

    fn headers(&self) -> Result<HeaderMap, ClientError> {
        build_headers(&self.anon_key, self.sessions.access_token().as_deref())
    }
}

/// `apikey` plus a bearer token: the session's when signed in, else the anon key.
pub fn build_headers(
    anon_key: &SecretString,
    access_token: Option<&SecretString>,
) -> Result<HeaderMap, ClientError> {
    let mut headers = HeaderMap::new();
    headers.insert(
        HeaderName::from_static("apikey"),
        HeaderValue::from_str(anon_key.expose_secret())
            .map_err(|e| ClientError::InvalidHeader(e.to_string()))?,
    );
    let bearer = access_token.unwrap_or(anon_key);
    let mut value = HeaderValue::from_str(&format!("Bearer {}", bearer.expose_secret()))
        .map_err(|e| ClientError::InvalidHeader(e.to_string()))?;
    value.set_sensitive(true);
    headers.insert(HeaderName::from_static("authorization"), value);
    Ok(headers)
}

/// Query parameters selecting one page window.
pub fn page_query(select: &str, request: &PageRequest) -> Vec<(String, String)> {
    let direction = if request.descending { "desc" } else { "asc" };
    let mut query = vec![
        ("select".to_string(), select.to_string()),
        ("order".to_string(), format!("{}.{}", request.order_by, direction)),
        ("offset".to_string(), request.offset.to_string()),
        ("limit".to_string(), request.limit.to_string()),
    ];
    if let Some(filter) = &request.filter {
        query.push((filter.column.clone(), format!("eq.{}", filter.value_text())));
    }
    query
}

/// Query parameters matching one row by id.
pub fn id_query(id: EntityId) -> [(&'static str, String); 1] {
    [("id", format!("eq.{}", id))]
}

/// Query parameters selecting at most one row by id.
pub fn record_query(select: &str, id: EntityId) -> Vec<(String, String)> {
    vec![
        ("select".to_string(), select.to_string()),
        ("id".to_string(), format!("eq.{}", id)),
        ("limit".to_string(), "1".to_string()),
    ]
}

async fn parse_response<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
) -> Result<T, ClientError> {
    let status = response.status();
    if status.is_success() {
        let text = response.text().await?;
        Ok(serde_json::from_str(&text)?)
    } else {
        let text = response.text().await?;
        Err(rejection(status.as_u16(), &text).into())
    }
}

async fn expect_success(response: reqwest::Response) -> Result<(), ClientError> {
    let status = response.status();
    if status.is_success() {
        return Ok(());
    }
    let text = response.text().await?;
    Err(rejection(status.as_u16(), &text).into())
}

/// Map an error response body to a rejection, preferring the gateway message.
pub fn rejection(status: u16, body: &str) -> RemoteError {
    match serde_json::from_str::<GatewayError>(body) {
        Ok(err) => {
            let mut message = err.message;
            if let Some(code) = err.code {
                message = format!("{}: {}", code, message);
            }
            if let Some(details) = err.details {
                message = format!("{} ({})", message, details);
            }
            RemoteError::rejected(status, message)
        }
        Err(_) => RemoteError::rejected(status, format!("HTTP {}: {}", status, body)),
    }
}
