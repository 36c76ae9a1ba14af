//! Supabase PostgREST client using the service_role key

use reqwest::{Client, Method, RequestBuilder};
use serde::{de::DeserializeOwned, Serialize};

use crate::config::Config;

/// Server-side database client. The service_role key bypasses RLS; it never
/// leaves this process.
#[derive(Clone)]
pub struct SupabaseClient {
    client: Client,
    base_url: String,
    service_role_key: String,
}

impl SupabaseClient {
    pub fn new(base_url: &str, service_role_key: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            service_role_key: service_role_key.to_string(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(&config.supabase_url, &config.supabase_service_role_key)
    }

    /// Authenticated request against `/rest/v1/{table}?{query}`.
    fn request(&self, method: Method, table: &str, query: &str) -> RequestBuilder {
        let mut url = format!("{}/rest/v1/{}", self.base_url, table);
        if !query.is_empty() {
            url.push('?');
            url.push_str(query);
        }
        self.client
            .request(method, url)
            .header("apikey", &self.service_role_key)
            .header("Authorization", format!("Bearer {}", self.service_role_key))
            .header("Content-Type", "application/json")
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, StoreError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        Err(StoreError::Api { status, body })
    }

    /// Fetch all rows matching the query.
    pub async fn select<T: DeserializeOwned>(
        &self,
        table: &str,
        query: &str,
    ) -> Result<Vec<T>, StoreError> {
        let response = self.request(Method::GET, table, query).send().await?;
        Self::check(response).await?.json().await.map_err(StoreError::Decode)
    }

    /// Fetch at most one row matching the query.
    pub async fn select_one<T: DeserializeOwned>(
        &self,
        table: &str,
        query: &str,
    ) -> Result<Option<T>, StoreError> {
        let query = format!("{}&limit=1", query);
        let mut rows = self.select::<T>(table, &query).await?;
        Ok(if rows.is_empty() {
            None
        } else {
            Some(rows.swap_remove(0))
        })
    }

    /// Insert a row and return the stored representation.
    pub async fn insert<T: Serialize, R: DeserializeOwned>(
        &self,
        table: &str,
        data: &T,
    ) -> Result<R, StoreError> {
        let response = self
            .request(Method::POST, table, "")
            .header("Prefer", "return=representation")
            .json(data)
            .send()
            .await?;
        let rows: Vec<R> = Self::check(response).await?.json().await.map_err(StoreError::Decode)?;
        rows.into_iter().next().ok_or(StoreError::NoRowReturned)
    }

    /// Update rows matching the query.
    pub async fn update<T: Serialize>(
        &self,
        table: &str,
        query: &str,
        data: &T,
    ) -> Result<(), StoreError> {
        let response = self
            .request(Method::PATCH, table, query)
            .json(data)
            .send()
            .await?;
        Self::check(response).await.map(|_| ())
    }

    /// Delete rows matching the query.
    pub async fn delete(&self, table: &str, query: &str) -> Result<(), StoreError> {
        let response = self.request(Method::DELETE, table, query).send().await?;
        Self::check(response).await.map(|_| ())
    }
}

/// Store errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("API error (status {status}): {body}")]
    Api { status: u16, body: String },

    #[error("Failed to parse response: {0}")]
    Decode(reqwest::Error),

    #[error("No row returned from insert")]
    NoRowReturned,

    #[error("Could not allocate a unique join code")]
    JoinCodeExhausted,
}
