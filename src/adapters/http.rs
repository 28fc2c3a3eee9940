// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! HTTP implementations of the adapter traits.
//!
//! [`HttpSot`] talks to the ERP with a bearer token (re-authenticating once
//! on 401); [`HttpMarketplace`] talks to the venue API with basic auth and
//! applies the status policy: 409 is an idempotent duplicate and maps to
//! success, 429 carries the parsed `Retry-After` upward.

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::adapters::traits::{AdapterError, Marketplace, SourceOfTruth};
use crate::model::{InventoryRecord, InventoryUpdate, ItemUpdate, ProductDetail, Store};
use crate::rate::parse_retry_after;
use crate::resilience::retry::{retry_with_policy, RetryPolicy};

const HTTP_TIMEOUT_SECS: u64 = 30;

fn build_client() -> Result<Client, AdapterError> {
    Client::builder()
        .timeout(std::time::Duration::from_secs(HTTP_TIMEOUT_SECS))
        .build()
        .map_err(|e| AdapterError::Network(format!("failed to build HTTP client: {e}")))
}

fn retry_after_of(response: &Response) -> Option<std::time::Duration> {
    response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_retry_after)
}

/// ERP client carrying a cached bearer token.
pub struct HttpSot {
    client: Client,
    base_url: String,
    login: String,
    password: String,
    token: tokio::sync::RwLock<Option<String>>,
}

#[derive(Deserialize)]
struct AuthResponse {
    token: String,
}

impl HttpSot {
    pub fn new(
        base_url: impl Into<String>,
        login: impl Into<String>,
        password: impl Into<String>,
    ) -> Result<Self, AdapterError> {
        Ok(Self {
            client: build_client()?,
            base_url: base_url.into(),
            login: login.into(),
            password: password.into(),
            token: tokio::sync::RwLock::new(None),
        })
    }

    /// Authenticate under the auth retry policy (3 attempts, fixed 2 s).
    async fn authenticate(&self) -> Result<String, AdapterError> {
        let token = retry_with_policy("sot auth", &RetryPolicy::auth(), |_| {}, || async {
            let response = self
                .client
                .post(format!("{}/auth/login", self.base_url))
                .json(&json!({"login": self.login, "password": self.password}))
                .send()
                .await
                .map_err(|e| AdapterError::Network(e.to_string()))?;

            if !response.status().is_success() {
                let status = response.status().as_u16();
                let body = response.text().await.unwrap_or_default();
                return Err(AdapterError::Auth(format!("status {status}: {body}")));
            }
            let auth: AuthResponse = response
                .json()
                .await
                .map_err(|e| AdapterError::Auth(format!("bad auth response: {e}")))?;
            Ok(auth.token)
        })
        .await?;

        *self.token.write().await = Some(token.clone());
        debug!("Authenticated against source of truth");
        Ok(token)
    }

    async fn token(&self) -> Result<String, AdapterError> {
        if let Some(token) = self.token.read().await.clone() {
            return Ok(token);
        }
        self.authenticate().await
    }

    /// Issue a GET/POST with the bearer token, re-authenticating once on 401.
    async fn request_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        body: Option<Value>,
    ) -> Result<T, AdapterError> {
        let mut reauthed = false;
        loop {
            let token = self.token().await?;
            let url = format!("{}{path}", self.base_url);
            let request = match &body {
                Some(payload) => self.client.post(&url).json(payload),
                None => self.client.get(&url),
            };
            let response = request
                .bearer_auth(&token)
                .send()
                .await
                .map_err(|e| AdapterError::Network(e.to_string()))?;

            let status = response.status();
            if status == StatusCode::UNAUTHORIZED && !reauthed {
                debug!("Token expired, re-authenticating once");
                *self.token.write().await = None;
                reauthed = true;
                continue;
            }
            if !status.is_success() {
                let retry_after = retry_after_of(&response);
                let status = status.as_u16();
                let body = response.text().await.unwrap_or_default();
                return Err(match status {
                    401 => AdapterError::Auth(format!("status 401: {body}")),
                    429 => AdapterError::RateLimited { retry_after },
                    500..=599 => AdapterError::Server { status, body },
                    _ => AdapterError::Terminal { status, body },
                });
            }
            return response
                .json()
                .await
                .map_err(|e| AdapterError::Network(format!("bad response body: {e}")));
        }
    }
}

#[async_trait]
impl SourceOfTruth for HttpSot {
    async fn inventory(&self, store_id: u32) -> Result<Vec<InventoryRecord>, AdapterError> {
        self.request_json(&format!("/inventory?store_id={store_id}"), None)
            .await
    }

    async fn products(&self, ids: &[i64]) -> Result<Vec<ProductDetail>, AdapterError> {
        self.request_json("/products", Some(json!({ "ids": ids })))
            .await
    }
}

/// Marketplace venue API client. One instance serves all stores; creds and
/// base URL come from each [`Store`].
pub struct HttpMarketplace {
    client: Client,
    default_base_url: String,
}

impl HttpMarketplace {
    pub fn new(default_base_url: impl Into<String>) -> Result<Self, AdapterError> {
        Ok(Self {
            client: build_client()?,
            default_base_url: default_base_url.into(),
        })
    }

    fn base_url<'a>(&'a self, store: &'a Store) -> &'a str {
        store.base_url.as_deref().unwrap_or(&self.default_base_url)
    }

    /// PATCH a `{data: [...]}` batch and apply the status policy.
    async fn patch_batch(
        &self,
        store: &Store,
        url: String,
        data: Value,
    ) -> Result<(), AdapterError> {
        let response = self
            .client
            .patch(&url)
            .basic_auth(&store.credentials.username, Some(&store.credentials.password))
            .json(&json!({ "data": data }))
            .send()
            .await
            .map_err(|e| AdapterError::Network(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        if status == StatusCode::CONFLICT {
            // Duplicate batch: the venue already applied it.
            info!(venue = %store.venue_id, "409 on batch, treating as already applied");
            return Ok(());
        }

        let retry_after = retry_after_of(&response);
        let status = status.as_u16();
        let body = response.text().await.unwrap_or_default();
        Err(match status {
            429 => AdapterError::RateLimited { retry_after },
            500..=599 => AdapterError::Server { status, body },
            _ => AdapterError::Terminal { status, body },
        })
    }
}

/// Keys under which the listing endpoint has been seen to nest its array.
const LISTING_KEYS: &[&str] = &["data", "items", "results"];

fn extract_skus(payload: &Value) -> Vec<String> {
    let array = match payload {
        Value::Array(a) => Some(a),
        Value::Object(map) => LISTING_KEYS.iter().find_map(|k| map.get(*k)?.as_array()),
        _ => None,
    };
    array
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item.get("sku")?.as_str().map(String::from))
                .collect()
        })
        .unwrap_or_default()
}

#[async_trait]
impl Marketplace for HttpMarketplace {
    async fn update_items(
        &self,
        store: &Store,
        updates: &[ItemUpdate],
    ) -> Result<(), AdapterError> {
        let url = format!("{}/venues/{}/items", self.base_url(store), store.venue_id);
        self.patch_batch(store, url, serde_json::to_value(updates).unwrap_or_default())
            .await
    }

    async fn update_inventory(
        &self,
        store: &Store,
        updates: &[InventoryUpdate],
    ) -> Result<(), AdapterError> {
        let url = format!(
            "{}/venues/{}/items/inventory",
            self.base_url(store),
            store.venue_id
        );
        self.patch_batch(store, url, serde_json::to_value(updates).unwrap_or_default())
            .await
    }

    async fn list_items(&self, store: &Store) -> Result<Option<Vec<String>>, AdapterError> {
        let url = format!("{}/venues/{}/items", self.base_url(store), store.venue_id);
        let response = self
            .client
            .get(&url)
            .basic_auth(&store.credentials.username, Some(&store.credentials.password))
            .send()
            .await
            .map_err(|e| AdapterError::Network(e.to_string()))?;

        let status = response.status();
        match status.as_u16() {
            404 | 405 => {
                debug!(venue = %store.venue_id, "Listing endpoint not supported");
                Ok(None)
            }
            429 => Err(AdapterError::RateLimited { retry_after: retry_after_of(&response) }),
            s if (500..=599).contains(&s) => {
                let body = response.text().await.unwrap_or_default();
                Err(AdapterError::Server { status: s, body })
            }
            s if !status.is_success() => {
                let body = response.text().await.unwrap_or_default();
                Err(AdapterError::Terminal { status: s, body })
            }
            _ => {
                let payload: Value = response
                    .json()
                    .await
                    .map_err(|e| AdapterError::Network(format!("bad listing body: {e}")))?;
                let skus = extract_skus(&payload);
                if skus.is_empty() {
                    warn!(venue = %store.venue_id, "Listing returned no recognizable items");
                }
                Ok(Some(skus))
            }
        }
    }
}
