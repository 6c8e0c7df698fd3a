//! REST collection transport.
//!
//! `GET {base}/{key}` returns the authoritative collection for a cache key;
//! `POST {base}/{collection}` persists one record and returns its canonical
//! form.

use std::marker::PhantomData;
use std::time::Duration;

use async_trait::async_trait;
use optimist_cache::{Fetcher, Writer};
use optimist_core::{CacheKey, CachedItem, TransportError, ValidationError, WriteError};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::config::ClientConfig;
use crate::error::ClientError;

/// Fetcher and Writer for one REST collection.
pub struct RestCollection<T> {
    client: reqwest::Client,
    base_url: String,
    collection: String,
    _item: PhantomData<fn() -> T>,
}

impl<T> Clone for RestCollection<T> {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            base_url: self.base_url.clone(),
            collection: self.collection.clone(),
            _item: PhantomData,
        }
    }
}

impl<T> RestCollection<T> {
    pub fn new(config: &ClientConfig) -> Result<Self, ClientError> {
        let timeout = Duration::from_millis(config.request_timeout_ms);
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(
            client,
            &config.api_base_url,
            &config.collection,
        ))
    }

    pub fn with_client(client: reqwest::Client, base_url: &str, collection: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            collection: collection.trim_matches('/').to_string(),
            _item: PhantomData,
        }
    }

    /// The cache key this collection is read under.
    pub fn key(&self) -> CacheKey {
        CacheKey::new(&self.collection)
    }

    pub fn collection_url(&self) -> String {
        self.url_for(&self.collection)
    }

    fn url_for(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }
}

fn map_reqwest_error(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout
    } else if err.is_decode() {
        TransportError::Decode {
            reason: err.to_string(),
        }
    } else if let Some(status) = err.status() {
        TransportError::Status {
            status: status.as_u16(),
            message: err.to_string(),
        }
    } else {
        TransportError::Unreachable {
            reason: err.to_string(),
        }
    }
}

/// Map a failed write response to the error taxonomy. The server signals a
/// refused record with 400 or 422.
pub(crate) fn write_error_for(status: StatusCode, body: String) -> WriteError {
    match status {
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
            ValidationError::Rejected { reason: body }.into()
        }
        _ => TransportError::Status {
            status: status.as_u16(),
            message: body,
        }
        .into(),
    }
}

async fn error_body(response: reqwest::Response) -> String {
    response
        .text()
        .await
        .unwrap_or_else(|err| format!("<unreadable body: {}>", err))
}

#[async_trait]
impl<T> Fetcher<T> for RestCollection<T>
where
    T: CachedItem + DeserializeOwned,
{
    async fn fetch(&self, key: &CacheKey) -> Result<Vec<T>, TransportError> {
        let url = self.url_for(key.as_str());
        tracing::debug!(url = %url, "GET collection");
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status {
                status: status.as_u16(),
                message: error_body(response).await,
            });
        }
        response.json::<Vec<T>>().await.map_err(map_reqwest_error)
    }
}

#[async_trait]
impl<T> Writer<T> for RestCollection<T>
where
    T: CachedItem + Serialize + DeserializeOwned,
{
    async fn write(&self, item: &T) -> Result<T, WriteError> {
        let url = self.collection_url();
        tracing::debug!(url = %url, "POST record");
        let response = self
            .client
            .post(&url)
            .json(item)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(write_error_for(status, error_body(response).await));
        }
        Ok(response.json::<T>().await.map_err(map_reqwest_error)?)
    }
}
