//! HTTP store gateway.
//!
//! Talks to a REST collection endpoint:
//! - `GET {base}/{resource}` lists every entity
//! - `POST {base}/{resource}` creates one
//! - `PUT {base}/{resource}/{id}` replaces one
//!
//! Every request carries HTTP Basic credentials. Any non-2xx answer is a
//! [`StoreError::Status`].

use super::{Ack, StoreGateway};
use crate::config::StoreConfig;
use crate::error::StoreError;
use crate::model::Entity;
use crate::{Error, Result};
use async_trait::async_trait;
use reqwest::{Client, Method, Response};
use serde::Serialize;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Error bodies longer than this are cut before being put into an error.
const MAX_ERROR_BODY_CHARS: usize = 512;

/// Store gateway backed by a `reqwest` client.
pub struct HttpStoreGateway {
    client: Client,
    collection_url: String,
    username: String,
    password: String,
}

impl HttpStoreGateway {
    /// Create a gateway from store configuration.
    pub fn new(config: &StoreConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .connect_timeout(Duration::from_secs(config.connect_timeout_seconds))
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))?;

        let collection_url = format!(
            "{}/{}",
            config.base_url.trim_end_matches('/'),
            config.resource.trim_matches('/')
        );

        info!(url = %collection_url, user = %config.username, "Store gateway initialized");

        Ok(Self {
            client,
            collection_url,
            username: config.username.clone(),
            password: config.password.clone(),
        })
    }

    /// URL of the collection endpoint.
    pub fn collection_url(&self) -> &str {
        &self.collection_url
    }

    fn entity_url(&self, id: impl std::fmt::Display) -> String {
        format!("{}/{}", self.collection_url, id)
    }

    /// Send an authenticated request and reject non-2xx answers.
    async fn send<B: Serialize + ?Sized>(
        &self,
        method: Method,
        url: &str,
        body: Option<&B>,
    ) -> std::result::Result<Response, StoreError> {
        let start = Instant::now();
        let mut request = self
            .client
            .request(method.clone(), url)
            .basic_auth(&self.username, Some(&self.password))
            .header(reqwest::header::ACCEPT, "application/json");

        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(|e| StoreError::Transport {
            method: method.to_string(),
            url: url.to_string(),
            message: e.to_string(),
        })?;

        let status = response.status();
        debug!(
            method = %method,
            url = %url,
            status = status.as_u16(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Store request completed"
        );

        if status.is_success() {
            return Ok(response);
        }

        let mut body = response.text().await.unwrap_or_default();
        if body.chars().count() > MAX_ERROR_BODY_CHARS {
            body = body.chars().take(MAX_ERROR_BODY_CHARS).collect();
        }

        Err(StoreError::Status {
            method: method.to_string(),
            url: url.to_string(),
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl<E: Entity + 'static> StoreGateway<E> for HttpStoreGateway {
    async fn list_all(&self) -> std::result::Result<Vec<E>, StoreError> {
        let response = self
            .send::<()>(Method::GET, &self.collection_url, None)
            .await?;

        response
            .json::<Vec<E>>()
            .await
            .map_err(|e| StoreError::InvalidResponse {
                url: self.collection_url.clone(),
                message: e.to_string(),
            })
    }

    async fn create(&self, entity: &E) -> std::result::Result<Ack, StoreError> {
        let response = self
            .send(Method::POST, &self.collection_url, Some(entity))
            .await?;

        Ok(Ack {
            status: response.status().as_u16(),
        })
    }

    async fn update(&self, entity: &E) -> std::result::Result<Ack, StoreError> {
        let url = self.entity_url(entity.id());
        let response = self.send(Method::PUT, &url, Some(entity)).await?;

        Ok(Ack {
            status: response.status().as_u16(),
        })
    }
}
