//! Hyperliquid info API client (read-only: metadata, account state, mids, fills).

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::Client;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::{VenueError, VenueResult};

use super::types::*;

pub const MAINNET_API_URL: &str = "https://api.hyperliquid.xyz";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Build the shared HTTP client used by both API clients.
pub(crate) fn http_client() -> Result<Client> {
    Client::builder()
        .timeout(DEFAULT_TIMEOUT)
        .build()
        .context("Failed to create HTTP client")
}

/// Client for the `/info` endpoint.
#[derive(Clone)]
pub struct InfoClient {
    client: Client,
    base_url: String,
}

impl InfoClient {
    /// Create a client against the given API base URL.
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        Ok(Self {
            client: http_client()?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    async fn post<T: DeserializeOwned>(&self, request: &InfoRequest) -> VenueResult<T> {
        let url = format!("{}/info", self.base_url);
        debug!(url = %url, request = ?request, "Info request");

        let response = self.client.post(&url).json(request).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(VenueError::Transport(format!(
                "info request failed: {} - {}",
                status, body
            )));
        }

        response
            .json()
            .await
            .map_err(|e| VenueError::Transport(format!("failed to decode info response: {}", e)))
    }

    /// Perp universe (names and size decimals).
    pub async fn meta(&self) -> VenueResult<Meta> {
        self.post(&InfoRequest::Meta).await
    }

    /// Spot universe and token list.
    pub async fn spot_meta(&self) -> VenueResult<SpotMeta> {
        self.post(&InfoRequest::SpotMeta).await
    }

    /// Mid price of every listed instrument, as strings.
    pub async fn all_mids(&self) -> VenueResult<HashMap<String, String>> {
        self.post(&InfoRequest::AllMids).await
    }

    /// Perp positions and margin summary of an address.
    pub async fn clearinghouse_state(&self, user: &str) -> VenueResult<ClearinghouseState> {
        self.post(&InfoRequest::ClearinghouseState {
            user: user.to_string(),
        })
        .await
    }

    /// Spot token balances of an address.
    pub async fn spot_clearinghouse_state(&self, user: &str) -> VenueResult<SpotClearinghouseState> {
        self.post(&InfoRequest::SpotClearinghouseState {
            user: user.to_string(),
        })
        .await
    }

    /// Resting orders of an address, across all instrument classes.
    pub async fn open_orders(&self, user: &str) -> VenueResult<Vec<OpenOrder>> {
        self.post(&InfoRequest::OpenOrders {
            user: user.to_string(),
        })
        .await
    }

    /// Recent fills of an address, newest first.
    pub async fn user_fills(&self, user: &str) -> VenueResult<Vec<UserFill>> {
        self.post(&InfoRequest::UserFills {
            user: user.to_string(),
        })
        .await
    }
}

/// True when the URL points at mainnet (decides the signing source).
pub fn is_mainnet_url(url: &str) -> bool {
    !url.contains("testnet")
}
