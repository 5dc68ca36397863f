//! Hyperliquid exchange API client for signed order placement and cancellation.
//!
//! Every exchange action is signed in two stages:
//! 1. `connectionId = keccak256(msgpack(action) || nonce_be8 || 0x00)`
//! 2. EIP-712 signature over `Agent { source, connectionId }` where `source`
//!    is "a" on mainnet and "b" on testnet.

use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

use alloy_primitives::{keccak256, Address, B256, U256};
use alloy_signer::Signer;
use alloy_signer_local::PrivateKeySigner;
use anyhow::Result;
use chrono::Utc;
use reqwest::Client;
use serde::Serialize;
use tracing::debug;

use crate::error::{ConfigError, VenueError, VenueResult};

use super::info_client::http_client;
use super::types::{ExchangeResponse, ExchangeResponseBody, ExchangeStatus};

/// EIP-712 domain of L1 actions.
pub const EIP712_DOMAIN_NAME: &str = "Exchange";
pub const EIP712_DOMAIN_VERSION: &str = "1";
pub const EIP712_CHAIN_ID: u64 = 1337;

/// Time in force of a limit order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Tif {
    /// Good-til-cancelled
    Gtc,
    /// Immediate-or-cancel
    Ioc,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LimitWire {
    pub tif: Tif,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderTypeWire {
    pub limit: LimitWire,
}

/// Order as it appears inside a signed action. Field order matters for the hash.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderWire {
    /// Asset id
    pub a: u32,
    /// Is buy
    pub b: bool,
    /// Limit price
    pub p: String,
    /// Size
    pub s: String,
    /// Reduce only
    pub r: bool,
    /// Order type
    pub t: OrderTypeWire,
    /// Client order id
    #[serde(skip_serializing_if = "Option::is_none")]
    pub c: Option<String>,
}

impl OrderWire {
    pub fn limit(asset: u32, is_buy: bool, price: String, size: String, tif: Tif) -> Self {
        Self {
            a: asset,
            b: is_buy,
            p: price,
            s: size,
            r: false,
            t: OrderTypeWire {
                limit: LimitWire { tif },
            },
            c: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CancelWire {
    /// Asset id
    pub a: u32,
    /// Order id
    pub o: u64,
}

/// Signed L1 action.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Action {
    Order {
        orders: Vec<OrderWire>,
        grouping: String,
    },
    Cancel {
        cancels: Vec<CancelWire>,
    },
}

impl Action {
    pub fn order(orders: Vec<OrderWire>) -> Self {
        Action::Order {
            orders,
            grouping: "na".to_string(),
        }
    }

    pub fn cancel(cancels: Vec<CancelWire>) -> Self {
        Action::Cancel { cancels }
    }
}

/// Signature as the exchange endpoint expects it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SignatureWire {
    pub r: String,
    pub s: String,
    pub v: u8,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ExchangePayload<'a> {
    action: &'a Action,
    nonce: u64,
    signature: SignatureWire,
    vault_address: Option<String>,
}

/// Client for the `/exchange` endpoint.
pub struct ExchangeClient {
    http: Client,
    signer: PrivateKeySigner,
    base_url: String,
    is_mainnet: bool,
    last_nonce: AtomicU64,
}

impl ExchangeClient {
    /// Create a client signing with the given private key (hex, with or without 0x).
    pub fn new(base_url: impl Into<String>, private_key: &str, is_mainnet: bool) -> Result<Self> {
        let signer = parse_signer(private_key)?;

        Ok(Self {
            http: http_client()?,
            signer,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            is_mainnet,
            last_nonce: AtomicU64::new(0),
        })
    }

    /// Address of the signing wallet.
    pub fn address(&self) -> Address {
        self.signer.address()
    }

    /// Submit an order action and return one status per order.
    pub async fn place_orders(&self, orders: Vec<OrderWire>) -> VenueResult<Vec<ExchangeStatus>> {
        self.post_action(&Action::order(orders)).await
    }

    /// Submit a batch cancel and return one status per cancel.
    pub async fn cancel_orders(&self, cancels: Vec<CancelWire>) -> VenueResult<Vec<ExchangeStatus>> {
        self.post_action(&Action::cancel(cancels)).await
    }

    async fn post_action(&self, action: &Action) -> VenueResult<Vec<ExchangeStatus>> {
        let nonce = self.next_nonce();
        let connection_id = action_hash(action, nonce)?;
        let signature = self.sign_l1_action(connection_id).await?;

        let payload = ExchangePayload {
            action,
            nonce,
            signature,
            vault_address: None,
        };

        let url = format!("{}/exchange", self.base_url);
        debug!(url = %url, nonce, "Posting exchange action");

        let response = self.http.post(&url).json(&payload).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(VenueError::Transport(format!(
                "exchange request failed: {} - {}",
                status, body
            )));
        }

        let response: ExchangeResponse = response
            .json()
            .await
            .map_err(|e| VenueError::Transport(format!("failed to decode exchange response: {}", e)))?;

        decode_statuses(response)
    }

    /// Sign the phantom agent for an action hash.
    async fn sign_l1_action(&self, connection_id: B256) -> VenueResult<SignatureWire> {
        let hash = agent_signing_hash(connection_id, self.is_mainnet);

        let signature = self
            .signer
            .sign_hash(&hash)
            .await
            .map_err(|e| VenueError::Data(format!("failed to sign action: {}", e)))?;

        Ok(split_signature(&signature.as_bytes()))
    }

    /// Millisecond timestamp, strictly increasing across calls.
    fn next_nonce(&self) -> u64 {
        let now = Utc::now().timestamp_millis().max(0) as u64;
        let mut last = self.last_nonce.load(Ordering::SeqCst);
        loop {
            let next = now.max(last + 1);
            match self
                .last_nonce
                .compare_exchange(last, next, Ordering::SeqCst, Ordering::SeqCst)
            {
                Ok(_) => return next,
                Err(actual) => last = actual,
            }
        }
    }
}

/// Parse a hex private key into a signer.
pub fn parse_signer(private_key: &str) -> Result<PrivateKeySigner, ConfigError> {
    let pk = private_key.trim();
    let pk = pk.strip_prefix("0x").unwrap_or(pk);
    PrivateKeySigner::from_str(pk).map_err(|e| ConfigError::InvalidKey(e.to_string()))
}

/// Turn a raw exchange response into per-request statuses.
fn decode_statuses(response: ExchangeResponse) -> VenueResult<Vec<ExchangeStatus>> {
    if response.status != "ok" {
        let message = match response.response {
            Some(serde_json::Value::String(s)) => s,
            Some(other) => other.to_string(),
            None => format!("exchange returned status '{}'", response.status),
        };
        return Err(VenueError::rejected(message));
    }

    let body = response
        .response
        .ok_or_else(|| VenueError::Data("exchange response without body".to_string()))?;
    let body: ExchangeResponseBody = serde_json::from_value(body)
        .map_err(|e| VenueError::Data(format!("unexpected exchange response: {}", e)))?;

    Ok(body.data.map(|d| d.statuses).unwrap_or_default())
}

/// `keccak256(msgpack(action) || nonce_be8 || 0x00)`; the trailing zero marks "no vault".
pub fn action_hash(action: &Action, nonce: u64) -> VenueResult<B256> {
    let mut data = rmp_serde::to_vec_named(action)
        .map_err(|e| VenueError::Data(format!("failed to encode action: {}", e)))?;
    data.extend_from_slice(&nonce.to_be_bytes());
    data.push(0x00);
    Ok(keccak256(&data))
}

/// EIP-712 hash of `Agent { source, connectionId }`.
pub fn agent_signing_hash(connection_id: B256, is_mainnet: bool) -> B256 {
    let type_hash = keccak256(b"Agent(string source,bytes32 connectionId)");
    let source = if is_mainnet { "a" } else { "b" };

    let mut encoded = Vec::with_capacity(96);
    encoded.extend_from_slice(type_hash.as_slice());
    encoded.extend_from_slice(keccak256(source.as_bytes()).as_slice());
    encoded.extend_from_slice(connection_id.as_slice());
    let struct_hash = keccak256(&encoded);

    // keccak256("\x19\x01" + domainSeparator + structHash)
    let mut message = vec![0x19, 0x01];
    message.extend_from_slice(domain_separator().as_slice());
    message.extend_from_slice(struct_hash.as_slice());
    keccak256(&message)
}

fn domain_separator() -> B256 {
    let type_hash = keccak256(
        b"EIP712Domain(string name,string version,uint256 chainId,address verifyingContract)",
    );

    let mut encoded = Vec::with_capacity(160);
    encoded.extend_from_slice(type_hash.as_slice());
    encoded.extend_from_slice(keccak256(EIP712_DOMAIN_NAME.as_bytes()).as_slice());
    encoded.extend_from_slice(keccak256(EIP712_DOMAIN_VERSION.as_bytes()).as_slice());
    encoded.extend_from_slice(&U256::from(EIP712_CHAIN_ID).to_be_bytes::<32>());
    // verifyingContract is the zero address
    encoded.extend_from_slice(&[0u8; 32]);
    keccak256(&encoded)
}

/// Split a 65-byte `r || s || v` signature; v is normalized to 27/28.
fn split_signature(bytes: &[u8; 65]) -> SignatureWire {
    let v = bytes[64];
    SignatureWire {
        r: format!("0x{}", hex::encode(&bytes[..32])),
        s: format!("0x{}", hex::encode(&bytes[32..64])),
        v: if v < 27 { v + 27 } else { v },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Well-known development key (never funded on mainnet)
    const TEST_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

    fn sample_order() -> Action {
        Action::order(vec![OrderWire::limit(
            3,
            true,
            "105".to_string(),
            "0.2".to_string(),
            Tif::Ioc,
        )])
    }

    #[test]
    fn test_parse_signer_address() {
        let signer = parse_signer(TEST_KEY).unwrap();
        assert_eq!(
            signer.address().to_string().to_lowercase(),
            "0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266"
        );
        assert!(matches!(parse_signer("not-a-key"), Err(ConfigError::InvalidKey(_))));
    }

    #[test]
    fn test_msgpack_field_order() {
        let bytes = rmp_serde::to_vec_named(&sample_order()).unwrap();
        // map(3) { "type": "order", "orders": ..., "grouping": "na" }
        let expected_prefix = hex::decode("83a474797065a56f72646572a66f7264657273").unwrap();
        assert!(bytes.starts_with(&expected_prefix));
        let expected_suffix = hex::decode("a867726f7570696e67a26e61").unwrap();
        assert!(bytes.ends_with(&expected_suffix));

        let bytes = rmp_serde::to_vec_named(&Action::cancel(vec![CancelWire { a: 1, o: 2 }])).unwrap();
        // map(2) { "type": "cancel", ... }
        let expected_prefix = hex::decode("82a474797065a663616e63656c").unwrap();
        assert!(bytes.starts_with(&expected_prefix));
    }

    #[test]
    fn test_action_hash_depends_on_nonce() {
        let action = sample_order();
        let h1 = action_hash(&action, 1_700_000_000_000).unwrap();
        let h2 = action_hash(&action, 1_700_000_000_000).unwrap();
        let h3 = action_hash(&action, 1_700_000_000_001).unwrap();
        assert_eq!(h1, h2);
        assert_ne!(h1, h3);
    }

    #[test]
    fn test_signing_hash_depends_on_network() {
        let connection_id = action_hash(&sample_order(), 1).unwrap();
        assert_ne!(
            agent_signing_hash(connection_id, true),
            agent_signing_hash(connection_id, false)
        );
    }

    #[test]
    fn test_split_signature() {
        let mut bytes = [0u8; 65];
        bytes[0] = 0xab;
        bytes[32] = 0xcd;
        bytes[64] = 1;
        let sig = split_signature(&bytes);
        assert_eq!(sig.r.len(), 66);
        assert!(sig.r.starts_with("0xab"));
        assert!(sig.s.starts_with("0xcd"));
        assert_eq!(sig.v, 28);
    }

    #[tokio::test]
    async fn test_sign_l1_action() {
        let client = ExchangeClient::new("https://api.hyperliquid-testnet.xyz", TEST_KEY, false).unwrap();
        let connection_id = action_hash(&sample_order(), 42).unwrap();
        let sig = client.sign_l1_action(connection_id).await.unwrap();
        assert!(sig.v == 27 || sig.v == 28);
        assert_eq!(sig.s.len(), 66);
    }

    #[test]
    fn test_nonce_strictly_increasing() {
        let client = ExchangeClient::new("https://api.hyperliquid-testnet.xyz", TEST_KEY, false).unwrap();
        let mut last = 0;
        for _ in 0..100 {
            let n = client.next_nonce();
            assert!(n > last);
            last = n;
        }
    }

    #[test]
    fn test_decode_error_status() {
        let response: ExchangeResponse = serde_json::from_str(
            r#"{"status": "err", "response": "Insufficient margin to place order."}"#,
        )
        .unwrap();
        let err = decode_statuses(response).unwrap_err();
        assert!(err.is_margin_rejection());
    }
}
