//! Live adapter: reads through the info API, signs and submits through the exchange API.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use backoff::ExponentialBackoff;
use rust_decimal::Decimal;
use tracing::{info, warn};

use crate::api::{CancelWire, ExchangeClient, ExchangeStatus, InfoClient, OrderWire, Tif};
use crate::error::{VenueError, VenueResult};
use crate::models::{AccountState, Fill, InstrumentClass, InstrumentRegistry, InstrumentSpec};
use crate::trading::sizing::{round_sz, to_wire_string, venue_px};

use super::normalize;
use super::{CancelRequest, OrderAck, Venue};

const METADATA_RETRY_WINDOW: Duration = Duration::from_secs(60);

/// Venue adapter against the real Hyperliquid API.
pub struct LiveVenue {
    info: InfoClient,
    /// Absent for read-only instances (dry-run upstream, `state` command)
    exchange: Option<ExchangeClient>,
    registry: InstrumentRegistry,
    address: String,
}

impl LiveVenue {
    /// Connect with a signing key; the controller address is derived from it.
    pub async fn connect(api_url: &str, private_key: &str, is_mainnet: bool) -> Result<Self> {
        let info = InfoClient::new(api_url)?;
        let exchange = ExchangeClient::new(api_url, private_key, is_mainnet)?;
        let address = exchange.address().to_string().to_lowercase();
        let registry = load_registry(&info).await?;

        info!(address = %address, instruments = registry.len(), "Live venue ready");

        Ok(Self {
            info,
            exchange: Some(exchange),
            registry,
            address,
        })
    }

    /// Connect without a key: every read works, every write is rejected.
    pub async fn read_only(api_url: &str) -> Result<Self> {
        let info = InfoClient::new(api_url)?;
        let registry = load_registry(&info).await?;

        Ok(Self {
            info,
            exchange: None,
            registry,
            address: String::new(),
        })
    }

    fn exchange(&self) -> VenueResult<&ExchangeClient> {
        self.exchange
            .as_ref()
            .ok_or_else(|| VenueError::rejected("read-only venue cannot submit actions"))
    }

    fn spec(&self, instrument: &str) -> VenueResult<&InstrumentSpec> {
        self.registry
            .get(instrument)
            .ok_or_else(|| VenueError::Data(format!("unknown instrument '{}'", instrument)))
    }

    fn order_wire(
        &self,
        instrument: &str,
        is_buy: bool,
        size: Decimal,
        price: Decimal,
        tif: Tif,
    ) -> VenueResult<OrderWire> {
        let spec = self.spec(instrument)?;
        let size = round_sz(size, spec.sz_decimals);
        let price = venue_px(price, spec.sz_decimals, spec.class);

        Ok(OrderWire::limit(
            spec.asset_id,
            is_buy,
            to_wire_string(price),
            to_wire_string(size),
            tif,
        ))
    }

    async fn submit_single(&self, order: OrderWire) -> VenueResult<OrderAck> {
        let statuses = self.exchange()?.place_orders(vec![order]).await?;
        let status = statuses
            .into_iter()
            .next()
            .ok_or_else(|| VenueError::Data("order response without status".to_string()))?;
        order_ack(status)
    }
}

/// Fetch perp and spot metadata, retrying transient failures.
async fn load_registry(info: &InfoClient) -> Result<InstrumentRegistry> {
    let policy = ExponentialBackoff {
        max_elapsed_time: Some(METADATA_RETRY_WINDOW),
        ..Default::default()
    };

    let (meta, spot_meta) = backoff::future::retry(policy, || async move {
        futures::try_join!(info.meta(), info.spot_meta()).map_err(|e| {
            warn!(error = %e, "Metadata fetch failed, retrying");
            if e.is_transport() {
                backoff::Error::transient(e)
            } else {
                backoff::Error::permanent(e)
            }
        })
    })
    .await
    .context("Failed to load instrument metadata")?;

    let registry = normalize::registry_from_meta(&meta, &spot_meta);
    if registry.is_empty() {
        anyhow::bail!("venue metadata lists no instruments");
    }
    Ok(registry)
}

/// Wire form of a cancel batch. Orders on instruments missing from the
/// registry cannot be addressed and are left out.
fn cancel_wires(cancels: &[CancelRequest], registry: &InstrumentRegistry) -> Vec<CancelWire> {
    cancels
        .iter()
        .filter_map(|c| match registry.asset_id(&c.instrument) {
            Some(a) => Some(CancelWire { a, o: c.order_id }),
            None => {
                warn!(coin = %c.instrument, oid = c.order_id, "Cannot cancel order on unknown instrument");
                None
            }
        })
        .collect()
}

/// Interpret the status of a single placement.
fn order_ack(status: ExchangeStatus) -> VenueResult<OrderAck> {
    match status {
        ExchangeStatus::Resting { resting } => Ok(OrderAck::Resting {
            order_id: resting.oid,
        }),
        ExchangeStatus::Filled { filled } => Ok(OrderAck::Filled {
            order_id: filled.oid,
            filled_size: filled.total_sz.parse().unwrap_or(Decimal::ZERO),
            avg_price: filled.avg_px.parse().unwrap_or(Decimal::ZERO),
        }),
        ExchangeStatus::Error { error } => Err(VenueError::rejected(error)),
        ExchangeStatus::Message(other) => Err(VenueError::Data(format!(
            "unexpected order status '{}'",
            other
        ))),
    }
}

/// Slippage-bounded limit price for an immediate-or-cancel adjustment.
pub(crate) fn slippage_price(reference: Decimal, is_buy: bool, max_slippage: Decimal) -> Decimal {
    if is_buy {
        reference * (Decimal::ONE + max_slippage)
    } else {
        reference * (Decimal::ONE - max_slippage)
    }
}

#[async_trait]
impl Venue for LiveVenue {
    fn name(&self) -> &str {
        "live"
    }

    fn account_address(&self) -> &str {
        &self.address
    }

    fn instruments(&self) -> &InstrumentRegistry {
        &self.registry
    }

    async fn fetch_state(
        &self,
        address: &str,
        classes: &[InstrumentClass],
    ) -> VenueResult<AccountState> {
        let want_perp = classes.contains(&InstrumentClass::Perp);
        let want_spot = classes.contains(&InstrumentClass::Spot);

        // All pieces or nothing: a partial snapshot must never reach the reconcilers
        let (perp, spot, orders) = futures::try_join!(
            async {
                if want_perp {
                    self.info.clearinghouse_state(address).await.map(Some)
                } else {
                    Ok(None)
                }
            },
            async {
                if want_spot {
                    self.info.spot_clearinghouse_state(address).await.map(Some)
                } else {
                    Ok(None)
                }
            },
            self.info.open_orders(address),
        )?;

        normalize::account_state(perp.as_ref(), spot.as_ref(), &orders, &self.registry)
    }

    async fn all_mids(&self) -> VenueResult<HashMap<String, Decimal>> {
        Ok(normalize::mids(self.info.all_mids().await?))
    }

    async fn recent_fills(&self, address: &str) -> VenueResult<Vec<Fill>> {
        normalize::fills(&self.info.user_fills(address).await?)
    }

    async fn place_limit_order(
        &self,
        instrument: &str,
        is_buy: bool,
        size: Decimal,
        price: Decimal,
    ) -> VenueResult<OrderAck> {
        let order = self.order_wire(instrument, is_buy, size, price, Tif::Gtc)?;
        self.submit_single(order).await
    }

    async fn cancel_orders(&self, cancels: &[CancelRequest]) -> VenueResult<()> {
        let wires = cancel_wires(cancels, &self.registry);
        if wires.is_empty() {
            return Ok(());
        }

        let statuses = self.exchange()?.cancel_orders(wires).await?;

        let errors: Vec<String> = statuses
            .into_iter()
            .filter_map(|s| match s {
                ExchangeStatus::Error { error } => Some(error),
                _ => None,
            })
            .collect();

        if errors.is_empty() {
            Ok(())
        } else {
            Err(VenueError::rejected(errors.join("; ")))
        }
    }

    async fn market_adjust(
        &self,
        instrument: &str,
        is_buy: bool,
        size: Decimal,
        reference_price: Decimal,
        max_slippage: Decimal,
    ) -> VenueResult<OrderAck> {
        let limit = slippage_price(reference_price, is_buy, max_slippage);
        let order = self.order_wire(instrument, is_buy, size, limit, Tif::Ioc)?;
        self.submit_single(order).await
    }
}
