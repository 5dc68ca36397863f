//! Instrument metadata: asset ids and size precision loaded from the venue at startup.

use std::collections::HashMap;

use super::InstrumentClass;

/// Size precision used when an instrument is missing from the registry.
pub const DEFAULT_SZ_DECIMALS: u32 = 4;

/// Offset added to a spot pair's universe index to form its asset id.
pub const SPOT_ASSET_OFFSET: u32 = 10_000;

/// Static description of one tradable instrument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstrumentSpec {
    /// Name as it appears in mids, orders and positions ("BTC", "@107", "PURR/USDC")
    pub name: String,
    pub class: InstrumentClass,
    /// Numeric id used in signed exchange actions
    pub asset_id: u32,
    /// Number of decimals allowed in order sizes
    pub sz_decimals: u32,
}

/// Lookup table of every instrument the venue lists.
#[derive(Debug, Clone, Default)]
pub struct InstrumentRegistry {
    specs: HashMap<String, InstrumentSpec>,
    /// Spot base token name -> pair name quoted in USDC (e.g. "HYPE" -> "@107")
    token_pairs: HashMap<String, String>,
}

impl InstrumentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, spec: InstrumentSpec) {
        self.specs.insert(spec.name.clone(), spec);
    }

    pub fn insert_token_pair(&mut self, token: impl Into<String>, pair: impl Into<String>) {
        self.token_pairs.insert(token.into(), pair.into());
    }

    pub fn get(&self, name: &str) -> Option<&InstrumentSpec> {
        self.specs.get(name)
    }

    pub fn asset_id(&self, name: &str) -> Option<u32> {
        self.get(name).map(|s| s.asset_id)
    }

    /// Size precision, falling back to [`DEFAULT_SZ_DECIMALS`] for unknown instruments.
    pub fn sz_decimals(&self, name: &str) -> u32 {
        self.get(name)
            .map(|s| s.sz_decimals)
            .unwrap_or(DEFAULT_SZ_DECIMALS)
    }

    /// Class of an instrument.
    ///
    /// Unknown names are classified by shape: spot pairs are either `@N` or
    /// contain a `/`.
    pub fn class_of(&self, name: &str) -> InstrumentClass {
        match self.get(name) {
            Some(spec) => spec.class,
            None if name.starts_with('@') || name.contains('/') => InstrumentClass::Spot,
            None => InstrumentClass::Perp,
        }
    }

    /// Spot pair that trades a base token against USDC.
    pub fn pair_for_token(&self, token: &str) -> Option<&str> {
        self.token_pairs.get(token).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }
}
