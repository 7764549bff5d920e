//! Decimal amount strings <-> nano units.

use crate::error::{Result, WalletError};

/// Nano units per coin.
pub const NANO_PER_COIN: u64 = 1_000_000_000;
const DECIMALS: usize = 9;

/// Parse a decimal coin amount ("1.25", "0.000000001", "42") into nano units.
pub fn parse_amount(s: &str) -> Result<u64> {
    let s = s.trim();
    let bad = |why: &str| WalletError::InvalidAmount(format!("{s:?}: {why}"));
    if s.is_empty() {
        return Err(bad("empty"));
    }
    let (whole, frac) = match s.split_once('.') {
        Some((w, f)) => (w, f),
        None => (s, ""),
    };
    if whole.is_empty() && frac.is_empty() {
        return Err(bad("no digits"));
    }
    if !whole.chars().all(|c| c.is_ascii_digit()) || !frac.chars().all(|c| c.is_ascii_digit())
    {
        return Err(bad("not a decimal number"));
    }
    if frac.len() > DECIMALS {
        return Err(bad("more than 9 decimal places"));
    }
    let whole: u64 = if whole.is_empty() {
        0
    } else {
        whole.parse().map_err(|_| bad("too large"))?
    };
    let frac_units: u64 = if frac.is_empty() {
        0
    } else {
        let padded = format!("{frac:0<width$}", width = DECIMALS);
        padded.parse().map_err(|_| bad("bad fraction"))?
    };
    whole
        .checked_mul(NANO_PER_COIN)
        .and_then(|n| n.checked_add(frac_units))
        .ok_or_else(|| bad("too large"))
}

/// Render nano units as a decimal string with 9 fractional digits.
pub fn format_amount(nano: u64) -> String {
    format!("{}.{:09}", nano / NANO_PER_COIN, nano % NANO_PER_COIN)
}

/// Serde adapter writing `u64` nano amounts as decimal strings.
pub mod as_decimal {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &u64, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&super::format_amount(*value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<u64, D::Error> {
        let raw = String::deserialize(d)?;
        super::parse_amount(&raw).map_err(serde::de::Error::custom)
    }
}
