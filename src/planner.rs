//! Significant-figure arithmetic.
//!
//! The venue buckets its l2Book levels by `nSigFigs`. Fewer significant
//! figures means wider buckets and a book that reaches further from the mid.
//! For each configured depth we pick the precision whose bucket size is
//! about one order of magnitude finer than that depth.

use std::collections::BTreeSet;

use crate::error::{SnapshotError, SnapshotResult};

/// Distinct precisions needed for one instrument, ascending.
pub type PrecisionSet = BTreeSet<i32>;

/// Significant figures needed to resolve price levels `depth_percent`% away
/// from `price`.
///
/// Example: price 12.345, depth 2% → range 0.2469 → 1 - (-1) + 1 = 3.
pub fn significant_figures(price: f64, depth_percent: f64) -> SnapshotResult<i32> {
    if !price.is_finite() || price <= 0.0 {
        return Err(SnapshotError::InvalidInput(format!("price {} is not positive", price)));
    }
    if !depth_percent.is_finite() || depth_percent <= 0.0 {
        return Err(SnapshotError::InvalidInput(format!(
            "depth {}% is not positive",
            depth_percent
        )));
    }

    let depth_range = (depth_percent / 100.0) * price;
    let depth_precision = depth_range.log10().floor();
    let price_precision = price.log10().floor();

    if !depth_precision.is_finite() || !price_precision.is_finite() {
        return Err(SnapshotError::InvalidInput(format!(
            "non-finite logarithm for price {} at depth {}%",
            price, depth_percent
        )));
    }

    Ok((price_precision - depth_precision) as i32 + 1)
}

/// Deduplicated precisions across all depths. Any failing depth fails the
/// whole instrument.
pub fn plan_precisions(price: f64, depths: &[f64]) -> SnapshotResult<PrecisionSet> {
    depths
        .iter()
        .map(|d| significant_figures(price, *d))
        .collect()
}

/// Counts the significant digits literally present in a venue price string.
///
/// Leading zeros are dropped; trailing zeros are dropped only when the
/// number has a fractional part. Exponent notation is expanded first.
///
/// `"0.0012300"` → 3, `"1200"` → 4, `"12.50"` → 3.
pub fn count_significant_figures(px: &str) -> usize {
    let expanded;
    let mut s = px.trim();

    if let Some(plain) = expand_exponent(s) {
        expanded = plain;
        s = expanded.as_str();
    }

    let s = s.trim_start_matches(['-', '+']);
    let s = s.trim_start_matches('0');
    let s = if s.contains('.') {
        s.trim_end_matches('0').trim_end_matches('.')
    } else {
        s
    };

    s.chars()
        .filter(|c| c.is_ascii_digit())
        .skip_while(|c| *c == '0')
        .count()
}

// "1.23e-5" → "0.0000123"
fn expand_exponent(s: &str) -> Option<String> {
    let (mantissa, exponent) = s.split_once(['e', 'E'])?;
    let exponent: i32 = exponent.parse().ok()?;
    let value: f64 = s.parse().ok()?;

    let mantissa_decimals = mantissa
        .split_once('.')
        .map_or(0, |(_, frac)| frac.len() as i32);
    let decimals = (mantissa_decimals - exponent).max(0) as usize;

    Some(format!("{:.*}", decimals, value))
}
