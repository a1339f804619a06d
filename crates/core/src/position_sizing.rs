use anyhow::Result;
use rust_decimal::Decimal;

/// Calculate the position value for a signal.
///
/// # Arguments
/// * `available_capital` - User capital in PLN
/// * `max_position_pct` - Maximum position as percentage of capital (0-100)
/// * `confidence_pct` - Signal confidence (0-100); higher confidence scales up
/// * `style_modifier` - Trading-style multiplier applied to the base size
///
/// # Returns
/// Position value in PLN, capped at the available capital.
///
/// # Errors
/// Returns error if parameters are negative.
pub fn position_value(
    available_capital: Decimal,
    max_position_pct: Decimal,
    confidence_pct: Decimal,
    style_modifier: Decimal,
) -> Result<Decimal> {
    if available_capital < Decimal::ZERO {
        anyhow::bail!("available capital must not be negative");
    }
    if max_position_pct < Decimal::ZERO || confidence_pct < Decimal::ZERO {
        anyhow::bail!("percentages must not be negative");
    }

    let hundred = Decimal::from(100);
    let confidence_factor = confidence_pct / hundred;
    let size_pct = (max_position_pct / hundred) * confidence_factor * style_modifier;
    let value = available_capital * size_pct;

    Ok(value.min(available_capital))
}

/// Quantise a position value to whole shares at the entry price.
///
/// Fractional shares are not supported on GPW cash equities; the count is
/// floored.
///
/// # Errors
/// Returns error if the entry price is not positive.
pub fn shares_for_value(value: Decimal, entry_price: Decimal) -> Result<i64> {
    if entry_price <= Decimal::ZERO {
        anyhow::bail!("entry price must be positive");
    }
    let shares = (value / entry_price).floor();
    Ok(shares.try_into().unwrap_or(0))
}
