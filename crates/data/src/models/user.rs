//! User trading preferences.
//!
//! Effective risk parameters are derived from the trading style, then
//! overridden by the explicit per-user fields.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::signal::DeliveryChannel;

/// Preferred trading style; each style scales the base risk parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradingStyle {
    Conservative,
    Moderate,
    Aggressive,
    Scalping,
    Swing,
}

impl TradingStyle {
    /// Multiplier applied to the base take-profit percentage.
    #[must_use]
    pub fn target_profit_modifier(self) -> Decimal {
        match self {
            Self::Conservative => Decimal::new(8, 1),  // 0.8
            Self::Moderate => Decimal::ONE,
            Self::Aggressive => Decimal::new(15, 1),   // 1.5
            Self::Scalping => Decimal::new(4, 1),      // 0.4
            Self::Swing => Decimal::TWO,
        }
    }

    /// Multiplier applied to the base stop-loss percentage.
    #[must_use]
    pub fn max_loss_modifier(self) -> Decimal {
        match self {
            Self::Conservative => Decimal::new(8, 1),
            Self::Moderate => Decimal::ONE,
            Self::Aggressive => Decimal::new(12, 1),   // 1.2
            Self::Scalping => Decimal::new(5, 1),      // 0.5
            Self::Swing => Decimal::new(15, 1),
        }
    }

    /// Multiplier applied to the position size.
    #[must_use]
    pub fn position_size_modifier(self) -> Decimal {
        match self {
            Self::Conservative => Decimal::new(5, 1),
            Self::Moderate => Decimal::ONE,
            Self::Aggressive => Decimal::new(15, 1),
            Self::Scalping => Decimal::new(3, 1),      // 0.3
            Self::Swing => Decimal::new(12, 1),
        }
    }
}

/// Trading preferences for one active user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserPreferencesRecord {
    pub user_id: i64,
    /// Capital available for positions, in PLN.
    pub available_capital: Decimal,
    /// Base take-profit percentage before the style modifier.
    pub target_profit_pct: Decimal,
    /// Base stop-loss percentage before the style modifier.
    pub max_loss_pct: Decimal,
    /// Minimum confidence for a non-hold signal, in [30, 95].
    pub min_confidence_threshold: Decimal,
    /// Maximum single-position share of capital, percent.
    pub max_position_size_pct: Decimal,
    /// Smallest position worth recommending, in PLN.
    pub min_position_value: Decimal,
    /// Minimum average daily volume for eligibility.
    pub min_daily_volume: i64,
    pub trading_style: TradingStyle,
    pub channels: Vec<DeliveryChannel>,
    pub max_signals_per_day: i64,
    /// Opt-in to a daily summary that includes hold signals.
    pub daily_summary_opt_in: bool,
    pub telegram_chat_id: Option<String>,
    pub email: Option<String>,
    pub is_active: bool,
}

impl UserPreferencesRecord {
    /// Take-profit percentage after the style modifier.
    #[must_use]
    pub fn effective_target_profit_pct(&self) -> Decimal {
        self.target_profit_pct * self.trading_style.target_profit_modifier()
    }

    /// Stop-loss percentage after the style modifier.
    #[must_use]
    pub fn effective_max_loss_pct(&self) -> Decimal {
        self.max_loss_pct * self.trading_style.max_loss_modifier()
    }

    #[must_use]
    pub fn has_channel(&self, channel: DeliveryChannel) -> bool {
        self.channels.contains(&channel)
    }

    /// Defaults matching a moderate intraday user.
    #[must_use]
    pub fn default_for(user_id: i64) -> Self {
        Self {
            user_id,
            available_capital: Decimal::from(10_000),
            target_profit_pct: Decimal::new(30, 1), // 3.0
            max_loss_pct: Decimal::TWO,             // 2.0
            min_confidence_threshold: Decimal::from(60),
            max_position_size_pct: Decimal::from(10),
            min_position_value: Decimal::from(500),
            min_daily_volume: 10_000,
            trading_style: TradingStyle::Moderate,
            channels: vec![DeliveryChannel::Telegram],
            max_signals_per_day: 5,
            daily_summary_opt_in: false,
            telegram_chat_id: None,
            email: None,
            is_active: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn moderate_style_keeps_base_percentages() {
        let prefs = UserPreferencesRecord::default_for(1);
        assert_eq!(prefs.effective_target_profit_pct(), dec!(3.0));
        assert_eq!(prefs.effective_max_loss_pct(), dec!(2.0));
    }

    #[test]
    fn scalping_tightens_both_sides() {
        let mut prefs = UserPreferencesRecord::default_for(1);
        prefs.trading_style = TradingStyle::Scalping;
        assert_eq!(prefs.effective_target_profit_pct(), dec!(1.20));
        assert_eq!(prefs.effective_max_loss_pct(), dec!(1.00));
    }

    #[test]
    fn swing_widens_both_sides() {
        let mut prefs = UserPreferencesRecord::default_for(1);
        prefs.trading_style = TradingStyle::Swing;
        assert_eq!(prefs.effective_target_profit_pct(), dec!(6.0));
        assert_eq!(prefs.effective_max_loss_pct(), dec!(3.00));
    }

    #[test]
    fn explicit_fields_override_defaults() {
        let mut prefs = UserPreferencesRecord::default_for(1);
        prefs.target_profit_pct = dec!(5.0);
        prefs.trading_style = TradingStyle::Aggressive;
        assert_eq!(prefs.effective_target_profit_pct(), dec!(7.50));
    }

    #[test]
    fn channel_lookup() {
        let prefs = UserPreferencesRecord::default_for(1);
        assert!(prefs.has_channel(DeliveryChannel::Telegram));
        assert!(!prefs.has_channel(DeliveryChannel::Email));
    }

    #[test]
    fn style_round_trips_lowercase() {
        let json = serde_json::to_string(&TradingStyle::Scalping).unwrap();
        assert_eq!(json, "\"scalping\"");
        let back: TradingStyle = serde_json::from_str("\"swing\"").unwrap();
        assert_eq!(back, TradingStyle::Swing);
    }
}
