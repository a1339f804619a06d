//! Intraday outcome resolution.
//!
//! Open signals are measured against bars strictly after their creation,
//! in timestamp order. The first level crossed wins; a bar that crosses
//! both levels resolves as the stop (conservative fill). Signals still
//! open when the session's last bar has been seen close at that bar's
//! close. Resolution is write-once; the repository enforces it.

use gpw_advisor_data::{
    signed_return_pct, OhlcvBar, Resolution, SignalOutcome, SignalType, TradingSignalRecord,
};

/// Resolves one open signal against bars after its creation.
///
/// `session_over` must be true once `bars` ends with the session's final
/// bar; only then does the session-end close fire. Returns `None` while
/// nothing has triggered and the session is still running.
#[must_use]
pub fn resolve_signal(
    signal: &TradingSignalRecord,
    bars: &[OhlcvBar],
    session_over: bool,
) -> Option<SignalOutcome> {
    if !signal.signal_type.is_actionable() || signal.is_resolved() {
        return None;
    }
    let (target, stop) = match (signal.target_price, signal.stop_loss_price) {
        (Some(t), Some(s)) => (t, s),
        _ => return None,
    };

    let relevant = bars.iter().filter(|bar| bar.timestamp > signal.created_at);

    for bar in relevant {
        let triggered = match signal.signal_type {
            SignalType::Buy => {
                if bar.low <= stop {
                    Some((Resolution::StopHit, stop))
                } else if bar.high >= target {
                    Some((Resolution::TargetHit, target))
                } else {
                    None
                }
            }
            SignalType::Sell => {
                if bar.high >= stop {
                    Some((Resolution::StopHit, stop))
                } else if bar.low <= target {
                    Some((Resolution::TargetHit, target))
                } else {
                    None
                }
            }
            SignalType::Hold => None,
        };

        if let Some((resolution, exit_price)) = triggered {
            return Some(SignalOutcome {
                resolution,
                exit_price,
                exit_at: bar.timestamp,
                realised_return_pct: signed_return_pct(
                    signal.signal_type,
                    signal.price_at_signal,
                    exit_price,
                ),
                holding_minutes: (bar.timestamp - signal.created_at).num_minutes(),
            });
        }
    }

    if session_over {
        let last = bars.iter().filter(|b| b.timestamp > signal.created_at).last()?;
        return Some(SignalOutcome {
            resolution: Resolution::ClosedAtSessionEnd,
            exit_price: last.close,
            exit_at: last.timestamp,
            realised_return_pct: signed_return_pct(
                signal.signal_type,
                signal.price_at_signal,
                last.close,
            ),
            holding_minutes: (last.timestamp - signal.created_at).num_minutes(),
        });
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, NaiveDate, TimeZone, Utc};
    use gpw_advisor_data::{NewsImpact, Reason};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    /// UTC instant for an hour:minute on the June test session (CEST).
    fn warsaw(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 9, h - 2, m, 0).unwrap()
    }

    fn bar(h: u32, m: u32, high: Decimal, low: Decimal, close: Decimal) -> OhlcvBar {
        OhlcvBar::new("CDR", warsaw(h, m), low.max(close.min(high)), high, low, close, 1000)
            .unwrap()
    }

    fn buy_signal() -> TradingSignalRecord {
        TradingSignalRecord {
            id: Uuid::new_v4(),
            user_id: 1,
            symbol: "CDR".to_string(),
            session_date: NaiveDate::from_ymd_opt(2025, 6, 9).unwrap(),
            created_at: warsaw(9, 30),
            signal_type: SignalType::Buy,
            confidence: dec!(82),
            price_at_signal: dec!(265.20),
            target_price: Some(dec!(273.1560)),
            stop_loss_price: Some(dec!(259.8960)),
            position_size: Some(10),
            reason: Reason::InsufficientData,
            news_impact: NewsImpact::None,
            modified_by_news: false,
            is_dispatched: true,
            dispatched_at: Some(warsaw(9, 31)),
            outcome: None,
            is_active: true,
        }
    }

    fn sell_signal() -> TradingSignalRecord {
        let mut signal = buy_signal();
        signal.symbol = "PKN".to_string();
        signal.signal_type = SignalType::Sell;
        signal.price_at_signal = dec!(86.91);
        signal.target_price = Some(dec!(84.30));
        signal.stop_loss_price = Some(dec!(88.65));
        signal
    }

    #[test]
    fn target_hit_intraday() {
        let signal = buy_signal();
        let bars = vec![
            bar(10, 0, dec!(267.00), dec!(264.00), dec!(266.00)),
            bar(12, 5, dec!(273.40), dec!(269.00), dec!(272.00)),
        ];

        let outcome = resolve_signal(&signal, &bars, false).unwrap();
        assert_eq!(outcome.resolution, Resolution::TargetHit);
        assert_eq!(outcome.exit_price, dec!(273.1560));
        assert_eq!(outcome.exit_at, warsaw(12, 5));
        assert_eq!(outcome.holding_minutes, 155);
        assert_eq!(outcome.realised_return_pct, dec!(3.0000));
    }

    #[test]
    fn stop_hit_before_target() {
        let signal = buy_signal();
        let bars = vec![
            bar(10, 15, dec!(262.00), dec!(259.50), dec!(260.00)),
            bar(12, 5, dec!(273.40), dec!(269.00), dec!(272.00)),
        ];

        let outcome = resolve_signal(&signal, &bars, false).unwrap();
        assert_eq!(outcome.resolution, Resolution::StopHit);
        assert_eq!(outcome.exit_price, dec!(259.8960));
        assert_eq!(outcome.exit_at, warsaw(10, 15));
        assert_eq!(outcome.realised_return_pct, dec!(-2.0000));
    }

    #[test]
    fn ambiguous_bar_resolves_as_stop() {
        // One wide bar crosses both levels; the conservative fill wins.
        let signal = buy_signal();
        let bars = vec![bar(11, 0, dec!(274.00), dec!(259.00), dec!(266.00))];

        let outcome = resolve_signal(&signal, &bars, false).unwrap();
        assert_eq!(outcome.resolution, Resolution::StopHit);
    }

    #[test]
    fn sell_resolves_at_session_end() {
        let signal = sell_signal();
        // Neither 84.30 nor 88.65 is crossed; final 17:00 bar closes 86.50.
        let bars = vec![
            bar(11, 0, dec!(87.50), dec!(85.80), dec!(86.20)),
            bar(17, 0, dec!(87.20), dec!(86.10), dec!(86.50)),
        ];

        let outcome = resolve_signal(&signal, &bars, true).unwrap();
        assert_eq!(outcome.resolution, Resolution::ClosedAtSessionEnd);
        assert_eq!(outcome.exit_price, dec!(86.50));
        // (86.91 - 86.50) / 86.91, signed positive for a sell.
        assert_eq!(outcome.realised_return_pct, dec!(0.4718));
    }

    #[test]
    fn sell_stop_hit_on_rally() {
        let signal = sell_signal();
        let bars = vec![bar(10, 0, dec!(88.90), dec!(86.80), dec!(88.70))];

        let outcome = resolve_signal(&signal, &bars, false).unwrap();
        assert_eq!(outcome.resolution, Resolution::StopHit);
        assert_eq!(outcome.exit_price, dec!(88.65));
        assert!(outcome.realised_return_pct < Decimal::ZERO);
    }

    #[test]
    fn sell_target_hit_on_decline() {
        let signal = sell_signal();
        let bars = vec![bar(10, 0, dec!(86.00), dec!(84.10), dec!(84.50))];

        let outcome = resolve_signal(&signal, &bars, false).unwrap();
        assert_eq!(outcome.resolution, Resolution::TargetHit);
        assert_eq!(outcome.exit_price, dec!(84.30));
        assert!(outcome.realised_return_pct > Decimal::ZERO);
    }

    #[test]
    fn open_signal_stays_open_mid_session() {
        let signal = buy_signal();
        let bars = vec![bar(10, 0, dec!(267.00), dec!(264.00), dec!(266.00))];
        assert!(resolve_signal(&signal, &bars, false).is_none());
    }

    #[test]
    fn bars_before_creation_are_ignored() {
        let signal = buy_signal();
        // A huge spike before the signal existed must not resolve it.
        let bars = vec![
            bar(9, 15, dec!(280.00), dec!(255.00), dec!(265.00)),
            bar(10, 0, dec!(267.00), dec!(264.00), dec!(266.00)),
        ];
        assert!(resolve_signal(&signal, &bars, false).is_none());
    }

    #[test]
    fn resolved_signal_is_never_recomputed() {
        let mut signal = buy_signal();
        signal.outcome = Some(SignalOutcome {
            resolution: Resolution::TargetHit,
            exit_price: dec!(273.1560),
            exit_at: warsaw(12, 5),
            realised_return_pct: dec!(3.0),
            holding_minutes: 155,
        });

        let bars = vec![bar(13, 0, dec!(250.00), dec!(240.00), dec!(245.00))];
        assert!(resolve_signal(&signal, &bars, true).is_none());
    }

    #[test]
    fn late_signal_closes_on_final_bar() {
        // Created 16:59, target never reached; the 17:00 bar closes it.
        let mut signal = buy_signal();
        signal.created_at = warsaw(16, 59);

        let bars = vec![bar(17, 0, dec!(266.00), dec!(264.80), dec!(265.40))];
        let outcome = resolve_signal(&signal, &bars, true).unwrap();
        assert_eq!(outcome.resolution, Resolution::ClosedAtSessionEnd);
        assert_eq!(outcome.exit_price, dec!(265.40));
        assert_eq!(outcome.holding_minutes, 1);
    }

    #[test]
    fn no_bars_after_creation_yields_none_even_when_session_over() {
        let mut signal = buy_signal();
        signal.created_at = warsaw(16, 59);
        let bars = vec![bar(16, 30, dec!(266.00), dec!(264.80), dec!(265.40))];
        assert!(resolve_signal(&signal, &bars, true).is_none());
    }

    #[test]
    fn resolving_twice_gives_identical_outcome() {
        let signal = buy_signal();
        let bars = vec![bar(12, 5, dec!(273.40), dec!(269.00), dec!(272.00))];

        let first = resolve_signal(&signal, &bars, false).unwrap();
        let second = resolve_signal(&signal, &bars, false).unwrap();
        assert_eq!(first, second);
    }
}
