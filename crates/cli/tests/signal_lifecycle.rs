//! End-to-end signal lifecycle over the pure pipeline: generation from
//! indicator votes and news, the supersede decision, and intraday
//! resolution.

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use gpw_advisor_core::{SignalProfile, TradingCalendar};
use gpw_advisor_data::{
    cancellation_outcome, ImpactLevel, OhlcvBar, Resolution, SignalType, StockRecord,
    TradingStyle, UserPreferencesRecord,
};
use gpw_advisor_engine::{resolve_signal, GeneratorInput, SignalGenerator};
use gpw_advisor_indicators::{IndicatorValue, Vote, VoteOutcome};
use gpw_advisor_sentiment::NewsAggregate;

fn session_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 6, 9).unwrap()
}

/// UTC instant for a Warsaw wall-clock time on the test session (CEST).
fn warsaw(h: u32, m: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 9, h - 2, m, 0).unwrap()
}

fn user() -> UserPreferencesRecord {
    let mut prefs = UserPreferencesRecord::default_for(7);
    prefs.min_confidence_threshold = dec!(60);
    prefs.trading_style = TradingStyle::Moderate;
    prefs.available_capital = dec!(100000);
    prefs
}

fn stock(symbol: &str) -> StockRecord {
    StockRecord {
        symbol: symbol.to_string(),
        name: symbol.to_string(),
        is_monitored: true,
        market: "GPW".to_string(),
        industry: "test".to_string(),
        keywords: vec![],
        is_active: true,
    }
}

/// The oversold-bounce vote set: RSI below 30, close under the lower
/// band, MACD histogram crossing up, short SMA crossing the long one.
fn oversold_votes() -> IndicatorValue<VoteOutcome> {
    IndicatorValue::Available(VoteOutcome {
        bullish: vec![
            Vote::RsiOversold,
            Vote::CloseBelowLowerBand,
            Vote::MacdCrossUp,
            Vote::SmaCrossUp,
        ],
        bearish: vec![],
    })
}

fn bullish_news() -> NewsAggregate {
    NewsAggregate {
        weighted_sentiment: 0.62,
        total_weight: 2.1,
        article_count: 4,
        momentum: 0.2,
        impact: ImpactLevel::High,
        summary: "4 articles, weighted sentiment +0.62, impact high".to_string(),
    }
}

fn bar(
    symbol: &str,
    h: u32,
    m: u32,
    high: Decimal,
    low: Decimal,
    close: Decimal,
) -> OhlcvBar {
    let open = close.min(high).max(low);
    OhlcvBar::new(symbol, warsaw(h, m), open, high, low, close, 10_000).unwrap()
}

fn input_for<'a>(
    prefs: &'a UserPreferencesRecord,
    stock: &'a StockRecord,
    votes: IndicatorValue<VoteOutcome>,
    news: Option<NewsAggregate>,
    price: Decimal,
    now: DateTime<Utc>,
) -> GeneratorInput<'a> {
    GeneratorInput {
        user: prefs,
        stock,
        votes,
        last_close: Some(price),
        average_daily_volume: 80_000,
        actionable_today: 0,
        news,
        now,
        session: TradingCalendar::default()
            .session_for(session_date())
            .unwrap(),
    }
}

#[test]
fn buy_signal_generated_and_resolved_at_target() {
    let generator = SignalGenerator::new(SignalProfile::Balanced);
    let prefs = user();
    let cdr = stock("CDR");

    let input = input_for(
        &prefs,
        &cdr,
        oversold_votes(),
        Some(bullish_news()),
        dec!(265.20),
        warsaw(9, 30),
    );

    let signal = generator.generate(&input).unwrap();
    assert_eq!(signal.signal_type, SignalType::Buy);
    assert!(signal.modified_by_news);
    // 50 + 10 * (4 - 3) + 15 * 1.5 = 82.5, floored to 82.
    assert_eq!(signal.confidence, dec!(82));
    assert_eq!(signal.price_at_signal, dec!(265.20));
    assert_eq!(signal.target_price, Some(dec!(273.1560)));
    assert_eq!(signal.stop_loss_price, Some(dec!(259.8960)));
    signal.validate().unwrap();

    // The midday rally tags the target.
    let later_bars = vec![
        bar("CDR", 11, 0, dec!(268.00), dec!(263.00), dec!(266.00)),
        bar("CDR", 12, 5, dec!(273.40), dec!(268.00), dec!(272.00)),
    ];
    let outcome = resolve_signal(&signal, &later_bars, false).unwrap();

    assert_eq!(outcome.resolution, Resolution::TargetHit);
    assert_eq!(outcome.exit_price, dec!(273.1560));
    assert_eq!(outcome.exit_at, warsaw(12, 5));
    assert_eq!(outcome.realised_return_pct, dec!(3.0000));
    assert_eq!(outcome.holding_minutes, 155);
}

#[test]
fn stop_hit_before_target_on_the_same_signal() {
    let generator = SignalGenerator::new(SignalProfile::Balanced);
    let prefs = user();
    let cdr = stock("CDR");

    let input = input_for(
        &prefs,
        &cdr,
        oversold_votes(),
        Some(bullish_news()),
        dec!(265.20),
        warsaw(9, 30),
    );
    let signal = generator.generate(&input).unwrap();

    // 10:15 flushes through the stop before any bar reaches the target.
    let later_bars = vec![
        bar("CDR", 10, 15, dec!(262.00), dec!(259.50), dec!(260.00)),
        bar("CDR", 12, 5, dec!(273.40), dec!(268.00), dec!(272.00)),
    ];
    let outcome = resolve_signal(&signal, &later_bars, false).unwrap();

    assert_eq!(outcome.resolution, Resolution::StopHit);
    assert_eq!(outcome.exit_price, dec!(259.8960));
    assert_eq!(outcome.realised_return_pct, dec!(-2.0000));
    assert_eq!(outcome.holding_minutes, 45);
}

#[test]
fn news_veto_suppresses_the_same_setup() {
    let generator = SignalGenerator::new(SignalProfile::Balanced);
    let prefs = user();
    let cdr = stock("CDR");

    let mut vetoing = bullish_news();
    vetoing.weighted_sentiment = -0.72;
    vetoing.impact = ImpactLevel::VeryHigh;

    let input = input_for(
        &prefs,
        &cdr,
        oversold_votes(),
        Some(vetoing),
        dec!(265.20),
        warsaw(9, 30),
    );

    let signal = generator.generate(&input).unwrap();
    assert_eq!(signal.signal_type, SignalType::Hold);
    assert_eq!(signal.reason.label(), "news_veto");
    assert!(signal.target_price.is_none());
}

#[test]
fn opposite_direction_supersede_cancels_prior() {
    // An 11:00 buy superseded by an 11:30 sell: the prior is finalised
    // as cancelled at the new entry price.
    let outcome = cancellation_outcome(
        SignalType::Buy,
        dec!(150.00),
        dec!(148.50),
        warsaw(11, 0),
        warsaw(11, 30),
    );

    assert_eq!(outcome.resolution, Resolution::Cancelled);
    assert_eq!(outcome.exit_price, dec!(148.50));
    assert_eq!(outcome.holding_minutes, 30);
    assert_eq!(outcome.realised_return_pct, dec!(-1.0000));
}

#[test]
fn no_news_window_leaves_signal_unmodified() {
    let generator = SignalGenerator::new(SignalProfile::Balanced);
    let prefs = user();
    let cdr = stock("CDR");

    let input = input_for(
        &prefs,
        &cdr,
        oversold_votes(),
        None,
        dec!(265.20),
        warsaw(9, 30),
    );

    let signal = generator.generate(&input).unwrap();
    assert_eq!(signal.signal_type, SignalType::Buy);
    assert!(!signal.modified_by_news);
    assert_eq!(signal.news_impact, gpw_advisor_data::NewsImpact::None);
    // Four votes, no boost: 50 + 10.
    assert_eq!(signal.confidence, dec!(60));
}

#[test]
fn unresolved_sell_closes_at_session_end() {
    let generator = SignalGenerator::new(SignalProfile::Balanced);
    let prefs = user();
    let pkn = stock("PKN");

    // Directionless technicals; extreme very-high-impact negative news
    // converts the hold into a sell.
    let neutral_votes = IndicatorValue::Available(VoteOutcome::default());
    let mut bearish = bullish_news();
    bearish.weighted_sentiment = -0.85;
    bearish.impact = ImpactLevel::VeryHigh;

    let input = input_for(
        &prefs,
        &pkn,
        neutral_votes,
        Some(bearish),
        dec!(130.00),
        warsaw(10, 0),
    );

    let signal = generator.generate(&input).unwrap();
    assert_eq!(signal.signal_type, SignalType::Sell);
    assert!(signal.modified_by_news);
    signal.validate().unwrap();

    // Price drifts without touching either level until the final bar.
    let target = signal.target_price.unwrap();
    let stop = signal.stop_loss_price.unwrap();
    let final_close = ((target + signal.price_at_signal) / Decimal::TWO).round_dp(4);

    let later_bars = vec![
        bar("PKN", 14, 0, stop - dec!(0.10), target + dec!(0.10), final_close),
        bar("PKN", 17, 0, stop - dec!(0.10), target + dec!(0.10), final_close),
    ];

    let outcome = resolve_signal(&signal, &later_bars, true).unwrap();
    assert_eq!(outcome.resolution, Resolution::ClosedAtSessionEnd);
    assert_eq!(outcome.exit_price, final_close);
    // The close sits below the entry, so the sell realised a gain.
    assert!(outcome.realised_return_pct > Decimal::ZERO);
}
