//! Channel-specific message rendering.
//!
//! Telegram gets plain UTF-8 text; email gets HTML with a text fallback.
//! A message is rendered in full before any send: the user either gets a
//! clean message or nothing.

use gpw_advisor_data::{Reason, SignalType, TradingSignalRecord};

/// Email subject: `[GPW] {SYMBOL} {ACTION} @ {PRICE}`.
#[must_use]
pub fn email_subject(signal: &TradingSignalRecord) -> String {
    format!(
        "[GPW] {} {} @ {}",
        signal.symbol,
        action_label(signal.signal_type),
        signal.price_at_signal
    )
}

/// Plain-text Telegram message.
#[must_use]
pub fn telegram_text(signal: &TradingSignalRecord) -> String {
    let mut lines = vec![
        format!("{} {}", action_label(signal.signal_type), signal.symbol),
        format!("Confidence: {}%", signal.confidence),
        format!("Price: {} PLN", signal.price_at_signal),
    ];

    if let Some(target) = signal.target_price {
        lines.push(format!("Target: {target} PLN"));
    }
    if let Some(stop) = signal.stop_loss_price {
        lines.push(format!("Stop-loss: {stop} PLN"));
    }
    if let Some(shares) = signal.position_size {
        lines.push(format!("Suggested size: {shares} shares"));
    }
    lines.push(format!("Reason: {}", reason_text(&signal.reason)));

    lines.join("\n")
}

/// HTML email body and its text fallback.
#[must_use]
pub fn email_bodies(signal: &TradingSignalRecord) -> (String, String) {
    let text = telegram_text(signal);

    let mut rows = vec![
        ("Action", format!("{} {}", action_label(signal.signal_type), signal.symbol)),
        ("Confidence", format!("{}%", signal.confidence)),
        ("Price", format!("{} PLN", signal.price_at_signal)),
    ];
    if let Some(target) = signal.target_price {
        rows.push(("Target", format!("{target} PLN")));
    }
    if let Some(stop) = signal.stop_loss_price {
        rows.push(("Stop-loss", format!("{stop} PLN")));
    }
    if let Some(shares) = signal.position_size {
        rows.push(("Suggested size", format!("{shares} shares")));
    }
    rows.push(("Reason", reason_text(&signal.reason)));

    let table: String = rows
        .iter()
        .map(|(label, value)| {
            format!("<tr><td><b>{label}</b></td><td>{value}</td></tr>")
        })
        .collect();

    let html = format!(
        "<html><body><h2>{} {}</h2><table>{}</table>\
         <p style=\"color:#888\">Advisory signal; not an order.</p></body></html>",
        action_label(signal.signal_type),
        signal.symbol,
        table
    );

    (html, text)
}

fn action_label(signal_type: SignalType) -> &'static str {
    match signal_type {
        SignalType::Buy => "BUY",
        SignalType::Sell => "SELL",
        SignalType::Hold => "HOLD",
    }
}

fn reason_text(reason: &Reason) -> String {
    match reason {
        Reason::InsufficientData => "insufficient data".to_string(),
        Reason::TechnicalVotes { bullish, bearish } => {
            let side = if bullish.len() >= bearish.len() { bullish } else { bearish };
            format!("technical consensus: {}", side.join(", "))
        }
        Reason::NewsAdjusted {
            adjustment,
            weighted_sentiment,
            ..
        } => format!("{adjustment} (news sentiment {weighted_sentiment:+.2})"),
        Reason::BelowThreshold { confidence, threshold } => {
            format!("confidence {confidence}% below threshold {threshold}%")
        }
        Reason::EntryWindowClosed => "entry window closed".to_string(),
        Reason::NotEligible { detail } => detail.clone(),
    }
}
