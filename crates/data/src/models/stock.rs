use serde::{Deserialize, Serialize};

/// A listed instrument known to the engine.
///
/// Stocks are created by admin import; the engine only reads them.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct StockRecord {
    /// Ticker symbol, 3-6 upper-case letters, unique.
    pub symbol: String,
    pub name: String,
    pub is_monitored: bool,
    pub market: String,
    pub industry: String,
    /// Additional names matched when scanning news text for mentions.
    pub keywords: Vec<String>,
    pub is_active: bool,
}

impl StockRecord {
    /// True if `symbol` has the expected GPW ticker shape.
    #[must_use]
    pub fn symbol_is_valid(symbol: &str) -> bool {
        (3..=6).contains(&symbol.len())
            && symbol.chars().all(|c| c.is_ascii_uppercase())
    }

    /// All terms to match against news text: the symbol plus keywords.
    #[must_use]
    pub fn mention_terms(&self) -> Vec<&str> {
        let mut terms = vec![self.symbol.as_str()];
        terms.extend(self.keywords.iter().map(String::as_str));
        terms
    }
}
