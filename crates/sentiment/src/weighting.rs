//! Time-weighted news aggregation.
//!
//! Each classified mention contributes
//! `w = source_weight * period_weight(age) * impact_weight * exp(-ln2 * age / half_life)`,
//! multiplied by the breaking-news factor for fresh high-impact articles
//! and by the market-timing factor for articles published in session or
//! pre-market. Contributions below the profile's impact threshold are
//! skipped. The aggregate is the weighted mean sentiment; momentum is the
//! last-two-hours aggregate minus the older aggregate.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use gpw_advisor_core::{EngineError, NewsConfig, TradingCalendar};
use gpw_advisor_data::{ImpactLevel, ScoredMention};

/// Minutes after which a mention no longer counts as "recent" for the
/// momentum split.
const MOMENTUM_SPLIT_MINUTES: f64 = 120.0;

/// Age bound for the breaking-news multiplier.
const BREAKING_NEWS_MAX_AGE_MINUTES: f64 = 60.0;

/// A named time-weight profile.
#[derive(Debug, Clone)]
pub struct TimeWeightProfile {
    pub name: &'static str,
    pub half_life_minutes: f64,
    /// Piecewise period weights for ages <= 15 min, <= 60 min, <= 240 min,
    /// and older-within-lookback. Must sum to 1 +- 0.05.
    pub last_15min_weight: f64,
    pub last_1hour_weight: f64,
    pub last_4hour_weight: f64,
    pub today_weight: f64,
    pub breaking_news_multiplier: f64,
    pub market_hours_multiplier: f64,
    pub pre_market_multiplier: f64,
    /// Contributions with a final weight below this are skipped.
    pub min_impact_threshold: f64,
}

impl TimeWeightProfile {
    #[must_use]
    pub fn intraday_default() -> Self {
        Self {
            name: "intraday-default",
            half_life_minutes: 120.0,
            last_15min_weight: 0.40,
            last_1hour_weight: 0.30,
            last_4hour_weight: 0.20,
            today_weight: 0.10,
            breaking_news_multiplier: 2.0,
            market_hours_multiplier: 1.5,
            pre_market_multiplier: 1.2,
            min_impact_threshold: 0.05,
        }
    }

    #[must_use]
    pub fn intraday_aggressive() -> Self {
        Self {
            name: "intraday-aggressive",
            half_life_minutes: 90.0,
            last_15min_weight: 0.50,
            last_1hour_weight: 0.30,
            last_4hour_weight: 0.15,
            today_weight: 0.05,
            breaking_news_multiplier: 2.5,
            market_hours_multiplier: 1.8,
            pre_market_multiplier: 1.4,
            min_impact_threshold: 0.03,
        }
    }

    #[must_use]
    pub fn intraday_conservative() -> Self {
        Self {
            name: "intraday-conservative",
            half_life_minutes: 180.0,
            last_15min_weight: 0.30,
            last_1hour_weight: 0.30,
            last_4hour_weight: 0.25,
            today_weight: 0.15,
            breaking_news_multiplier: 1.5,
            market_hours_multiplier: 1.2,
            pre_market_multiplier: 1.1,
            min_impact_threshold: 0.10,
        }
    }

    #[must_use]
    pub fn swing() -> Self {
        Self {
            name: "swing",
            half_life_minutes: 720.0,
            last_15min_weight: 0.20,
            last_1hour_weight: 0.25,
            last_4hour_weight: 0.30,
            today_weight: 0.25,
            breaking_news_multiplier: 1.8,
            market_hours_multiplier: 1.3,
            pre_market_multiplier: 1.15,
            min_impact_threshold: 0.07,
        }
    }

    /// Looks a profile up by its configured name.
    #[must_use]
    pub fn by_name(name: &str) -> Option<Self> {
        match name {
            "intraday-default" => Some(Self::intraday_default()),
            "intraday-aggressive" => Some(Self::intraday_aggressive()),
            "intraday-conservative" => Some(Self::intraday_conservative()),
            "swing" => Some(Self::swing()),
            _ => None,
        }
    }

    /// Checks that the piecewise weights sum to one within tolerance.
    ///
    /// # Errors
    /// Returns a message with the offending sum.
    pub fn validate(&self) -> Result<(), String> {
        let sum = self.last_15min_weight
            + self.last_1hour_weight
            + self.last_4hour_weight
            + self.today_weight;
        if (sum - 1.0).abs() > 0.05 {
            return Err(format!(
                "profile {}: period weights sum to {sum}, expected 1 +- 0.05",
                self.name
            ));
        }
        if self.half_life_minutes <= 0.0 {
            return Err(format!("profile {}: non-positive half-life", self.name));
        }
        Ok(())
    }

    fn period_weight(&self, age_minutes: f64) -> f64 {
        if age_minutes <= 15.0 {
            self.last_15min_weight
        } else if age_minutes <= 60.0 {
            self.last_1hour_weight
        } else if age_minutes <= 240.0 {
            self.last_4hour_weight
        } else {
            self.today_weight
        }
    }
}

/// Stock-level aggregate over a news window.
#[derive(Debug, Clone, PartialEq)]
pub struct NewsAggregate {
    /// Weighted mean sentiment in [-1, 1].
    pub weighted_sentiment: f64,
    pub total_weight: f64,
    pub article_count: usize,
    /// Recent-window aggregate minus older aggregate, in [-2, 2].
    pub momentum: f64,
    /// Highest impact level among contributing articles.
    pub impact: ImpactLevel,
    pub summary: String,
}

pub struct TimeWeightedAnalyzer {
    profile: TimeWeightProfile,
    source_weights: HashMap<String, f64>,
}

impl TimeWeightedAnalyzer {
    /// Builds an analyzer from a validated profile.
    ///
    /// # Errors
    /// Returns a configuration error if the profile fails validation.
    pub fn new(
        profile: TimeWeightProfile,
        source_weights: HashMap<String, f64>,
    ) -> Result<Self, EngineError> {
        profile.validate().map_err(EngineError::Configuration)?;
        Ok(Self {
            profile,
            source_weights,
        })
    }

    /// Builds an analyzer from the news configuration; the configured
    /// half-life overrides the profile's own.
    ///
    /// # Errors
    /// Returns a configuration error on an unknown profile name.
    pub fn from_config(config: &NewsConfig) -> Result<Self, EngineError> {
        let mut profile = TimeWeightProfile::by_name(&config.profile).ok_or_else(|| {
            EngineError::Configuration(format!("unknown news profile {:?}", config.profile))
        })?;
        profile.half_life_minutes = f64::from(config.half_life_minutes);
        Self::new(profile, config.source_weights.clone())
    }

    /// Aggregates classified mentions of one stock.
    ///
    /// Returns `None` when no mention carries weight; callers treat that
    /// as a news-neutral signal.
    #[must_use]
    pub fn aggregate(
        &self,
        mentions: &[ScoredMention],
        now: DateTime<Utc>,
        calendar: &TradingCalendar,
    ) -> Option<NewsAggregate> {
        let weighted: Vec<(f64, f64, ImpactLevel, f64)> = mentions
            .iter()
            .filter_map(|mention| {
                let weight = self.weight_of(mention, now, calendar)?;
                let age_minutes =
                    (now - mention.published_at).num_seconds().max(0) as f64 / 60.0;
                Some((mention.sentiment_score, weight, mention.impact, age_minutes))
            })
            .collect();

        let total_weight: f64 = weighted.iter().map(|(_, w, _, _)| w).sum();
        if total_weight <= 0.0 {
            return None;
        }

        let weighted_sentiment =
            weighted.iter().map(|(s, w, _, _)| s * w).sum::<f64>() / total_weight;

        let impact = weighted
            .iter()
            .map(|(_, _, impact, _)| *impact)
            .max()
            .unwrap_or(ImpactLevel::Minimal);

        let momentum = momentum_of(&weighted);

        let summary = format!(
            "{} articles, weighted sentiment {:+.2}, impact {}",
            weighted.len(),
            weighted_sentiment,
            impact.as_str()
        );

        Some(NewsAggregate {
            weighted_sentiment,
            total_weight,
            article_count: weighted.len(),
            momentum,
            impact,
            summary,
        })
    }

    /// Final weight of one mention, or `None` when below the threshold.
    fn weight_of(
        &self,
        mention: &ScoredMention,
        now: DateTime<Utc>,
        calendar: &TradingCalendar,
    ) -> Option<f64> {
        let age_minutes = (now - mention.published_at).num_seconds().max(0) as f64 / 60.0;

        let source_weight = self
            .source_weights
            .get(&mention.source)
            .copied()
            .unwrap_or(1.0);
        let period_weight = self.profile.period_weight(age_minutes);
        let impact_weight = mention.impact.weight();
        let decay =
            (-std::f64::consts::LN_2 * age_minutes / self.profile.half_life_minutes).exp();

        let breaking = if mention.impact.is_high() && age_minutes <= BREAKING_NEWS_MAX_AGE_MINUTES
        {
            self.profile.breaking_news_multiplier
        } else {
            1.0
        };

        let timing = if calendar.is_in_session(mention.published_at) {
            self.profile.market_hours_multiplier
        } else if calendar.is_pre_market(mention.published_at) {
            self.profile.pre_market_multiplier
        } else {
            1.0
        };

        let weight = source_weight * period_weight * impact_weight * decay * breaking * timing;
        (weight >= self.profile.min_impact_threshold).then_some(weight)
    }
}

/// Recent-minus-older weighted aggregate; zero when either side is empty.
fn momentum_of(weighted: &[(f64, f64, ImpactLevel, f64)]) -> f64 {
    let side = |recent: bool| {
        let (sum, total): (f64, f64) = weighted
            .iter()
            .filter(|(_, _, _, age)| (*age <= MOMENTUM_SPLIT_MINUTES) == recent)
            .fold((0.0, 0.0), |(sum, total), (s, w, _, _)| {
                (sum + s * w, total + w)
            });
        (total > 0.0).then(|| sum / total)
    };

    match (side(true), side(false)) {
        (Some(recent), Some(older)) => recent - older,
        _ => 0.0,
    }
}
