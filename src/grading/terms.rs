use std::fmt;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::GradingError;
use crate::grading::numeric::{normalize, NumericInput};
use crate::ledger::models::WagerLeg;

/// Supported bet markets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarketType {
    Moneyline,
    Spread,
    Total,
}

impl MarketType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MarketType::Moneyline => "moneyline",
            MarketType::Spread => "spread",
            MarketType::Total => "total",
        }
    }

    pub fn requires_line(&self) -> bool {
        matches!(self, MarketType::Spread | MarketType::Total)
    }
}

impl fmt::Display for MarketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for MarketType {
    type Err = GradingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "moneyline" | "ml" => Ok(MarketType::Moneyline),
            "spread" | "point_spread" => Ok(MarketType::Spread),
            "total" | "totals" => Ok(MarketType::Total),
            other => Err(GradingError::UnsupportedMarket(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Home,
    Away,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Home => "home",
            Side::Away => "away",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TotalDirection {
    Over,
    Under,
}

impl TotalDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            TotalDirection::Over => "over",
            TotalDirection::Under => "under",
        }
    }
}

/// The terms of a leg after its market has been parsed
#[derive(Debug, Clone, PartialEq)]
pub struct LegTerms {
    pub market: MarketType,
    pub selection: String,
    pub line: Option<NumericInput>,
}

impl LegTerms {
    /// Lenient parse used at settlement time: only the market has to be known.
    /// Anything else that is wrong surfaces while grading.
    pub fn parse(market_type: &str, selection: &str, line: Option<NumericInput>) -> Result<Self, GradingError> {
        Ok(Self {
            market: market_type.parse()?,
            selection: selection.to_string(),
            line,
        })
    }

    pub fn from_leg(leg: &WagerLeg) -> Result<Self, GradingError> {
        Self::parse(&leg.market_type, &leg.selection, leg.line.clone())
    }

    /// Strict check for leg creation, so malformed terms are rejected when the
    /// parlay is placed instead of being voided at settlement.
    pub fn validate(market_type: &str, selection: &str, line: Option<NumericInput>) -> Result<Self, GradingError> {
        let terms = Self::parse(market_type, selection, line)?;

        if selection.trim().is_empty() {
            return Err(GradingError::UnmatchedSelection);
        }
        if terms.market.requires_line() && terms.line_value().is_none() {
            return Err(GradingError::MissingLine);
        }
        if terms.market == MarketType::Total {
            terms.direction()?;
        }

        Ok(terms)
    }

    pub fn line_value(&self) -> Option<Decimal> {
        normalize(self.line.as_ref())
    }

    /// Over/under direction of a total selection, read from whole words
    pub fn direction(&self) -> Result<TotalDirection, GradingError> {
        let lowered = self.selection.to_lowercase();
        let mut over = false;
        let mut under = false;
        for word in lowered.split(|c: char| !c.is_alphabetic()) {
            match word {
                "over" => over = true,
                "under" => under = true,
                _ => {}
            }
        }

        match (over, under) {
            (true, false) => Ok(TotalDirection::Over),
            (false, true) => Ok(TotalDirection::Under),
            _ => Err(GradingError::MissingDirection),
        }
    }

    /// Resolve the selection to the home or away side of a game.
    ///
    /// Literal `home`/`away` and exact team names win first; after that a
    /// substring match in either direction is accepted, provided it points at
    /// exactly one side.
    pub fn side(&self, home_team: &str, away_team: &str) -> Result<Side, GradingError> {
        let selection = self.selection.trim().to_lowercase();
        if selection.is_empty() {
            return Err(GradingError::UnmatchedSelection);
        }

        let home = home_team.trim().to_lowercase();
        let away = away_team.trim().to_lowercase();

        if selection == "home" || (!home.is_empty() && selection == home) {
            return Ok(Side::Home);
        }
        if selection == "away" || (!away.is_empty() && selection == away) {
            return Ok(Side::Away);
        }

        let contains = |team: &str| {
            !team.is_empty() && (selection.contains(team) || team.contains(selection.as_str()))
        };

        match (contains(&home), contains(&away)) {
            (true, false) => Ok(Side::Home),
            (false, true) => Ok(Side::Away),
            (true, true) => Err(GradingError::AmbiguousSelection),
            (false, false) => Err(GradingError::UnmatchedSelection),
        }
    }
}
