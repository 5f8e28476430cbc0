use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::Type;
use std::fmt;
use uuid::Uuid;

use crate::grading::numeric::NumericInput;

/// Game status as published by the ingestion service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Type)]
#[sqlx(type_name = "game_status", rename_all = "snake_case")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GameStatus {
    Scheduled,
    Live,
    Final,
    Postponed,
    Suspended,
    NoContest,
    Cancelled,
}

impl GameStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            GameStatus::Scheduled => "SCHEDULED",
            GameStatus::Live => "LIVE",
            GameStatus::Final => "FINAL",
            GameStatus::Postponed => "POSTPONED",
            GameStatus::Suspended => "SUSPENDED",
            GameStatus::NoContest => "NO_CONTEST",
            GameStatus::Cancelled => "CANCELLED",
        }
    }

    /// Games that will never produce a result. Postponed and suspended games
    /// may resume after any delay, so they are not part of this set.
    pub fn is_permanently_cancelled(&self) -> bool {
        matches!(self, GameStatus::NoContest | GameStatus::Cancelled)
    }
}

impl fmt::Display for GameStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Game entity (owned by ingestion, read-only here)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Game {
    pub id: Uuid,
    pub sport: String,
    pub home_team: String,
    pub away_team: String,
    pub home_score: Option<NumericInput>,
    pub away_score: Option<NumericInput>,
    pub status: GameStatus,
    pub start_time: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Game {
    pub fn matchup(&self) -> String {
        format!("{} @ {}", self.away_team, self.home_team)
    }
}

/// Leg status. Everything except `Pending` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Type)]
#[sqlx(type_name = "leg_status", rename_all = "lowercase")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LegStatus {
    Pending,
    Won,
    Lost,
    Push,
    Void,
}

impl LegStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LegStatus::Pending => "PENDING",
            LegStatus::Won => "WON",
            LegStatus::Lost => "LOST",
            LegStatus::Push => "PUSH",
            LegStatus::Void => "VOID",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, LegStatus::Pending)
    }
}

impl fmt::Display for LegStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One selection of a parlay.
///
/// `market_type` and `line` are kept as stored; the grading module parses them
/// and voids the leg when they cannot be read.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WagerLeg {
    pub id: Uuid,
    /// `None` for orphaned legs, which settle on their own
    pub wager_id: Option<Uuid>,
    pub game_id: Uuid,
    pub market_type: String,
    pub selection: String,
    pub line: Option<NumericInput>,
    pub status: LegStatus,
    pub settled_at: Option<DateTime<Utc>>,
    pub result_reason: Option<String>,
    pub first_settled_at: Option<DateTime<Utc>>,
    pub correction_applied: bool,
    pub correction_checked_at: Option<DateTime<Utc>>,
}

impl WagerLeg {
    /// Game updates after this instant have not been graded into the leg yet
    pub fn graded_through(&self) -> Option<DateTime<Utc>> {
        self.correction_checked_at.or(self.first_settled_at)
    }
}

/// Wager status mirrors the aggregate of its legs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Type)]
#[sqlx(type_name = "wager_status", rename_all = "lowercase")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WagerStatus {
    Pending,
    Won,
    Lost,
    Void,
}

impl WagerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WagerStatus::Pending => "PENDING",
            WagerStatus::Won => "WON",
            WagerStatus::Lost => "LOST",
            WagerStatus::Void => "VOID",
        }
    }
}

impl fmt::Display for WagerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Wager (parlay) entity
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Wager {
    pub id: Uuid,
    pub status: WagerStatus,
    pub predicted_probability: f64,
    pub predicted_confidence: Option<f64>,
    pub settled_at: Option<DateTime<Utc>>,
}

/// Snapshot of one graded leg, stored inside the outcome record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LegResultSnapshot {
    pub leg_id: Uuid,
    pub game_id: Uuid,
    pub market_type: String,
    pub selection: String,
    pub status: LegStatus,
    pub settled_at: Option<DateTime<Utc>>,
    pub result_reason: Option<String>,
}

impl From<&WagerLeg> for LegResultSnapshot {
    fn from(leg: &WagerLeg) -> Self {
        Self {
            leg_id: leg.id,
            game_id: leg.game_id,
            market_type: leg.market_type.clone(),
            selection: leg.selection.clone(),
            status: leg.status,
            settled_at: leg.settled_at,
            result_reason: leg.result_reason.clone(),
        }
    }
}

/// Model-calibration bookkeeping for one wager
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WagerOutcomeRecord {
    pub wager_id: Uuid,
    pub num_legs: i32,
    pub predicted_probability: f64,
    pub predicted_confidence: Option<f64>,
    pub hit: Option<bool>,
    pub legs_hit: i32,
    pub legs_missed: i32,
    pub leg_results: Vec<LegResultSnapshot>,
    pub actual_probability: Option<f64>,
    pub calibration_error: Option<f64>,
    pub resolved_at: Option<DateTime<Utc>>,
}

/// Feed event types understood by downstream consumers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Type)]
#[sqlx(type_name = "feed_event_type", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FeedEventType {
    LegWon,
    LegLost,
    GameLive,
    GameFinal,
}

impl FeedEventType {
    /// Event for a leg entering a terminal status, if that status is announced
    pub fn for_leg(status: LegStatus) -> Option<Self> {
        match status {
            LegStatus::Won => Some(FeedEventType::LegWon),
            LegStatus::Lost => Some(FeedEventType::LegLost),
            _ => None,
        }
    }
}

/// Feed event queued for downstream consumers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedEvent {
    pub event_type: FeedEventType,
    pub metadata: serde_json::Value,
}

/// Alert severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Info,
    Warning,
    Critical,
}

impl AlertSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertSeverity::Info => "info",
            AlertSeverity::Warning => "warning",
            AlertSeverity::Critical => "critical",
        }
    }
}
