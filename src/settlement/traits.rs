use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::AppResult;
use crate::ledger::models::{
    AlertSeverity, FeedEventType, Game, LegStatus, Wager, WagerLeg, WagerOutcomeRecord, WagerStatus,
};

/// Read side of the game store (owned by ingestion)
#[async_trait]
pub trait GameRepository: Send + Sync {
    /// FINAL games started in `[since, until]` that still have pending legs,
    /// oldest start time first.
    async fn list_final_games(
        &self,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
        limit: usize,
    ) -> AppResult<Vec<Game>>;

    /// NO_CONTEST / CANCELLED games started in `[since, until]` that still
    /// have pending legs, oldest start time first.
    async fn list_permanently_cancelled_games(
        &self,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
        limit: usize,
    ) -> AppResult<Vec<Game>>;

    /// FINAL games updated after some of their legs were first settled at or
    /// after `settled_since`, where those legs have not been corrected yet.
    async fn list_correction_candidates(
        &self,
        settled_since: DateTime<Utc>,
        limit: usize,
    ) -> AppResult<Vec<Game>>;

    /// Whether any game is LIVE or turned FINAL at or after `final_since`
    async fn has_recent_activity(&self, final_since: DateTime<Utc>) -> AppResult<bool>;
}

/// One leg moving between statuses
#[derive(Debug, Clone, PartialEq)]
pub struct LegTransition {
    pub leg_id: Uuid,
    pub wager_id: Option<Uuid>,
    pub game_id: Uuid,
    pub market_type: String,
    pub selection: String,
    /// Status the leg must still have for the write to apply
    pub from: LegStatus,
    pub to: LegStatus,
    pub reason: String,
    pub settled_at: DateTime<Utc>,
    pub correction: bool,
}

impl LegTransition {
    pub fn new(leg: &WagerLeg, to: LegStatus, reason: String, settled_at: DateTime<Utc>, correction: bool) -> Self {
        Self {
            leg_id: leg.id,
            wager_id: leg.wager_id,
            game_id: leg.game_id,
            market_type: leg.market_type.clone(),
            selection: leg.selection.clone(),
            from: leg.status,
            to,
            reason,
            settled_at,
            correction,
        }
    }

    /// Apply this transition to an in-memory copy of the leg
    pub fn apply_to(&self, leg: &mut WagerLeg) {
        leg.status = self.to;
        leg.result_reason = Some(self.reason.clone());
        leg.settled_at = Some(self.settled_at);
        leg.first_settled_at.get_or_insert(self.settled_at);
        leg.correction_applied |= self.correction;
    }
}

/// A leg re-graded against a revised game without changing status. Recording
/// the revision keeps the game out of later correction candidate lists.
#[derive(Debug, Clone, PartialEq)]
pub struct LegRecheck {
    pub leg_id: Uuid,
    /// Status the leg must still have, uncorrected, for the write to apply
    pub status: LegStatus,
    /// `updated_at` of the game revision that was graded
    pub checked_at: DateTime<Utc>,
}

/// Recomputed state of one wager
#[derive(Debug, Clone, PartialEq)]
pub struct WagerSettlement {
    pub wager_id: Uuid,
    pub status: WagerStatus,
    pub settled_at: Option<DateTime<Utc>>,
    pub record: WagerOutcomeRecord,
}

/// Everything written for one game, committed atomically
#[derive(Debug, Clone, PartialEq)]
pub struct GameSettlement {
    pub game_id: Uuid,
    pub transitions: Vec<LegTransition>,
    pub rechecks: Vec<LegRecheck>,
    pub wagers: Vec<WagerSettlement>,
}

impl GameSettlement {
    pub fn is_empty(&self) -> bool {
        self.transitions.is_empty() && self.rechecks.is_empty()
    }
}

/// Legs, wagers and outcome records
#[async_trait]
pub trait LegStore: Send + Sync {
    async fn unsettled_legs_for_game(&self, game_id: Uuid) -> AppResult<Vec<WagerLeg>>;

    /// Terminal, not yet corrected legs first settled at or after `settled_since`
    async fn correctable_legs_for_game(
        &self,
        game_id: Uuid,
        settled_since: DateTime<Utc>,
    ) -> AppResult<Vec<WagerLeg>>;

    async fn legs_for_wager(&self, wager_id: Uuid) -> AppResult<Vec<WagerLeg>>;

    async fn get_wager(&self, wager_id: Uuid) -> AppResult<Option<Wager>>;

    /// Persist one game's changes in a single transaction. If any leg no longer
    /// has its transition's `from` status (or a rechecked leg was changed),
    /// nothing is written.
    async fn commit_game(&self, settlement: &GameSettlement) -> AppResult<()>;
}

/// Append-only activity feed
#[async_trait]
pub trait FeedSink: Send + Sync {
    async fn append(&self, event_type: FeedEventType, metadata: serde_json::Value) -> AppResult<()>;
}

/// Liveness records for external monitoring
#[async_trait]
pub trait HeartbeatStore: Send + Sync {
    async fn upsert(
        &self,
        worker_name: &str,
        last_beat_at: DateTime<Utc>,
        meta: serde_json::Value,
    ) -> AppResult<()>;
}

/// Operator alerting
#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn emit(
        &self,
        event_name: &str,
        severity: AlertSeverity,
        context: serde_json::Value,
    ) -> AppResult<()>;
}
