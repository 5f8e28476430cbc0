// In-memory stand-ins for the Postgres repository, used by unit tests

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use uuid::Uuid;

use crate::error::{AppError, AppResult, SettlementError};
use crate::grading::numeric::NumericInput;
use crate::ledger::models::{
    AlertSeverity, FeedEvent, FeedEventType, Game, GameStatus, LegStatus, Wager, WagerLeg,
    WagerOutcomeRecord,
};
use crate::settlement::traits::{
    AlertSink, FeedSink, GameRepository, GameSettlement, HeartbeatStore, LegStore,
};

#[derive(Default)]
pub struct MemoryState {
    pub games: Vec<Game>,
    pub legs: Vec<WagerLeg>,
    pub wagers: HashMap<Uuid, Wager>,
    pub outcomes: HashMap<Uuid, WagerOutcomeRecord>,
    pub events: Vec<FeedEvent>,
    pub heartbeats: Vec<(String, DateTime<Utc>, serde_json::Value)>,
    pub alerts: Vec<(String, AlertSeverity)>,
    pub commits: usize,
    pub list_calls: usize,
    pub failing_games: HashSet<Uuid>,
    pub down: bool,
}

#[derive(Default)]
pub struct MemoryStore {
    pub state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn add_game(&self, game: Game) -> Uuid {
        let id = game.id;
        self.state.lock().games.push(game);
        id
    }

    pub fn add_wager(&self, wager: Wager) -> Uuid {
        let id = wager.id;
        self.state.lock().wagers.insert(id, wager);
        id
    }

    pub fn add_leg(&self, leg: WagerLeg) -> Uuid {
        let id = leg.id;
        self.state.lock().legs.push(leg);
        id
    }

    pub fn leg(&self, id: Uuid) -> WagerLeg {
        self.state
            .lock()
            .legs
            .iter()
            .find(|leg| leg.id == id)
            .cloned()
            .expect("unknown leg")
    }

    pub fn wager(&self, id: Uuid) -> Wager {
        self.state.lock().wagers.get(&id).cloned().expect("unknown wager")
    }

    pub fn outcome(&self, wager_id: Uuid) -> Option<WagerOutcomeRecord> {
        self.state.lock().outcomes.get(&wager_id).cloned()
    }

    pub fn event_types(&self) -> Vec<FeedEventType> {
        self.state.lock().events.iter().map(|e| e.event_type).collect()
    }

    pub fn commits(&self) -> usize {
        self.state.lock().commits
    }

    pub fn list_calls(&self) -> usize {
        self.state.lock().list_calls
    }

    pub fn alert_names(&self) -> Vec<String> {
        self.state.lock().alerts.iter().map(|(name, _)| name.clone()).collect()
    }

    pub fn fail_game(&self, game_id: Uuid) {
        self.state.lock().failing_games.insert(game_id);
    }

    pub fn restore_game(&self, game_id: Uuid) {
        self.state.lock().failing_games.remove(&game_id);
    }

    pub fn set_down(&self, down: bool) {
        self.state.lock().down = down;
    }

    pub fn set_status(&self, game_id: Uuid, status: GameStatus, at: DateTime<Utc>) {
        let mut state = self.state.lock();
        if let Some(game) = state.games.iter_mut().find(|g| g.id == game_id) {
            game.status = status;
            game.updated_at = at;
        }
    }

    pub fn revise_scores(&self, game_id: Uuid, home: NumericInput, away: NumericInput, at: DateTime<Utc>) {
        let mut state = self.state.lock();
        if let Some(game) = state.games.iter_mut().find(|g| g.id == game_id) {
            game.home_score = Some(home);
            game.away_score = Some(away);
            game.updated_at = at;
        }
    }

    fn check_up(state: &MemoryState) -> AppResult<()> {
        if state.down {
            return Err(AppError::Database(sqlx::Error::PoolTimedOut));
        }
        Ok(())
    }

    fn games_where(
        &self,
        limit: usize,
        predicate: impl Fn(&MemoryState, &Game) -> bool,
    ) -> AppResult<Vec<Game>> {
        let mut state = self.state.lock();
        Self::check_up(&state)?;
        state.list_calls += 1;

        let mut games: Vec<Game> = state
            .games
            .iter()
            .filter(|game| predicate(&state, game))
            .cloned()
            .collect();
        games.sort_by(|a, b| a.start_time.cmp(&b.start_time).then(a.id.cmp(&b.id)));
        games.truncate(limit);
        Ok(games)
    }
}

fn has_pending_legs(state: &MemoryState, game_id: Uuid) -> bool {
    state
        .legs
        .iter()
        .any(|leg| leg.game_id == game_id && leg.status == LegStatus::Pending)
}

#[async_trait]
impl GameRepository for MemoryStore {
    async fn list_final_games(
        &self,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
        limit: usize,
    ) -> AppResult<Vec<Game>> {
        self.games_where(limit, |state, game| {
            game.status == GameStatus::Final
                && game.start_time >= since
                && game.start_time <= until
                && has_pending_legs(state, game.id)
        })
    }

    async fn list_permanently_cancelled_games(
        &self,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
        limit: usize,
    ) -> AppResult<Vec<Game>> {
        self.games_where(limit, |state, game| {
            game.status.is_permanently_cancelled()
                && game.start_time >= since
                && game.start_time <= until
                && has_pending_legs(state, game.id)
        })
    }

    async fn list_correction_candidates(
        &self,
        settled_since: DateTime<Utc>,
        limit: usize,
    ) -> AppResult<Vec<Game>> {
        self.games_where(limit, |state, game| {
            game.status == GameStatus::Final
                && state.legs.iter().any(|leg| {
                    leg.game_id == game.id
                        && leg.status.is_terminal()
                        && !leg.correction_applied
                        && leg.first_settled_at.map_or(false, |at| at >= settled_since)
                        && leg.graded_through().map_or(false, |at| game.updated_at > at)
                })
        })
    }

    async fn has_recent_activity(&self, final_since: DateTime<Utc>) -> AppResult<bool> {
        let state = self.state.lock();
        Self::check_up(&state)?;
        Ok(state.games.iter().any(|game| {
            game.status == GameStatus::Live
                || (game.status == GameStatus::Final && game.updated_at >= final_since)
        }))
    }
}

#[async_trait]
impl LegStore for MemoryStore {
    async fn unsettled_legs_for_game(&self, game_id: Uuid) -> AppResult<Vec<WagerLeg>> {
        let state = self.state.lock();
        Self::check_up(&state)?;
        Ok(state
            .legs
            .iter()
            .filter(|leg| leg.game_id == game_id && leg.status == LegStatus::Pending)
            .cloned()
            .collect())
    }

    async fn correctable_legs_for_game(
        &self,
        game_id: Uuid,
        settled_since: DateTime<Utc>,
    ) -> AppResult<Vec<WagerLeg>> {
        let state = self.state.lock();
        Self::check_up(&state)?;
        Ok(state
            .legs
            .iter()
            .filter(|leg| {
                leg.game_id == game_id
                    && leg.status.is_terminal()
                    && !leg.correction_applied
                    && leg.first_settled_at.map_or(false, |at| at >= settled_since)
            })
            .cloned()
            .collect())
    }

    async fn legs_for_wager(&self, wager_id: Uuid) -> AppResult<Vec<WagerLeg>> {
        let state = self.state.lock();
        Self::check_up(&state)?;
        Ok(state
            .legs
            .iter()
            .filter(|leg| leg.wager_id == Some(wager_id))
            .cloned()
            .collect())
    }

    async fn get_wager(&self, wager_id: Uuid) -> AppResult<Option<Wager>> {
        let state = self.state.lock();
        Self::check_up(&state)?;
        Ok(state.wagers.get(&wager_id).cloned())
    }

    async fn commit_game(&self, settlement: &GameSettlement) -> AppResult<()> {
        let mut state = self.state.lock();
        Self::check_up(&state)?;
        if state.failing_games.contains(&settlement.game_id) {
            return Err(AppError::Internal("injected commit failure".into()));
        }

        for transition in &settlement.transitions {
            let current = state.legs.iter().find(|leg| leg.id == transition.leg_id);
            let applies = current.map_or(false, |leg| {
                leg.status == transition.from && !(transition.correction && leg.correction_applied)
            });
            if !applies {
                return Err(SettlementError::StaleLeg {
                    leg_id: transition.leg_id,
                    expected: transition.from.to_string(),
                }
                .into());
            }
        }

        for recheck in &settlement.rechecks {
            let current = state.legs.iter().find(|leg| leg.id == recheck.leg_id);
            if !current.map_or(false, |leg| leg.status == recheck.status && !leg.correction_applied) {
                return Err(SettlementError::StaleLeg {
                    leg_id: recheck.leg_id,
                    expected: recheck.status.to_string(),
                }
                .into());
            }
        }

        for transition in &settlement.transitions {
            if let Some(leg) = state.legs.iter_mut().find(|leg| leg.id == transition.leg_id) {
                transition.apply_to(leg);
            }
        }
        for recheck in &settlement.rechecks {
            if let Some(leg) = state.legs.iter_mut().find(|leg| leg.id == recheck.leg_id) {
                leg.correction_checked_at = Some(recheck.checked_at);
            }
        }
        for update in &settlement.wagers {
            if let Some(wager) = state.wagers.get_mut(&update.wager_id) {
                wager.status = update.status;
                wager.settled_at = update.settled_at;
            }
            state.outcomes.insert(update.wager_id, update.record.clone());
        }
        state.commits += 1;
        Ok(())
    }
}

#[async_trait]
impl FeedSink for MemoryStore {
    async fn append(&self, event_type: FeedEventType, metadata: serde_json::Value) -> AppResult<()> {
        self.state.lock().events.push(FeedEvent { event_type, metadata });
        Ok(())
    }
}

#[async_trait]
impl HeartbeatStore for MemoryStore {
    async fn upsert(
        &self,
        worker_name: &str,
        last_beat_at: DateTime<Utc>,
        meta: serde_json::Value,
    ) -> AppResult<()> {
        self.state
            .lock()
            .heartbeats
            .push((worker_name.to_string(), last_beat_at, meta));
        Ok(())
    }
}

#[async_trait]
impl AlertSink for MemoryStore {
    async fn emit(
        &self,
        event_name: &str,
        severity: AlertSeverity,
        _context: serde_json::Value,
    ) -> AppResult<()> {
        self.state.lock().alerts.push((event_name.to_string(), severity));
        Ok(())
    }
}

pub mod fixtures {
    use super::*;
    use crate::ledger::models::WagerStatus;

    pub fn game(
        status: GameStatus,
        home_score: Option<i64>,
        away_score: Option<i64>,
        start_time: DateTime<Utc>,
    ) -> Game {
        Game {
            id: Uuid::new_v4(),
            sport: "nfl".into(),
            home_team: "Home Team".into(),
            away_team: "Away Team".into(),
            home_score: home_score.map(NumericInput::from),
            away_score: away_score.map(NumericInput::from),
            status,
            start_time,
            updated_at: start_time + chrono::Duration::hours(3),
        }
    }

    pub fn wager(predicted_probability: f64) -> Wager {
        Wager {
            id: Uuid::new_v4(),
            status: WagerStatus::Pending,
            predicted_probability,
            predicted_confidence: Some(0.7),
            settled_at: None,
        }
    }

    pub fn leg(
        wager_id: Option<Uuid>,
        game_id: Uuid,
        market_type: &str,
        selection: &str,
        line: Option<NumericInput>,
    ) -> WagerLeg {
        WagerLeg {
            id: Uuid::new_v4(),
            wager_id,
            game_id,
            market_type: market_type.into(),
            selection: selection.into(),
            line,
            status: LegStatus::Pending,
            settled_at: None,
            result_reason: None,
            first_settled_at: None,
            correction_applied: false,
            correction_checked_at: None,
        }
    }
}
