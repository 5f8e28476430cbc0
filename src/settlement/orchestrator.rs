// Settlement Orchestrator - one settlement pass end to end
//
// Pass order inside a cycle:
// 1. Settle pending legs of FINAL games
// 2. Void pending legs of NO_CONTEST / CANCELLED games
// 3. Re-grade recently settled legs whose game scores were revised
//
// Games are handled one at a time, each in its own transaction. A failing game
// is rolled back, skipped and held back from later cycles for a growing delay;
// only store-level failures abort the cycle.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::json;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::AppResult;
use crate::grading::{aggregate, resolve_leg, GradingRules, LegOutcome};
use crate::ledger::models::{FeedEventType, Game, LegResultSnapshot, LegStatus};
use crate::settlement::traits::{
    FeedSink, GameRepository, GameSettlement, LegRecheck, LegStore, LegTransition, WagerSettlement,
};

pub const VOID_NON_COMPLETABLE: &str = "game permanently non-completable";

/// A failing game waits at most `failed_game_retry * 2^MAX_RETRY_DOUBLINGS`
const MAX_RETRY_DOUBLINGS: u32 = 4;

/// Orchestrator configuration
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Only games started within this window are considered
    pub lookback: Duration,
    /// How long after first settlement a stat correction may still apply
    pub correction_grace: Duration,
    /// Cap on games handled per cycle; the rest wait for the next one
    pub max_games_per_cycle: usize,
    /// First delay before a game whose commit failed is tried again; doubles
    /// with each further failure
    pub failed_game_retry: Duration,
    pub rules: GradingRules,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            lookback: Duration::days(30),
            correction_grace: Duration::hours(72),
            max_games_per_cycle: 100,
            failed_game_retry: Duration::minutes(15),
            rules: GradingRules::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pass {
    Settle,
    Void,
    Correct,
}

impl Pass {
    fn as_str(&self) -> &'static str {
        match self {
            Pass::Settle => "settle",
            Pass::Void => "void",
            Pass::Correct => "correct",
        }
    }
}

/// Counters for one game
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GameSummary {
    pub legs_settled: usize,
    pub legs_voided: usize,
    pub legs_corrected: usize,
    pub legs_rechecked: usize,
    pub wagers_updated: usize,
    pub feed_events: usize,
}

/// Counters for one cycle
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    pub games_processed: usize,
    pub games_failed: usize,
    /// Games skipped because an earlier failure put them on hold
    pub games_parked: usize,
    pub legs_settled: usize,
    pub legs_voided: usize,
    pub legs_corrected: usize,
    /// Legs re-graded against a revised game with no status change
    pub legs_rechecked: usize,
    pub wagers_updated: usize,
    pub feed_events: usize,
    /// Some eligible games were left for the next cycle
    pub deferred: bool,
}

impl CycleReport {
    fn absorb(&mut self, summary: GameSummary) {
        self.games_processed += 1;
        self.legs_settled += summary.legs_settled;
        self.legs_voided += summary.legs_voided;
        self.legs_corrected += summary.legs_corrected;
        self.legs_rechecked += summary.legs_rechecked;
        self.wagers_updated += summary.wagers_updated;
        self.feed_events += summary.feed_events;
    }

    pub fn legs_changed(&self) -> usize {
        self.legs_settled + self.legs_voided + self.legs_corrected
    }
}

#[derive(Debug, Clone, Copy)]
struct ParkedGame {
    failures: u32,
    retry_at: DateTime<Utc>,
}

pub struct SettlementOrchestrator {
    games: Arc<dyn GameRepository>,
    legs: Arc<dyn LegStore>,
    feed: Arc<dyn FeedSink>,
    config: OrchestratorConfig,
    /// In-memory only; a restart retries every game straight away
    parked: Mutex<HashMap<Uuid, ParkedGame>>,
}

impl SettlementOrchestrator {
    pub fn new(
        games: Arc<dyn GameRepository>,
        legs: Arc<dyn LegStore>,
        feed: Arc<dyn FeedSink>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            games,
            legs,
            feed,
            config,
            parked: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Run all three passes once. Errors returned here mean the store itself
    /// is failing; individual game failures are counted in the report.
    pub async fn run_cycle(&self, now: DateTime<Utc>) -> AppResult<CycleReport> {
        let since = now - self.config.lookback;
        let mut report = CycleReport::default();
        let mut budget = self.config.max_games_per_cycle;

        // Parked games come back from the store but are skipped, so fetch past them
        let parked = {
            let mut parked = self.parked.lock();
            parked.retain(|_, game| game.retry_at > since);
            parked.values().filter(|game| game.retry_at > now).count()
        };
        let fetch = |budget: usize| budget + 1 + parked;

        let finals = self.games.list_final_games(since, now, fetch(budget)).await?;
        budget -= self.run_pass(Pass::Settle, finals, budget, now, &mut report).await?;

        if budget > 0 {
            let cancelled = self
                .games
                .list_permanently_cancelled_games(since, now, fetch(budget))
                .await?;
            budget -= self.run_pass(Pass::Void, cancelled, budget, now, &mut report).await?;
        } else {
            report.deferred = true;
        }

        if budget > 0 {
            let settled_since = now - self.config.correction_grace;
            let candidates = self
                .games
                .list_correction_candidates(settled_since, fetch(budget))
                .await?;
            self.run_pass(Pass::Correct, candidates, budget, now, &mut report).await?;
        } else {
            report.deferred = true;
        }

        if report.legs_changed() > 0 || report.legs_rechecked > 0 || report.games_failed > 0 {
            info!(
                games = report.games_processed,
                failed = report.games_failed,
                parked = report.games_parked,
                settled = report.legs_settled,
                voided = report.legs_voided,
                corrected = report.legs_corrected,
                rechecked = report.legs_rechecked,
                deferred = report.deferred,
                "✓ Settlement cycle completed"
            );
        } else {
            debug!("Settlement cycle completed with nothing to do");
        }

        Ok(report)
    }

    /// Handle up to `budget` games in start-time order, skipping parked ones;
    /// returns how many were taken.
    async fn run_pass(
        &self,
        pass: Pass,
        mut games: Vec<Game>,
        budget: usize,
        now: DateTime<Utc>,
        report: &mut CycleReport,
    ) -> AppResult<usize> {
        let listed = games.len();
        games.retain(|game| !self.is_parked(game.id, now));
        report.games_parked += listed - games.len();

        games.sort_by(|a, b| a.start_time.cmp(&b.start_time).then(a.id.cmp(&b.id)));
        if games.len() > budget {
            games.truncate(budget);
            report.deferred = true;
        }

        for game in &games {
            let result = match pass {
                Pass::Settle => self.settle_game(game, now).await,
                Pass::Void => self.void_game(game, now).await,
                Pass::Correct => self.correct_game(game, now).await,
            };

            match result {
                Ok(summary) => {
                    self.parked.lock().remove(&game.id);
                    report.absorb(summary);
                }
                Err(err) if err.is_transient() => {
                    error!(game_id = %game.id, pass = pass.as_str(), "❌ Settlement store unavailable: {}", err);
                    return Err(err);
                }
                Err(err) => {
                    error!(game_id = %game.id, pass = pass.as_str(), "❌ Game settlement rolled back: {}", err);
                    let retry_at = self.park(game.id, now);
                    warn!(game_id = %game.id, %retry_at, "Holding game back until retry");
                    report.games_failed += 1;
                }
            }
        }

        Ok(games.len())
    }

    fn is_parked(&self, game_id: Uuid, now: DateTime<Utc>) -> bool {
        self.parked
            .lock()
            .get(&game_id)
            .map_or(false, |game| game.retry_at > now)
    }

    fn park(&self, game_id: Uuid, now: DateTime<Utc>) -> DateTime<Utc> {
        let mut parked = self.parked.lock();
        let failures = parked.get(&game_id).map_or(1, |game| game.failures.saturating_add(1));
        let doublings = (failures - 1).min(MAX_RETRY_DOUBLINGS);
        let retry_at = now + self.config.failed_game_retry * 2_i32.pow(doublings);
        parked.insert(game_id, ParkedGame { failures, retry_at });
        retry_at
    }

    /// Grade every pending leg of a FINAL game
    pub async fn settle_game(&self, game: &Game, now: DateTime<Utc>) -> AppResult<GameSummary> {
        let legs = self.legs.unsettled_legs_for_game(game.id).await?;

        let transitions = legs
            .iter()
            .filter(|leg| !leg.status.is_terminal())
            .filter_map(|leg| match resolve_leg(leg, game, self.config.rules.tie_policy) {
                LegOutcome::Pending => None,
                LegOutcome::Decided { status, reason } => {
                    Some(LegTransition::new(leg, status, reason, now, false))
                }
            })
            .collect();

        self.commit(game, Pass::Settle, transitions, Vec::new()).await
    }

    /// Void every pending leg of a game that will never complete
    pub async fn void_game(&self, game: &Game, now: DateTime<Utc>) -> AppResult<GameSummary> {
        if !game.status.is_permanently_cancelled() {
            warn!(game_id = %game.id, status = %game.status, "Refusing to void a game that may still complete");
            return Ok(GameSummary::default());
        }

        let legs = self.legs.unsettled_legs_for_game(game.id).await?;
        let transitions = legs
            .iter()
            .filter(|leg| !leg.status.is_terminal())
            .map(|leg| LegTransition::new(leg, LegStatus::Void, VOID_NON_COMPLETABLE.to_string(), now, false))
            .collect();

        self.commit(game, Pass::Void, transitions, Vec::new()).await
    }

    /// Re-grade legs settled within the grace window against the game's latest
    /// revision. Each leg is corrected at most once, and only when the
    /// re-graded status differs; otherwise the revision is recorded as checked.
    pub async fn correct_game(&self, game: &Game, now: DateTime<Utc>) -> AppResult<GameSummary> {
        let settled_since = now - self.config.correction_grace;
        let legs = self.legs.correctable_legs_for_game(game.id, settled_since).await?;

        let mut transitions = Vec::new();
        let mut rechecks = Vec::new();
        for leg in legs
            .iter()
            .filter(|leg| leg.status.is_terminal() && !leg.correction_applied)
            .filter(|leg| leg.first_settled_at.map_or(false, |at| at >= settled_since))
            .filter(|leg| leg.graded_through().map_or(false, |at| game.updated_at > at))
        {
            match resolve_leg(leg, game, self.config.rules.tie_policy) {
                LegOutcome::Decided { status, reason } if status != leg.status => {
                    transitions.push(LegTransition::new(
                        leg,
                        status,
                        format!("stat correction: {}", reason),
                        now,
                        true,
                    ));
                }
                _ => rechecks.push(LegRecheck {
                    leg_id: leg.id,
                    status: leg.status,
                    checked_at: game.updated_at,
                }),
            }
        }

        self.commit(game, Pass::Correct, transitions, rechecks).await
    }

    async fn commit(
        &self,
        game: &Game,
        pass: Pass,
        transitions: Vec<LegTransition>,
        rechecks: Vec<LegRecheck>,
    ) -> AppResult<GameSummary> {
        let mut settlement = GameSettlement {
            game_id: game.id,
            transitions,
            rechecks,
            wagers: Vec::new(),
        };
        if settlement.is_empty() {
            return Ok(GameSummary::default());
        }

        settlement.wagers = self.recompute_wagers(&settlement.transitions).await?;
        self.legs.commit_game(&settlement).await?;

        let mut summary = GameSummary {
            legs_rechecked: settlement.rechecks.len(),
            wagers_updated: settlement.wagers.len(),
            ..GameSummary::default()
        };
        for transition in &settlement.transitions {
            match (pass, transition.to) {
                (Pass::Correct, _) => summary.legs_corrected += 1,
                (_, LegStatus::Void) => summary.legs_voided += 1,
                _ => summary.legs_settled += 1,
            }
        }
        summary.feed_events = self.publish(game, pass, &settlement).await;

        info!(
            game_id = %game.id,
            pass = pass.as_str(),
            legs = settlement.transitions.len(),
            rechecked = settlement.rechecks.len(),
            wagers = settlement.wagers.len(),
            "✅ Committed settlement for {}",
            game.matchup()
        );

        Ok(summary)
    }

    /// Rebuild each affected wager from all of its legs with this game's
    /// transitions overlaid.
    async fn recompute_wagers(&self, transitions: &[LegTransition]) -> AppResult<Vec<WagerSettlement>> {
        let by_leg: HashMap<Uuid, &LegTransition> =
            transitions.iter().map(|t| (t.leg_id, t)).collect();
        let wager_ids: BTreeSet<Uuid> = transitions.iter().filter_map(|t| t.wager_id).collect();

        let mut settlements = Vec::with_capacity(wager_ids.len());
        for wager_id in wager_ids {
            let Some(wager) = self.legs.get_wager(wager_id).await? else {
                warn!(%wager_id, "Leg references a missing wager; settling the leg alone");
                continue;
            };

            let mut legs = self.legs.legs_for_wager(wager_id).await?;
            for leg in legs.iter_mut() {
                if let Some(transition) = by_leg.get(&leg.id) {
                    transition.apply_to(leg);
                }
            }

            let snapshots: Vec<LegResultSnapshot> = legs.iter().map(LegResultSnapshot::from).collect();
            let aggregate = aggregate(&wager, &snapshots, self.config.rules.void_policy);

            if aggregate.is_final() {
                debug!(%wager_id, status = %aggregate.status, "Wager resolved");
            }

            settlements.push(WagerSettlement {
                wager_id,
                status: aggregate.status,
                settled_at: aggregate.settled_at,
                record: aggregate.record,
            });
        }

        Ok(settlements)
    }

    /// Publish feed events for a committed game. The settlement is already
    /// durable, so feed failures are logged and not retried.
    async fn publish(&self, game: &Game, pass: Pass, settlement: &GameSettlement) -> usize {
        let mut published = 0;

        if pass == Pass::Settle {
            let metadata = json!({
                "game_id": game.id,
                "sport": game.sport,
                "summary": format!("{} final", game.matchup()),
                "home_score": game.home_score,
                "away_score": game.away_score,
            });
            published += self.append(FeedEventType::GameFinal, metadata).await;
        }

        for transition in &settlement.transitions {
            let Some(event_type) = FeedEventType::for_leg(transition.to) else {
                continue;
            };
            let metadata = json!({
                "leg_id": transition.leg_id,
                "wager_id": transition.wager_id,
                "game_id": transition.game_id,
                "status": transition.to,
                "correction": transition.correction,
                "summary": format!(
                    "{}: {} {} {} ({})",
                    game.matchup(),
                    transition.market_type,
                    transition.selection,
                    transition.to.as_str().to_lowercase(),
                    transition.reason
                ),
            });
            published += self.append(event_type, metadata).await;
        }

        published
    }

    async fn append(&self, event_type: FeedEventType, metadata: serde_json::Value) -> usize {
        match self.feed.append(event_type, metadata).await {
            Ok(()) => 1,
            Err(err) => {
                warn!("⚠️ Failed to append {:?} feed event: {}", event_type, err);
                0
            }
        }
    }
}
