use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::models::*;
use crate::error::{AppResult, SettlementError};
use crate::grading::numeric::NumericInput;
use crate::settlement::traits::{
    AlertSink, FeedSink, GameRepository, GameSettlement, HeartbeatStore, LegRecheck, LegStore,
    LegTransition, WagerSettlement,
};

const GAME_COLUMNS: &str = r#"
    g.id, g.sport, g.home_team, g.away_team, g.home_score, g.away_score,
    g.status, g.start_time, g.updated_at
"#;

const LEG_COLUMNS: &str = r#"
    l.id, l.wager_id, l.game_id, l.market_type, l.selection, l.line::TEXT AS line,
    l.status, l.settled_at, l.result_reason, l.first_settled_at, l.correction_applied,
    l.correction_checked_at
"#;

#[derive(Debug, FromRow)]
struct GameRow {
    id: Uuid,
    sport: String,
    home_team: String,
    away_team: String,
    home_score: Option<i32>,
    away_score: Option<i32>,
    status: GameStatus,
    start_time: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<GameRow> for Game {
    fn from(row: GameRow) -> Self {
        Game {
            id: row.id,
            sport: row.sport,
            home_team: row.home_team,
            away_team: row.away_team,
            home_score: row.home_score.map(|s| NumericInput::Integer(s.into())),
            away_score: row.away_score.map(|s| NumericInput::Integer(s.into())),
            status: row.status,
            start_time: row.start_time,
            updated_at: row.updated_at,
        }
    }
}

/// `line` is NUMERIC in storage and read back as text, so half points survive
/// without passing through a float.
#[derive(Debug, FromRow)]
struct LegRow {
    id: Uuid,
    wager_id: Option<Uuid>,
    game_id: Uuid,
    market_type: String,
    selection: String,
    line: Option<String>,
    status: LegStatus,
    settled_at: Option<DateTime<Utc>>,
    result_reason: Option<String>,
    first_settled_at: Option<DateTime<Utc>>,
    correction_applied: bool,
    correction_checked_at: Option<DateTime<Utc>>,
}

impl From<LegRow> for WagerLeg {
    fn from(row: LegRow) -> Self {
        WagerLeg {
            id: row.id,
            wager_id: row.wager_id,
            game_id: row.game_id,
            market_type: row.market_type,
            selection: row.selection,
            line: row.line.map(NumericInput::Text),
            status: row.status,
            settled_at: row.settled_at,
            result_reason: row.result_reason,
            first_settled_at: row.first_settled_at,
            correction_applied: row.correction_applied,
            correction_checked_at: row.correction_checked_at,
        }
    }
}

fn sql_limit(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

/// Postgres-backed settlement store - games are read-only, legs, wagers and
/// outcomes are written one game per transaction
pub struct PgSettlementRepository {
    pub pool: PgPool,
}

impl PgSettlementRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn begin_tx(&self) -> AppResult<Transaction<'_, Postgres>> {
        Ok(self.pool.begin().await?)
    }

    async fn fetch_games(&self, sql: &str, binds: GameQuery) -> AppResult<Vec<Game>> {
        let query = sqlx::query_as::<_, GameRow>(sql);
        let query = match binds {
            GameQuery::Window { since, until, limit } => {
                query.bind(since).bind(until).bind(sql_limit(limit))
            }
            GameQuery::SettledSince { since, limit } => query.bind(since).bind(sql_limit(limit)),
        };

        let rows = query.fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(Game::from).collect())
    }

    async fn write_leg(
        tx: &mut Transaction<'_, Postgres>,
        transition: &LegTransition,
    ) -> AppResult<()> {
        // Corrections only apply to legs that were never corrected before
        let result = sqlx::query(
            r#"
            UPDATE wager_legs
            SET status = $2,
                settled_at = $3,
                result_reason = $4,
                first_settled_at = COALESCE(first_settled_at, $3),
                correction_applied = correction_applied OR $5
            WHERE id = $1
              AND status = $6
              AND (NOT $5 OR correction_applied = FALSE)
            "#,
        )
        .bind(transition.leg_id)
        .bind(transition.to)
        .bind(transition.settled_at)
        .bind(&transition.reason)
        .bind(transition.correction)
        .bind(transition.from)
        .execute(&mut **tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(SettlementError::StaleLeg {
                leg_id: transition.leg_id,
                expected: transition.from.to_string(),
            }
            .into());
        }

        Ok(())
    }

    async fn write_recheck(
        tx: &mut Transaction<'_, Postgres>,
        recheck: &LegRecheck,
    ) -> AppResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE wager_legs
            SET correction_checked_at = $2
            WHERE id = $1
              AND status = $3
              AND correction_applied = FALSE
            "#,
        )
        .bind(recheck.leg_id)
        .bind(recheck.checked_at)
        .bind(recheck.status)
        .execute(&mut **tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(SettlementError::StaleLeg {
                leg_id: recheck.leg_id,
                expected: recheck.status.to_string(),
            }
            .into());
        }

        Ok(())
    }

    async fn write_wager(
        tx: &mut Transaction<'_, Postgres>,
        update: &WagerSettlement,
    ) -> AppResult<()> {
        sqlx::query(
            r#"
            UPDATE wagers
            SET status = $2, settled_at = $3
            WHERE id = $1
            "#,
        )
        .bind(update.wager_id)
        .bind(update.status)
        .bind(update.settled_at)
        .execute(&mut **tx)
        .await?;

        let record = &update.record;
        sqlx::query(
            r#"
            INSERT INTO wager_outcomes (
                wager_id, num_legs, predicted_probability, predicted_confidence, hit,
                legs_hit, legs_missed, leg_results, actual_probability, calibration_error,
                resolved_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, NOW())
            ON CONFLICT (wager_id)
            DO UPDATE SET
                num_legs = EXCLUDED.num_legs,
                predicted_probability = EXCLUDED.predicted_probability,
                predicted_confidence = EXCLUDED.predicted_confidence,
                hit = EXCLUDED.hit,
                legs_hit = EXCLUDED.legs_hit,
                legs_missed = EXCLUDED.legs_missed,
                leg_results = EXCLUDED.leg_results,
                actual_probability = EXCLUDED.actual_probability,
                calibration_error = EXCLUDED.calibration_error,
                resolved_at = EXCLUDED.resolved_at,
                updated_at = NOW()
            "#,
        )
        .bind(record.wager_id)
        .bind(record.num_legs)
        .bind(record.predicted_probability)
        .bind(record.predicted_confidence)
        .bind(record.hit)
        .bind(record.legs_hit)
        .bind(record.legs_missed)
        .bind(Json(&record.leg_results))
        .bind(record.actual_probability)
        .bind(record.calibration_error)
        .bind(record.resolved_at)
        .execute(&mut **tx)
        .await?;

        Ok(())
    }
}

enum GameQuery {
    Window {
        since: DateTime<Utc>,
        until: DateTime<Utc>,
        limit: usize,
    },
    SettledSince {
        since: DateTime<Utc>,
        limit: usize,
    },
}

#[async_trait]
impl GameRepository for PgSettlementRepository {
    async fn list_final_games(
        &self,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
        limit: usize,
    ) -> AppResult<Vec<Game>> {
        let sql = format!(
            r#"
            SELECT {GAME_COLUMNS}
            FROM games g
            WHERE g.status = 'final'
              AND g.start_time BETWEEN $1 AND $2
              AND EXISTS (
                  SELECT 1 FROM wager_legs l
                  WHERE l.game_id = g.id AND l.status = 'pending'
              )
            ORDER BY g.start_time, g.id
            LIMIT $3
            "#
        );
        self.fetch_games(&sql, GameQuery::Window { since, until, limit }).await
    }

    async fn list_permanently_cancelled_games(
        &self,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
        limit: usize,
    ) -> AppResult<Vec<Game>> {
        let sql = format!(
            r#"
            SELECT {GAME_COLUMNS}
            FROM games g
            WHERE g.status IN ('no_contest', 'cancelled')
              AND g.start_time BETWEEN $1 AND $2
              AND EXISTS (
                  SELECT 1 FROM wager_legs l
                  WHERE l.game_id = g.id AND l.status = 'pending'
              )
            ORDER BY g.start_time, g.id
            LIMIT $3
            "#
        );
        self.fetch_games(&sql, GameQuery::Window { since, until, limit }).await
    }

    async fn list_correction_candidates(
        &self,
        settled_since: DateTime<Utc>,
        limit: usize,
    ) -> AppResult<Vec<Game>> {
        let sql = format!(
            r#"
            SELECT {GAME_COLUMNS}
            FROM games g
            WHERE g.status = 'final'
              AND EXISTS (
                  SELECT 1 FROM wager_legs l
                  WHERE l.game_id = g.id
                    AND l.status <> 'pending'
                    AND l.correction_applied = FALSE
                    AND l.first_settled_at >= $1
                    AND g.updated_at > COALESCE(l.correction_checked_at, l.first_settled_at)
              )
            ORDER BY g.start_time, g.id
            LIMIT $2
            "#
        );
        self.fetch_games(&sql, GameQuery::SettledSince { since: settled_since, limit }).await
    }

    async fn has_recent_activity(&self, final_since: DateTime<Utc>) -> AppResult<bool> {
        let active = sqlx::query_scalar::<_, bool>(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM games
                WHERE status = 'live'
                   OR (status = 'final' AND updated_at >= $1)
            )
            "#,
        )
        .bind(final_since)
        .fetch_one(&self.pool)
        .await?;

        Ok(active)
    }
}

#[async_trait]
impl LegStore for PgSettlementRepository {
    async fn unsettled_legs_for_game(&self, game_id: Uuid) -> AppResult<Vec<WagerLeg>> {
        let sql = format!(
            r#"
            SELECT {LEG_COLUMNS}
            FROM wager_legs l
            WHERE l.game_id = $1 AND l.status = 'pending'
            ORDER BY l.created_at, l.id
            "#
        );
        let rows = sqlx::query_as::<_, LegRow>(&sql)
            .bind(game_id)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.into_iter().map(WagerLeg::from).collect())
    }

    async fn correctable_legs_for_game(
        &self,
        game_id: Uuid,
        settled_since: DateTime<Utc>,
    ) -> AppResult<Vec<WagerLeg>> {
        let sql = format!(
            r#"
            SELECT {LEG_COLUMNS}
            FROM wager_legs l
            WHERE l.game_id = $1
              AND l.status <> 'pending'
              AND l.correction_applied = FALSE
              AND l.first_settled_at >= $2
            ORDER BY l.created_at, l.id
            "#
        );
        let rows = sqlx::query_as::<_, LegRow>(&sql)
            .bind(game_id)
            .bind(settled_since)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.into_iter().map(WagerLeg::from).collect())
    }

    async fn legs_for_wager(&self, wager_id: Uuid) -> AppResult<Vec<WagerLeg>> {
        let sql = format!(
            r#"
            SELECT {LEG_COLUMNS}
            FROM wager_legs l
            WHERE l.wager_id = $1
            ORDER BY l.created_at, l.id
            "#
        );
        let rows = sqlx::query_as::<_, LegRow>(&sql)
            .bind(wager_id)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.into_iter().map(WagerLeg::from).collect())
    }

    async fn get_wager(&self, wager_id: Uuid) -> AppResult<Option<Wager>> {
        let wager = sqlx::query_as::<_, Wager>(
            r#"
            SELECT id, status, predicted_probability, predicted_confidence, settled_at
            FROM wagers
            WHERE id = $1
            "#,
        )
        .bind(wager_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(wager)
    }

    async fn commit_game(&self, settlement: &GameSettlement) -> AppResult<()> {
        let mut tx = self.begin_tx().await?;

        // Any early return drops `tx`, which rolls the whole game back
        for transition in &settlement.transitions {
            Self::write_leg(&mut tx, transition).await?;
        }
        for recheck in &settlement.rechecks {
            Self::write_recheck(&mut tx, recheck).await?;
        }
        for update in &settlement.wagers {
            Self::write_wager(&mut tx, update).await?;
        }

        tx.commit().await?;

        debug!(
            game_id = %settlement.game_id,
            legs = settlement.transitions.len(),
            rechecked = settlement.rechecks.len(),
            wagers = settlement.wagers.len(),
            "Settlement transaction committed"
        );
        Ok(())
    }
}

#[async_trait]
impl FeedSink for PgSettlementRepository {
    async fn append(&self, event_type: FeedEventType, metadata: serde_json::Value) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO feed_events (event_type, metadata)
            VALUES ($1, $2)
            "#,
        )
        .bind(event_type)
        .bind(metadata)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl HeartbeatStore for PgSettlementRepository {
    async fn upsert(
        &self,
        worker_name: &str,
        last_beat_at: DateTime<Utc>,
        meta: serde_json::Value,
    ) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO worker_heartbeats (worker_name, last_beat_at, meta)
            VALUES ($1, $2, $3)
            ON CONFLICT (worker_name)
            DO UPDATE SET last_beat_at = EXCLUDED.last_beat_at, meta = EXCLUDED.meta
            "#,
        )
        .bind(worker_name)
        .bind(last_beat_at)
        .bind(meta)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl AlertSink for PgSettlementRepository {
    async fn emit(
        &self,
        event_name: &str,
        severity: AlertSeverity,
        context: serde_json::Value,
    ) -> AppResult<()> {
        match severity {
            AlertSeverity::Critical => error!(alert = event_name, %context, "🚨 Alert raised"),
            AlertSeverity::Warning => warn!(alert = event_name, %context, "⚠️ Alert raised"),
            AlertSeverity::Info => info!(alert = event_name, %context, "Alert raised"),
        }

        sqlx::query(
            r#"
            INSERT INTO alert_events (event_name, severity, context)
            VALUES ($1, $2, $3)
            "#,
        )
        .bind(event_name)
        .bind(severity.as_str())
        .bind(context)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
