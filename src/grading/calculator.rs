// Leg Result Calculator
//
// Pure grading of one leg against one game. No I/O, never panics: every input
// ends in PENDING (game not final yet) or a terminal status with a reason.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::GradingError;
use crate::grading::numeric::normalize;
use crate::grading::terms::{LegTerms, MarketType, Side, TotalDirection};
use crate::ledger::models::{Game, GameStatus, LegStatus, WagerLeg};

/// How a moneyline tie is graded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TiePolicy {
    /// Both sides lose on a tie
    #[default]
    Lose,
    /// A tie refunds both sides
    Push,
}

/// Result of grading one leg
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LegOutcome {
    /// The game has not finished; no decision was made
    Pending,
    /// Terminal decision with an audit reason
    Decided { status: LegStatus, reason: String },
}

impl LegOutcome {
    fn decided(status: LegStatus, reason: impl Into<String>) -> Self {
        LegOutcome::Decided {
            status,
            reason: reason.into(),
        }
    }

    pub fn status(&self) -> LegStatus {
        match self {
            LegOutcome::Pending => LegStatus::Pending,
            LegOutcome::Decided { status, .. } => *status,
        }
    }
}

/// Final scores of a game, normalized
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FinalScore {
    home: Decimal,
    away: Decimal,
}

impl FinalScore {
    fn margin_for(&self, side: Side) -> Result<Decimal, GradingError> {
        let margin = match side {
            Side::Home => self.home.checked_sub(self.away),
            Side::Away => self.away.checked_sub(self.home),
        };
        margin.ok_or(GradingError::OutOfRange)
    }

    fn total(&self) -> Result<Decimal, GradingError> {
        self.home.checked_add(self.away).ok_or(GradingError::OutOfRange)
    }
}

/// Grade a leg, reporting bad data as a typed failure.
pub fn grade(terms: &LegTerms, game: &Game, tie_policy: TiePolicy) -> Result<LegOutcome, GradingError> {
    if game.status != GameStatus::Final {
        return Ok(LegOutcome::Pending);
    }

    let score = match (
        normalize(game.home_score.as_ref()),
        normalize(game.away_score.as_ref()),
    ) {
        (Some(home), Some(away)) => FinalScore { home, away },
        _ => return Err(GradingError::MissingScores),
    };

    match terms.market {
        MarketType::Moneyline => grade_moneyline(terms, game, score, tie_policy),
        MarketType::Spread => grade_spread(terms, game, score),
        MarketType::Total => grade_total(terms, score),
    }
}

/// Grade a stored leg. Grading failures become VOID with the failure as reason.
pub fn resolve_leg(leg: &WagerLeg, game: &Game, tie_policy: TiePolicy) -> LegOutcome {
    if game.status != GameStatus::Final {
        return LegOutcome::Pending;
    }

    let graded = LegTerms::from_leg(leg).and_then(|terms| grade(&terms, game, tie_policy));

    match graded {
        Ok(outcome) => outcome,
        Err(err) => LegOutcome::decided(LegStatus::Void, err.to_string()),
    }
}

fn grade_moneyline(
    terms: &LegTerms,
    game: &Game,
    score: FinalScore,
    tie_policy: TiePolicy,
) -> Result<LegOutcome, GradingError> {
    let side = terms.side(&game.home_team, &game.away_team)?;
    let margin = score.margin_for(side)?;
    let final_line = format!("final {}-{}", score.home, score.away);

    let outcome = if margin > Decimal::ZERO {
        LegOutcome::decided(LegStatus::Won, format!("{} won outright, {}", side.as_str(), final_line))
    } else if margin < Decimal::ZERO {
        LegOutcome::decided(LegStatus::Lost, format!("{} lost outright, {}", side.as_str(), final_line))
    } else {
        match tie_policy {
            TiePolicy::Lose => LegOutcome::decided(LegStatus::Lost, format!("tie graded as loss, {}", final_line)),
            TiePolicy::Push => LegOutcome::decided(LegStatus::Push, format!("tie graded as push, {}", final_line)),
        }
    };

    Ok(outcome)
}

// Both sides reduce to "selected side's margin + line": a home -4 pushes on a
// 4-point home win, an away +4 pushes on a 4-point away loss.
fn grade_spread(terms: &LegTerms, game: &Game, score: FinalScore) -> Result<LegOutcome, GradingError> {
    let line = terms.line_value().ok_or(GradingError::MissingLine)?;
    let side = terms.side(&game.home_team, &game.away_team)?;
    let margin = score.margin_for(side)?;
    let result = margin.checked_add(line).ok_or(GradingError::OutOfRange)?;
    let detail = format!(
        "{} {} against {} margin {} (result {})",
        side.as_str(),
        line,
        side.as_str(),
        margin,
        result
    );

    let status = if result > Decimal::ZERO {
        LegStatus::Won
    } else if result < Decimal::ZERO {
        LegStatus::Lost
    } else {
        LegStatus::Push
    };

    Ok(LegOutcome::decided(status, format!("spread {}: {}", status.as_str().to_lowercase(), detail)))
}

fn grade_total(terms: &LegTerms, score: FinalScore) -> Result<LegOutcome, GradingError> {
    let line = terms.line_value().ok_or(GradingError::MissingLine)?;
    let direction = terms.direction()?;
    let total = score.total()?;

    let status = if total == line {
        LegStatus::Push
    } else {
        let over_hit = total > line;
        match (direction, over_hit) {
            (TotalDirection::Over, true) | (TotalDirection::Under, false) => LegStatus::Won,
            _ => LegStatus::Lost,
        }
    };

    Ok(LegOutcome::decided(
        status,
        format!("total {} {} {}: {}", total, direction.as_str(), line, status.as_str().to_lowercase()),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grading::numeric::NumericInput;
    use chrono::Utc;
    use uuid::Uuid;

    fn game(status: GameStatus, home: Option<NumericInput>, away: Option<NumericInput>) -> Game {
        Game {
            id: Uuid::new_v4(),
            sport: "nfl".into(),
            home_team: "Home Team".into(),
            away_team: "Away Team".into(),
            home_score: home,
            away_score: away,
            status,
            start_time: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn final_game(home: i64, away: i64) -> Game {
        game(GameStatus::Final, Some(home.into()), Some(away.into()))
    }

    fn leg(market: &str, selection: &str, line: Option<NumericInput>) -> WagerLeg {
        WagerLeg {
            id: Uuid::new_v4(),
            wager_id: None,
            game_id: Uuid::new_v4(),
            market_type: market.into(),
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

    fn status_of(leg: &WagerLeg, game: &Game) -> LegStatus {
        resolve_leg(leg, game, TiePolicy::Lose).status()
    }

    #[test]
    fn test_moneyline_home_win() {
        let game = final_game(28, 14);
        assert_eq!(status_of(&leg("moneyline", "Home Team", None), &game), LegStatus::Won);
        assert_eq!(status_of(&leg("moneyline", "away", None), &game), LegStatus::Lost);
    }

    #[test]
    fn test_moneyline_tie_policy() {
        let game = final_game(17, 17);
        assert_eq!(status_of(&leg("moneyline", "home", None), &game), LegStatus::Lost);
        assert_eq!(status_of(&leg("moneyline", "away", None), &game), LegStatus::Lost);

        let pushed = resolve_leg(&leg("moneyline", "home", None), &game, TiePolicy::Push);
        assert_eq!(pushed.status(), LegStatus::Push);
    }

    #[test]
    fn test_moneyline_holds_for_score_grid() {
        for home in 0..15_i64 {
            for away in 0..15_i64 {
                let game = final_game(home, away);
                let home_leg = status_of(&leg("moneyline", "home", None), &game);
                let away_leg = status_of(&leg("moneyline", "away", None), &game);
                if home > away {
                    assert_eq!((home_leg, away_leg), (LegStatus::Won, LegStatus::Lost));
                } else if home < away {
                    assert_eq!((home_leg, away_leg), (LegStatus::Lost, LegStatus::Won));
                } else {
                    assert_eq!((home_leg, away_leg), (LegStatus::Lost, LegStatus::Lost));
                }
            }
        }
    }

    #[test]
    fn test_spread_push_on_exact_cover() {
        let game = final_game(24, 20);
        let outcome = resolve_leg(&leg("spread", "Home Team", Some((-4.0).into())), &game, TiePolicy::Lose);
        assert_eq!(outcome.status(), LegStatus::Push);
    }

    #[test]
    fn test_spread_sign_of_result_decides() {
        let game = final_game(24, 20);
        assert_eq!(status_of(&leg("spread", "home", Some((-3.5).into())), &game), LegStatus::Won);
        assert_eq!(status_of(&leg("spread", "home", Some((-4.5).into())), &game), LegStatus::Lost);
        assert_eq!(status_of(&leg("spread", "away", Some(4.into())), &game), LegStatus::Push);
        assert_eq!(status_of(&leg("spread", "away", Some("+4.5".into())), &game), LegStatus::Won);
        assert_eq!(status_of(&leg("spread", "away", Some(3.5.into())), &game), LegStatus::Lost);
    }

    #[test]
    fn test_spread_requires_line() {
        let game = final_game(24, 20);
        let outcome = resolve_leg(&leg("spread", "home", None), &game, TiePolicy::Lose);
        assert_eq!(
            outcome,
            LegOutcome::Decided { status: LegStatus::Void, reason: "missing line".into() }
        );
        assert_eq!(status_of(&leg("spread", "home", Some("n/a".into())), &game), LegStatus::Void);
    }

    #[test]
    fn test_total_over_under_and_push() {
        let game = final_game(28, 24);
        assert_eq!(status_of(&leg("total", "over 46.5", Some(46.5.into())), &game), LegStatus::Won);
        assert_eq!(status_of(&leg("total", "Under 46.5", Some("46.5".into())), &game), LegStatus::Lost);
        assert_eq!(status_of(&leg("total", "under", Some(52.into())), &game), LegStatus::Push);
        assert_eq!(status_of(&leg("total", "over", Some(52.into())), &game), LegStatus::Push);
        assert_eq!(status_of(&leg("total", "under", Some(55.5.into())), &game), LegStatus::Won);
    }

    #[test]
    fn test_total_without_direction_is_void() {
        let game = final_game(28, 24);
        let outcome = resolve_leg(&leg("total", "46.5", Some(46.5.into())), &game, TiePolicy::Lose);
        assert_eq!(outcome.status(), LegStatus::Void);
    }

    #[test]
    fn test_not_final_stays_pending() {
        let live = game(GameStatus::Live, Some(28.into()), Some(14.into()));
        for market in ["moneyline", "spread", "total", "parlay-of-parlays"] {
            assert_eq!(status_of(&leg(market, "home", Some(3.into())), &live), LegStatus::Pending);
        }
        let postponed = game(GameStatus::Postponed, None, None);
        assert_eq!(status_of(&leg("moneyline", "home", None), &postponed), LegStatus::Pending);
    }

    #[test]
    fn test_missing_scores_always_void() {
        let cases = [
            game(GameStatus::Final, None, Some(14.into())),
            game(GameStatus::Final, Some(28.into()), None),
            game(GameStatus::Final, Some("TBD".into()), Some(14.into())),
        ];
        for game in &cases {
            for (market, selection, line) in [
                ("moneyline", "home", None),
                ("spread", "home", Some(NumericInput::from(-3.5))),
                ("total", "over", Some(NumericInput::from(40))),
            ] {
                let outcome = resolve_leg(&leg(market, selection, line), game, TiePolicy::Lose);
                assert_eq!(
                    outcome,
                    LegOutcome::Decided { status: LegStatus::Void, reason: "missing scores".into() }
                );
            }
        }
    }

    #[test]
    fn test_unmatched_selection_and_unknown_market_are_void() {
        let game = final_game(28, 14);
        let outcome = resolve_leg(&leg("moneyline", "Some Other Club", None), &game, TiePolicy::Lose);
        assert_eq!(
            outcome,
            LegOutcome::Decided { status: LegStatus::Void, reason: "unmatched selection".into() }
        );
        assert_eq!(status_of(&leg("prop", "home", None), &game), LegStatus::Void);
    }

    #[test]
    fn test_text_scores_are_normalized() {
        let game = game(GameStatus::Final, Some("28".into()), Some(14.0.into()));
        assert_eq!(status_of(&leg("moneyline", "home", None), &game), LegStatus::Won);
    }

    #[test]
    fn test_extreme_values_void_instead_of_overflowing() {
        let max = "79228162514264337593543950335";
        let huge = game(GameStatus::Final, Some(max.into()), Some(max.into()));
        let outcome = resolve_leg(&leg("total", "over", Some(NumericInput::from(1_i64))), &huge, TiePolicy::Lose);
        assert_eq!(
            outcome,
            LegOutcome::Decided { status: LegStatus::Void, reason: "score arithmetic out of range".into() }
        );

        let lopsided = game(GameStatus::Final, Some(max.into()), Some(format!("-{}", max).into()));
        assert_eq!(status_of(&leg("moneyline", "home", None), &lopsided), LegStatus::Void);

        let ordinary = final_game(28, 14);
        let spread = leg("spread", "home", Some(max.into()));
        assert_eq!(status_of(&spread, &ordinary), LegStatus::Void);
    }
}
