// Outcome Aggregator
//
// Combines one wager's graded legs into the wager status and its calibration
// record. Pure: persistence belongs to the orchestrator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ledger::models::{LegResultSnapshot, LegStatus, Wager, WagerOutcomeRecord, WagerStatus};

/// How VOID legs affect the wager
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoidPolicy {
    /// VOID legs drop out; the parlay is graded on what remains
    #[default]
    Exclude,
    /// Any VOID leg voids the whole wager
    VoidWager,
}

/// Wager-level result of aggregation
#[derive(Debug, Clone, PartialEq)]
pub struct WagerAggregate {
    pub status: WagerStatus,
    pub settled_at: Option<DateTime<Utc>>,
    pub record: WagerOutcomeRecord,
}

impl WagerAggregate {
    pub fn is_final(&self) -> bool {
        self.status != WagerStatus::Pending
    }
}

pub fn aggregate(wager: &Wager, legs: &[LegResultSnapshot], policy: VoidPolicy) -> WagerAggregate {
    let legs_hit = count(legs, LegStatus::Won);
    let legs_missed = count(legs, LegStatus::Lost);
    let all_terminal = !legs.is_empty() && legs.iter().all(|leg| leg.status.is_terminal());

    let mut record = WagerOutcomeRecord {
        wager_id: wager.id,
        num_legs: legs.len() as i32,
        predicted_probability: wager.predicted_probability,
        predicted_confidence: wager.predicted_confidence,
        hit: None,
        legs_hit,
        legs_missed,
        leg_results: legs.to_vec(),
        actual_probability: None,
        calibration_error: None,
        resolved_at: None,
    };

    if !all_terminal {
        return WagerAggregate {
            status: WagerStatus::Pending,
            settled_at: None,
            record,
        };
    }

    let included: Vec<&LegResultSnapshot> = legs
        .iter()
        .filter(|leg| leg.status != LegStatus::Void)
        .collect();
    let any_void = included.len() < legs.len();

    if included.is_empty() || (any_void && policy == VoidPolicy::VoidWager) {
        let resolved_at = latest_settlement(legs.iter());
        record.resolved_at = resolved_at;
        return WagerAggregate {
            status: WagerStatus::Void,
            settled_at: resolved_at,
            record,
        };
    }

    let hit = included
        .iter()
        .all(|leg| matches!(leg.status, LegStatus::Won | LegStatus::Push));
    let actual = if hit { 1.0 } else { 0.0 };
    let resolved_at = latest_settlement(included.iter().copied());

    record.hit = Some(hit);
    record.actual_probability = Some(actual);
    record.calibration_error = Some((wager.predicted_probability - actual).abs());
    record.resolved_at = resolved_at;

    WagerAggregate {
        status: if hit { WagerStatus::Won } else { WagerStatus::Lost },
        settled_at: resolved_at,
        record,
    }
}

fn count(legs: &[LegResultSnapshot], status: LegStatus) -> i32 {
    legs.iter().filter(|leg| leg.status == status).count() as i32
}

fn latest_settlement<'a>(legs: impl Iterator<Item = &'a LegResultSnapshot>) -> Option<DateTime<Utc>> {
    legs.filter_map(|leg| leg.settled_at).max()
}
