// Pure grading: leg results and wager aggregation
pub mod aggregator;
pub mod calculator;
pub mod numeric;
pub mod terms;

pub use aggregator::{aggregate, VoidPolicy, WagerAggregate};
pub use calculator::{grade, resolve_leg, LegOutcome, TiePolicy};
pub use numeric::NumericInput;
pub use terms::{LegTerms, MarketType, Side, TotalDirection};

/// Rules applied by the grading functions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GradingRules {
    pub tie_policy: TiePolicy,
    pub void_policy: VoidPolicy,
}
