//! Parlay settlement worker: grades wager legs against final game results,
//! rolls them up into wager outcomes and keeps running on an adaptive schedule.
//!
//! Services that create parlays can reject malformed legs up front with
//! [`grading::LegTerms::validate`], the strict form of the parser settlement
//! itself uses:
//!
//! ```
//! use parlay_settlement::grading::{LegTerms, MarketType, NumericInput};
//!
//! let terms = LegTerms::validate("spread", "Home Team", Some(NumericInput::from(-3.5))).unwrap();
//! assert_eq!(terms.market, MarketType::Spread);
//!
//! assert!(LegTerms::validate("spread", "Home Team", None).is_err());
//! assert!(LegTerms::validate("total", "46.5", Some(NumericInput::from(46.5))).is_err());
//! assert!(LegTerms::validate("futures", "Home Team", None).is_err());
//! ```

pub mod bootstrap;
pub mod config;
pub mod error;
pub mod grading;
pub mod ledger;
pub mod server;
pub mod settlement;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// Initialize logging and tracing
pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "info,tower_http=debug,parlay_settlement=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();
}
