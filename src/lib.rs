//! Odds Value Scanner
//!
//! Polls a sports odds provider, finds outcomes priced above their fair
//! value and sends one Telegram alert per opportunity.
//!
//! ## Architecture
//!
//! ```text
//! Scheduler ─▶ OddsProvider ─▶ Normalizer ─▶ ValueEvaluator ─▶ DedupStore ─▶ AlertDispatcher
//!    │                             │                              │               │
//!    ▼                             ▼                              ▼               ▼
//! Liveness (/health)        SQLite snapshot                 alerts ledger     Telegram
//! ```

pub mod client;
pub mod config;
pub mod dedup;
pub mod dispatch;
pub mod error;
pub mod evaluator;
pub mod monitor;
pub mod normalize;
pub mod notify;
pub mod scanner;
pub mod storage;
pub mod types;
