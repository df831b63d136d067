//! Shared types for the ovr-bot trading system.
//!
//! CRITICAL: All prices and P&L are integer cents on the exchange's 0-100
//! scale. NEVER use f64 for financial math.

pub mod types;

pub use types::{fmt_cents, Side, Sport};
