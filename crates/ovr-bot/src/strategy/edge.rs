//! Fee-adjusted edge math.
//!
//! Once a score crosses a contract's line, the contract's true probability
//! is effectively 100%; the race is to buy it before the book reprices. The
//! exchange takes its fee out of the winning payout, so the deterministic
//! net payout per contract is 93 of 100 cents. Any ask below that, minus
//! the configured minimum edge, is capturable.

/// Gross payout of a winning contract, cents.
pub const CONTRACT_PAYOUT_CENTS: i64 = 100;

/// Exchange fee on winnings, percent. The conservative model applies it to
/// the full payout: net = 100 * (1 - 7%) = 93.
pub const FEE_RATE_PCT: i64 = 7;

/// Deterministic net payout of a winning contract after fees, cents.
pub const NET_PAYOUT_CENTS: i64 =
    CONTRACT_PAYOUT_CENTS * (100 - FEE_RATE_PCT) / 100;

/// Edge in cents per contract at the given YES ask. Can be negative.
#[inline]
pub fn edge_cents(yes_ask_cents: i64) -> i64 {
    NET_PAYOUT_CENTS - yes_ask_cents
}

#[inline]
pub fn has_edge(yes_ask_cents: i64, min_edge_cents: i64) -> bool {
    edge_cents(yes_ask_cents) >= min_edge_cents
}

/// Highest ask at which at least `min_edge_cents` of edge remains.
#[inline]
pub fn max_tradeable_price(min_edge_cents: i64) -> i64 {
    NET_PAYOUT_CENTS - min_edge_cents
}

/// Limit price for a signal: chase the ask by at most the slippage budget,
/// but never past the point where the minimum edge is gone.
#[inline]
pub fn limit_price(yes_ask_cents: i64, min_edge_cents: i64, slippage_cents: i64) -> i64 {
    (yes_ask_cents + slippage_cents).min(max_tradeable_price(min_edge_cents) + slippage_cents)
}
