//! Portfolio aggregate -- a single trading portfolio.
//!
//! A portfolio starts `Uninitialized`, becomes `Open` on the first `Open`
//! command, and is intended to end up `Closed` after liquidation. State is
//! derived solely from the portfolio's own event history: `handle` validates
//! a command against the current state and selects events, `apply` folds one
//! event onto the state. Both are pure; ordering and persistence live in the
//! actor layer.

use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::aggregate::Aggregate;

// ---------------------------------------------------------------------------
// Supporting types
// ---------------------------------------------------------------------------

/// Whether an order buys or sells shares.
///
/// Closed two-variant enum: every match over it is exhaustive, so a corrupt
/// order-type tag from a collaborator cannot reach the aggregate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    Buy,
    Sell,
}

/// An order as supplied by the order-creation collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    /// Ticker symbol, e.g. `"ACME"`.
    pub symbol: String,
    /// Number of shares; positive.
    pub shares: u32,
    pub order_type: OrderType,
}

/// The outcome of a completed order, reported by the broker collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trade {
    pub symbol: String,
    pub shares: u32,
    /// Total price of the trade.
    pub price: Decimal,
    pub order_type: OrderType,
}

/// Customer loyalty tier. New portfolios start at `Bronze`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoyaltyLevel {
    #[default]
    Bronze,
    Silver,
    Gold,
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// Payload of an open portfolio.
///
/// Holdings use a `BTreeMap` so iteration and serialization order are
/// deterministic -- replaying the same event sequence always produces a
/// bit-for-bit identical serialized state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenPortfolio {
    /// Display name given at open time.
    pub name: String,
    /// Cash funds. No enforced floor: a buy completing against insufficient
    /// funds overdraws the account rather than failing.
    pub funds: Decimal,
    /// Shares held per symbol. Entries are removed when they reach zero.
    pub holdings: BTreeMap<String, u32>,
    pub loyalty_level: LoyaltyLevel,
}

impl OpenPortfolio {
    fn new(name: String) -> Self {
        Self {
            name,
            funds: Decimal::ZERO,
            holdings: BTreeMap::new(),
            loyalty_level: LoyaltyLevel::Bronze,
        }
    }

    /// Shares currently held of `symbol`, zero if absent.
    pub fn share_count(&self, symbol: &str) -> u32 {
        self.holdings.get(symbol).copied().unwrap_or(0)
    }

    fn place_order(&self, order: Order) -> Result<Vec<PortfolioEvent>, PortfolioError> {
        match order.order_type {
            OrderType::Sell => {
                let held = self.share_count(&order.symbol);
                if held < order.shares {
                    return Err(PortfolioError::InsufficientShares {
                        required: order.shares,
                        held,
                        symbol: order.symbol,
                    });
                }
                Ok(vec![PortfolioEvent::OrderPlaced { order }])
            }
            OrderType::Buy => Ok(vec![PortfolioEvent::OrderPlaced { order }]),
        }
    }
}

/// A trading portfolio's lifecycle state.
///
/// `Uninitialized -> Open` happens exactly once, on the first `Open`
/// command. `Open -> Closed` is the intended end of liquidation but is not
/// yet produced by any folded event; `Closed` is terminal either way.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum PortfolioState {
    #[default]
    Uninitialized,
    Open(OpenPortfolio),
    Closed,
}

impl PortfolioState {
    /// Short lowercase label for logging and protocol errors.
    pub fn variant_name(&self) -> &'static str {
        match self {
            Self::Uninitialized => "uninitialized",
            Self::Open(_) => "open",
            Self::Closed => "closed",
        }
    }

    /// Borrow the open payload, failing with [`PortfolioError::NotOpen`]
    /// otherwise. This is the read path for `GetState`.
    pub fn as_open(&self) -> Result<&OpenPortfolio, PortfolioError> {
        match self {
            Self::Open(open) => Ok(open),
            _ => Err(PortfolioError::NotOpen),
        }
    }
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

/// Commands accepted by the [`PortfolioState`] aggregate.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum PortfolioCommand {
    /// Open the portfolio under the given name.
    Open { name: String },
    /// Place a buy or sell order.
    PlaceOrder { order: Order },
    /// Record the outcome of an executed trade (reported by the broker).
    CompleteTrade { trade: Trade },
    /// Begin liquidating the portfolio.
    Liquidate,
}

impl PortfolioCommand {
    fn name(&self) -> &'static str {
        match self {
            Self::Open { .. } => "Open",
            Self::PlaceOrder { .. } => "PlaceOrder",
            Self::CompleteTrade { .. } => "CompleteTrade",
            Self::Liquidate => "Liquidate",
        }
    }
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// Domain events produced by the portfolio aggregate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum PortfolioEvent {
    /// The portfolio was opened.
    Opened { name: String },
    /// An order was accepted for placement.
    OrderPlaced { order: Order },
    /// Cash was withdrawn (e.g. paying for a buy).
    FundsDebited { amount: Decimal },
    /// Cash was deposited (e.g. proceeds of a sale).
    FundsCredited { amount: Decimal },
    /// Shares were added to holdings.
    SharesCredited { symbol: String, shares: u32 },
    /// Shares were removed from holdings.
    SharesDebited { symbol: String, shares: u32 },
    /// Liquidation of the portfolio began.
    LiquidationStarted,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Command rejections produced by the portfolio aggregate.
///
/// These are expected business outcomes (plus the protocol-error case),
/// reported to the caller with zero events appended and zero mutation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PortfolioError {
    /// `Open` was sent to a portfolio that is already open (or closed --
    /// an identifier that reaches `Closed` never reopens).
    #[error("portfolio already opened")]
    AlreadyOpened,

    /// A sell order asked for more shares than are held.
    #[error("insufficient shares of {symbol} for sell, {required} required, {held} held")]
    InsufficientShares {
        symbol: String,
        required: u32,
        held: u32,
    },

    /// A read was attempted against a portfolio that is not open.
    #[error("portfolio is not open")]
    NotOpen,

    /// No handler exists for this command in the current state. A defect
    /// in the caller, not a business outcome.
    #[error("command {command} is not supported in state {state}")]
    UnsupportedCommand {
        state: &'static str,
        command: &'static str,
    },
}

// ---------------------------------------------------------------------------
// Aggregate impl
// ---------------------------------------------------------------------------

/// Events selected for a completed trade.
///
/// Buy: debit the price, then credit the shares -- both in one atomic batch.
/// Sell: credit the proceeds only; the shares are assumed to have been
/// removed when the sale was initiated.
fn complete_trade(trade: Trade) -> Vec<PortfolioEvent> {
    match trade.order_type {
        OrderType::Buy => vec![
            PortfolioEvent::FundsDebited {
                amount: trade.price,
            },
            PortfolioEvent::SharesCredited {
                symbol: trade.symbol,
                shares: trade.shares,
            },
        ],
        OrderType::Sell => vec![PortfolioEvent::FundsCredited {
            amount: trade.price,
        }],
    }
}

impl Aggregate for PortfolioState {
    const AGGREGATE_TYPE: &'static str = "portfolio";
    type Command = PortfolioCommand;
    type DomainEvent = PortfolioEvent;
    type Error = PortfolioError;

    fn handle(&self, cmd: PortfolioCommand) -> Result<Vec<PortfolioEvent>, PortfolioError> {
        match self {
            PortfolioState::Uninitialized => match cmd {
                PortfolioCommand::Open { name } => Ok(vec![PortfolioEvent::Opened { name }]),
                other => Err(PortfolioError::UnsupportedCommand {
                    state: self.variant_name(),
                    command: other.name(),
                }),
            },
            PortfolioState::Open(open) => match cmd {
                PortfolioCommand::Open { .. } => Err(PortfolioError::AlreadyOpened),
                PortfolioCommand::PlaceOrder { order } => open.place_order(order),
                PortfolioCommand::CompleteTrade { trade } => Ok(complete_trade(trade)),
                PortfolioCommand::Liquidate => Ok(vec![PortfolioEvent::LiquidationStarted]),
            },
            PortfolioState::Closed => match cmd {
                PortfolioCommand::Open { .. } => Err(PortfolioError::AlreadyOpened),
                other => Err(PortfolioError::UnsupportedCommand {
                    state: self.variant_name(),
                    command: other.name(),
                }),
            },
        }
    }

    fn apply(self, event: &PortfolioEvent) -> Self {
        match (self, event) {
            (PortfolioState::Uninitialized, PortfolioEvent::Opened { name }) => {
                PortfolioState::Open(OpenPortfolio::new(name.clone()))
            }
            (PortfolioState::Open(mut p), PortfolioEvent::FundsDebited { amount }) => {
                p.funds -= *amount;
                PortfolioState::Open(p)
            }
            (PortfolioState::Open(mut p), PortfolioEvent::FundsCredited { amount }) => {
                p.funds += *amount;
                PortfolioState::Open(p)
            }
            (PortfolioState::Open(mut p), PortfolioEvent::SharesCredited { symbol, shares }) => {
                *p.holdings.entry(symbol.clone()).or_insert(0) += shares;
                PortfolioState::Open(p)
            }
            (PortfolioState::Open(mut p), PortfolioEvent::SharesDebited { symbol, shares }) => {
                if let Some(count) = p.holdings.get_mut(symbol) {
                    *count = count.saturating_sub(*shares);
                    if *count == 0 {
                        p.holdings.remove(symbol);
                    }
                }
                PortfolioState::Open(p)
            }
            // OrderPlaced and LiquidationStarted fold as identity: there is
            // no outstanding-order tracking and no liquidation effect yet.
            // An event that does not apply to the current variant is also
            // left unfolded rather than panicking.
            (state, _) => state,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
