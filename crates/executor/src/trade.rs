//! Trade records and the execution state machine.

use chrono::{DateTime, Utc};
use compact_str::CompactString;
use kimp_core::{Direction, Opportunity, Venue};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

static TRADE_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// States of an arbitrage cycle.
///
/// Both directions share one enum; the legal path through it depends on the
/// direction (see [`TradeState::legal_next`]). `Completed` and `Recovery`
/// are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TradeState {
    /// Pre-flight: balances snapshotted, opportunity pinned.
    Start,
    /// Forward entry: market-buy the coin on Upbit with KRW.
    BuyingKrw,
    /// Reverse entry: market-buy the coin on Binance with USDT.
    BuyingUsdtSide,
    /// Withdraw the coin toward the counterpart venue.
    XferOut,
    /// Poll the counterpart venue for the coin deposit.
    AwaitXferOut,
    /// Forward exit: market-sell the coin on Binance for USDT.
    SellingUsdtSide,
    /// Reverse exit: market-sell the coin on Upbit for KRW.
    SellingKrw,
    /// Stablecoin conversion on Upbit (sell USDT forward, buy USDT reverse).
    ConvertingHome,
    /// Withdraw the stablecoin back to its home venue.
    XferHome,
    /// Poll for the stablecoin deposit.
    AwaitXferHome,
    Completed,
    /// Inspection state: balances recorded, operator alerted, trade failed.
    Recovery,
}

impl TradeState {
    /// Legal successor states for the given direction. `Recovery` is
    /// reachable from every non-terminal state and is not listed.
    pub fn legal_next(self, direction: Direction) -> &'static [TradeState] {
        use TradeState::*;
        match direction {
            Direction::Forward => match self {
                Start => &[BuyingKrw],
                BuyingKrw => &[XferOut],
                XferOut => &[AwaitXferOut],
                AwaitXferOut => &[SellingUsdtSide],
                SellingUsdtSide => &[XferHome],
                XferHome => &[AwaitXferHome],
                AwaitXferHome => &[ConvertingHome],
                ConvertingHome => &[Completed],
                _ => &[],
            },
            Direction::Reverse => match self {
                Start => &[BuyingUsdtSide],
                BuyingUsdtSide => &[XferOut],
                XferOut => &[AwaitXferOut],
                AwaitXferOut => &[SellingKrw],
                SellingKrw => &[ConvertingHome],
                ConvertingHome => &[XferHome],
                XferHome => &[AwaitXferHome],
                AwaitXferHome => &[Completed],
                _ => &[],
            },
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, TradeState::Completed | TradeState::Recovery)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TradeState::Start => "start",
            TradeState::BuyingKrw => "buying_krw",
            TradeState::BuyingUsdtSide => "buying_usdt_side",
            TradeState::XferOut => "xfer_out",
            TradeState::AwaitXferOut => "await_xfer_out",
            TradeState::SellingUsdtSide => "selling_usdt_side",
            TradeState::SellingKrw => "selling_krw",
            TradeState::ConvertingHome => "converting_home",
            TradeState::XferHome => "xfer_home",
            TradeState::AwaitXferHome => "await_xfer_home",
            TradeState::Completed => "completed",
            TradeState::Recovery => "recovery",
        }
    }
}

impl std::fmt::Display for TradeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Terminal outcome of a trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeOutcome {
    Completed,
    Failed,
    /// Shutdown interrupted the cycle after an order executed: funds sit on
    /// a venue but the round trip is incomplete.
    Partial,
}

/// One recorded step of a trade. Append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeStep {
    pub state: TradeState,
    pub venue: Option<Venue>,
    pub asset: CompactString,
    pub amount: Decimal,
    pub order_id: Option<CompactString>,
    /// Destination balance before a withdrawal; deposit polling measures the
    /// rise against this.
    pub baseline: Option<Decimal>,
    pub detail: String,
    pub timestamp: DateTime<Utc>,
}

impl TradeStep {
    pub fn new(state: TradeState, asset: &str) -> Self {
        Self {
            state,
            venue: None,
            asset: CompactString::new(asset),
            amount: Decimal::ZERO,
            order_id: None,
            baseline: None,
            detail: String::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn on_venue(mut self, venue: Venue) -> Self {
        self.venue = Some(venue);
        self
    }

    pub fn with_amount(mut self, amount: Decimal) -> Self {
        self.amount = amount;
        self
    }

    pub fn with_order_id(mut self, order_id: &str) -> Self {
        self.order_id = Some(CompactString::new(order_id));
        self
    }

    pub fn with_baseline(mut self, baseline: Decimal) -> Self {
        self.baseline = Some(baseline);
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = detail.into();
        self
    }
}

/// A single arbitrage cycle from admission to terminal state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub id: CompactString,
    pub opportunity: Opportunity,
    pub state: TradeState,
    pub steps: Vec<TradeStep>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub outcome: Option<TradeOutcome>,
    pub realized_profit_krw: Decimal,
    pub error: Option<String>,
}

impl Trade {
    pub fn new(opportunity: Opportunity) -> Self {
        let id = CompactString::new(format!(
            "{}_{}_{}",
            opportunity.direction,
            opportunity.symbol,
            TRADE_ID_COUNTER.fetch_add(1, Ordering::SeqCst)
        ));
        Self {
            id,
            opportunity,
            state: TradeState::Start,
            steps: Vec::new(),
            started_at: Utc::now(),
            ended_at: None,
            outcome: None,
            realized_profit_krw: Decimal::ZERO,
            error: None,
        }
    }

    pub fn direction(&self) -> Direction {
        self.opportunity.direction
    }

    /// Advance to `next`, panicking on an illegal transition. The drivers
    /// only produce successors from [`TradeState::legal_next`], so a
    /// violation is a programming error, not a runtime condition.
    pub fn advance(&mut self, next: TradeState) {
        debug_assert!(
            self.state.legal_next(self.direction()).contains(&next) || next == TradeState::Recovery,
            "illegal transition {} -> {} ({})",
            self.state,
            next,
            self.direction()
        );
        self.state = next;
    }

    /// Append a step record.
    pub fn record(&mut self, step: TradeStep) {
        self.steps.push(step);
    }

    /// True when a success artifact for `state` is already recorded; the
    /// step can then be skipped at retry.
    pub fn has_step(&self, state: TradeState) -> bool {
        self.steps.iter().any(|step| step.state == state)
    }

    /// Last recorded step for `state`.
    pub fn step(&self, state: TradeState) -> Option<&TradeStep> {
        self.steps.iter().rev().find(|step| step.state == state)
    }

    pub fn complete(&mut self, realized_profit_krw: Decimal) {
        self.state = TradeState::Completed;
        self.outcome = Some(TradeOutcome::Completed);
        self.realized_profit_krw = realized_profit_krw;
        self.ended_at = Some(Utc::now());
    }

    pub fn fail(&mut self, error: String) {
        self.state = TradeState::Recovery;
        self.outcome = Some(TradeOutcome::Failed);
        self.error = Some(error);
        self.ended_at = Some(Utc::now());
    }

    /// Fail without entering recovery: nothing was acquired yet, so there is
    /// nothing to inspect.
    pub fn abort(&mut self, error: String) {
        self.outcome = Some(TradeOutcome::Failed);
        self.error = Some(error);
        self.ended_at = Some(Utc::now());
    }

    /// Shutdown hit between an executed order and the next transfer.
    pub fn mark_partial(&mut self) {
        self.outcome = Some(TradeOutcome::Partial);
        self.ended_at = Some(Utc::now());
    }

    pub fn is_terminal(&self) -> bool {
        self.outcome.is_some()
    }

    /// Whether any order has executed yet (a buy or sell step exists).
    pub fn has_executed_order(&self) -> bool {
        use TradeState::*;
        self.steps.iter().any(|step| {
            matches!(
                step.state,
                BuyingKrw | BuyingUsdtSide | SellingUsdtSide | SellingKrw | ConvertingHome
            )
        })
    }
}
