//! Messages handed to the dispatcher task.

use crate::evaluator::DecisionRecord;
use surebet_core::{Fill, Order};
use surebet_position::HealRecord;
use surebet_registry::{RawAccount, RawBalance};

/// Outbound side effect requested by a signal or order task.
///
/// Sent over a bounded channel; senders wait when the dispatcher falls
/// behind.
#[derive(Debug, Clone)]
pub enum DispatchMsg {
    SaveSurebet(Box<DecisionRecord>),
    SaveHeal(Box<HealRecord>),
    SaveOrder(Box<Order>),
    SaveFill(Box<Fill>),
    SaveAccount(Box<RawAccount>),
    SaveBalances(Vec<RawBalance>),
    /// Drop every audit record of a hedge that never filled.
    DeleteByOrderId(i64),
    /// Request a (throttled) balance refresh.
    CheckBalance,
}

impl DispatchMsg {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SaveSurebet(_) => "save_surebet",
            Self::SaveHeal(_) => "save_heal",
            Self::SaveOrder(_) => "save_order",
            Self::SaveFill(_) => "save_fill",
            Self::SaveAccount(_) => "save_account",
            Self::SaveBalances(_) => "save_balances",
            Self::DeleteByOrderId(_) => "delete_by_order_id",
            Self::CheckBalance => "check_balance",
        }
    }
}
