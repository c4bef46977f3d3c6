//! Exchange FSM State Definitions
//!
//! State IDs are the persisted `status` column of `exchanges_tb` and must
//! never be renumbered.

use std::fmt;

use super::types::TxRole;

/// Exchange saga states
///
/// Terminal states: CLOSED (7), FAILED (8)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i16)]
pub enum ExchangeStatus {
    /// Record created, nothing resolved yet
    Unknown = 0,

    /// Wallets resolved, input record created
    New = 1,

    /// Deposit wallet under monitoring, waiting for the user's deposit
    WaitingDeposit = 2,

    /// Deposit confirmed but worth no more than the fee
    InsufficientDeposit = 3,

    /// Deposit confirmed and sufficient
    DepositPaid = 4,

    /// Output record persisted, transfer not yet requested (persist-before-call)
    CreatingOutgoingTransfer = 5,

    /// Outgoing transfer requested, waiting for confirmation
    OutgoingRunning = 6,

    /// Terminal: outgoing transfer confirmed
    Closed = 7,

    /// Terminal: deposit returned to the user
    Failed = 8,

    /// Refund transfer requested, waiting for confirmation
    ReturningDeposit = 9,

    /// Repricing against the actual received value
    Calculating = 11,

    /// Waiting for the user to submit the deposit hash
    WaitingHash = 12,

    /// Refund record persisted, transfer not yet requested
    CreateReturnTransfer = 14,
}

impl ExchangeStatus {
    /// Every status, in saga order
    pub const ALL: [ExchangeStatus; 13] = [
        ExchangeStatus::Unknown,
        ExchangeStatus::New,
        ExchangeStatus::WaitingHash,
        ExchangeStatus::WaitingDeposit,
        ExchangeStatus::DepositPaid,
        ExchangeStatus::InsufficientDeposit,
        ExchangeStatus::Calculating,
        ExchangeStatus::CreatingOutgoingTransfer,
        ExchangeStatus::OutgoingRunning,
        ExchangeStatus::Closed,
        ExchangeStatus::CreateReturnTransfer,
        ExchangeStatus::ReturningDeposit,
        ExchangeStatus::Failed,
    ];

    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, ExchangeStatus::Closed | ExchangeStatus::Failed)
    }

    /// Legal non-identity successors
    pub fn successors(&self) -> &'static [ExchangeStatus] {
        use ExchangeStatus::*;
        match self {
            Unknown => &[New],
            New => &[WaitingHash],
            WaitingHash => &[WaitingDeposit],
            WaitingDeposit => &[DepositPaid, InsufficientDeposit],
            DepositPaid => &[Calculating],
            Calculating => &[CreatingOutgoingTransfer],
            CreatingOutgoingTransfer => &[OutgoingRunning],
            OutgoingRunning => &[Closed],
            InsufficientDeposit => &[CreateReturnTransfer],
            CreateReturnTransfer => &[ReturningDeposit],
            ReturningDeposit => &[Failed],
            Closed | Failed => &[],
        }
    }

    /// The record whose confirmation this status is parked on
    ///
    /// While that record is unconfirmed only a callback or a user action can
    /// move the exchange, so polling it is pointless.
    pub fn awaits(&self) -> Option<TxRole> {
        use ExchangeStatus::*;
        match self {
            WaitingHash | WaitingDeposit => Some(TxRole::Input),
            OutgoingRunning | ReturningDeposit => Some(TxRole::Output),
            _ => None,
        }
    }

    /// Same-state assignment is always legal
    #[inline]
    pub fn can_transition_to(&self, next: ExchangeStatus) -> bool {
        *self == next || self.successors().contains(&next)
    }

    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            0 => Some(ExchangeStatus::Unknown),
            1 => Some(ExchangeStatus::New),
            2 => Some(ExchangeStatus::WaitingDeposit),
            3 => Some(ExchangeStatus::InsufficientDeposit),
            4 => Some(ExchangeStatus::DepositPaid),
            5 => Some(ExchangeStatus::CreatingOutgoingTransfer),
            6 => Some(ExchangeStatus::OutgoingRunning),
            7 => Some(ExchangeStatus::Closed),
            8 => Some(ExchangeStatus::Failed),
            9 => Some(ExchangeStatus::ReturningDeposit),
            11 => Some(ExchangeStatus::Calculating),
            12 => Some(ExchangeStatus::WaitingHash),
            14 => Some(ExchangeStatus::CreateReturnTransfer),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExchangeStatus::Unknown => "UNKNOWN",
            ExchangeStatus::New => "NEW",
            ExchangeStatus::WaitingDeposit => "WAITING_DEPOSIT",
            ExchangeStatus::InsufficientDeposit => "INSUFFICIENT_DEPOSIT",
            ExchangeStatus::DepositPaid => "DEPOSIT_PAID",
            ExchangeStatus::CreatingOutgoingTransfer => "CREATING_OUTGOING_TRANSFER",
            ExchangeStatus::OutgoingRunning => "OUTGOING_RUNNING",
            ExchangeStatus::Closed => "CLOSED",
            ExchangeStatus::Failed => "FAILED",
            ExchangeStatus::ReturningDeposit => "RETURNING_DEPOSIT",
            ExchangeStatus::Calculating => "CALCULATING",
            ExchangeStatus::WaitingHash => "WAITING_HASH",
            ExchangeStatus::CreateReturnTransfer => "CREATE_RETURN_TRANSFER",
        }
    }
}

impl fmt::Display for ExchangeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<i16> for ExchangeStatus {
    type Error = ();

    fn try_from(value: i16) -> Result<Self, Self::Error> {
        ExchangeStatus::from_id(value).ok_or(())
    }
}
