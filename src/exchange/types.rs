//! Exchange entities
//!
//! Currencies are referenced by slug, transaction records by uuid and
//! platform wallets by id.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::ExchangeError;
use super::state::ExchangeStatus;
use crate::money::{format_amount, quantize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Currency {
    pub id: i64,
    pub name: String,
    pub slug: String,
    pub active: bool,
    pub is_token: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformWallet {
    pub id: i64,
    pub address: String,
    pub currency_slug: String,
    pub is_active: bool,
    pub external_id: String,
}

/// Transaction record status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(i16)]
pub enum TxStatus {
    Success = 1,
    NotFound = 2,
    Failed = 3,
    Confirmed = 4,
    Pending = 5,
    New = 6,
}

impl TxStatus {
    /// Statuses a confirmation callback may still act on
    pub const ACTIVE: [TxStatus; 3] = [TxStatus::New, TxStatus::Pending, TxStatus::Success];

    #[inline]
    pub fn is_active(&self) -> bool {
        Self::ACTIVE.contains(self)
    }

    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            1 => Some(TxStatus::Success),
            2 => Some(TxStatus::NotFound),
            3 => Some(TxStatus::Failed),
            4 => Some(TxStatus::Confirmed),
            5 => Some(TxStatus::Pending),
            6 => Some(TxStatus::New),
            _ => None,
        }
    }
}

/// Which side of the exchange a record belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TxRole {
    Input,
    Output,
}

impl TxRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            TxRole::Input => "input",
            TxRole::Output => "output",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionRecord {
    pub uuid: Uuid,
    pub trx_hash: Option<String>,
    pub value: Decimal,
    pub to_address: String,
    pub from_address: String,
    pub status: TxStatus,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub currency_slug: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TransactionRecord {
    pub fn new(
        currency_slug: impl Into<String>,
        value: Decimal,
        from_address: impl Into<String>,
        to_address: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            uuid: Uuid::new_v4(),
            trx_hash: None,
            value: quantize(value),
            to_address: to_address.into(),
            from_address: from_address.into(),
            status: TxStatus::New,
            confirmed_at: None,
            currency_slug: currency_slug.into(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Record the on-chain outcome reported by a confirmation callback
    pub fn confirm(&mut self, hash: impl Into<String>, value: Decimal, at: DateTime<Utc>) {
        self.trx_hash = Some(hash.into());
        self.value = quantize(value);
        self.confirmed_at = Some(at);
        self.status = TxStatus::Confirmed;
        self.updated_at = at;
    }

    #[inline]
    pub fn is_confirmed(&self) -> bool {
        self.status == TxStatus::Confirmed && self.trx_hash.is_some()
    }
}

/// One exchange operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeHistory {
    pub uuid: Uuid,
    pub user_email: String,
    pub fee: Decimal,
    pub from_currency: String,
    pub to_currency: String,
    pub issue_rate_from: Decimal,
    pub issue_rate_to: Decimal,
    pub transaction_input: Option<Uuid>,
    pub transaction_output: Option<Uuid>,
    pub status: ExchangeStatus,
    pub ingoing_amount: Decimal,
    pub outgoing_amount: Decimal,
    pub ingoing_wallet: Option<i64>,
    pub outgoing_wallet: Option<i64>,
    pub from_address: String,
    pub to_address: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ExchangeHistory {
    /// Move to `next`; identity is always allowed, anything off the graph is rejected
    pub fn transition_to(&mut self, next: ExchangeStatus) -> Result<(), ExchangeError> {
        if !self.status.can_transition_to(next) {
            return Err(ExchangeError::IllegalTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }
}

/// An exchange together with everything its handlers read and write
///
/// This is the unit a hop clones, mutates and commits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeSnapshot {
    pub exchange: ExchangeHistory,
    pub input: Option<TransactionRecord>,
    pub output: Option<TransactionRecord>,
    pub ingoing_wallet: Option<PlatformWallet>,
    pub outgoing_wallet: Option<PlatformWallet>,
}

impl ExchangeSnapshot {
    pub fn new(exchange: ExchangeHistory) -> Self {
        Self {
            exchange,
            input: None,
            output: None,
            ingoing_wallet: None,
            outgoing_wallet: None,
        }
    }

    #[inline]
    pub fn status(&self) -> ExchangeStatus {
        self.exchange.status
    }

    pub fn view(&self) -> ExchangeView {
        let e = &self.exchange;
        ExchangeView {
            uuid: e.uuid,
            status: e.status.as_str(),
            status_id: e.status.id(),
            from_currency: e.from_currency.clone(),
            to_currency: e.to_currency.clone(),
            ingoing_amount: format_amount(e.ingoing_amount),
            outgoing_amount: format_amount(e.outgoing_amount),
            fee: format_amount(e.fee),
            issue_rate_from: format_amount(e.issue_rate_from),
            issue_rate_to: format_amount(e.issue_rate_to),
            from_address: e.from_address.clone(),
            to_address: e.to_address.clone(),
            deposit_address: self.ingoing_wallet.as_ref().map(|w| w.address.clone()),
            input_hash: self.input.as_ref().and_then(|t| t.trx_hash.clone()),
            output_hash: self.output.as_ref().and_then(|t| t.trx_hash.clone()),
            created_at: e.created_at,
            updated_at: e.updated_at,
        }
    }
}

/// Client-facing exchange representation
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ExchangeView {
    pub uuid: Uuid,
    pub status: &'static str,
    pub status_id: i16,
    pub from_currency: String,
    pub to_currency: String,
    pub ingoing_amount: String,
    pub outgoing_amount: String,
    pub fee: String,
    pub issue_rate_from: String,
    pub issue_rate_to: String,
    pub from_address: String,
    pub to_address: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deposit_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_hash: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exchange(status: ExchangeStatus) -> ExchangeHistory {
        let now = Utc::now();
        ExchangeHistory {
            uuid: Uuid::new_v4(),
            user_email: "a@b.io".into(),
            fee: Decimal::new(5, 0),
            from_currency: "bitcoin".into(),
            to_currency: "ethereum".into(),
            issue_rate_from: Decimal::ONE,
            issue_rate_to: Decimal::ONE,
            transaction_input: None,
            transaction_output: None,
            status,
            ingoing_amount: Decimal::ONE,
            outgoing_amount: Decimal::ONE,
            ingoing_wallet: None,
            outgoing_wallet: None,
            from_address: "bc1user".into(),
            to_address: "0xuser".into(),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_transition_to_illegal_leaves_status() {
        let mut e = exchange(ExchangeStatus::WaitingDeposit);
        let err = e.transition_to(ExchangeStatus::Closed).unwrap_err();
        assert!(matches!(err, ExchangeError::IllegalTransition { .. }));
        assert_eq!(e.status, ExchangeStatus::WaitingDeposit);

        e.transition_to(ExchangeStatus::WaitingDeposit).unwrap();
        e.transition_to(ExchangeStatus::InsufficientDeposit).unwrap();
        assert_eq!(e.status, ExchangeStatus::InsufficientDeposit);
    }

    #[test]
    fn test_confirm_record() {
        let mut tx = TransactionRecord::new("bitcoin", Decimal::ONE, "from", "to");
        assert_eq!(tx.status, TxStatus::New);
        assert!(tx.status.is_active());
        assert!(!tx.is_confirmed());

        let at = Utc::now();
        tx.confirm("0xhash", Decimal::new(9, 1), at);
        assert!(tx.is_confirmed());
        assert!(!tx.status.is_active());
        assert_eq!(tx.value, Decimal::new(9, 1));
        assert_eq!(tx.confirmed_at, Some(at));
    }

    #[test]
    fn test_tx_status_ids() {
        for status in [
            TxStatus::Success,
            TxStatus::NotFound,
            TxStatus::Failed,
            TxStatus::Confirmed,
            TxStatus::Pending,
            TxStatus::New,
        ] {
            assert_eq!(TxStatus::from_id(status.id()), Some(status));
        }
        assert_eq!(TxStatus::Confirmed.id(), 4);
        assert!(TxStatus::from_id(0).is_none());
    }

    #[test]
    fn test_view_formats_amounts() {
        let snapshot = ExchangeSnapshot::new(exchange(ExchangeStatus::New));
        let view = snapshot.view();
        assert_eq!(view.status, "NEW");
        assert_eq!(view.status_id, 1);
        assert_eq!(view.ingoing_amount, "1.00000000");
        assert!(view.deposit_address.is_none());
    }
}
