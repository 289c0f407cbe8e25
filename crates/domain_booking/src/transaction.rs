//! Room transactions
//!
//! Append-only ledger lines scoped to a room. A room's balance is always
//! derived by summing signed amounts, never read from a cached total.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use core_kernel::{Currency, Money, RoomId, TransactionId};
use crate::error::BookingError;

/// Kind of room ledger line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionType {
    Payment,
    Charge,
    Refund,
    Fee,
    Deposit,
}

impl TransactionType {
    pub fn code(&self) -> &'static str {
        match self {
            TransactionType::Payment => "PAYMENT",
            TransactionType::Charge => "CHARGE",
            TransactionType::Refund => "REFUND",
            TransactionType::Fee => "FEE",
            TransactionType::Deposit => "DEPOSIT",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "PAYMENT" => Some(TransactionType::Payment),
            "CHARGE" => Some(TransactionType::Charge),
            "REFUND" => Some(TransactionType::Refund),
            "FEE" => Some(TransactionType::Fee),
            "DEPOSIT" => Some(TransactionType::Deposit),
            _ => None,
        }
    }

    /// Credits reduce what the room owes
    pub fn is_credit(&self) -> bool {
        matches!(
            self,
            TransactionType::Payment | TransactionType::Deposit | TransactionType::Refund
        )
    }
}

/// What a ledger line is for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionCategory {
    Rent,
    Utilities,
    Damages,
    Deposit,
    LateFee,
    Other,
}

impl TransactionCategory {
    pub fn code(&self) -> &'static str {
        match self {
            TransactionCategory::Rent => "RENT",
            TransactionCategory::Utilities => "UTILITIES",
            TransactionCategory::Damages => "DAMAGES",
            TransactionCategory::Deposit => "DEPOSIT",
            TransactionCategory::LateFee => "LATE_FEE",
            TransactionCategory::Other => "OTHER",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "RENT" => Some(TransactionCategory::Rent),
            "UTILITIES" => Some(TransactionCategory::Utilities),
            "DAMAGES" => Some(TransactionCategory::Damages),
            "DEPOSIT" => Some(TransactionCategory::Deposit),
            "LATE_FEE" => Some(TransactionCategory::LateFee),
            "OTHER" => Some(TransactionCategory::Other),
            _ => None,
        }
    }
}

/// One line of a room's ledger
///
/// `amount` carries the sign of the money movement it mirrors: refunds are
/// negative, everything else positive. Credit types subtract `amount` from
/// the balance and debit types add it, so a refund raises what is owed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomTransaction {
    pub id: TransactionId,
    pub room_id: RoomId,
    pub description: String,
    pub amount: Money,
    pub transaction_type: TransactionType,
    pub category: Option<TransactionCategory>,
    /// Who paid
    pub paid_by: Option<String>,
    /// Staff member who received the money
    pub collected_by: Option<String>,
    /// Room balance after this line; assigned by the store on append
    pub running_balance: Option<Money>,
    /// Check number, payment id, or other external reference
    pub reference_number: Option<String>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl RoomTransaction {
    pub fn new(
        room_id: RoomId,
        description: impl Into<String>,
        amount: Money,
        transaction_type: TransactionType,
    ) -> Result<Self, BookingError> {
        let sign_ok = match transaction_type {
            TransactionType::Refund => amount.is_negative(),
            _ => amount.is_positive(),
        };
        if !sign_ok {
            return Err(BookingError::invalid_amount(format!(
                "{} amount has the wrong sign: {}",
                transaction_type.code(),
                amount
            )));
        }

        Ok(Self {
            id: TransactionId::new_v7(),
            room_id,
            description: description.into(),
            amount,
            transaction_type,
            category: None,
            paid_by: None,
            collected_by: None,
            running_balance: None,
            reference_number: None,
            notes: None,
            created_at: Utc::now(),
        })
    }

    pub fn with_category(mut self, category: TransactionCategory) -> Self {
        self.category = Some(category);
        self
    }

    pub fn paid_by(mut self, who: impl Into<String>) -> Self {
        self.paid_by = Some(who.into());
        self
    }

    pub fn collected_by(mut self, who: impl Into<String>) -> Self {
        self.collected_by = Some(who.into());
        self
    }

    pub fn with_reference(mut self, reference: impl Into<String>) -> Self {
        self.reference_number = Some(reference.into());
        self
    }

    /// Contribution of this line to the room balance
    pub fn signed_amount(&self) -> Money {
        if self.transaction_type.is_credit() {
            -self.amount
        } else {
            self.amount
        }
    }

    /// `"+$25.00"` for credits, `"-$25.00"` for debits
    pub fn formatted_amount(&self) -> String {
        let prefix = if self.transaction_type.is_credit() { "+" } else { "-" };
        let abs = self.amount.abs().round_to_currency();
        format!(
            "{}{}{:.dp$}",
            prefix,
            abs.currency().symbol(),
            abs.amount(),
            dp = abs.currency().decimal_places() as usize
        )
    }
}

/// Derives a room balance from its transactions
pub fn derive_room_balance(
    currency: Currency,
    transactions: &[RoomTransaction],
) -> Result<Money, BookingError> {
    transactions
        .iter()
        .try_fold(Money::zero(currency), |acc, t| {
            acc.checked_add(&t.signed_amount())
        })
        .map_err(BookingError::from)
}

/// Totals over a room's transaction history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomLedgerSummary {
    pub room_id: RoomId,
    pub transaction_count: usize,
    /// PAYMENT and DEPOSIT lines
    pub total_payments: Money,
    /// CHARGE and FEE lines
    pub total_charges: Money,
    /// REFUND lines, as signed amounts
    pub total_refunds: Money,
    pub balance: Money,
}

impl RoomLedgerSummary {
    pub fn from_transactions(
        room_id: RoomId,
        currency: Currency,
        transactions: &[RoomTransaction],
    ) -> Result<Self, BookingError> {
        let mut total_payments = Money::zero(currency);
        let mut total_charges = Money::zero(currency);
        let mut total_refunds = Money::zero(currency);

        for t in transactions {
            match t.transaction_type {
                TransactionType::Payment | TransactionType::Deposit => {
                    total_payments = total_payments.checked_add(&t.amount)?;
                }
                TransactionType::Charge | TransactionType::Fee => {
                    total_charges = total_charges.checked_add(&t.amount)?;
                }
                TransactionType::Refund => {
                    total_refunds = total_refunds.checked_add(&t.amount)?;
                }
            }
        }

        Ok(Self {
            room_id,
            transaction_count: transactions.len(),
            total_payments,
            total_charges,
            total_refunds,
            balance: derive_room_balance(currency, transactions)?,
        })
    }
}
