use bigdecimal::BigDecimal;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Generates `as_str`, `Display` and `FromStr` for status enums persisted as text columns.
macro_rules! text_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(format!("unknown {} '{}'", stringify!($name), other)),
                }
            }
        }
    };
}

// ============ Status enums ============

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RentalStatus {
    Active,
    Overdue,
    Returned,
}

text_enum!(RentalStatus {
    Active => "active",
    Overdue => "overdue",
    Returned => "returned",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Pending,
    Success,
    Failed,
}

text_enum!(TransactionStatus {
    Pending => "pending",
    Success => "success",
    Failed => "failed",
});

/// Persisted overdue-charge status. The grace window is an outcome, never a row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverdueChargeStatus {
    Pending,
    Charged,
    Failed,
}

text_enum!(OverdueChargeStatus {
    Pending => "pending",
    Charged => "charged",
    Failed => "failed",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallStatus {
    Pending,
    Answered,
    NoAnswer,
    Busy,
    Callback,
}

text_enum!(CallStatus {
    Pending => "pending",
    Answered => "answered",
    NoAnswer => "no_answer",
    Busy => "busy",
    Callback => "callback",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallType {
    Manual,
    Automatic,
}

text_enum!(CallType {
    Manual => "manual",
    Automatic => "automatic",
});

// ============ Read-side models (owned by the booking subsystem) ============

/// An overdue-candidate rental as projected by the rental selector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rental {
    pub id: Uuid,
    pub customer_id: Uuid,
    /// Customer display name, denormalized on the rental.
    pub customer_name: String,
    pub start_date: DateTime<Utc>,
    /// Due date. Truncated to the local calendar day before any day arithmetic.
    pub end_date: DateTime<Utc>,
    pub currency: String,
    pub status: RentalStatus,
    /// Amount charged per overdue day.
    pub overdue_daily_rate: Option<BigDecimal>,
    pub overdue_grace_days: Option<i32>,
    pub auto_charge_enabled: bool,
    /// True when at least one rented item is in the SIM category.
    pub has_sim_item: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Customer {
    pub id: Uuid,
    pub name: String,
    pub phone: Option<String>,
    /// Merchant-side numeric identifier forwarded to the gateway when valid.
    pub national_id: Option<String>,
    #[serde(skip_serializing)]
    pub payment_token: Option<String>,
    pub payment_token_last4: Option<String>,
    pub payment_token_expiry: Option<String>,
    pub payment_token_updated_at: Option<DateTime<Utc>>,
}

impl Customer {
    /// The stored gateway token, if one is present and non-blank.
    pub fn stored_token(&self) -> Option<&str> {
        self.payment_token
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
    }
}

/// Refreshed credential returned by the gateway after a successful charge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenewedToken {
    pub token: String,
    pub last4: Option<String>,
    pub expiry: Option<String>,
}

// ============ Pipeline-owned records ============

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentTransaction {
    pub id: Uuid,
    /// Caller-supplied idempotency key. Globally unique.
    pub transaction_id: String,
    pub rental_id: Option<Uuid>,
    pub customer_id: Option<Uuid>,
    pub amount: BigDecimal,
    pub currency: String,
    pub status: TransactionStatus,
    pub error_message: Option<String>,
    pub gateway_transaction_id: Option<String>,
    /// Gateway body stored verbatim after credential redaction.
    pub gateway_response: Option<Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewPaymentTransaction {
    pub transaction_id: String,
    pub rental_id: Option<Uuid>,
    pub customer_id: Option<Uuid>,
    pub amount: BigDecimal,
    pub currency: String,
}

/// Terminal update applied to a pending payment transaction.
#[derive(Debug, Clone)]
pub struct TransactionOutcome {
    pub status: TransactionStatus,
    pub gateway_transaction_id: Option<String>,
    pub error_message: Option<String>,
    pub gateway_response: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OverdueCharge {
    pub id: Uuid,
    pub rental_id: Uuid,
    pub customer_id: Uuid,
    pub charge_date: NaiveDate,
    pub days_overdue: i32,
    pub amount: BigDecimal,
    pub currency: String,
    pub status: OverdueChargeStatus,
    pub transaction_id: Option<String>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewOverdueCharge {
    pub rental_id: Uuid,
    pub customer_id: Uuid,
    pub charge_date: NaiveDate,
    pub days_overdue: i32,
    pub amount: BigDecimal,
    pub currency: String,
    pub status: OverdueChargeStatus,
    pub error_message: Option<String>,
}

/// What a call log row refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "lowercase")]
pub enum CallSubject {
    Rental(Uuid),
    Repair(Uuid),
}

impl CallSubject {
    pub fn entity_type(&self) -> &'static str {
        match self {
            CallSubject::Rental(_) => "rental",
            CallSubject::Repair(_) => "repair",
        }
    }

    pub fn entity_id(&self) -> Uuid {
        match self {
            CallSubject::Rental(id) | CallSubject::Repair(id) => *id,
        }
    }

    /// Rebuilds the subject from its persisted `(entity_type, entity_id)` pair.
    pub fn from_parts(entity_type: &str, entity_id: Uuid) -> Option<Self> {
        match entity_type {
            "rental" => Some(CallSubject::Rental(entity_id)),
            "repair" => Some(CallSubject::Repair(entity_id)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallLog {
    pub id: Uuid,
    pub subject: CallSubject,
    pub customer_id: Uuid,
    pub phone: String,
    pub call_status: CallStatus,
    pub call_type: CallType,
    pub message: String,
    pub campaign_id: Option<String>,
    pub error_message: Option<String>,
    pub call_date: NaiveDate,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewCallLog {
    pub subject: CallSubject,
    pub customer_id: Uuid,
    pub phone: String,
    pub call_type: CallType,
    pub message: String,
    pub call_date: NaiveDate,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Invoice {
    pub id: Uuid,
    /// Sequential, assigned by the store.
    pub invoice_number: i64,
    pub rental_id: Option<Uuid>,
    pub customer_id: Option<Uuid>,
    pub transaction_id: String,
    pub amount: BigDecimal,
    pub currency: String,
    pub status: String,
    pub business_name: String,
    pub business_tax_id: String,
    pub business_address: String,
    pub issued_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewInvoice {
    pub rental_id: Option<Uuid>,
    pub customer_id: Option<Uuid>,
    pub transaction_id: String,
    pub amount: BigDecimal,
    pub currency: String,
    pub business_name: String,
    pub business_tax_id: String,
    pub business_address: String,
}
