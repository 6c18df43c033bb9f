use crate::errors::{AppError, ResultExt};
use crate::models::{
    CallLog, CallSubject, Customer, Invoice, NewCallLog, NewInvoice, NewOverdueCharge,
    NewPaymentTransaction, OverdueCharge, OverdueChargeStatus, PaymentTransaction, Rental,
    RenewedToken, TransactionOutcome,
};
use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, NaiveDate, Utc};
use serde_json::Value;
use sqlx::PgPool;
use std::str::FromStr;
use uuid::Uuid;

/// Every read and write the settlement pipeline performs.
///
/// The claim methods (`insert_pending_transaction`, `claim_overdue_charge`,
/// `claim_call_log`) insert under a uniqueness rule and return `None` when
/// another writer already holds the slot. Callers must treat `None` as
/// "already processed" and never fall back to an unconditional insert.
#[async_trait]
pub trait SettlementStore: Send + Sync {
    /// Active rentals with a positive daily rate whose end date is before `cutoff`, oldest first.
    async fn find_overdue_rentals(&self, cutoff: DateTime<Utc>) -> Result<Vec<Rental>, AppError>;

    async fn get_customer(&self, customer_id: Uuid) -> Result<Option<Customer>, AppError>;

    async fn update_customer_token(
        &self,
        customer_id: Uuid,
        token: &RenewedToken,
    ) -> Result<(), AppError>;

    async fn find_transaction(
        &self,
        transaction_id: &str,
    ) -> Result<Option<PaymentTransaction>, AppError>;

    async fn insert_pending_transaction(
        &self,
        transaction: &NewPaymentTransaction,
    ) -> Result<Option<PaymentTransaction>, AppError>;

    /// Moves a `pending` transaction to its terminal status. Terminal rows are left untouched.
    async fn complete_transaction(
        &self,
        transaction_id: &str,
        outcome: &TransactionOutcome,
    ) -> Result<(), AppError>;

    async fn find_overdue_charge(
        &self,
        rental_id: Uuid,
        charge_date: NaiveDate,
    ) -> Result<Option<OverdueCharge>, AppError>;

    async fn claim_overdue_charge(
        &self,
        charge: &NewOverdueCharge,
    ) -> Result<Option<Uuid>, AppError>;

    async fn finalize_overdue_charge(
        &self,
        charge_id: Uuid,
        status: OverdueChargeStatus,
        transaction_id: Option<&str>,
        error_message: Option<&str>,
    ) -> Result<(), AppError>;

    async fn find_automatic_call(
        &self,
        subject: CallSubject,
        call_date: NaiveDate,
    ) -> Result<Option<CallLog>, AppError>;

    async fn claim_call_log(&self, call: &NewCallLog) -> Result<Option<Uuid>, AppError>;

    async fn record_call_result(
        &self,
        call_id: Uuid,
        campaign_id: Option<&str>,
        error_message: Option<&str>,
    ) -> Result<(), AppError>;

    /// Inserts an invoice; the store assigns the sequential number.
    async fn insert_invoice(&self, invoice: &NewInvoice) -> Result<Invoice, AppError>;
}

/// PostgreSQL-backed settlement store.
pub struct PgSettlementStore {
    pool: PgPool,
}

impl PgSettlementStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

// Status columns are plain text; rows are read as strings and parsed into enums.

#[derive(sqlx::FromRow)]
struct RentalRow {
    id: Uuid,
    customer_id: Uuid,
    customer_name: String,
    start_date: DateTime<Utc>,
    end_date: DateTime<Utc>,
    currency: String,
    status: String,
    overdue_daily_rate: Option<BigDecimal>,
    overdue_grace_days: Option<i32>,
    auto_charge_enabled: bool,
    has_sim_item: bool,
}

impl TryFrom<RentalRow> for Rental {
    type Error = AppError;

    fn try_from(row: RentalRow) -> Result<Self, Self::Error> {
        Ok(Rental {
            id: row.id,
            customer_id: row.customer_id,
            customer_name: row.customer_name,
            start_date: row.start_date,
            end_date: row.end_date,
            currency: row.currency,
            status: parse_column("rentals.status", &row.status)?,
            overdue_daily_rate: row.overdue_daily_rate,
            overdue_grace_days: row.overdue_grace_days,
            auto_charge_enabled: row.auto_charge_enabled,
            has_sim_item: row.has_sim_item,
        })
    }
}

#[derive(sqlx::FromRow)]
struct CustomerRow {
    id: Uuid,
    name: String,
    phone: Option<String>,
    national_id: Option<String>,
    payment_token: Option<String>,
    payment_token_last4: Option<String>,
    payment_token_expiry: Option<String>,
    payment_token_updated_at: Option<DateTime<Utc>>,
}

impl From<CustomerRow> for Customer {
    fn from(row: CustomerRow) -> Self {
        Customer {
            id: row.id,
            name: row.name,
            phone: row.phone,
            national_id: row.national_id,
            payment_token: row.payment_token,
            payment_token_last4: row.payment_token_last4,
            payment_token_expiry: row.payment_token_expiry,
            payment_token_updated_at: row.payment_token_updated_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct TransactionRow {
    id: Uuid,
    transaction_id: String,
    rental_id: Option<Uuid>,
    customer_id: Option<Uuid>,
    amount: BigDecimal,
    currency: String,
    status: String,
    error_message: Option<String>,
    gateway_transaction_id: Option<String>,
    gateway_response: Option<Value>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<TransactionRow> for PaymentTransaction {
    type Error = AppError;

    fn try_from(row: TransactionRow) -> Result<Self, Self::Error> {
        Ok(PaymentTransaction {
            id: row.id,
            transaction_id: row.transaction_id,
            rental_id: row.rental_id,
            customer_id: row.customer_id,
            amount: row.amount,
            currency: row.currency,
            status: parse_column("payment_transactions.status", &row.status)?,
            error_message: row.error_message,
            gateway_transaction_id: row.gateway_transaction_id,
            gateway_response: row.gateway_response,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct OverdueChargeRow {
    id: Uuid,
    rental_id: Uuid,
    customer_id: Uuid,
    charge_date: NaiveDate,
    days_overdue: i32,
    amount: BigDecimal,
    currency: String,
    status: String,
    transaction_id: Option<String>,
    error_message: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<OverdueChargeRow> for OverdueCharge {
    type Error = AppError;

    fn try_from(row: OverdueChargeRow) -> Result<Self, Self::Error> {
        Ok(OverdueCharge {
            id: row.id,
            rental_id: row.rental_id,
            customer_id: row.customer_id,
            charge_date: row.charge_date,
            days_overdue: row.days_overdue,
            amount: row.amount,
            currency: row.currency,
            status: parse_column("overdue_charges.status", &row.status)?,
            transaction_id: row.transaction_id,
            error_message: row.error_message,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct CallLogRow {
    id: Uuid,
    entity_type: String,
    entity_id: Uuid,
    customer_id: Uuid,
    phone: String,
    call_status: String,
    call_type: String,
    message: String,
    campaign_id: Option<String>,
    error_message: Option<String>,
    call_date: NaiveDate,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<CallLogRow> for CallLog {
    type Error = AppError;

    fn try_from(row: CallLogRow) -> Result<Self, Self::Error> {
        let subject = CallSubject::from_parts(&row.entity_type, row.entity_id).ok_or_else(|| {
            AppError::InternalError(format!(
                "call_logs.entity_type has unknown value '{}'",
                row.entity_type
            ))
        })?;

        Ok(CallLog {
            id: row.id,
            subject,
            customer_id: row.customer_id,
            phone: row.phone,
            call_status: parse_column("call_logs.call_status", &row.call_status)?,
            call_type: parse_column("call_logs.call_type", &row.call_type)?,
            message: row.message,
            campaign_id: row.campaign_id,
            error_message: row.error_message,
            call_date: row.call_date,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct InvoiceRow {
    id: Uuid,
    invoice_number: i64,
    rental_id: Option<Uuid>,
    customer_id: Option<Uuid>,
    transaction_id: String,
    amount: BigDecimal,
    currency: String,
    status: String,
    business_name: String,
    business_tax_id: String,
    business_address: String,
    issued_at: DateTime<Utc>,
}

impl From<InvoiceRow> for Invoice {
    fn from(row: InvoiceRow) -> Self {
        Invoice {
            id: row.id,
            invoice_number: row.invoice_number,
            rental_id: row.rental_id,
            customer_id: row.customer_id,
            transaction_id: row.transaction_id,
            amount: row.amount,
            currency: row.currency,
            status: row.status,
            business_name: row.business_name,
            business_tax_id: row.business_tax_id,
            business_address: row.business_address,
            issued_at: row.issued_at,
        }
    }
}

fn parse_column<T: FromStr<Err = String>>(column: &str, raw: &str) -> Result<T, AppError> {
    raw.parse()
        .map_err(|e: String| AppError::InternalError(format!("{}: {}", column, e)))
}

const TRANSACTION_COLUMNS: &str = "id, transaction_id, rental_id, customer_id, amount, currency, \
     status, error_message, gateway_transaction_id, gateway_response, created_at, updated_at";

const OVERDUE_CHARGE_COLUMNS: &str = "id, rental_id, customer_id, charge_date, days_overdue, \
     amount, currency, status, transaction_id, error_message, created_at, updated_at";

const CALL_LOG_COLUMNS: &str = "id, entity_type, entity_id, customer_id, phone, call_status, \
     call_type, message, campaign_id, error_message, call_date, created_at, updated_at";

#[async_trait]
impl SettlementStore for PgSettlementStore {
    async fn find_overdue_rentals(&self, cutoff: DateTime<Utc>) -> Result<Vec<Rental>, AppError> {
        let rows = sqlx::query_as::<_, RentalRow>(
            r#"
            SELECT
                r.id, r.customer_id, r.customer_name, r.start_date, r.end_date,
                r.currency, r.status, r.overdue_daily_rate, r.overdue_grace_days,
                r.auto_charge_enabled,
                EXISTS (
                    SELECT 1 FROM rental_items ri
                    WHERE ri.rental_id = r.id AND ri.item_category = 'sim'
                ) AS has_sim_item
            FROM rentals r
            WHERE r.status = 'active'
              AND r.overdue_daily_rate > 0
              AND r.end_date < $1
            ORDER BY r.end_date ASC
            "#,
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await
        .context("selecting overdue rentals")?;

        tracing::debug!("Selector returned {} overdue rentals", rows.len());

        rows.into_iter().map(Rental::try_from).collect()
    }

    async fn get_customer(&self, customer_id: Uuid) -> Result<Option<Customer>, AppError> {
        let row = sqlx::query_as::<_, CustomerRow>(
            r#"
            SELECT id, name, phone, national_id, payment_token, payment_token_last4,
                   payment_token_expiry, payment_token_updated_at
            FROM customers
            WHERE id = $1
            "#,
        )
        .bind(customer_id)
        .fetch_optional(&self.pool)
        .await
        .with_context(|| format!("loading customer {}", customer_id))?;

        Ok(row.map(Customer::from))
    }

    async fn update_customer_token(
        &self,
        customer_id: Uuid,
        token: &RenewedToken,
    ) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE customers
            SET payment_token = $2,
                payment_token_last4 = COALESCE($3, payment_token_last4),
                payment_token_expiry = COALESCE($4, payment_token_expiry),
                payment_token_updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(customer_id)
        .bind(&token.token)
        .bind(&token.last4)
        .bind(&token.expiry)
        .execute(&self.pool)
        .await
        .with_context(|| format!("refreshing payment token for customer {}", customer_id))?;

        Ok(())
    }

    async fn find_transaction(
        &self,
        transaction_id: &str,
    ) -> Result<Option<PaymentTransaction>, AppError> {
        let row = sqlx::query_as::<_, TransactionRow>(&format!(
            "SELECT {} FROM payment_transactions WHERE transaction_id = $1",
            TRANSACTION_COLUMNS
        ))
        .bind(transaction_id)
        .fetch_optional(&self.pool)
        .await
        .context("looking up payment transaction")?;

        row.map(PaymentTransaction::try_from).transpose()
    }

    async fn insert_pending_transaction(
        &self,
        transaction: &NewPaymentTransaction,
    ) -> Result<Option<PaymentTransaction>, AppError> {
        let row = sqlx::query_as::<_, TransactionRow>(&format!(
            r#"
            INSERT INTO payment_transactions
                (transaction_id, rental_id, customer_id, amount, currency, status)
            VALUES ($1, $2, $3, $4, $5, 'pending')
            ON CONFLICT (transaction_id) DO NOTHING
            RETURNING {}
            "#,
            TRANSACTION_COLUMNS
        ))
        .bind(&transaction.transaction_id)
        .bind(transaction.rental_id)
        .bind(transaction.customer_id)
        .bind(&transaction.amount)
        .bind(&transaction.currency)
        .fetch_optional(&self.pool)
        .await
        .context("inserting pending payment transaction")?;

        row.map(PaymentTransaction::try_from).transpose()
    }

    async fn complete_transaction(
        &self,
        transaction_id: &str,
        outcome: &TransactionOutcome,
    ) -> Result<(), AppError> {
        let result = sqlx::query(
            r#"
            UPDATE payment_transactions
            SET status = $2,
                gateway_transaction_id = $3,
                error_message = $4,
                gateway_response = $5,
                updated_at = now()
            WHERE transaction_id = $1 AND status = 'pending'
            "#,
        )
        .bind(transaction_id)
        .bind(outcome.status.as_str())
        .bind(&outcome.gateway_transaction_id)
        .bind(&outcome.error_message)
        .bind(&outcome.gateway_response)
        .execute(&self.pool)
        .await
        .context("completing payment transaction")?;

        if result.rows_affected() == 0 {
            tracing::warn!(
                "Payment transaction {} was not pending; outcome not applied",
                transaction_id
            );
        }

        Ok(())
    }

    async fn find_overdue_charge(
        &self,
        rental_id: Uuid,
        charge_date: NaiveDate,
    ) -> Result<Option<OverdueCharge>, AppError> {
        let row = sqlx::query_as::<_, OverdueChargeRow>(&format!(
            "SELECT {} FROM overdue_charges WHERE rental_id = $1 AND charge_date = $2",
            OVERDUE_CHARGE_COLUMNS
        ))
        .bind(rental_id)
        .bind(charge_date)
        .fetch_optional(&self.pool)
        .await
        .context("looking up overdue charge")?;

        row.map(OverdueCharge::try_from).transpose()
    }

    async fn claim_overdue_charge(
        &self,
        charge: &NewOverdueCharge,
    ) -> Result<Option<Uuid>, AppError> {
        let claimed = sqlx::query_as::<_, (Uuid,)>(
            r#"
            INSERT INTO overdue_charges
                (rental_id, customer_id, charge_date, days_overdue, amount, currency, status, error_message)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (rental_id, charge_date) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(charge.rental_id)
        .bind(charge.customer_id)
        .bind(charge.charge_date)
        .bind(charge.days_overdue)
        .bind(&charge.amount)
        .bind(&charge.currency)
        .bind(charge.status.as_str())
        .bind(&charge.error_message)
        .fetch_optional(&self.pool)
        .await
        .with_context(|| format!("claiming overdue charge for rental {}", charge.rental_id))?;

        Ok(claimed.map(|(id,)| id))
    }

    async fn finalize_overdue_charge(
        &self,
        charge_id: Uuid,
        status: OverdueChargeStatus,
        transaction_id: Option<&str>,
        error_message: Option<&str>,
    ) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE overdue_charges
            SET status = $2,
                transaction_id = COALESCE($3, transaction_id),
                error_message = $4,
                updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(charge_id)
        .bind(status.as_str())
        .bind(transaction_id)
        .bind(error_message)
        .execute(&self.pool)
        .await
        .context("finalizing overdue charge")?;

        Ok(())
    }

    async fn find_automatic_call(
        &self,
        subject: CallSubject,
        call_date: NaiveDate,
    ) -> Result<Option<CallLog>, AppError> {
        let row = sqlx::query_as::<_, CallLogRow>(&format!(
            r#"
            SELECT {} FROM call_logs
            WHERE entity_type = $1 AND entity_id = $2 AND call_date = $3
              AND call_type = 'automatic'
            "#,
            CALL_LOG_COLUMNS
        ))
        .bind(subject.entity_type())
        .bind(subject.entity_id())
        .bind(call_date)
        .fetch_optional(&self.pool)
        .await
        .context("looking up automatic call log")?;

        row.map(CallLog::try_from).transpose()
    }

    async fn claim_call_log(&self, call: &NewCallLog) -> Result<Option<Uuid>, AppError> {
        let claimed = sqlx::query_as::<_, (Uuid,)>(
            r#"
            INSERT INTO call_logs
                (entity_type, entity_id, customer_id, phone, call_status, call_type, message, call_date)
            VALUES ($1, $2, $3, $4, 'pending', $5, $6, $7)
            ON CONFLICT (entity_type, entity_id, call_date) WHERE call_type = 'automatic'
            DO NOTHING
            RETURNING id
            "#,
        )
        .bind(call.subject.entity_type())
        .bind(call.subject.entity_id())
        .bind(call.customer_id)
        .bind(&call.phone)
        .bind(call.call_type.as_str())
        .bind(&call.message)
        .bind(call.call_date)
        .fetch_optional(&self.pool)
        .await
        .context("claiming call log")?;

        Ok(claimed.map(|(id,)| id))
    }

    async fn record_call_result(
        &self,
        call_id: Uuid,
        campaign_id: Option<&str>,
        error_message: Option<&str>,
    ) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE call_logs
            SET campaign_id = $2,
                error_message = $3,
                updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(call_id)
        .bind(campaign_id)
        .bind(error_message)
        .execute(&self.pool)
        .await
        .context("recording call result")?;

        Ok(())
    }

    async fn insert_invoice(&self, invoice: &NewInvoice) -> Result<Invoice, AppError> {
        let row = sqlx::query_as::<_, InvoiceRow>(
            r#"
            INSERT INTO invoices
                (rental_id, customer_id, transaction_id, amount, currency, status,
                 business_name, business_tax_id, business_address)
            VALUES ($1, $2, $3, $4, $5, 'issued', $6, $7, $8)
            RETURNING id, invoice_number, rental_id, customer_id, transaction_id, amount,
                      currency, status, business_name, business_tax_id, business_address, issued_at
            "#,
        )
        .bind(invoice.rental_id)
        .bind(invoice.customer_id)
        .bind(&invoice.transaction_id)
        .bind(&invoice.amount)
        .bind(&invoice.currency)
        .bind(&invoice.business_name)
        .bind(&invoice.business_tax_id)
        .bind(&invoice.business_address)
        .fetch_one(&self.pool)
        .await
        .with_context(|| format!("issuing invoice for transaction {}", invoice.transaction_id))?;

        Ok(Invoice::from(row))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CallStatus, RentalStatus};

    #[test]
    fn test_parse_column_reports_column_name() {
        let err = parse_column::<RentalStatus>("rentals.status", "lost").unwrap_err();
        assert!(err.to_string().contains("rentals.status"));
        assert_eq!(
            parse_column::<CallStatus>("call_logs.call_status", "busy").unwrap(),
            CallStatus::Busy
        );
    }

    #[test]
    fn test_unknown_call_subject_is_rejected() {
        let now = Utc::now();
        let row = CallLogRow {
            id: Uuid::new_v4(),
            entity_type: "invoice".to_string(),
            entity_id: Uuid::new_v4(),
            customer_id: Uuid::new_v4(),
            phone: "0501234567".to_string(),
            call_status: "pending".to_string(),
            call_type: "automatic".to_string(),
            message: "hi".to_string(),
            campaign_id: None,
            error_message: None,
            call_date: now.date_naive(),
            created_at: now,
            updated_at: now,
        };
        assert!(CallLog::try_from(row).is_err());
    }
}
