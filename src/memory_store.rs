//! In-process [`SettlementStore`] with the same uniqueness rules as the
//! PostgreSQL schema. Used by tests and local dry runs.

use crate::db_storage::SettlementStore;
use crate::errors::AppError;
use crate::models::{
    CallLog, CallStatus, CallSubject, CallType, Customer, Invoice, NewCallLog, NewInvoice,
    NewOverdueCharge, NewPaymentTransaction, OverdueCharge, OverdueChargeStatus,
    PaymentTransaction, Rental, RentalStatus, RenewedToken, TransactionOutcome, TransactionStatus,
};
use async_trait::async_trait;
use bigdecimal::{BigDecimal, Zero};
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

#[derive(Default)]
struct State {
    rentals: Vec<Rental>,
    customers: HashMap<Uuid, Customer>,
    transactions: HashMap<String, PaymentTransaction>,
    charges: Vec<OverdueCharge>,
    calls: Vec<CallLog>,
    invoices: Vec<Invoice>,
    next_invoice_number: i64,
}

#[derive(Default)]
pub struct InMemorySettlementStore {
    state: Mutex<State>,
    selector_queries: AtomicUsize,
    fail_invoices: AtomicBool,
    fail_transactions: AtomicBool,
}

impl InMemorySettlementStore {
    pub fn new() -> Self {
        Self::default()
    }

    // The lock is never held across an await, so a poisoned guard still holds consistent data.
    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn insert_rental(&self, rental: Rental) {
        self.state().rentals.push(rental);
    }

    pub fn insert_customer(&self, customer: Customer) {
        self.state().customers.insert(customer.id, customer);
    }

    pub fn customer(&self, customer_id: Uuid) -> Option<Customer> {
        self.state().customers.get(&customer_id).cloned()
    }

    pub fn overdue_charges(&self) -> Vec<OverdueCharge> {
        self.state().charges.clone()
    }

    pub fn call_logs(&self) -> Vec<CallLog> {
        self.state().calls.clone()
    }

    pub fn transactions(&self) -> Vec<PaymentTransaction> {
        self.state().transactions.values().cloned().collect()
    }

    pub fn invoices(&self) -> Vec<Invoice> {
        self.state().invoices.clone()
    }

    /// Number of times the overdue selector ran.
    pub fn selector_queries(&self) -> usize {
        self.selector_queries.load(Ordering::SeqCst)
    }

    /// Makes every subsequent invoice insert fail.
    pub fn fail_invoices(&self, fail: bool) {
        self.fail_invoices.store(fail, Ordering::SeqCst);
    }

    /// Makes every subsequent pending-transaction insert fail.
    pub fn fail_transactions(&self, fail: bool) {
        self.fail_transactions.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl SettlementStore for InMemorySettlementStore {
    async fn find_overdue_rentals(&self, cutoff: DateTime<Utc>) -> Result<Vec<Rental>, AppError> {
        self.selector_queries.fetch_add(1, Ordering::SeqCst);

        let mut rentals: Vec<Rental> = self
            .state()
            .rentals
            .iter()
            .filter(|r| r.status == RentalStatus::Active)
            .filter(|r| {
                r.overdue_daily_rate
                    .as_ref()
                    .map(|rate| rate > &BigDecimal::zero())
                    .unwrap_or(false)
            })
            .filter(|r| r.end_date < cutoff)
            .cloned()
            .collect();
        rentals.sort_by_key(|r| r.end_date);

        Ok(rentals)
    }

    async fn get_customer(&self, customer_id: Uuid) -> Result<Option<Customer>, AppError> {
        Ok(self.customer(customer_id))
    }

    async fn update_customer_token(
        &self,
        customer_id: Uuid,
        token: &RenewedToken,
    ) -> Result<(), AppError> {
        let mut state = self.state();
        let customer = state
            .customers
            .get_mut(&customer_id)
            .ok_or_else(|| AppError::NotFound(format!("customer {}", customer_id)))?;

        customer.payment_token = Some(token.token.clone());
        if token.last4.is_some() {
            customer.payment_token_last4 = token.last4.clone();
        }
        if token.expiry.is_some() {
            customer.payment_token_expiry = token.expiry.clone();
        }
        customer.payment_token_updated_at = Some(Utc::now());
        Ok(())
    }

    async fn find_transaction(
        &self,
        transaction_id: &str,
    ) -> Result<Option<PaymentTransaction>, AppError> {
        Ok(self.state().transactions.get(transaction_id).cloned())
    }

    async fn insert_pending_transaction(
        &self,
        transaction: &NewPaymentTransaction,
    ) -> Result<Option<PaymentTransaction>, AppError> {
        if self.fail_transactions.load(Ordering::SeqCst) {
            return Err(AppError::InternalError("transaction store unavailable".to_string()));
        }

        let mut state = self.state();
        if state.transactions.contains_key(&transaction.transaction_id) {
            return Ok(None);
        }

        let now = Utc::now();
        let row = PaymentTransaction {
            id: Uuid::new_v4(),
            transaction_id: transaction.transaction_id.clone(),
            rental_id: transaction.rental_id,
            customer_id: transaction.customer_id,
            amount: transaction.amount.clone(),
            currency: transaction.currency.clone(),
            status: TransactionStatus::Pending,
            error_message: None,
            gateway_transaction_id: None,
            gateway_response: None,
            created_at: now,
            updated_at: now,
        };
        state
            .transactions
            .insert(row.transaction_id.clone(), row.clone());
        Ok(Some(row))
    }

    async fn complete_transaction(
        &self,
        transaction_id: &str,
        outcome: &TransactionOutcome,
    ) -> Result<(), AppError> {
        let mut state = self.state();
        if let Some(row) = state
            .transactions
            .get_mut(transaction_id)
            .filter(|row| row.status == TransactionStatus::Pending)
        {
            row.status = outcome.status;
            row.gateway_transaction_id = outcome.gateway_transaction_id.clone();
            row.error_message = outcome.error_message.clone();
            row.gateway_response = Some(outcome.gateway_response.clone());
            row.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn find_overdue_charge(
        &self,
        rental_id: Uuid,
        charge_date: NaiveDate,
    ) -> Result<Option<OverdueCharge>, AppError> {
        Ok(self
            .state()
            .charges
            .iter()
            .find(|c| c.rental_id == rental_id && c.charge_date == charge_date)
            .cloned())
    }

    async fn claim_overdue_charge(
        &self,
        charge: &NewOverdueCharge,
    ) -> Result<Option<Uuid>, AppError> {
        let mut state = self.state();
        if state
            .charges
            .iter()
            .any(|c| c.rental_id == charge.rental_id && c.charge_date == charge.charge_date)
        {
            return Ok(None);
        }

        let now = Utc::now();
        let id = Uuid::new_v4();
        state.charges.push(OverdueCharge {
            id,
            rental_id: charge.rental_id,
            customer_id: charge.customer_id,
            charge_date: charge.charge_date,
            days_overdue: charge.days_overdue,
            amount: charge.amount.clone(),
            currency: charge.currency.clone(),
            status: charge.status,
            transaction_id: None,
            error_message: charge.error_message.clone(),
            created_at: now,
            updated_at: now,
        });
        Ok(Some(id))
    }

    async fn finalize_overdue_charge(
        &self,
        charge_id: Uuid,
        status: OverdueChargeStatus,
        transaction_id: Option<&str>,
        error_message: Option<&str>,
    ) -> Result<(), AppError> {
        let mut state = self.state();
        // Mirrors the foreign key on overdue_charges.transaction_id.
        if let Some(tx) = transaction_id {
            if !state.transactions.contains_key(tx) {
                return Err(AppError::InternalError(format!(
                    "transaction {} does not exist",
                    tx
                )));
            }
        }

        let charge = state
            .charges
            .iter_mut()
            .find(|c| c.id == charge_id)
            .ok_or_else(|| AppError::NotFound(format!("overdue charge {}", charge_id)))?;

        charge.status = status;
        if let Some(tx) = transaction_id {
            charge.transaction_id = Some(tx.to_string());
        }
        charge.error_message = error_message.map(str::to_string);
        charge.updated_at = Utc::now();
        Ok(())
    }

    async fn find_automatic_call(
        &self,
        subject: CallSubject,
        call_date: NaiveDate,
    ) -> Result<Option<CallLog>, AppError> {
        Ok(self
            .state()
            .calls
            .iter()
            .find(|c| {
                c.subject == subject
                    && c.call_date == call_date
                    && c.call_type == CallType::Automatic
            })
            .cloned())
    }

    async fn claim_call_log(&self, call: &NewCallLog) -> Result<Option<Uuid>, AppError> {
        let mut state = self.state();
        if call.call_type == CallType::Automatic
            && state.calls.iter().any(|c| {
                c.subject == call.subject
                    && c.call_date == call.call_date
                    && c.call_type == CallType::Automatic
            })
        {
            return Ok(None);
        }

        let now = Utc::now();
        let id = Uuid::new_v4();
        state.calls.push(CallLog {
            id,
            subject: call.subject,
            customer_id: call.customer_id,
            phone: call.phone.clone(),
            call_status: CallStatus::Pending,
            call_type: call.call_type,
            message: call.message.clone(),
            campaign_id: None,
            error_message: None,
            call_date: call.call_date,
            created_at: now,
            updated_at: now,
        });
        Ok(Some(id))
    }

    async fn record_call_result(
        &self,
        call_id: Uuid,
        campaign_id: Option<&str>,
        error_message: Option<&str>,
    ) -> Result<(), AppError> {
        let mut state = self.state();
        let call = state
            .calls
            .iter_mut()
            .find(|c| c.id == call_id)
            .ok_or_else(|| AppError::NotFound(format!("call log {}", call_id)))?;

        call.campaign_id = campaign_id.map(str::to_string);
        call.error_message = error_message.map(str::to_string);
        call.updated_at = Utc::now();
        Ok(())
    }

    async fn insert_invoice(&self, invoice: &NewInvoice) -> Result<Invoice, AppError> {
        if self.fail_invoices.load(Ordering::SeqCst) {
            return Err(AppError::InternalError("invoice store unavailable".to_string()));
        }

        let mut state = self.state();
        state.next_invoice_number += 1;
        let row = Invoice {
            id: Uuid::new_v4(),
            invoice_number: state.next_invoice_number,
            rental_id: invoice.rental_id,
            customer_id: invoice.customer_id,
            transaction_id: invoice.transaction_id.clone(),
            amount: invoice.amount.clone(),
            currency: invoice.currency.clone(),
            status: "issued".to_string(),
            business_name: invoice.business_name.clone(),
            business_tax_id: invoice.business_tax_id.clone(),
            business_address: invoice.business_address.clone(),
            issued_at: Utc::now(),
        };
        state.invoices.push(row.clone());
        Ok(row)
    }
}
