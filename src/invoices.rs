use crate::db_storage::SettlementStore;
use crate::models::{Invoice, NewInvoice};
use bigdecimal::BigDecimal;
use std::sync::Arc;
use uuid::Uuid;

/// Seller details printed on every invoice.
#[derive(Debug, Clone, Default)]
pub struct BusinessIdentity {
    pub name: String,
    pub tax_id: String,
    pub address: String,
}

/// Issues invoices for successful payments.
///
/// Issuing is best-effort: the money has already moved, so a failure here is
/// logged and swallowed rather than surfaced to the caller.
#[derive(Clone)]
pub struct InvoiceIssuer {
    store: Arc<dyn SettlementStore>,
    business: BusinessIdentity,
}

impl InvoiceIssuer {
    pub fn new(store: Arc<dyn SettlementStore>, business: BusinessIdentity) -> Self {
        Self { store, business }
    }

    pub async fn issue(
        &self,
        transaction_id: &str,
        rental_id: Option<Uuid>,
        customer_id: Option<Uuid>,
        amount: &BigDecimal,
        currency: &str,
    ) -> Option<Invoice> {
        let invoice = NewInvoice {
            rental_id,
            customer_id,
            transaction_id: transaction_id.to_string(),
            amount: amount.clone(),
            currency: currency.to_string(),
            business_name: self.business.name.clone(),
            business_tax_id: self.business.tax_id.clone(),
            business_address: self.business.address.clone(),
        };

        match self.store.insert_invoice(&invoice).await {
            Ok(issued) => {
                tracing::info!(
                    "✓ Invoice #{} issued for transaction {}",
                    issued.invoice_number,
                    transaction_id
                );
                Some(issued)
            }
            Err(e) => {
                tracing::error!(
                    "Invoice for transaction {} could not be issued (charge stands): {}",
                    transaction_id,
                    e
                );
                None
            }
        }
    }
}
