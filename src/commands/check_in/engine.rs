//! Check-in transaction
//!
//! Consumes one credit from the user's membership, makes sure the user has an invoice and adds
//! the check-in line plus one line per purchased item to it. Either all of these writes are
//! committed or none of them are.

use chrono::Utc;
use tracing::{debug, error, warn};

use crate::{
    commands::Error,
    domain::{CheckInItem, InvoiceId, InvoiceLineId, NewInvoice, NewInvoiceLine, UserId},
    ports::database::{DatabasePort, DatabaseTransaction},
};

/// Writes made by a committed check-in
#[derive(Debug, PartialEq, Eq)]
pub struct CheckInReceipt {
    pub invoice_id: InvoiceId,
    /// Credits left on the membership after this check-in
    pub remaining_credits: i32,
    /// Created lines, the check-in line first
    pub invoice_line_ids: Vec<InvoiceLineId>,
}

/// Run a check-in in its own transaction
///
/// On any failure the transaction is rolled back before the error is returned.
pub async fn authorize<D>(
    database: &D,
    user_id: UserId,
    items: &[CheckInItem],
) -> Result<CheckInReceipt, Error>
where
    D: DatabasePort + ?Sized,
{
    let mut tx = database.begin().await?;

    match apply(tx.as_mut(), user_id, items).await {
        Ok(receipt) => {
            tx.commit().await?;
            Ok(receipt)
        }
        Err(err) => {
            warn!(user_id, error = %err, "check-in aborted, rolling back");
            if let Err(rollback_err) = tx.rollback().await {
                // The adapter still discards uncommitted writes when `tx` is dropped
                error!(user_id, error = %rollback_err, "rollback failed");
            }
            Err(err)
        }
    }
}

async fn apply(
    tx: &mut dyn DatabaseTransaction,
    user_id: UserId,
    items: &[CheckInItem],
) -> Result<CheckInReceipt, Error> {
    // Checked again under the row lock, another check-in may have run since the caller looked
    let membership = tx.lock_membership(user_id).await?;
    if membership.is_canceled() {
        return Err(Error::MembershipCanceled {
            user_id,
            membership_id: membership.id,
        });
    }
    if !membership.has_credits() {
        return Err(Error::InsufficientCredits {
            user_id,
            credits: membership.credits,
        });
    }
    let remaining_credits = membership.credits - 1;
    tx.update_membership_credits(membership.id, remaining_credits)
        .await?;

    let invoice = match tx.find_invoice_by_user_id(user_id).await? {
        Some(invoice) => invoice,
        None => {
            let invoice = tx
                .create_invoice(NewInvoice::for_check_in(user_id, Utc::now()))
                .await?;
            debug!(user_id, invoice_id = invoice.id, "created invoice");
            invoice
        }
    };

    let mut invoice_line_ids = Vec::with_capacity(items.len() + 1);
    let line = tx
        .create_invoice_line(NewInvoiceLine::check_in(invoice.id))
        .await?;
    invoice_line_ids.push(line.id);

    for (index, item) in items.iter().enumerate() {
        let amount = item
            .parse_amount()
            .ok_or_else(|| Error::InvalidItemAmount {
                index,
                amount: item.amount.clone(),
            })?;
        let line = tx
            .create_invoice_line(NewInvoiceLine {
                invoice_id: invoice.id,
                description: item.description.clone(),
                amount,
            })
            .await?;
        invoice_line_ids.push(line.id);
    }

    Ok(CheckInReceipt {
        invoice_id: invoice.id,
        remaining_credits,
        invoice_line_ids,
    })
}
