use crate::domain::{
    Invoice, InvoiceId, InvoiceLine, Membership, MembershipId, NewInvoice, NewInvoiceLine, UserId,
};

#[mockall::automock]
#[async_trait::async_trait]
pub trait DatabasePort: Send + Sync {
    async fn find_membership_by_user_id(&self, user_id: UserId) -> Result<Membership, Error>;
    /// Invoice currently used for a user's check-ins, if any
    async fn find_invoice_by_user_id(&self, user_id: UserId) -> Result<Option<Invoice>, Error>;
    /// Open a transaction
    ///
    /// Writes made through the transaction are only visible to other callers once it is
    /// committed. Dropping it without committing discards them.
    async fn begin(&self) -> Result<Box<dyn DatabaseTransaction>, Error>;
}

/// Unit of work against the store
///
/// Every method fails with [`Error::TransactionClosed`] once `commit` or `rollback` has been
/// called.
#[mockall::automock]
#[async_trait::async_trait]
pub trait DatabaseTransaction: Send {
    /// Load the user's membership and hold its row lock until the transaction ends
    async fn lock_membership(&mut self, user_id: UserId) -> Result<Membership, Error>;
    async fn update_membership_credits(
        &mut self,
        membership_id: MembershipId,
        credits: i32,
    ) -> Result<(), Error>;
    async fn find_invoice_by_user_id(&mut self, user_id: UserId) -> Result<Option<Invoice>, Error>;
    async fn create_invoice(&mut self, invoice: NewInvoice) -> Result<Invoice, Error>;
    async fn create_invoice_line(&mut self, line: NewInvoiceLine) -> Result<InvoiceLine, Error>;
    async fn commit(&mut self) -> Result<(), Error>;
    async fn rollback(&mut self) -> Result<(), Error>;
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The user has no membership
    #[error("no membership for user {user_id}")]
    MembershipNotFound { user_id: UserId },

    /// Inserting a line for an invoice that does not exist
    #[error("invoice {invoice_id} does not exist")]
    InvoiceNotFound { invoice_id: InvoiceId },

    /// The transaction was already committed or rolled back
    #[error("transaction is closed")]
    TransactionClosed,

    /// Concrete adapter errors
    ///
    /// This could represent any errors from a concrete adapter that is not part of the domain
    /// model, such as connectivity, configuration, or permission errors.
    #[error("adapter error: {0:?}")]
    Adapter(Box<dyn std::error::Error + Send + Sync>),
}
