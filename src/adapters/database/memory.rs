use crate::{
    domain::{
        Invoice, InvoiceId, InvoiceLine, InvoiceLineId, Membership, MembershipId,
        MembershipStatus, NewInvoice, NewInvoiceLine, User, UserId,
    },
    ports::{
        database::{DatabasePort, DatabaseTransaction, Error},
        user::{self, UserPort},
    },
};
use chrono::Utc;
use std::{
    collections::{BTreeMap, HashMap},
    sync::{
        atomic::{AtomicI32, Ordering},
        Arc, Mutex, PoisonError,
    },
};
use tokio::sync::OwnedMutexGuard;

/// In-process store
///
/// Rows are kept in id order, so iterating over a table yields rows in insertion order.
#[derive(Clone, Debug)]
pub struct MemoryDatabase {
    tables: Arc<Mutex<Tables>>,
    /// Row locks on memberships, held by open transactions
    row_locks: Arc<Mutex<HashMap<MembershipId, Arc<tokio::sync::Mutex<()>>>>>,
    sequence: Arc<AtomicI32>,
}

#[derive(Debug, Default)]
struct Tables {
    users: BTreeMap<UserId, User>,
    memberships: BTreeMap<MembershipId, Membership>,
    invoices: BTreeMap<InvoiceId, Invoice>,
    invoice_lines: BTreeMap<InvoiceLineId, InvoiceLine>,
}

impl Tables {
    fn membership_for_user(&self, user_id: UserId) -> Option<&Membership> {
        self.memberships.values().find(|m| m.user_id == user_id)
    }

    fn invoice_for_user(&self, user_id: UserId) -> Option<&Invoice> {
        self.invoices.values().find(|i| i.user_id == user_id)
    }

    /// Write a committed transaction, or nothing if one of its references is gone
    fn apply(&mut self, pending: Pending) -> Result<(), Error> {
        if let Some((id, _)) = pending
            .credits
            .iter()
            .find(|(id, _)| !self.memberships.contains_key(id))
        {
            return Err(MissingRow::Membership(*id).into());
        }
        if let Some(invoice) = pending
            .invoices
            .iter()
            .find(|i| !self.users.contains_key(&i.user_id))
        {
            return Err(MissingRow::User(invoice.user_id).into());
        }
        if let Some(line) = pending.invoice_lines.iter().find(|l| {
            !self.invoices.contains_key(&l.invoice_id)
                && !pending.invoices.iter().any(|i| i.id == l.invoice_id)
        }) {
            return Err(Error::InvoiceNotFound {
                invoice_id: line.invoice_id,
            });
        }

        for (id, credits) in pending.credits {
            if let Some(membership) = self.memberships.get_mut(&id) {
                membership.credits = credits;
            }
        }
        for invoice in pending.invoices {
            self.invoices.insert(invoice.id, invoice);
        }
        for line in pending.invoice_lines {
            self.invoice_lines.insert(line.id, line);
        }
        Ok(())
    }
}

impl MemoryDatabase {
    fn next_id(&self) -> i32 {
        self.sequence.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn insert_user(&self, name: &str, email: &str, phone: &str) -> Result<User, Error> {
        let user = User {
            id: self.next_id(),
            name: name.to_string(),
            email: email.to_string(),
            phone: phone.to_string(),
        };
        self.tables.lock()?.users.insert(user.id, user.clone());
        Ok(user)
    }

    pub fn insert_membership(
        &self,
        user_id: UserId,
        status: MembershipStatus,
        credits: i32,
    ) -> Result<Membership, Error> {
        let mut tables = self.tables.lock()?;
        if !tables.users.contains_key(&user_id) {
            return Err(MissingRow::User(user_id).into());
        }
        let now = Utc::now();
        let membership = Membership {
            id: self.next_id(),
            user_id,
            status,
            credits,
            start_date: now,
            end_date: now,
        };
        tables.memberships.insert(membership.id, membership.clone());
        Ok(membership)
    }

    pub fn insert_invoice(&self, invoice: NewInvoice) -> Result<Invoice, Error> {
        let mut tables = self.tables.lock()?;
        if !tables.users.contains_key(&invoice.user_id) {
            return Err(MissingRow::User(invoice.user_id).into());
        }
        let invoice = stored_invoice(self.next_id(), invoice);
        tables.invoices.insert(invoice.id, invoice.clone());
        Ok(invoice)
    }

    /// Remove a membership, as a direct delete outside of check-ins would
    pub fn delete_membership(&self, membership_id: MembershipId) -> Result<bool, Error> {
        let removed = self
            .tables
            .lock()?
            .memberships
            .remove(&membership_id)
            .is_some();
        self.prune_row_locks(&[membership_id])?;
        Ok(removed)
    }

    pub fn membership(&self, user_id: UserId) -> Result<Option<Membership>, Error> {
        Ok(self.tables.lock()?.membership_for_user(user_id).cloned())
    }

    pub fn invoices_for_user(&self, user_id: UserId) -> Result<Vec<Invoice>, Error> {
        Ok(self
            .tables
            .lock()?
            .invoices
            .values()
            .filter(|i| i.user_id == user_id)
            .cloned()
            .collect())
    }

    pub fn invoice_lines(&self, invoice_id: InvoiceId) -> Result<Vec<InvoiceLine>, Error> {
        Ok(self
            .tables
            .lock()?
            .invoice_lines
            .values()
            .filter(|l| l.invoice_id == invoice_id)
            .cloned()
            .collect())
    }

    pub fn invoice_line_count(&self) -> Result<usize, Error> {
        Ok(self.tables.lock()?.invoice_lines.len())
    }

    fn row_lock(&self, membership_id: MembershipId) -> Result<Arc<tokio::sync::Mutex<()>>, Error> {
        Ok(self
            .row_locks
            .lock()?
            .entry(membership_id)
            .or_default()
            .clone())
    }

    /// Forget the row locks nobody holds or waits on anymore
    ///
    /// Every holder and waiter keeps a clone of the lock, which is taken under the map mutex, so
    /// an entry only referenced by the map is idle.
    fn prune_row_locks(&self, membership_ids: &[MembershipId]) -> Result<(), Error> {
        let mut row_locks = self.row_locks.lock()?;
        for membership_id in membership_ids {
            if row_locks
                .get(membership_id)
                .is_some_and(|lock| Arc::strong_count(lock) == 1)
            {
                row_locks.remove(membership_id);
            }
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl UserPort for MemoryDatabase {
    async fn find_user_by_id(&self, user_id: UserId) -> Result<User, user::Error> {
        self.tables
            .lock()?
            .users
            .get(&user_id)
            .cloned()
            .ok_or(user::Error::UserDoesNotExist(user_id))
    }
}

#[async_trait::async_trait]
impl DatabasePort for MemoryDatabase {
    async fn find_membership_by_user_id(&self, user_id: UserId) -> Result<Membership, Error> {
        self.tables
            .lock()?
            .membership_for_user(user_id)
            .cloned()
            .ok_or(Error::MembershipNotFound { user_id })
    }

    async fn find_invoice_by_user_id(&self, user_id: UserId) -> Result<Option<Invoice>, Error> {
        Ok(self.tables.lock()?.invoice_for_user(user_id).cloned())
    }

    async fn begin(&self) -> Result<Box<dyn DatabaseTransaction>, Error> {
        Ok(Box::new(MemoryTransaction {
            database: self.clone(),
            locked: HashMap::new(),
            pending: Some(Pending::default()),
        }))
    }
}

impl Default for MemoryDatabase {
    fn default() -> Self {
        Self {
            tables: Arc::new(Mutex::new(Tables::default())),
            row_locks: Arc::new(Mutex::new(HashMap::new())),
            sequence: Arc::new(AtomicI32::new(0)),
        }
    }
}

/// Transaction over a [`MemoryDatabase`]
///
/// Writes are staged and only applied to the tables on commit.
pub struct MemoryTransaction {
    database: MemoryDatabase,
    locked: HashMap<MembershipId, OwnedMutexGuard<()>>,
    /// `None` once the transaction is committed or rolled back
    pending: Option<Pending>,
}

#[derive(Default)]
struct Pending {
    credits: Vec<(MembershipId, i32)>,
    invoices: Vec<Invoice>,
    invoice_lines: Vec<InvoiceLine>,
}

impl MemoryTransaction {
    fn pending(&mut self) -> Result<&mut Pending, Error> {
        self.pending.as_mut().ok_or(Error::TransactionClosed)
    }

    fn close(&mut self) -> Result<Pending, Error> {
        let pending = self.pending.take().ok_or(Error::TransactionClosed)?;
        self.release_row_locks()?;
        Ok(pending)
    }

    fn release_row_locks(&mut self) -> Result<(), Error> {
        if self.locked.is_empty() {
            return Ok(());
        }
        let membership_ids: Vec<_> = self.locked.keys().copied().collect();
        self.locked.clear();
        self.database.prune_row_locks(&membership_ids)
    }
}

impl Drop for MemoryTransaction {
    fn drop(&mut self) {
        // Staged writes are discarded with `pending`
        let _ = self.release_row_locks();
    }
}

#[async_trait::async_trait]
impl DatabaseTransaction for MemoryTransaction {
    async fn lock_membership(&mut self, user_id: UserId) -> Result<Membership, Error> {
        self.pending()?;
        let membership_id = self
            .database
            .tables
            .lock()?
            .membership_for_user(user_id)
            .map(|m| m.id)
            .ok_or(Error::MembershipNotFound { user_id })?;

        if !self.locked.contains_key(&membership_id) {
            let guard = self.database.row_lock(membership_id)?.lock_owned().await;
            self.locked.insert(membership_id, guard);
        }

        // Re-read under the lock, a previous holder may have changed or deleted the row
        let mut membership = self
            .database
            .tables
            .lock()?
            .memberships
            .get(&membership_id)
            .cloned()
            .ok_or(Error::MembershipNotFound { user_id })?;
        if let Some((_, credits)) = self
            .pending()?
            .credits
            .iter()
            .rev()
            .find(|(id, _)| *id == membership_id)
        {
            membership.credits = *credits;
        }
        Ok(membership)
    }

    async fn update_membership_credits(
        &mut self,
        membership_id: MembershipId,
        credits: i32,
    ) -> Result<(), Error> {
        self.pending()?;
        if !self
            .database
            .tables
            .lock()?
            .memberships
            .contains_key(&membership_id)
        {
            return Err(MissingRow::Membership(membership_id).into());
        }
        self.pending()?.credits.push((membership_id, credits));
        Ok(())
    }

    async fn find_invoice_by_user_id(&mut self, user_id: UserId) -> Result<Option<Invoice>, Error> {
        let committed = self.database.tables.lock()?.invoice_for_user(user_id).cloned();
        let staged = self
            .pending()?
            .invoices
            .iter()
            .find(|i| i.user_id == user_id)
            .cloned();
        // Ids are allocated in order, so committed rows always come first
        Ok(committed.or(staged))
    }

    async fn create_invoice(&mut self, invoice: NewInvoice) -> Result<Invoice, Error> {
        self.pending()?;
        if !self
            .database
            .tables
            .lock()?
            .users
            .contains_key(&invoice.user_id)
        {
            return Err(MissingRow::User(invoice.user_id).into());
        }
        let invoice = stored_invoice(self.database.next_id(), invoice);
        self.pending()?.invoices.push(invoice.clone());
        Ok(invoice)
    }

    async fn create_invoice_line(&mut self, line: NewInvoiceLine) -> Result<InvoiceLine, Error> {
        let committed = self
            .database
            .tables
            .lock()?
            .invoices
            .contains_key(&line.invoice_id);
        let pending = self.pending()?;
        if !committed && !pending.invoices.iter().any(|i| i.id == line.invoice_id) {
            return Err(Error::InvoiceNotFound {
                invoice_id: line.invoice_id,
            });
        }
        let line = InvoiceLine {
            id: self.database.next_id(),
            invoice_id: line.invoice_id,
            description: line.description,
            amount: line.amount,
        };
        self.pending()?.invoice_lines.push(line.clone());
        Ok(line)
    }

    async fn commit(&mut self) -> Result<(), Error> {
        let pending = self.pending.take().ok_or(Error::TransactionClosed)?;
        // Row locks are only released once the writes are in place
        let res = match self.database.tables.lock() {
            Ok(mut tables) => tables.apply(pending),
            Err(err) => Err(err.into()),
        };
        let released = self.release_row_locks();
        res.and(released)
    }

    async fn rollback(&mut self) -> Result<(), Error> {
        self.close().map(|_| ())
    }
}

fn stored_invoice(id: InvoiceId, invoice: NewInvoice) -> Invoice {
    Invoice {
        id,
        user_id: invoice.user_id,
        date: invoice.date,
        status: invoice.status,
        description: invoice.description,
        amount: invoice.amount,
    }
}

/// A write referencing a row that does not exist
#[derive(Debug, thiserror::Error)]
pub enum MissingRow {
    #[error("user {0} does not exist")]
    User(UserId),
    #[error("membership {0} does not exist")]
    Membership(MembershipId),
}

impl From<MissingRow> for Error {
    fn from(err: MissingRow) -> Self {
        Self::Adapter(Box::new(err))
    }
}

/// Erased [`PoisonError`]
///
/// `PoisonError` keeps the `MutexGuard` internally, which is not send. Thus we erase the error
/// and only keep the string representation instead.
#[derive(Debug, thiserror::Error)]
#[error("poison error: {0}")]
pub struct ErasedPoisonError(String);

/// We need to create a custom `From` implementation here for an error that's specific to this
/// adapter.
impl<T> From<PoisonError<T>> for Error {
    fn from(err: PoisonError<T>) -> Self {
        Self::Adapter(Box::new(ErasedPoisonError(err.to_string())))
    }
}

impl<T> From<PoisonError<T>> for user::Error {
    fn from(err: PoisonError<T>) -> Self {
        Self::Adapter(Box::new(ErasedPoisonError(err.to_string())))
    }
}
