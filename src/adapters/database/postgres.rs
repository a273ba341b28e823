use crate::{
    domain::{
        Invoice, InvoiceLine, Membership, MembershipId, NewInvoice, NewInvoiceLine,
        UnknownStatus, User, UserId,
    },
    ports::{
        database::{DatabasePort, DatabaseTransaction, Error},
        user::{self, UserPort},
    },
};
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgPoolOptions, PgPool, Postgres, Transaction};
use tracing::debug;

const MEMBERSHIP_COLUMNS: &str = "id, user_id, status, credits, start_date, end_date";
const INVOICE_COLUMNS: &str = "id, user_id, date, status, description, amount";

/// PostgreSQL store
///
/// Membership rows are locked with `SELECT ... FOR UPDATE` for the duration of a check-in, so
/// concurrent check-ins for the same user are serialized while other users are unaffected.
#[derive(Clone, Debug)]
pub struct PostgresDatabase {
    pool: PgPool,
}

impl PostgresDatabase {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn migrate(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await
    }
}

#[derive(sqlx::FromRow)]
struct UserRow {
    id: i32,
    name: String,
    email: String,
    phone: String,
}

#[derive(sqlx::FromRow)]
struct MembershipRow {
    id: i32,
    user_id: i32,
    status: String,
    credits: i32,
    start_date: DateTime<Utc>,
    end_date: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct InvoiceRow {
    id: i32,
    user_id: i32,
    date: DateTime<Utc>,
    status: String,
    description: String,
    amount: i32,
}

#[derive(sqlx::FromRow)]
struct InvoiceLineRow {
    id: i32,
    invoice_id: i32,
    description: String,
    amount: i32,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            email: row.email,
            phone: row.phone,
        }
    }
}

impl TryFrom<MembershipRow> for Membership {
    type Error = UnknownStatus;

    fn try_from(row: MembershipRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            user_id: row.user_id,
            status: row.status.parse()?,
            credits: row.credits,
            start_date: row.start_date,
            end_date: row.end_date,
        })
    }
}

impl TryFrom<InvoiceRow> for Invoice {
    type Error = UnknownStatus;

    fn try_from(row: InvoiceRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            user_id: row.user_id,
            date: row.date,
            status: row.status.parse()?,
            description: row.description,
            amount: row.amount,
        })
    }
}

impl From<InvoiceLineRow> for InvoiceLine {
    fn from(row: InvoiceLineRow) -> Self {
        Self {
            id: row.id,
            invoice_id: row.invoice_id,
            description: row.description,
            amount: row.amount,
        }
    }
}

#[async_trait::async_trait]
impl UserPort for PostgresDatabase {
    async fn find_user_by_id(&self, user_id: UserId) -> Result<User, user::Error> {
        sqlx::query_as::<_, UserRow>("SELECT id, name, email, phone FROM users WHERE id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?
            .map(User::from)
            .ok_or(user::Error::UserDoesNotExist(user_id))
    }
}

#[async_trait::async_trait]
impl DatabasePort for PostgresDatabase {
    async fn find_membership_by_user_id(&self, user_id: UserId) -> Result<Membership, Error> {
        let row = sqlx::query_as::<_, MembershipRow>(&format!(
            "SELECT {MEMBERSHIP_COLUMNS} FROM memberships WHERE user_id = $1 ORDER BY id LIMIT 1"
        ))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(Error::MembershipNotFound { user_id })?;

        Ok(row.try_into()?)
    }

    async fn find_invoice_by_user_id(&self, user_id: UserId) -> Result<Option<Invoice>, Error> {
        let row = sqlx::query_as::<_, InvoiceRow>(&format!(
            "SELECT {INVOICE_COLUMNS} FROM invoices WHERE user_id = $1 ORDER BY id LIMIT 1"
        ))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Invoice::try_from).transpose()?)
    }

    async fn begin(&self) -> Result<Box<dyn DatabaseTransaction>, Error> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PostgresTransaction { tx: Some(tx) }))
    }
}

/// Open PostgreSQL transaction
///
/// `sqlx` rolls the transaction back when it is dropped without being committed.
pub struct PostgresTransaction {
    tx: Option<Transaction<'static, Postgres>>,
}

impl PostgresTransaction {
    fn tx(&mut self) -> Result<&mut Transaction<'static, Postgres>, Error> {
        self.tx.as_mut().ok_or(Error::TransactionClosed)
    }
}

#[async_trait::async_trait]
impl DatabaseTransaction for PostgresTransaction {
    async fn lock_membership(&mut self, user_id: UserId) -> Result<Membership, Error> {
        let tx = self.tx()?;
        let row = sqlx::query_as::<_, MembershipRow>(&format!(
            "SELECT {MEMBERSHIP_COLUMNS} FROM memberships WHERE user_id = $1 ORDER BY id LIMIT 1 FOR UPDATE"
        ))
        .bind(user_id)
        .fetch_optional(&mut **tx)
        .await?
        .ok_or(Error::MembershipNotFound { user_id })?;

        Ok(row.try_into()?)
    }

    async fn update_membership_credits(
        &mut self,
        membership_id: MembershipId,
        credits: i32,
    ) -> Result<(), Error> {
        let tx = self.tx()?;
        let res = sqlx::query("UPDATE memberships SET credits = $2 WHERE id = $1")
            .bind(membership_id)
            .bind(credits)
            .execute(&mut **tx)
            .await?;
        if res.rows_affected() != 1 {
            return Err(Error::Adapter(
                format!("membership {membership_id} does not exist").into(),
            ));
        }
        Ok(())
    }

    async fn find_invoice_by_user_id(&mut self, user_id: UserId) -> Result<Option<Invoice>, Error> {
        let tx = self.tx()?;
        let row = sqlx::query_as::<_, InvoiceRow>(&format!(
            "SELECT {INVOICE_COLUMNS} FROM invoices WHERE user_id = $1 ORDER BY id LIMIT 1"
        ))
        .bind(user_id)
        .fetch_optional(&mut **tx)
        .await?;

        Ok(row.map(Invoice::try_from).transpose()?)
    }

    async fn create_invoice(&mut self, invoice: NewInvoice) -> Result<Invoice, Error> {
        let tx = self.tx()?;
        let row = sqlx::query_as::<_, InvoiceRow>(&format!(
            "INSERT INTO invoices (user_id, date, status, description, amount) \
             VALUES ($1, $2, $3, $4, $5) RETURNING {INVOICE_COLUMNS}"
        ))
        .bind(invoice.user_id)
        .bind(invoice.date)
        .bind(invoice.status.to_string())
        .bind(invoice.description)
        .bind(invoice.amount)
        .fetch_one(&mut **tx)
        .await?;

        Ok(row.try_into()?)
    }

    async fn create_invoice_line(&mut self, line: NewInvoiceLine) -> Result<InvoiceLine, Error> {
        let tx = self.tx()?;
        let invoice_id = line.invoice_id;
        let row = sqlx::query_as::<_, InvoiceLineRow>(
            "INSERT INTO invoice_lines (invoice_id, description, amount) \
             VALUES ($1, $2, $3) RETURNING id, invoice_id, description, amount",
        )
        .bind(line.invoice_id)
        .bind(line.description)
        .bind(line.amount)
        .fetch_one(&mut **tx)
        .await
        .map_err(|err| {
            if matches!(&err, sqlx::Error::Database(db) if db.is_foreign_key_violation()) {
                Error::InvoiceNotFound { invoice_id }
            } else {
                err.into()
            }
        })?;

        Ok(row.into())
    }

    async fn commit(&mut self) -> Result<(), Error> {
        let tx = self.tx.take().ok_or(Error::TransactionClosed)?;
        tx.commit().await?;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), Error> {
        let tx = self.tx.take().ok_or(Error::TransactionClosed)?;
        tx.rollback().await?;
        debug!("transaction rolled back");
        Ok(())
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        Self::Adapter(Box::new(err))
    }
}

impl From<UnknownStatus> for Error {
    fn from(err: UnknownStatus) -> Self {
        Self::Adapter(Box::new(err))
    }
}

impl From<sqlx::Error> for user::Error {
    fn from(err: sqlx::Error) -> Self {
        Self::Adapter(Box::new(err))
    }
}
