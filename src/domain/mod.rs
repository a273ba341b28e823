use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};

pub type UserId = i32;
pub type MembershipId = i32;
pub type InvoiceId = i32;
pub type InvoiceLineId = i32;

/// Description of the header created for a user's first check-in
pub const NEW_INVOICE_DESCRIPTION: &str = "New invoice";
/// Amount of the header created for a user's first check-in
pub const NEW_INVOICE_AMOUNT: i32 = 1;
/// Description of the line recording the check-in itself
pub const CHECK_IN_LINE_DESCRIPTION: &str = "New invoiceLine";
/// Amount charged for the check-in itself, before any extra items
pub const CHECK_IN_LINE_AMOUNT: i32 = 1;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct User {
    pub id: UserId,
    pub name: String,
    pub email: String,
    pub phone: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MembershipStatus {
    Active,
    Canceled,
}

/// A user's subscription
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Membership {
    pub id: MembershipId,
    pub user_id: UserId,
    pub status: MembershipStatus,
    /// Remaining check-ins
    ///
    /// Each check-in consumes exactly one credit.
    pub credits: i32,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
}

impl Membership {
    pub fn is_canceled(&self) -> bool {
        self.status == MembershipStatus::Canceled
    }

    pub fn has_credits(&self) -> bool {
        self.credits > 0
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InvoiceStatus {
    Outstanding,
    Paid,
    Void,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Invoice {
    pub id: InvoiceId,
    pub user_id: UserId,
    pub date: DateTime<Utc>,
    pub status: InvoiceStatus,
    pub description: String,
    pub amount: i32,
}

/// Invoice header to insert
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewInvoice {
    pub user_id: UserId,
    pub date: DateTime<Utc>,
    pub status: InvoiceStatus,
    pub description: String,
    pub amount: i32,
}

impl NewInvoice {
    /// Header opened for a user that has no invoice yet
    pub fn for_check_in(user_id: UserId, date: DateTime<Utc>) -> Self {
        Self {
            user_id,
            date,
            status: InvoiceStatus::Outstanding,
            description: NEW_INVOICE_DESCRIPTION.to_string(),
            amount: NEW_INVOICE_AMOUNT,
        }
    }
}

/// Itemized charge on an invoice
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InvoiceLine {
    pub id: InvoiceLineId,
    pub invoice_id: InvoiceId,
    pub description: String,
    pub amount: i32,
}

/// Invoice line to insert
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewInvoiceLine {
    pub invoice_id: InvoiceId,
    pub description: String,
    pub amount: i32,
}

impl NewInvoiceLine {
    /// Base fee line written for every check-in
    pub fn check_in(invoice_id: InvoiceId) -> Self {
        Self {
            invoice_id,
            description: CHECK_IN_LINE_DESCRIPTION.to_string(),
            amount: CHECK_IN_LINE_AMOUNT,
        }
    }
}

/// Extra item purchased during a check-in
///
/// The amount is kept in its submitted textual form. It is only parsed inside the check-in
/// transaction, so that a bad amount aborts the whole check-in.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CheckInItem {
    pub description: String,
    pub amount: String,
}

impl CheckInItem {
    pub fn new(description: impl Into<String>, amount: impl ToString) -> Self {
        Self {
            description: description.into(),
            amount: amount.to_string(),
        }
    }

    /// Amount as a non-negative integer
    ///
    /// Reads the leading integer of the text, after optional whitespace and sign, and ignores
    /// anything after it: `"2.5"` bills 2 and `"3abc"` bills 3. A `0x` prefix reads hexadecimal
    /// digits. Fails when there is no leading digit, or the value is negative or out of range.
    pub fn parse_amount(&self) -> Option<i32> {
        let text = self.amount.trim_start();
        let (negative, text) = match text.as_bytes().first() {
            Some(b'-') => (true, &text[1..]),
            Some(b'+') => (false, &text[1..]),
            _ => (false, text),
        };
        let (radix, text) = match text.get(..2) {
            Some("0x" | "0X") => (16, &text[2..]),
            _ => (10, text),
        };
        let end = text
            .find(|c: char| !c.is_digit(radix))
            .unwrap_or(text.len());
        let digits = &text[..end];
        if digits.is_empty() {
            return None;
        }

        let magnitude = i64::from_str_radix(digits, radix).ok()?;
        let amount = if negative { -magnitude } else { magnitude };
        i32::try_from(amount).ok().filter(|amount| *amount >= 0)
    }
}

/// Unknown status string read from a store
#[derive(Debug, thiserror::Error)]
#[error("unknown status: {0}")]
pub struct UnknownStatus(pub String);

impl FromStr for MembershipStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Active" => Ok(MembershipStatus::Active),
            "Canceled" => Ok(MembershipStatus::Canceled),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

impl fmt::Display for MembershipStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MembershipStatus::Active => "Active",
            MembershipStatus::Canceled => "Canceled",
        })
    }
}

impl FromStr for InvoiceStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Outstanding" => Ok(InvoiceStatus::Outstanding),
            "Paid" => Ok(InvoiceStatus::Paid),
            "Void" => Ok(InvoiceStatus::Void),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

impl fmt::Display for InvoiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            InvoiceStatus::Outstanding => "Outstanding",
            InvoiceStatus::Paid => "Paid",
            InvoiceStatus::Void => "Void",
        })
    }
}
