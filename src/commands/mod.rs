use std::sync::Arc;

use crate::{
    domain::{MembershipId, UserId},
    ports::{database, user},
};

pub mod check_in;

/// Command handlers, sharing handles to the ports
pub struct DomainLogic<D, U> {
    database: Arc<D>,
    users: Arc<U>,
}

impl<D, U> DomainLogic<D, U> {
    pub fn new(database: Arc<D>, users: Arc<U>) -> Self {
        Self { database, users }
    }
}

impl<D, U> Clone for DomainLogic<D, U> {
    fn clone(&self) -> Self {
        Self {
            database: self.database.clone(),
            users: self.users.clone(),
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("user {user_id} not found")]
    UserNotFound { user_id: UserId },
    #[error("no membership for user {user_id}")]
    MembershipNotFound { user_id: UserId },
    #[error("membership {membership_id} of user {user_id} is canceled")]
    MembershipCanceled {
        user_id: UserId,
        membership_id: MembershipId,
    },
    #[error("user {user_id} has not enough credits ({credits})")]
    InsufficientCredits { user_id: UserId, credits: i32 },
    /// An item amount is not a non-negative integer
    #[error("item {index} has an invalid amount: {amount:?}")]
    InvalidItemAmount { index: usize, amount: String },

    /// Any store-level failure
    #[error("persistence failure: {0}")]
    Persistence(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl From<database::Error> for Error {
    fn from(err: database::Error) -> Self {
        match err {
            database::Error::MembershipNotFound { user_id } => Self::MembershipNotFound { user_id },
            err => Self::Persistence(Box::new(err)),
        }
    }
}

impl From<user::Error> for Error {
    fn from(err: user::Error) -> Self {
        match err {
            user::Error::UserDoesNotExist(user_id) => Self::UserNotFound { user_id },
            err => Self::Persistence(Box::new(err)),
        }
    }
}
