use crate::domain::{User, UserId};

#[mockall::automock]
#[async_trait::async_trait]
pub trait UserPort: Send + Sync {
    async fn find_user_by_id(&self, user_id: UserId) -> Result<User, Error>;
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Domain-level error when a user does not exist
    #[error("user {0} does not exist")]
    UserDoesNotExist(UserId),

    /// Concrete adapter errors
    ///
    /// This could represent any errors from a concrete adapter that is not part of the domain
    /// model, such as connectivity, configuration, or permission errors.
    #[error("adapter error: {0:?}")]
    Adapter(Box<dyn std::error::Error + Send + Sync>),
}
