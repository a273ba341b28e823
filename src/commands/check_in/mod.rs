use std::{
    future::Future,
    pin::Pin,
    task::{Context, Poll},
};

use tower::Service;
use tracing::{debug, info};

use crate::{
    domain::{CheckInItem, InvoiceId, InvoiceLineId, UserId},
    ports::{database::DatabasePort, user::UserPort},
};

use super::{DomainLogic, Error};

pub mod engine;

pub struct CheckInRequest {
    pub user_id: UserId,
    /// Extra items bought at the desk, billed after the check-in itself
    pub items: Vec<CheckInItem>,
}

#[derive(Debug, PartialEq, Eq)]
pub struct CheckInResponse {
    pub user_id: UserId,
    pub invoice_id: InvoiceId,
    pub remaining_credits: i32,
    pub invoice_line_ids: Vec<InvoiceLineId>,
}

impl<D, U> Service<CheckInRequest> for DomainLogic<D, U>
where
    D: DatabasePort + 'static,
    U: UserPort + 'static,
{
    type Response = CheckInResponse;
    type Error = Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: CheckInRequest) -> Self::Future {
        let users = self.users.clone();
        let database = self.database.clone();
        Box::pin(async move {
            let user_id = req.user_id;

            // Eligibility, nothing is written if any of these fail
            users.find_user_by_id(user_id).await?;
            let membership = database.find_membership_by_user_id(user_id).await?;
            if membership.is_canceled() {
                debug!(user_id, membership_id = membership.id, "membership is canceled");
                return Err(Error::MembershipCanceled {
                    user_id,
                    membership_id: membership.id,
                });
            }
            if !membership.has_credits() {
                debug!(user_id, credits = membership.credits, "not enough credits");
                return Err(Error::InsufficientCredits {
                    user_id,
                    credits: membership.credits,
                });
            }

            let receipt = engine::authorize(database.as_ref(), user_id, &req.items).await?;
            info!(
                user_id,
                invoice_id = receipt.invoice_id,
                remaining_credits = receipt.remaining_credits,
                lines = receipt.invoice_line_ids.len(),
                "checked in"
            );

            Ok(CheckInResponse {
                user_id,
                invoice_id: receipt.invoice_id,
                remaining_credits: receipt.remaining_credits,
                invoice_line_ids: receipt.invoice_line_ids,
            })
        })
    }
}
