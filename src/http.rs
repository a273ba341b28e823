//! HTTP boundary
//!
//! Only a thin translation layer: request validation, conversion into commands and mapping of
//! the outcome to a status code. Callers never learn why a check-in was refused, the reason is
//! only logged.

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::Value;
use tower::ServiceExt;
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::{
    commands::{
        check_in::{CheckInRequest, CheckInResponse},
        DomainLogic,
    },
    domain::{CheckInItem, UserId},
    ports::{database::DatabasePort, user::UserPort},
};

pub fn router<D, U>(logic: DomainLogic<D, U>) -> Router
where
    D: DatabasePort + 'static,
    U: UserPort + 'static,
{
    Router::new()
        .route("/health", get(health))
        .route("/checkIn/{user_id}", post(check_in::<D, U>))
        .route("/checkIn/{user_id}/", post(check_in::<D, U>))
        .layer(TraceLayer::new_for_http())
        .with_state(logic)
}

#[derive(Debug, Deserialize)]
struct CheckInBody {
    items: Vec<ItemBody>,
}

#[derive(Debug, Deserialize)]
struct ItemBody {
    #[serde(default)]
    description: String,
    /// Number or numeric string
    #[serde(default)]
    amount: Value,
}

impl From<ItemBody> for CheckInItem {
    fn from(item: ItemBody) -> Self {
        let amount = match item.amount {
            Value::String(amount) => amount,
            Value::Null => String::new(),
            other => other.to_string(),
        };
        CheckInItem {
            description: item.description,
            amount,
        }
    }
}

async fn health() -> StatusCode {
    StatusCode::OK
}

async fn check_in<D, U>(
    State(logic): State<DomainLogic<D, U>>,
    Path(user_id): Path<String>,
    body: Bytes,
) -> Response
where
    D: DatabasePort + 'static,
    U: UserPort + 'static,
{
    let (Some(user_id), Some(body)) = (parse_user_id(&user_id), parse_body(&body)) else {
        return (StatusCode::NOT_FOUND, "Invalid userId").into_response();
    };

    let req = CheckInRequest {
        user_id,
        items: body.items.into_iter().map(CheckInItem::from).collect(),
    };
    match logic.oneshot(req).await {
        Ok(CheckInResponse { .. }) => (StatusCode::OK, "Successful checkIn").into_response(),
        Err(err) => {
            warn!(user_id, error = %err, "check-in refused");
            StatusCode::NOT_FOUND.into_response()
        }
    }
}

fn parse_user_id(raw: &str) -> Option<UserId> {
    raw.parse::<UserId>().ok().filter(|user_id| *user_id >= 0)
}

fn parse_body(raw: &[u8]) -> Option<CheckInBody> {
    serde_json::from_slice(raw).ok()
}
