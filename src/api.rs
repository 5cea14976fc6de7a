use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{FromRequestParts, State},
    http::{StatusCode, request::Parts},
    response::{IntoResponse, Response},
    routing::post,
};

use crate::error::{ErrorKind, LibError};
use crate::models::{
    AcceptRequestPayload, CancelRequestPayload, ChangeNicknamePayload, DeclineRequestPayload,
    RemoveFriendPayload, SendByInviteCodePayload, SendByNicknamePayload, SendByUidPayload,
    SyncProfilePayload, UserId,
};
use crate::operations::FriendOperations;

#[derive(Debug)]
pub struct AppError(pub LibError);

impl From<LibError> for AppError {
    fn from(value: LibError) -> Self {
        Self(value)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match self.0.kind {
            ErrorKind::AlreadyExists => StatusCode::CONFLICT,
            ErrorKind::Database => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorKind::FailedPrecondition => StatusCode::PRECONDITION_FAILED,
            ErrorKind::InvalidArgument => StatusCode::BAD_REQUEST,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Unauthenticated => StatusCode::UNAUTHORIZED,
            ErrorKind::Unknown => StatusCode::INTERNAL_SERVER_ERROR,
        };

        tracing::error!(kind = ?self.0.kind, code = self.0.code, error = %self.0.source, "friend api request failed");
        (status, self.0.public).into_response()
    }
}

pub trait HasPool {
    fn pool(&self) -> Arc<sqlx::PgPool>;
}

/// Resolves the authenticated caller from request metadata. How identity is
/// proven (session, bearer token, dev header) belongs to the embedding
/// application, not this crate.
pub trait AuthenticatesCaller {
    fn authenticate(&self, parts: &Parts) -> crate::error::Result<UserId>;
}

pub trait FriendApp: HasPool + AuthenticatesCaller {}

/// Extractor for the authenticated caller id. Rejects with 401 when the app
/// state cannot prove an identity.
pub struct Caller(pub UserId);

impl<S> FromRequestParts<S> for Caller
where
    S: AuthenticatesCaller + Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &S,
    ) -> Result<Self, Self::Rejection> {
        state.authenticate(parts).map(Caller).map_err(AppError)
    }
}

async fn ensure_public_profile_handler<S>(
    State(app): State<S>,
    Caller(actor): Caller,
) -> Result<impl IntoResponse, AppError>
where
    S: FriendApp + Clone + Send + Sync + 'static,
{
    let ack = FriendOperations::new(app.pool())
        .ensure_public_profile(&actor)
        .await?;
    Ok(Json(ack))
}

async fn sync_profile_handler<S>(
    State(app): State<S>,
    Caller(actor): Caller,
    Json(payload): Json<SyncProfilePayload>,
) -> Result<impl IntoResponse, AppError>
where
    S: FriendApp + Clone + Send + Sync + 'static,
{
    let ack = FriendOperations::new(app.pool())
        .sync_profile(&actor, payload)
        .await?;
    Ok(Json(ack))
}

async fn change_nickname_handler<S>(
    State(app): State<S>,
    Caller(actor): Caller,
    Json(payload): Json<ChangeNicknamePayload>,
) -> Result<impl IntoResponse, AppError>
where
    S: FriendApp + Clone + Send + Sync + 'static,
{
    let ack = FriendOperations::new(app.pool())
        .change_nickname(&actor, payload)
        .await?;
    Ok(Json(ack))
}

async fn send_by_uid_handler<S>(
    State(app): State<S>,
    Caller(actor): Caller,
    Json(payload): Json<SendByUidPayload>,
) -> Result<impl IntoResponse, AppError>
where
    S: FriendApp + Clone + Send + Sync + 'static,
{
    let ack = FriendOperations::new(app.pool())
        .send_request_by_uid(&actor, payload)
        .await?;
    Ok(Json(ack))
}

async fn send_by_nickname_handler<S>(
    State(app): State<S>,
    Caller(actor): Caller,
    Json(payload): Json<SendByNicknamePayload>,
) -> Result<impl IntoResponse, AppError>
where
    S: FriendApp + Clone + Send + Sync + 'static,
{
    let ack = FriendOperations::new(app.pool())
        .send_request_by_nickname(&actor, payload)
        .await?;
    Ok(Json(ack))
}

async fn send_by_invite_code_handler<S>(
    State(app): State<S>,
    Caller(actor): Caller,
    Json(payload): Json<SendByInviteCodePayload>,
) -> Result<impl IntoResponse, AppError>
where
    S: FriendApp + Clone + Send + Sync + 'static,
{
    let ack = FriendOperations::new(app.pool())
        .send_request_by_invite_code(&actor, payload)
        .await?;
    Ok(Json(ack))
}

async fn accept_request_handler<S>(
    State(app): State<S>,
    Caller(actor): Caller,
    Json(payload): Json<AcceptRequestPayload>,
) -> Result<impl IntoResponse, AppError>
where
    S: FriendApp + Clone + Send + Sync + 'static,
{
    let ack = FriendOperations::new(app.pool())
        .accept_request(&actor, payload)
        .await?;
    Ok(Json(ack))
}

async fn decline_request_handler<S>(
    State(app): State<S>,
    Caller(actor): Caller,
    Json(payload): Json<DeclineRequestPayload>,
) -> Result<impl IntoResponse, AppError>
where
    S: FriendApp + Clone + Send + Sync + 'static,
{
    let ack = FriendOperations::new(app.pool())
        .decline_request(&actor, payload)
        .await?;
    Ok(Json(ack))
}

async fn cancel_request_handler<S>(
    State(app): State<S>,
    Caller(actor): Caller,
    Json(payload): Json<CancelRequestPayload>,
) -> Result<impl IntoResponse, AppError>
where
    S: FriendApp + Clone + Send + Sync + 'static,
{
    let ack = FriendOperations::new(app.pool())
        .cancel_request(&actor, payload)
        .await?;
    Ok(Json(ack))
}

async fn remove_friend_handler<S>(
    State(app): State<S>,
    Caller(actor): Caller,
    Json(payload): Json<RemoveFriendPayload>,
) -> Result<impl IntoResponse, AppError>
where
    S: FriendApp + Clone + Send + Sync + 'static,
{
    let ack = FriendOperations::new(app.pool())
        .remove_friend(&actor, payload)
        .await?;
    Ok(Json(ack))
}

pub fn routes<S>() -> Router<S>
where
    S: FriendApp + Clone + Send + Sync + 'static,
{
    tracing::info!("Registering route /friends/profile [POST]");
    tracing::info!("Registering route /friends/profile/sync [POST]");
    tracing::info!("Registering route /friends/profile/nickname [POST]");
    tracing::info!("Registering route /friends/requests/{{by-uid,by-nickname,by-invite-code}} [POST]");
    tracing::info!("Registering route /friends/requests/{{accept,decline,cancel}} [POST]");
    tracing::info!("Registering route /friends/remove [POST]");

    Router::new()
        .route(
            "/friends/profile",
            post(ensure_public_profile_handler::<S>),
        )
        .route("/friends/profile/sync", post(sync_profile_handler::<S>))
        .route(
            "/friends/profile/nickname",
            post(change_nickname_handler::<S>),
        )
        .route("/friends/requests/by-uid", post(send_by_uid_handler::<S>))
        .route(
            "/friends/requests/by-nickname",
            post(send_by_nickname_handler::<S>),
        )
        .route(
            "/friends/requests/by-invite-code",
            post(send_by_invite_code_handler::<S>),
        )
        .route("/friends/requests/accept", post(accept_request_handler::<S>))
        .route(
            "/friends/requests/decline",
            post(decline_request_handler::<S>),
        )
        .route("/friends/requests/cancel", post(cancel_request_handler::<S>))
        .route("/friends/remove", post(remove_friend_handler::<S>))
}
