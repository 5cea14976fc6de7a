use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sqlx::PgPool;

use crate::db;
use crate::error::Result;
use crate::models::{
    AcceptRequestPayload, Ack, CancelRequestPayload, ChangeNicknamePayload,
    DeclineRequestPayload, RemoveFriendPayload, SendByInviteCodePayload, SendByNicknamePayload,
    SendByUidPayload, SyncProfilePayload, UserId,
};

/// Remote-callable friend-graph actions.
///
/// Callers must provide a trusted `actor` sourced from validated auth/session
/// state, not from request arguments.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "operation", rename_all = "snake_case")]
pub enum FriendOperation {
    EnsurePublicProfile,
    SendRequestByUid { payload: SendByUidPayload },
    SendRequestByNickname { payload: SendByNicknamePayload },
    SendRequestByInviteCode { payload: SendByInviteCodePayload },
    AcceptRequest { payload: AcceptRequestPayload },
    DeclineRequest { payload: DeclineRequestPayload },
    CancelRequest { payload: CancelRequestPayload },
    RemoveFriend { payload: RemoveFriendPayload },
    ChangeNickname { payload: ChangeNicknamePayload },
    SyncProfile { payload: SyncProfilePayload },
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum FriendOperationResult {
    Ack { ok: bool },
}

impl From<Ack> for FriendOperationResult {
    fn from(value: Ack) -> Self {
        Self::Ack { ok: value.ok }
    }
}

#[derive(Clone)]
pub struct FriendOperations {
    pool: Arc<PgPool>,
}

impl FriendOperations {
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    pub fn from_pool(pool: &PgPool) -> Self {
        Self {
            pool: Arc::new(pool.clone()),
        }
    }

    pub fn pool(&self) -> Arc<PgPool> {
        Arc::clone(&self.pool)
    }

    pub async fn execute(
        &self,
        actor: &UserId,
        operation: FriendOperation,
    ) -> Result<FriendOperationResult> {
        let ack = match operation {
            FriendOperation::EnsurePublicProfile => self.ensure_public_profile(actor).await?,
            FriendOperation::SendRequestByUid { payload } => {
                self.send_request_by_uid(actor, payload).await?
            }
            FriendOperation::SendRequestByNickname { payload } => {
                self.send_request_by_nickname(actor, payload).await?
            }
            FriendOperation::SendRequestByInviteCode { payload } => {
                self.send_request_by_invite_code(actor, payload).await?
            }
            FriendOperation::AcceptRequest { payload } => {
                self.accept_request(actor, payload).await?
            }
            FriendOperation::DeclineRequest { payload } => {
                self.decline_request(actor, payload).await?
            }
            FriendOperation::CancelRequest { payload } => {
                self.cancel_request(actor, payload).await?
            }
            FriendOperation::RemoveFriend { payload } => {
                self.remove_friend(actor, payload).await?
            }
            FriendOperation::ChangeNickname { payload } => {
                self.change_nickname(actor, payload).await?
            }
            FriendOperation::SyncProfile { payload } => self.sync_profile(actor, payload).await?,
        };
        Ok(ack.into())
    }

    pub async fn ensure_public_profile(&self, actor: &UserId) -> Result<Ack> {
        db::ensure_public_profile(&self.pool, actor).await?;
        Ok(Ack::ok())
    }

    pub async fn send_request_by_uid(
        &self,
        actor: &UserId,
        payload: SendByUidPayload,
    ) -> Result<Ack> {
        db::send_friend_request(&self.pool, actor, payload).await?;
        Ok(Ack::ok())
    }

    pub async fn send_request_by_nickname(
        &self,
        actor: &UserId,
        payload: SendByNicknamePayload,
    ) -> Result<Ack> {
        db::send_friend_request_by_nickname(&self.pool, actor, payload).await?;
        Ok(Ack::ok())
    }

    pub async fn send_request_by_invite_code(
        &self,
        actor: &UserId,
        payload: SendByInviteCodePayload,
    ) -> Result<Ack> {
        db::send_friend_request_by_invite_code(&self.pool, actor, payload).await?;
        Ok(Ack::ok())
    }

    pub async fn accept_request(
        &self,
        actor: &UserId,
        payload: AcceptRequestPayload,
    ) -> Result<Ack> {
        db::accept_friend_request(&self.pool, actor, payload).await?;
        Ok(Ack::ok())
    }

    pub async fn decline_request(
        &self,
        actor: &UserId,
        payload: DeclineRequestPayload,
    ) -> Result<Ack> {
        db::decline_friend_request(&self.pool, actor, payload).await?;
        Ok(Ack::ok())
    }

    pub async fn cancel_request(
        &self,
        actor: &UserId,
        payload: CancelRequestPayload,
    ) -> Result<Ack> {
        db::cancel_friend_request(&self.pool, actor, payload).await?;
        Ok(Ack::ok())
    }

    pub async fn remove_friend(&self, actor: &UserId, payload: RemoveFriendPayload) -> Result<Ack> {
        db::remove_friend(&self.pool, actor, payload).await?;
        Ok(Ack::ok())
    }

    pub async fn change_nickname(
        &self,
        actor: &UserId,
        payload: ChangeNicknamePayload,
    ) -> Result<Ack> {
        db::change_nickname(&self.pool, actor, payload).await?;
        Ok(Ack::ok())
    }

    /// Merge-upserts the caller's private profile, then refreshes their
    /// directory entry. The refresh is best-effort: its failure is logged
    /// and discarded, never surfaced to the caller.
    pub async fn sync_profile(&self, actor: &UserId, payload: SyncProfilePayload) -> Result<Ack> {
        db::sync_login_profile(&self.pool, actor, payload).await?;

        if let Err(err) = db::refresh_public_directory(&self.pool, actor).await {
            tracing::warn!(
                uid = %actor,
                code = err.code,
                error = %err.source,
                "public directory refresh failed; continuing"
            );
        }
        Ok(Ack::ok())
    }
}
