use std::fmt;

use anyhow::anyhow;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::error::{LibError, Result};
use crate::nickname::{self, NormalizedNickname};

/// Provider-scoped user identifier, e.g. `kakao:10203040`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct UserId(pub String);

impl UserId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for UserId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for UserId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Private account record. Created and merged by profile sync (or seeded
/// out-of-core); never deleted by this crate.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub uid: UserId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nickname: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nickname_lower: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub photo_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile_index: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub friend_invite_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    pub created_at: NaiveDateTime,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_login: Option<NaiveDateTime>,
    pub updated_at: NaiveDateTime,
}

/// Discovery record: the denormalized subset of [`UserProfile`] exposed for
/// nickname search, distinct from the private row.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicProfile {
    pub uid: UserId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nickname: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nickname_lower: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub photo_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile_index: Option<i32>,
    pub updated_at: NaiveDateTime,
}

/// Best-available identity fields for a user, resolved public-profile-first.
/// Embedded into request and edge records at write time; never live-synced.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileSnapshot {
    pub uid: UserId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nickname: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nickname_lower: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub photo_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile_index: Option<i32>,
}

/// Outbound half of a pending request, stored under the sender.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SentRequest {
    pub to_uid: UserId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to_nickname: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to_photo_url: Option<String>,
    pub created_at: NaiveDateTime,
}

/// Inbound half of a pending request, stored under the receiver.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceivedRequest {
    pub from_uid: UserId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from_nickname: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from_photo_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from_level: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from_profile_index: Option<i32>,
    pub created_at: NaiveDateTime,
}

/// One side of a confirmed friendship. Edges are always written in
/// reciprocal pairs, each carrying a snapshot of the other party taken at
/// acceptance time.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FriendEdge {
    pub friend_uid: UserId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub friend_nickname: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub friend_photo_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub friend_level: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub friend_profile_index: Option<i32>,
    pub created_at: NaiveDateTime,
    pub snapshot_at: NaiveDateTime,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendByUidPayload {
    pub to_uid: UserId,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendByNicknamePayload {
    pub nickname: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendByInviteCodePayload {
    pub code: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcceptRequestPayload {
    pub from_uid: UserId,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeclineRequestPayload {
    pub from_uid: UserId,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelRequestPayload {
    pub to_uid: UserId,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoveFriendPayload {
    pub friend_uid: UserId,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeNicknamePayload {
    pub nickname: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncProfilePayload {
    pub nickname: Option<String>,
    pub photo_url: Option<String>,
    pub email: Option<String>,
    pub provider: Option<String>,
}

/// Provider identity fields ready for a merge-upsert: trimmed, with empty
/// strings collapsed to absent so they never clobber stored values.
#[derive(Debug, Clone)]
pub struct ProfileSync {
    pub nickname: Option<String>,
    pub photo_url: Option<String>,
    pub email: Option<String>,
    pub provider: Option<String>,
}

/// Uniform success response for the callable operations.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct Ack {
    pub ok: bool,
}

impl Ack {
    pub const fn ok() -> Self {
        Self { ok: true }
    }
}

impl SendByUidPayload {
    pub fn normalize(self) -> Result<UserId> {
        require_uid(self.to_uid, "A target user id is required")
    }
}

impl SendByNicknamePayload {
    pub fn normalize(self) -> Result<NormalizedNickname> {
        nickname::validate(&self.nickname)
    }
}

impl SendByInviteCodePayload {
    pub fn normalize(self) -> Result<String> {
        nickname::normalize_invite_code(&self.code)
    }
}

impl AcceptRequestPayload {
    pub fn normalize(self) -> Result<UserId> {
        require_uid(self.from_uid, "A sender user id is required")
    }
}

impl DeclineRequestPayload {
    // Declining is unconditional and idempotent, so the uid is only trimmed.
    pub fn normalize(self) -> UserId {
        trim_uid(self.from_uid)
    }
}

impl CancelRequestPayload {
    pub fn normalize(self) -> UserId {
        trim_uid(self.to_uid)
    }
}

impl RemoveFriendPayload {
    pub fn normalize(self) -> Result<UserId> {
        require_uid(self.friend_uid, "A friend user id is required")
    }
}

impl ChangeNicknamePayload {
    pub fn normalize(self) -> Result<NormalizedNickname> {
        nickname::validate(&self.nickname)
    }
}

impl SyncProfilePayload {
    pub fn normalize(self) -> ProfileSync {
        ProfileSync {
            nickname: non_empty(self.nickname),
            photo_url: non_empty(self.photo_url),
            email: non_empty(self.email),
            provider: non_empty(self.provider),
        }
    }
}

fn trim_uid(uid: UserId) -> UserId {
    UserId(uid.0.trim().to_string())
}

fn require_uid(uid: UserId, public: &'static str) -> Result<UserId> {
    let uid = trim_uid(uid);
    if uid.is_empty() {
        return Err(LibError::invalid(public, anyhow!("empty user id")));
    }
    Ok(uid)
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
