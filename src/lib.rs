#[cfg(feature = "api")]
pub mod api;
pub mod db;
pub mod error;
pub mod models;
pub mod nickname;
pub mod operations;

pub mod prelude {
    #[cfg(feature = "api")]
    pub use crate::api::{AuthenticatesCaller, Caller, FriendApp, HasPool};
    pub use crate::db::{
        accept_friend_request, cancel_friend_request, change_nickname, create_friend_tables,
        decline_friend_request, ensure_public_profile, list_friends, list_received_requests,
        list_sent_requests, remove_friend, send_friend_request,
        send_friend_request_by_invite_code, send_friend_request_by_nickname, sync_login_profile,
    };
    pub use crate::error::{ErrorKind, LibError, Result};
    pub use crate::models::{
        AcceptRequestPayload, Ack, CancelRequestPayload, ChangeNicknamePayload,
        DeclineRequestPayload, FriendEdge, ProfileSnapshot, PublicProfile, ReceivedRequest,
        RemoveFriendPayload, SendByInviteCodePayload, SendByNicknamePayload, SendByUidPayload,
        SentRequest, SyncProfilePayload, UserId, UserProfile,
    };
    pub use crate::nickname::NormalizedNickname;
    pub use crate::operations::{FriendOperation, FriendOperationResult, FriendOperations};
}
