use anyhow::anyhow;
use futures::future::BoxFuture;
use once_cell::sync::Lazy;
use sqlx::migrate::{MigrateError, Migrator};
use sqlx::{FromRow, PgConnection, PgPool};

use crate::error::{LibError, Result};
use crate::models::{
    AcceptRequestPayload, CancelRequestPayload, ChangeNicknamePayload, DeclineRequestPayload,
    FriendEdge, ProfileSnapshot, PublicProfile, ReceivedRequest, RemoveFriendPayload,
    SendByInviteCodePayload, SendByNicknamePayload, SendByUidPayload, SentRequest,
    SyncProfilePayload, UserId, UserProfile,
};
use crate::nickname;

pub static MIGRATOR: Lazy<Migrator> = Lazy::new(|| {
    let mut migrator = sqlx::migrate!("./migrations");
    migrator.set_ignore_missing(true);
    migrator
});

pub async fn create_friend_tables(pool: &PgPool) -> std::result::Result<(), MigrateError> {
    MIGRATOR.run(pool).await
}

const TX_MAX_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone, FromRow)]
struct UserRow {
    uid: String,
    email: Option<String>,
    nickname: Option<String>,
    nickname_lower: Option<String>,
    photo_url: Option<String>,
    level: Option<i32>,
    profile_index: Option<i32>,
    invite_code: Option<String>,
    provider: Option<String>,
    created_at: chrono::NaiveDateTime,
    last_login: Option<chrono::NaiveDateTime>,
    updated_at: chrono::NaiveDateTime,
}

#[derive(Debug, Clone, FromRow)]
struct PublicProfileRow {
    uid: String,
    nickname: Option<String>,
    nickname_lower: Option<String>,
    photo_url: Option<String>,
    level: Option<i32>,
    profile_index: Option<i32>,
    updated_at: chrono::NaiveDateTime,
}

#[derive(Debug, Clone, FromRow)]
struct SnapshotRow {
    nickname: Option<String>,
    nickname_lower: Option<String>,
    photo_url: Option<String>,
    level: Option<i32>,
    profile_index: Option<i32>,
}

#[derive(Debug, Clone, FromRow)]
struct SentRequestRow {
    to_uid: String,
    to_nickname: Option<String>,
    to_photo_url: Option<String>,
    created_at: chrono::NaiveDateTime,
}

#[derive(Debug, Clone, FromRow)]
struct ReceivedRequestRow {
    from_uid: String,
    from_nickname: Option<String>,
    from_photo_url: Option<String>,
    from_level: Option<i32>,
    from_profile_index: Option<i32>,
    created_at: chrono::NaiveDateTime,
}

#[derive(Debug, Clone, FromRow)]
struct FriendEdgeRow {
    friend_uid: String,
    friend_nickname: Option<String>,
    friend_photo_url: Option<String>,
    friend_level: Option<i32>,
    friend_profile_index: Option<i32>,
    created_at: chrono::NaiveDateTime,
    snapshot_at: chrono::NaiveDateTime,
}

impl From<UserRow> for UserProfile {
    fn from(value: UserRow) -> Self {
        Self {
            uid: UserId(value.uid),
            email: value.email,
            nickname: value.nickname,
            nickname_lower: value.nickname_lower,
            photo_url: value.photo_url,
            level: value.level,
            profile_index: value.profile_index,
            friend_invite_code: value.invite_code,
            provider: value.provider,
            created_at: value.created_at,
            last_login: value.last_login,
            updated_at: value.updated_at,
        }
    }
}

impl From<PublicProfileRow> for PublicProfile {
    fn from(value: PublicProfileRow) -> Self {
        Self {
            uid: UserId(value.uid),
            nickname: value.nickname,
            nickname_lower: value.nickname_lower,
            photo_url: value.photo_url,
            level: value.level,
            profile_index: value.profile_index,
            updated_at: value.updated_at,
        }
    }
}

impl From<SentRequestRow> for SentRequest {
    fn from(value: SentRequestRow) -> Self {
        Self {
            to_uid: UserId(value.to_uid),
            to_nickname: value.to_nickname,
            to_photo_url: value.to_photo_url,
            created_at: value.created_at,
        }
    }
}

impl From<ReceivedRequestRow> for ReceivedRequest {
    fn from(value: ReceivedRequestRow) -> Self {
        Self {
            from_uid: UserId(value.from_uid),
            from_nickname: value.from_nickname,
            from_photo_url: value.from_photo_url,
            from_level: value.from_level,
            from_profile_index: value.from_profile_index,
            created_at: value.created_at,
        }
    }
}

impl From<FriendEdgeRow> for FriendEdge {
    fn from(value: FriendEdgeRow) -> Self {
        Self {
            friend_uid: UserId(value.friend_uid),
            friend_nickname: value.friend_nickname,
            friend_photo_url: value.friend_photo_url,
            friend_level: value.friend_level,
            friend_profile_index: value.friend_profile_index,
            created_at: value.created_at,
            snapshot_at: value.snapshot_at,
        }
    }
}

impl SnapshotRow {
    /// Public-profile rows are trusted as stored; user rows derive the
    /// lowercase form when it was never written.
    fn into_snapshot(self, uid: UserId, derive_lower: bool) -> ProfileSnapshot {
        let nickname_lower = match (&self.nickname_lower, derive_lower) {
            (Some(lower), _) => Some(lower.clone()),
            (None, true) => self
                .nickname
                .as_deref()
                .map(|raw| nickname::normalize(raw).lower),
            (None, false) => None,
        };
        ProfileSnapshot {
            uid,
            nickname: self.nickname,
            nickname_lower,
            photo_url: self.photo_url,
            level: self.level,
            profile_index: self.profile_index,
        }
    }
}

fn db_err(public: &'static str, err: sqlx::Error) -> LibError {
    LibError::database(public, anyhow!(err))
}

pub(crate) fn is_serialization_failure(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => {
            matches!(db.code().as_deref(), Some("40001") | Some("40P01"))
        }
        _ => false,
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => db.code().as_deref() == Some("23505"),
        _ => false,
    }
}

/// Runs `body` inside a SERIALIZABLE transaction, retrying the whole body a
/// bounded number of times when the store aborts it with a serialization
/// failure. Callers never observe the conflict as an error kind.
async fn with_serializable_tx<T, F>(pool: &PgPool, mut body: F) -> Result<T>
where
    F: for<'c> FnMut(&'c mut PgConnection) -> BoxFuture<'c, Result<T>>,
{
    let mut attempt = 1u32;
    loop {
        let mut tx = pool
            .begin()
            .await
            .map_err(|err| db_err("Failed to start transaction", err))?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL SERIALIZABLE")
            .execute(&mut *tx)
            .await
            .map_err(|err| db_err("Failed to configure transaction", err))?;

        match body(&mut *tx).await {
            Ok(value) => match tx.commit().await {
                Ok(()) => return Ok(value),
                Err(err) if attempt < TX_MAX_ATTEMPTS && is_serialization_failure(&err) => {
                    attempt += 1;
                }
                Err(err) => return Err(db_err("Failed to commit transaction", err)),
            },
            Err(err) => {
                let _ = tx.rollback().await;
                if attempt < TX_MAX_ATTEMPTS && err.is_transaction_conflict() {
                    attempt += 1;
                } else {
                    return Err(err);
                }
            }
        }
    }
}

fn ensure_not_self(actor: &UserId, target: &UserId) -> Result<()> {
    if actor == target {
        return Err(LibError::invalid_with_code(
            "self_friend_request",
            "You cannot add yourself as a friend",
            anyhow!("user {} targeted themselves", actor),
        ));
    }
    Ok(())
}

fn profile_missing(uid: &UserId) -> LibError {
    LibError::failed_precondition(
        "profile_missing",
        "You do not have a profile yet",
        anyhow!("no user profile for {}", uid),
    )
}

/// Resolves the best-available identity snapshot for `uid` within the
/// caller's transaction: the public profile when present, else the private
/// user row, else `None`. Read-only.
pub async fn profile_snapshot(
    conn: &mut PgConnection,
    uid: &UserId,
) -> Result<Option<ProfileSnapshot>> {
    let public = sqlx::query_as::<_, SnapshotRow>(
        r#"
        SELECT nickname, nickname_lower, photo_url, level, profile_index
        FROM friend.public_profiles
        WHERE uid = $1
        "#,
    )
    .bind(uid.as_str())
    .fetch_optional(&mut *conn)
    .await
    .map_err(|err| db_err("Failed to read public profile", err))?;

    if let Some(row) = public {
        return Ok(Some(row.into_snapshot(uid.clone(), false)));
    }

    let user = sqlx::query_as::<_, SnapshotRow>(
        r#"
        SELECT nickname, nickname_lower, photo_url, level, profile_index
        FROM friend.users
        WHERE uid = $1
        "#,
    )
    .bind(uid.as_str())
    .fetch_optional(&mut *conn)
    .await
    .map_err(|err| db_err("Failed to read user profile", err))?;

    Ok(user.map(|row| row.into_snapshot(uid.clone(), true)))
}

async fn fetch_user_row(conn: &mut PgConnection, uid: &UserId) -> Result<Option<UserRow>> {
    sqlx::query_as::<_, UserRow>(
        r#"
        SELECT
            uid,
            email,
            nickname,
            nickname_lower,
            photo_url,
            level,
            profile_index,
            invite_code,
            provider,
            created_at,
            last_login,
            updated_at
        FROM friend.users
        WHERE uid = $1
        "#,
    )
    .bind(uid.as_str())
    .fetch_optional(&mut *conn)
    .await
    .map_err(|err| db_err("Failed to read user profile", err))
}

impl UserRow {
    fn directory_snapshot(&self) -> ProfileSnapshot {
        let nickname_lower = self.nickname_lower.clone().or_else(|| {
            self.nickname
                .as_deref()
                .map(|raw| nickname::normalize(raw).lower)
        });
        ProfileSnapshot {
            uid: UserId(self.uid.clone()),
            nickname: self.nickname.clone(),
            nickname_lower,
            photo_url: self.photo_url.clone(),
            level: self.level,
            profile_index: self.profile_index,
        }
    }
}

async fn upsert_public_profile(conn: &mut PgConnection, entry: &ProfileSnapshot) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO friend.public_profiles (
            uid,
            nickname,
            nickname_lower,
            photo_url,
            level,
            profile_index,
            updated_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, CURRENT_TIMESTAMP)
        ON CONFLICT (uid) DO UPDATE SET
            nickname = EXCLUDED.nickname,
            nickname_lower = EXCLUDED.nickname_lower,
            photo_url = EXCLUDED.photo_url,
            level = EXCLUDED.level,
            profile_index = EXCLUDED.profile_index,
            updated_at = CURRENT_TIMESTAMP
        "#,
    )
    .bind(entry.uid.as_str())
    .bind(&entry.nickname)
    .bind(&entry.nickname_lower)
    .bind(&entry.photo_url)
    .bind(entry.level)
    .bind(entry.profile_index)
    .execute(&mut *conn)
    .await
    .map_err(|err| db_err("Failed to write public profile", err))?;
    Ok(())
}

/// Publishes (or refreshes) the caller's discovery record from their private
/// profile. Fails when the caller has no profile at all.
pub async fn ensure_public_profile(pool: &PgPool, actor: &UserId) -> Result<()> {
    let actor = actor.clone();
    with_serializable_tx(pool, move |conn| {
        let actor = actor.clone();
        Box::pin(async move {
            let user = fetch_user_row(&mut *conn, &actor)
                .await?
                .ok_or_else(|| profile_missing(&actor))?;
            upsert_public_profile(&mut *conn, &user.directory_snapshot()).await
        })
    })
    .await
}

/// Merge-upserts the caller's private profile from provider identity fields.
/// Absent payload fields never clobber stored values; `last_login` is always
/// stamped.
pub async fn sync_login_profile(
    pool: &PgPool,
    actor: &UserId,
    payload: SyncProfilePayload,
) -> Result<()> {
    let sync = payload.normalize();
    sqlx::query(
        r#"
        INSERT INTO friend.users (uid, email, nickname, photo_url, provider, last_login)
        VALUES ($1, $2, $3, $4, $5, CURRENT_TIMESTAMP)
        ON CONFLICT (uid) DO UPDATE SET
            email = COALESCE(EXCLUDED.email, friend.users.email),
            nickname = COALESCE(EXCLUDED.nickname, friend.users.nickname),
            photo_url = COALESCE(EXCLUDED.photo_url, friend.users.photo_url),
            provider = COALESCE(EXCLUDED.provider, friend.users.provider),
            last_login = CURRENT_TIMESTAMP,
            updated_at = CURRENT_TIMESTAMP
        "#,
    )
    .bind(actor.as_str())
    .bind(&sync.email)
    .bind(&sync.nickname)
    .bind(&sync.photo_url)
    .bind(&sync.provider)
    .execute(pool)
    .await
    .map_err(|err| db_err("Failed to sync user profile", err))?;
    Ok(())
}

/// Refreshes an existing discovery record from the private profile. Creating
/// one remains the job of [`ensure_public_profile`]; callers treat a failure
/// here as non-fatal.
pub async fn refresh_public_directory(pool: &PgPool, uid: &UserId) -> Result<()> {
    let uid = uid.clone();
    with_serializable_tx(pool, move |conn| {
        let uid = uid.clone();
        Box::pin(async move {
            let Some(user) = fetch_user_row(&mut *conn, &uid).await? else {
                return Ok(());
            };
            let entry = user.directory_snapshot();
            sqlx::query(
                r#"
                UPDATE friend.public_profiles
                SET nickname = $2,
                    nickname_lower = $3,
                    photo_url = $4,
                    level = $5,
                    profile_index = $6,
                    updated_at = CURRENT_TIMESTAMP
                WHERE uid = $1
                "#,
            )
            .bind(uid.as_str())
            .bind(&entry.nickname)
            .bind(&entry.nickname_lower)
            .bind(&entry.photo_url)
            .bind(entry.level)
            .bind(entry.profile_index)
            .execute(&mut *conn)
            .await
            .map_err(|err| db_err("Failed to refresh public profile", err))?;
            Ok(())
        })
    })
    .await
}

/// Renames the caller and refreshes their discovery record so
/// `nickname_lower` stays the canonical lowercase of `nickname`.
pub async fn change_nickname(
    pool: &PgPool,
    actor: &UserId,
    payload: ChangeNicknamePayload,
) -> Result<()> {
    let nickname = payload.normalize()?;
    let actor = actor.clone();
    with_serializable_tx(pool, move |conn| {
        let actor = actor.clone();
        let nickname = nickname.clone();
        Box::pin(async move {
            let user = fetch_user_row(&mut *conn, &actor)
                .await?
                .ok_or_else(|| profile_missing(&actor))?;

            sqlx::query(
                r#"
                UPDATE friend.users
                SET nickname = $2,
                    nickname_lower = $3,
                    updated_at = CURRENT_TIMESTAMP
                WHERE uid = $1
                "#,
            )
            .bind(actor.as_str())
            .bind(&nickname.display)
            .bind(&nickname.lower)
            .execute(&mut *conn)
            .await
            .map_err(|err| db_err("Failed to update nickname", err))?;

            let entry = ProfileSnapshot {
                uid: actor.clone(),
                nickname: Some(nickname.display.clone()),
                nickname_lower: Some(nickname.lower.clone()),
                photo_url: user.photo_url.clone(),
                level: user.level,
                profile_index: user.profile_index,
            };
            upsert_public_profile(&mut *conn, &entry).await
        })
    })
    .await
}

async fn friend_edge_exists(conn: &mut PgConnection, a: &UserId, b: &UserId) -> Result<bool> {
    let exists: (bool,) = sqlx::query_as(
        r#"
        SELECT EXISTS(
            SELECT 1
            FROM friend.edges
            WHERE (owner_uid = $1 AND friend_uid = $2)
               OR (owner_uid = $2 AND friend_uid = $1)
        )
        "#,
    )
    .bind(a.as_str())
    .bind(b.as_str())
    .fetch_one(&mut *conn)
    .await
    .map_err(|err| db_err("Failed to query friend edges", err))?;
    Ok(exists.0)
}

// The pending state is over the unordered pair: a request in either
// direction blocks a new send.
async fn request_pending(conn: &mut PgConnection, a: &UserId, b: &UserId) -> Result<bool> {
    let pending: (bool,) = sqlx::query_as(
        r#"
        SELECT EXISTS(
            SELECT 1
            FROM friend.request_outbox
            WHERE (owner_uid = $1 AND to_uid = $2)
               OR (owner_uid = $2 AND to_uid = $1)
        )
        OR EXISTS(
            SELECT 1
            FROM friend.request_inbox
            WHERE (owner_uid = $1 AND from_uid = $2)
               OR (owner_uid = $2 AND from_uid = $1)
        )
        "#,
    )
    .bind(a.as_str())
    .bind(b.as_str())
    .fetch_one(&mut *conn)
    .await
    .map_err(|err| db_err("Failed to query pending requests", err))?;
    Ok(pending.0)
}

fn request_write_err(err: sqlx::Error) -> LibError {
    if is_unique_violation(&err) {
        LibError::already_exists(
            "request_already_pending",
            "A friend request is already pending",
            anyhow!(err),
        )
    } else {
        db_err("Failed to write friend request", err)
    }
}

async fn insert_request_pair(
    conn: &mut PgConnection,
    sender: &ProfileSnapshot,
    target: &ProfileSnapshot,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO friend.request_outbox (owner_uid, to_uid, to_nickname, to_photo_url, created_at)
        VALUES ($1, $2, $3, $4, CURRENT_TIMESTAMP)
        "#,
    )
    .bind(sender.uid.as_str())
    .bind(target.uid.as_str())
    .bind(&target.nickname)
    .bind(&target.photo_url)
    .execute(&mut *conn)
    .await
    .map_err(request_write_err)?;

    sqlx::query(
        r#"
        INSERT INTO friend.request_inbox (
            owner_uid,
            from_uid,
            from_nickname,
            from_photo_url,
            from_level,
            from_profile_index,
            created_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, CURRENT_TIMESTAMP)
        "#,
    )
    .bind(target.uid.as_str())
    .bind(sender.uid.as_str())
    .bind(&sender.nickname)
    .bind(&sender.photo_url)
    .bind(sender.level)
    .bind(sender.profile_index)
    .execute(&mut *conn)
    .await
    .map_err(request_write_err)?;

    Ok(())
}

async fn send_request_tx(
    conn: &mut PgConnection,
    from_uid: &UserId,
    to_uid: &UserId,
) -> Result<()> {
    let target = profile_snapshot(&mut *conn, to_uid).await?.ok_or_else(|| {
        LibError::not_found(
            "User not found",
            anyhow!("no profile for target {}", to_uid),
        )
    })?;
    let sender = profile_snapshot(&mut *conn, from_uid)
        .await?
        .ok_or_else(|| profile_missing(from_uid))?;

    if friend_edge_exists(&mut *conn, from_uid, to_uid).await? {
        return Err(LibError::already_exists(
            "already_friends",
            "You are already friends",
            anyhow!("edge already present between {} and {}", from_uid, to_uid),
        ));
    }
    if request_pending(&mut *conn, from_uid, to_uid).await? {
        return Err(LibError::already_exists(
            "request_already_pending",
            "A friend request is already pending",
            anyhow!("request pending between {} and {}", from_uid, to_uid),
        ));
    }

    insert_request_pair(&mut *conn, &sender, &target).await
}

/// Sends a friend request to a directly-identified user: paired outbound and
/// inbound records, each denormalized from the just-read snapshots.
pub async fn send_friend_request(
    pool: &PgPool,
    actor: &UserId,
    payload: SendByUidPayload,
) -> Result<()> {
    let to_uid = payload.normalize()?;
    ensure_not_self(actor, &to_uid)?;
    let from_uid = actor.clone();
    with_serializable_tx(pool, move |conn| {
        let from_uid = from_uid.clone();
        let to_uid = to_uid.clone();
        Box::pin(async move { send_request_tx(&mut *conn, &from_uid, &to_uid).await })
    })
    .await
}

async fn resolve_uid_by_nickname(conn: &mut PgConnection, lower: &str) -> Result<UserId> {
    let rows: Vec<(String,)> = sqlx::query_as(
        r#"
        SELECT uid
        FROM friend.public_profiles
        WHERE nickname_lower = $1
        LIMIT 3
        "#,
    )
    .bind(lower)
    .fetch_all(&mut *conn)
    .await
    .map_err(|err| db_err("Failed to search the directory", err))?;

    match rows.as_slice() {
        [] => Err(LibError::not_found(
            "User not found",
            anyhow!("no directory entry for nickname {:?}", lower),
        )),
        [(uid,)] => Ok(UserId(uid.clone())),
        _ => Err(LibError::failed_precondition(
            "ambiguous_nickname",
            "Multiple users match this nickname",
            anyhow!("{} directory entries for nickname {:?}", rows.len(), lower),
        )),
    }
}

async fn resolve_uid_by_invite_code(conn: &mut PgConnection, code: &str) -> Result<UserId> {
    let row: Option<(String,)> = sqlx::query_as(
        r#"
        SELECT uid
        FROM friend.users
        WHERE invite_code = $1
        LIMIT 1
        "#,
    )
    .bind(code)
    .fetch_optional(&mut *conn)
    .await
    .map_err(|err| db_err("Failed to look up invite code", err))?;

    row.map(|(uid,)| UserId(uid)).ok_or_else(|| {
        LibError::not_found(
            "User not found",
            anyhow!("no user for invite code {:?}", code),
        )
    })
}

/// Resolves a single directory match for the nickname, then sends the
/// request in the same transaction. Collisions are surfaced, never guessed
/// through.
pub async fn send_friend_request_by_nickname(
    pool: &PgPool,
    actor: &UserId,
    payload: SendByNicknamePayload,
) -> Result<()> {
    let nickname = payload.normalize()?;
    let from_uid = actor.clone();
    let lower = nickname.lower;
    with_serializable_tx(pool, move |conn| {
        let from_uid = from_uid.clone();
        let lower = lower.clone();
        Box::pin(async move {
            let to_uid = resolve_uid_by_nickname(&mut *conn, &lower).await?;
            ensure_not_self(&from_uid, &to_uid)?;
            send_request_tx(&mut *conn, &from_uid, &to_uid).await
        })
    })
    .await
}

pub async fn send_friend_request_by_invite_code(
    pool: &PgPool,
    actor: &UserId,
    payload: SendByInviteCodePayload,
) -> Result<()> {
    let code = payload.normalize()?;
    let from_uid = actor.clone();
    with_serializable_tx(pool, move |conn| {
        let from_uid = from_uid.clone();
        let code = code.clone();
        Box::pin(async move {
            let to_uid = resolve_uid_by_invite_code(&mut *conn, &code).await?;
            ensure_not_self(&from_uid, &to_uid)?;
            send_request_tx(&mut *conn, &from_uid, &to_uid).await
        })
    })
    .await
}

async fn insert_friend_edge(
    conn: &mut PgConnection,
    owner: &UserId,
    other: &ProfileSnapshot,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO friend.edges (
            owner_uid,
            friend_uid,
            friend_nickname,
            friend_photo_url,
            friend_level,
            friend_profile_index,
            created_at,
            snapshot_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, CURRENT_TIMESTAMP, CURRENT_TIMESTAMP)
        "#,
    )
    .bind(owner.as_str())
    .bind(other.uid.as_str())
    .bind(&other.nickname)
    .bind(&other.photo_url)
    .bind(other.level)
    .bind(other.profile_index)
    .execute(&mut *conn)
    .await
    .map_err(|err| {
        if is_unique_violation(&err) {
            LibError::already_exists("already_friends", "You are already friends", anyhow!(err))
        } else {
            db_err("Failed to write friend edge", err)
        }
    })?;
    Ok(())
}

async fn delete_request_pair(
    conn: &mut PgConnection,
    to_uid: &UserId,
    from_uid: &UserId,
) -> Result<()> {
    sqlx::query(
        r#"
        DELETE FROM friend.request_inbox
        WHERE owner_uid = $1
          AND from_uid = $2
        "#,
    )
    .bind(to_uid.as_str())
    .bind(from_uid.as_str())
    .execute(&mut *conn)
    .await
    .map_err(|err| db_err("Failed to delete friend request", err))?;

    sqlx::query(
        r#"
        DELETE FROM friend.request_outbox
        WHERE owner_uid = $1
          AND to_uid = $2
        "#,
    )
    .bind(from_uid.as_str())
    .bind(to_uid.as_str())
    .execute(&mut *conn)
    .await
    .map_err(|err| db_err("Failed to delete friend request", err))?;

    Ok(())
}

async fn accept_request_tx(
    conn: &mut PgConnection,
    to_uid: &UserId,
    from_uid: &UserId,
) -> Result<()> {
    let pair: (bool,) = sqlx::query_as(
        r#"
        SELECT EXISTS(
            SELECT 1
            FROM friend.request_inbox
            WHERE owner_uid = $1
              AND from_uid = $2
        )
        AND EXISTS(
            SELECT 1
            FROM friend.request_outbox
            WHERE owner_uid = $2
              AND to_uid = $1
        )
        "#,
    )
    .bind(to_uid.as_str())
    .bind(from_uid.as_str())
    .fetch_one(&mut *conn)
    .await
    .map_err(|err| db_err("Failed to query pending requests", err))?;

    if !pair.0 {
        return Err(LibError::failed_precondition(
            "request_not_found",
            "Request not found",
            anyhow!("no pending request from {} to {}", from_uid, to_uid),
        ));
    }

    let sender = profile_snapshot(&mut *conn, from_uid).await?.ok_or_else(|| {
        LibError::failed_precondition(
            "profile_missing",
            "Profile not found",
            anyhow!("no profile for sender {}", from_uid),
        )
    })?;
    let recipient = profile_snapshot(&mut *conn, to_uid).await?.ok_or_else(|| {
        LibError::failed_precondition(
            "profile_missing",
            "Profile not found",
            anyhow!("no profile for recipient {}", to_uid),
        )
    })?;

    insert_friend_edge(&mut *conn, to_uid, &sender).await?;
    insert_friend_edge(&mut *conn, from_uid, &recipient).await?;
    delete_request_pair(&mut *conn, to_uid, from_uid).await
}

/// Promotes a pending request into a reciprocal edge pair and clears both
/// request records. All four writes commit together or not at all.
pub async fn accept_friend_request(
    pool: &PgPool,
    actor: &UserId,
    payload: AcceptRequestPayload,
) -> Result<()> {
    let from_uid = payload.normalize()?;
    ensure_not_self(actor, &from_uid)?;
    let to_uid = actor.clone();
    with_serializable_tx(pool, move |conn| {
        let to_uid = to_uid.clone();
        let from_uid = from_uid.clone();
        Box::pin(async move { accept_request_tx(&mut *conn, &to_uid, &from_uid).await })
    })
    .await
}

/// Receiver-side rejection: deletes both paired records unconditionally.
/// Deleting absent records is not an error.
pub async fn decline_friend_request(
    pool: &PgPool,
    actor: &UserId,
    payload: DeclineRequestPayload,
) -> Result<()> {
    let from_uid = payload.normalize();
    let to_uid = actor.clone();
    with_serializable_tx(pool, move |conn| {
        let to_uid = to_uid.clone();
        let from_uid = from_uid.clone();
        Box::pin(async move { delete_request_pair(&mut *conn, &to_uid, &from_uid).await })
    })
    .await
}

/// Sender-side withdrawal, symmetric to [`decline_friend_request`].
pub async fn cancel_friend_request(
    pool: &PgPool,
    actor: &UserId,
    payload: CancelRequestPayload,
) -> Result<()> {
    let to_uid = payload.normalize();
    let from_uid = actor.clone();
    with_serializable_tx(pool, move |conn| {
        let to_uid = to_uid.clone();
        let from_uid = from_uid.clone();
        Box::pin(async move { delete_request_pair(&mut *conn, &to_uid, &from_uid).await })
    })
    .await
}

/// Deletes both sides of a friendship unconditionally and atomically.
pub async fn remove_friend(
    pool: &PgPool,
    actor: &UserId,
    payload: RemoveFriendPayload,
) -> Result<()> {
    let friend_uid = payload.normalize()?;
    ensure_not_self(actor, &friend_uid)?;
    let actor = actor.clone();
    with_serializable_tx(pool, move |conn| {
        let actor = actor.clone();
        let friend_uid = friend_uid.clone();
        Box::pin(async move {
            sqlx::query(
                r#"
                DELETE FROM friend.edges
                WHERE (owner_uid = $1 AND friend_uid = $2)
                   OR (owner_uid = $2 AND friend_uid = $1)
                "#,
            )
            .bind(actor.as_str())
            .bind(friend_uid.as_str())
            .execute(&mut *conn)
            .await
            .map_err(|err| db_err("Failed to delete friend edges", err))?;
            Ok(())
        })
    })
    .await
}

pub async fn get_user_profile(pool: &PgPool, uid: &UserId) -> Result<Option<UserProfile>> {
    let mut conn = pool
        .acquire()
        .await
        .map_err(|err| db_err("Failed to acquire connection", err))?;
    Ok(fetch_user_row(&mut *conn, uid).await?.map(UserProfile::from))
}

pub async fn get_public_profile(pool: &PgPool, uid: &UserId) -> Result<Option<PublicProfile>> {
    let row = sqlx::query_as::<_, PublicProfileRow>(
        r#"
        SELECT uid, nickname, nickname_lower, photo_url, level, profile_index, updated_at
        FROM friend.public_profiles
        WHERE uid = $1
        "#,
    )
    .bind(uid.as_str())
    .fetch_optional(pool)
    .await
    .map_err(|err| db_err("Failed to read public profile", err))?;
    Ok(row.map(PublicProfile::from))
}

pub async fn list_friends(pool: &PgPool, uid: &UserId) -> Result<Vec<FriendEdge>> {
    let rows = sqlx::query_as::<_, FriendEdgeRow>(
        r#"
        SELECT
            friend_uid,
            friend_nickname,
            friend_photo_url,
            friend_level,
            friend_profile_index,
            created_at,
            snapshot_at
        FROM friend.edges
        WHERE owner_uid = $1
        ORDER BY created_at DESC, friend_uid ASC
        "#,
    )
    .bind(uid.as_str())
    .fetch_all(pool)
    .await
    .map_err(|err| db_err("Failed to list friends", err))?;
    Ok(rows.into_iter().map(FriendEdge::from).collect())
}

pub async fn list_received_requests(pool: &PgPool, uid: &UserId) -> Result<Vec<ReceivedRequest>> {
    let rows = sqlx::query_as::<_, ReceivedRequestRow>(
        r#"
        SELECT
            from_uid,
            from_nickname,
            from_photo_url,
            from_level,
            from_profile_index,
            created_at
        FROM friend.request_inbox
        WHERE owner_uid = $1
        ORDER BY created_at DESC, from_uid ASC
        "#,
    )
    .bind(uid.as_str())
    .fetch_all(pool)
    .await
    .map_err(|err| db_err("Failed to list received requests", err))?;
    Ok(rows.into_iter().map(ReceivedRequest::from).collect())
}

pub async fn list_sent_requests(pool: &PgPool, uid: &UserId) -> Result<Vec<SentRequest>> {
    let rows = sqlx::query_as::<_, SentRequestRow>(
        r#"
        SELECT to_uid, to_nickname, to_photo_url, created_at
        FROM friend.request_outbox
        WHERE owner_uid = $1
        ORDER BY created_at DESC, to_uid ASC
        "#,
    )
    .bind(uid.as_str())
    .fetch_all(pool)
    .await
    .map_err(|err| db_err("Failed to list sent requests", err))?;
    Ok(rows.into_iter().map(SentRequest::from).collect())
}
