use sqlx::PgPool;
use uuid::Uuid;

use friend_graph::db;
use friend_graph::error::ErrorKind;
use friend_graph::models::{
    AcceptRequestPayload, CancelRequestPayload, ChangeNicknamePayload, DeclineRequestPayload,
    RemoveFriendPayload, SendByInviteCodePayload, SendByNicknamePayload, SendByUidPayload,
    SyncProfilePayload, UserId,
};
use friend_graph::operations::FriendOperations;

fn mint_uid(prefix: &str) -> UserId {
    UserId::from(format!("kakao:{}-{}", prefix, Uuid::new_v4().simple()))
}

async fn seed_user(pool: &PgPool, uid: &UserId, nickname: &str, invite_code: Option<&str>) {
    sqlx::query(
        r#"
        INSERT INTO friend.users (uid, nickname, photo_url, level, profile_index, invite_code)
        VALUES ($1, $2, $3, $4, $5, $6)
        "#,
    )
    .bind(uid.as_str())
    .bind(nickname)
    .bind(format!("https://img.example/{nickname}.png"))
    .bind(7_i32)
    .bind(1_i32)
    .bind(invite_code)
    .execute(pool)
    .await
    .expect("seed user row");
}

fn send_to(to: &UserId) -> SendByUidPayload {
    SendByUidPayload {
        to_uid: to.clone(),
    }
}

#[sqlx::test(migrations = "./migrations")]
async fn send_then_accept_creates_reciprocal_edges(pool: PgPool) {
    let ops = FriendOperations::from_pool(&pool);
    let alice = mint_uid("alice");
    let bora = mint_uid("bora");
    seed_user(&pool, &alice, "alice", None).await;
    seed_user(&pool, &bora, "bora", None).await;

    ops.send_request_by_uid(&alice, send_to(&bora))
        .await
        .expect("send should succeed");

    let sent = db::list_sent_requests(&pool, &alice)
        .await
        .expect("list sent");
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to_uid, bora);
    assert_eq!(sent[0].to_nickname.as_deref(), Some("bora"));

    let received = db::list_received_requests(&pool, &bora)
        .await
        .expect("list received");
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].from_uid, alice);
    assert_eq!(received[0].from_nickname.as_deref(), Some("alice"));
    assert_eq!(received[0].from_level, Some(7));

    ops.accept_request(
        &bora,
        AcceptRequestPayload {
            from_uid: alice.clone(),
        },
    )
    .await
    .expect("accept should succeed");

    let alice_friends = db::list_friends(&pool, &alice).await.expect("list friends");
    assert_eq!(alice_friends.len(), 1);
    assert_eq!(alice_friends[0].friend_uid, bora);
    assert_eq!(alice_friends[0].friend_nickname.as_deref(), Some("bora"));

    let bora_friends = db::list_friends(&pool, &bora).await.expect("list friends");
    assert_eq!(bora_friends.len(), 1);
    assert_eq!(bora_friends[0].friend_uid, alice);
    assert_eq!(bora_friends[0].friend_nickname.as_deref(), Some("alice"));

    assert!(db::list_sent_requests(&pool, &alice)
        .await
        .expect("list sent")
        .is_empty());
    assert!(db::list_received_requests(&pool, &bora)
        .await
        .expect("list received")
        .is_empty());
}

#[sqlx::test(migrations = "./migrations")]
async fn duplicate_send_is_rejected(pool: PgPool) {
    let ops = FriendOperations::from_pool(&pool);
    let alice = mint_uid("alice");
    let bora = mint_uid("bora");
    seed_user(&pool, &alice, "alice", None).await;
    seed_user(&pool, &bora, "bora", None).await;

    ops.send_request_by_uid(&alice, send_to(&bora))
        .await
        .expect("first send should succeed");
    let err = ops
        .send_request_by_uid(&alice, send_to(&bora))
        .await
        .expect_err("second send should fail");
    assert_eq!(err.kind, ErrorKind::AlreadyExists);
    assert_eq!(err.code, "request_already_pending");
}

#[sqlx::test(migrations = "./migrations")]
async fn reverse_direction_send_is_rejected(pool: PgPool) {
    let ops = FriendOperations::from_pool(&pool);
    let alice = mint_uid("alice");
    let bora = mint_uid("bora");
    seed_user(&pool, &alice, "alice", None).await;
    seed_user(&pool, &bora, "bora", None).await;

    ops.send_request_by_uid(&alice, send_to(&bora))
        .await
        .expect("send should succeed");
    let err = ops
        .send_request_by_uid(&bora, send_to(&alice))
        .await
        .expect_err("reverse send should fail");
    assert_eq!(err.kind, ErrorKind::AlreadyExists);
}

#[sqlx::test(migrations = "./migrations")]
async fn send_to_an_existing_friend_is_rejected(pool: PgPool) {
    let ops = FriendOperations::from_pool(&pool);
    let alice = mint_uid("alice");
    let bora = mint_uid("bora");
    seed_user(&pool, &alice, "alice", None).await;
    seed_user(&pool, &bora, "bora", None).await;

    ops.send_request_by_uid(&alice, send_to(&bora))
        .await
        .expect("send should succeed");
    ops.accept_request(
        &bora,
        AcceptRequestPayload {
            from_uid: alice.clone(),
        },
    )
    .await
    .expect("accept should succeed");

    let err = ops
        .send_request_by_uid(&alice, send_to(&bora))
        .await
        .expect_err("sending to a friend should fail");
    assert_eq!(err.kind, ErrorKind::AlreadyExists);
    assert_eq!(err.code, "already_friends");
}

#[sqlx::test(migrations = "./migrations")]
async fn remove_returns_the_pair_to_none(pool: PgPool) {
    let ops = FriendOperations::from_pool(&pool);
    let alice = mint_uid("alice");
    let bora = mint_uid("bora");
    seed_user(&pool, &alice, "alice", None).await;
    seed_user(&pool, &bora, "bora", None).await;

    ops.send_request_by_uid(&alice, send_to(&bora))
        .await
        .expect("send should succeed");
    ops.accept_request(
        &bora,
        AcceptRequestPayload {
            from_uid: alice.clone(),
        },
    )
    .await
    .expect("accept should succeed");

    ops.remove_friend(
        &alice,
        RemoveFriendPayload {
            friend_uid: bora.clone(),
        },
    )
    .await
    .expect("remove should succeed");

    assert!(db::list_friends(&pool, &alice)
        .await
        .expect("list friends")
        .is_empty());
    assert!(db::list_friends(&pool, &bora)
        .await
        .expect("list friends")
        .is_empty());

    // The pair is back to NONE, so a fresh request goes through.
    ops.send_request_by_uid(&alice, send_to(&bora))
        .await
        .expect("resend should succeed");
}

#[sqlx::test(migrations = "./migrations")]
async fn decline_clears_both_records_and_is_idempotent(pool: PgPool) {
    let ops = FriendOperations::from_pool(&pool);
    let alice = mint_uid("alice");
    let bora = mint_uid("bora");
    seed_user(&pool, &alice, "alice", None).await;
    seed_user(&pool, &bora, "bora", None).await;

    ops.send_request_by_uid(&alice, send_to(&bora))
        .await
        .expect("send should succeed");

    ops.decline_request(
        &bora,
        DeclineRequestPayload {
            from_uid: alice.clone(),
        },
    )
    .await
    .expect("decline should succeed");

    assert!(db::list_sent_requests(&pool, &alice)
        .await
        .expect("list sent")
        .is_empty());
    assert!(db::list_received_requests(&pool, &bora)
        .await
        .expect("list received")
        .is_empty());

    ops.decline_request(
        &bora,
        DeclineRequestPayload {
            from_uid: alice.clone(),
        },
    )
    .await
    .expect("repeated decline should not be an error");
}

#[sqlx::test(migrations = "./migrations")]
async fn cancel_clears_both_records(pool: PgPool) {
    let ops = FriendOperations::from_pool(&pool);
    let alice = mint_uid("alice");
    let bora = mint_uid("bora");
    seed_user(&pool, &alice, "alice", None).await;
    seed_user(&pool, &bora, "bora", None).await;

    ops.send_request_by_uid(&alice, send_to(&bora))
        .await
        .expect("send should succeed");

    ops.cancel_request(
        &alice,
        CancelRequestPayload {
            to_uid: bora.clone(),
        },
    )
    .await
    .expect("cancel should succeed");

    assert!(db::list_sent_requests(&pool, &alice)
        .await
        .expect("list sent")
        .is_empty());
    assert!(db::list_received_requests(&pool, &bora)
        .await
        .expect("list received")
        .is_empty());
}

#[sqlx::test(migrations = "./migrations")]
async fn send_by_nickname_resolves_a_single_match(pool: PgPool) {
    let ops = FriendOperations::from_pool(&pool);
    let alice = mint_uid("alice");
    let bora = mint_uid("bora");
    seed_user(&pool, &alice, "alice", None).await;
    seed_user(&pool, &bora, "BoraCat", None).await;

    ops.ensure_public_profile(&bora)
        .await
        .expect("publish directory entry");

    ops.send_request_by_nickname(
        &alice,
        SendByNicknamePayload {
            nickname: " boracat ".to_string(),
        },
    )
    .await
    .expect("nickname send should succeed");

    let received = db::list_received_requests(&pool, &bora)
        .await
        .expect("list received");
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].from_uid, alice);
}

#[sqlx::test(migrations = "./migrations")]
async fn ambiguous_nickname_is_surfaced_not_guessed(pool: PgPool) {
    let ops = FriendOperations::from_pool(&pool);
    let alice = mint_uid("alice");
    let twin_a = mint_uid("twina");
    let twin_b = mint_uid("twinb");
    seed_user(&pool, &alice, "alice", None).await;
    seed_user(&pool, &twin_a, "Twins", None).await;
    seed_user(&pool, &twin_b, "twins", None).await;

    ops.ensure_public_profile(&twin_a)
        .await
        .expect("publish twin a");
    ops.ensure_public_profile(&twin_b)
        .await
        .expect("publish twin b");

    let err = ops
        .send_request_by_nickname(
            &alice,
            SendByNicknamePayload {
                nickname: "twins".to_string(),
            },
        )
        .await
        .expect_err("colliding nicknames should fail");
    assert_eq!(err.kind, ErrorKind::FailedPrecondition);
    assert_eq!(err.code, "ambiguous_nickname");

    assert!(db::list_sent_requests(&pool, &alice)
        .await
        .expect("list sent")
        .is_empty());
}

#[sqlx::test(migrations = "./migrations")]
async fn unknown_nickname_is_not_found(pool: PgPool) {
    let ops = FriendOperations::from_pool(&pool);
    let alice = mint_uid("alice");
    seed_user(&pool, &alice, "alice", None).await;

    let err = ops
        .send_request_by_nickname(
            &alice,
            SendByNicknamePayload {
                nickname: "nobody".to_string(),
            },
        )
        .await
        .expect_err("unknown nickname should fail");
    assert_eq!(err.kind, ErrorKind::NotFound);
}

#[sqlx::test(migrations = "./migrations")]
async fn send_by_invite_code_uppercases_the_code(pool: PgPool) {
    let ops = FriendOperations::from_pool(&pool);
    let alice = mint_uid("alice");
    let bora = mint_uid("bora");
    seed_user(&pool, &alice, "alice", None).await;
    seed_user(&pool, &bora, "bora", Some("AB12CD")).await;

    ops.send_request_by_invite_code(
        &alice,
        SendByInviteCodePayload {
            code: "  ab12cd  ".to_string(),
        },
    )
    .await
    .expect("invite code send should succeed");

    let received = db::list_received_requests(&pool, &bora)
        .await
        .expect("list received");
    assert_eq!(received.len(), 1);

    let err = ops
        .send_request_by_invite_code(
            &alice,
            SendByInviteCodePayload {
                code: "ZZZZZZ".to_string(),
            },
        )
        .await
        .expect_err("unknown code should fail");
    assert_eq!(err.kind, ErrorKind::NotFound);
}

#[sqlx::test(migrations = "./migrations")]
async fn self_targeting_is_invalid_regardless_of_existence(pool: PgPool) {
    let ops = FriendOperations::from_pool(&pool);
    let ghost = mint_uid("ghost");

    let err = ops
        .send_request_by_uid(&ghost, send_to(&ghost))
        .await
        .expect_err("self send should fail");
    assert_eq!(err.kind, ErrorKind::InvalidArgument);
    assert_eq!(err.code, "self_friend_request");

    // Resolution paths reject self after the lookup as well.
    let me = mint_uid("me");
    seed_user(&pool, &me, "myself", None).await;
    ops.ensure_public_profile(&me).await.expect("publish me");
    let err = ops
        .send_request_by_nickname(
            &me,
            SendByNicknamePayload {
                nickname: "myself".to_string(),
            },
        )
        .await
        .expect_err("self send by nickname should fail");
    assert_eq!(err.kind, ErrorKind::InvalidArgument);
}

#[sqlx::test(migrations = "./migrations")]
async fn send_preconditions_map_to_distinct_failures(pool: PgPool) {
    let ops = FriendOperations::from_pool(&pool);
    let alice = mint_uid("alice");
    let bora = mint_uid("bora");
    seed_user(&pool, &alice, "alice", None).await;

    // Target missing entirely.
    let err = ops
        .send_request_by_uid(&alice, send_to(&bora))
        .await
        .expect_err("missing target should fail");
    assert_eq!(err.kind, ErrorKind::NotFound);

    // Sender has no profile of their own.
    seed_user(&pool, &bora, "bora", None).await;
    let nobody = mint_uid("nobody");
    let err = ops
        .send_request_by_uid(&nobody, send_to(&bora))
        .await
        .expect_err("profileless sender should fail");
    assert_eq!(err.kind, ErrorKind::FailedPrecondition);
    assert_eq!(err.code, "profile_missing");
}

#[sqlx::test(migrations = "./migrations")]
async fn accept_without_a_pending_request_fails(pool: PgPool) {
    let ops = FriendOperations::from_pool(&pool);
    let alice = mint_uid("alice");
    let bora = mint_uid("bora");
    seed_user(&pool, &alice, "alice", None).await;
    seed_user(&pool, &bora, "bora", None).await;

    let err = ops
        .accept_request(
            &bora,
            AcceptRequestPayload {
                from_uid: alice.clone(),
            },
        )
        .await
        .expect_err("accept without request should fail");
    assert_eq!(err.kind, ErrorKind::FailedPrecondition);
    assert_eq!(err.code, "request_not_found");
}

#[sqlx::test(migrations = "./migrations")]
async fn ensure_public_profile_requires_a_user_row(pool: PgPool) {
    let ops = FriendOperations::from_pool(&pool);
    let ghost = mint_uid("ghost");

    let err = ops
        .ensure_public_profile(&ghost)
        .await
        .expect_err("missing user row should fail");
    assert_eq!(err.kind, ErrorKind::FailedPrecondition);
    assert_eq!(err.code, "profile_missing");
}

#[sqlx::test(migrations = "./migrations")]
async fn ensure_public_profile_derives_the_lowercase_nickname(pool: PgPool) {
    let ops = FriendOperations::from_pool(&pool);
    let bora = mint_uid("bora");
    seed_user(&pool, &bora, "MixedCase", None).await;

    ops.ensure_public_profile(&bora)
        .await
        .expect("publish directory entry");

    let public = db::get_public_profile(&pool, &bora)
        .await
        .expect("read public profile")
        .expect("public profile should exist");
    assert_eq!(public.nickname.as_deref(), Some("MixedCase"));
    assert_eq!(public.nickname_lower.as_deref(), Some("mixedcase"));
}

#[sqlx::test(migrations = "./migrations")]
async fn snapshot_prefers_the_public_profile(pool: PgPool) {
    let ops = FriendOperations::from_pool(&pool);
    let bora = mint_uid("bora");
    seed_user(&pool, &bora, "BeforeRename", None).await;
    ops.ensure_public_profile(&bora)
        .await
        .expect("publish directory entry");

    // Drift the private row without refreshing the directory.
    sqlx::query("UPDATE friend.users SET nickname = $2 WHERE uid = $1")
        .bind(bora.as_str())
        .bind("AfterRename")
        .execute(&pool)
        .await
        .expect("drift private nickname");

    let mut conn = pool.acquire().await.expect("acquire connection");
    let snapshot = db::profile_snapshot(&mut *conn, &bora)
        .await
        .expect("read snapshot")
        .expect("snapshot should exist");
    assert_eq!(snapshot.nickname.as_deref(), Some("BeforeRename"));
}

#[sqlx::test(migrations = "./migrations")]
async fn change_nickname_updates_user_and_directory(pool: PgPool) {
    let ops = FriendOperations::from_pool(&pool);
    let bora = mint_uid("bora");
    seed_user(&pool, &bora, "OldName", None).await;
    ops.ensure_public_profile(&bora)
        .await
        .expect("publish directory entry");

    ops.change_nickname(
        &bora,
        ChangeNicknamePayload {
            nickname: "  새이름  ".to_string(),
        },
    )
    .await
    .expect("rename should succeed");

    let user = db::get_user_profile(&pool, &bora)
        .await
        .expect("read user")
        .expect("user should exist");
    assert_eq!(user.nickname.as_deref(), Some("새이름"));
    assert_eq!(user.nickname_lower.as_deref(), Some("새이름"));

    let public = db::get_public_profile(&pool, &bora)
        .await
        .expect("read public profile")
        .expect("public profile should exist");
    assert_eq!(public.nickname.as_deref(), Some("새이름"));
    assert_eq!(public.nickname_lower.as_deref(), Some("새이름"));

    let err = ops
        .change_nickname(
            &bora,
            ChangeNicknamePayload {
                nickname: "a".to_string(),
            },
        )
        .await
        .expect_err("invalid nickname should fail");
    assert_eq!(err.kind, ErrorKind::InvalidArgument);
    assert_eq!(err.code, "nickname_invalid");
}

#[sqlx::test(migrations = "./migrations")]
async fn change_nickname_requires_a_user_row(pool: PgPool) {
    let ops = FriendOperations::from_pool(&pool);
    let ghost = mint_uid("ghost");

    let err = ops
        .change_nickname(
            &ghost,
            ChangeNicknamePayload {
                nickname: "유령".to_string(),
            },
        )
        .await
        .expect_err("missing user row should fail");
    assert_eq!(err.kind, ErrorKind::FailedPrecondition);
}

#[sqlx::test(migrations = "./migrations")]
async fn concurrent_duplicate_sends_leave_one_request_pair(pool: PgPool) {
    let ops = FriendOperations::from_pool(&pool);
    let alice = mint_uid("alice");
    let bora = mint_uid("bora");
    seed_user(&pool, &alice, "alice", None).await;
    seed_user(&pool, &bora, "bora", None).await;

    let (first, second) = tokio::join!(
        ops.send_request_by_uid(&alice, send_to(&bora)),
        ops.send_request_by_uid(&alice, send_to(&bora)),
    );

    let results = [first, second];
    let successes = results.iter().filter(|result| result.is_ok()).count();
    assert_eq!(successes, 1, "exactly one racing send should win");
    let loser = results
        .into_iter()
        .find_map(|result| result.err())
        .expect("one racing send should lose");
    assert_eq!(loser.kind, ErrorKind::AlreadyExists);

    assert_eq!(
        db::list_sent_requests(&pool, &alice)
            .await
            .expect("list sent")
            .len(),
        1
    );
    assert_eq!(
        db::list_received_requests(&pool, &bora)
            .await
            .expect("list received")
            .len(),
        1
    );
}

#[sqlx::test(migrations = "./migrations")]
async fn sync_profile_merges_and_refreshes_the_directory(pool: PgPool) {
    let ops = FriendOperations::from_pool(&pool);
    let bora = mint_uid("bora");

    ops.sync_profile(
        &bora,
        SyncProfilePayload {
            nickname: Some("보라".to_string()),
            photo_url: Some("https://img.example/v1.png".to_string()),
            email: Some("bora@example.com".to_string()),
            provider: Some("kakao".to_string()),
        },
    )
    .await
    .expect("first sync should succeed");

    ops.ensure_public_profile(&bora)
        .await
        .expect("publish directory entry");

    // Absent fields keep their stored values; present fields are refreshed
    // in both the private row and the directory.
    ops.sync_profile(
        &bora,
        SyncProfilePayload {
            nickname: None,
            photo_url: Some("https://img.example/v2.png".to_string()),
            email: None,
            provider: None,
        },
    )
    .await
    .expect("second sync should succeed");

    let user = db::get_user_profile(&pool, &bora)
        .await
        .expect("read user")
        .expect("user should exist");
    assert_eq!(user.nickname.as_deref(), Some("보라"));
    assert_eq!(user.email.as_deref(), Some("bora@example.com"));
    assert_eq!(user.photo_url.as_deref(), Some("https://img.example/v2.png"));
    assert!(user.last_login.is_some());

    let public = db::get_public_profile(&pool, &bora)
        .await
        .expect("read public profile")
        .expect("public profile should exist");
    assert_eq!(
        public.photo_url.as_deref(),
        Some("https://img.example/v2.png")
    );
}

#[sqlx::test(migrations = "./migrations")]
async fn sync_profile_does_not_create_a_directory_entry(pool: PgPool) {
    let ops = FriendOperations::from_pool(&pool);
    let bora = mint_uid("bora");

    ops.sync_profile(
        &bora,
        SyncProfilePayload {
            nickname: Some("보라".to_string()),
            photo_url: None,
            email: None,
            provider: Some("kakao".to_string()),
        },
    )
    .await
    .expect("sync should succeed");

    assert!(db::get_public_profile(&pool, &bora)
        .await
        .expect("read public profile")
        .is_none());
}
