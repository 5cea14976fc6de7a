use std::env;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, anyhow};
use axum::http::request::Parts;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

use friend_graph::api::{AuthenticatesCaller, Caller, FriendApp, HasPool};
use friend_graph::error::{LibError, Result as LibResult};
use friend_graph::models::UserId;

#[derive(Clone)]
struct DevAuthConfig {
    default_uid: String,
    require_dev_header: bool,
}

#[derive(Clone)]
struct DevApp {
    pool: Arc<PgPool>,
    auth: DevAuthConfig,
}

impl HasPool for DevApp {
    fn pool(&self) -> Arc<PgPool> {
        Arc::clone(&self.pool)
    }
}

impl AuthenticatesCaller for DevApp {
    fn authenticate(&self, parts: &Parts) -> LibResult<UserId> {
        let header = parts
            .headers
            .get("x-dev-user-id")
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty());

        match header {
            Some(uid) => Ok(UserId::from(uid)),
            None if self.auth.require_dev_header => Err(LibError::unauthenticated(
                "x-dev-user-id header is required",
                anyhow!("missing x-dev-user-id header"),
            )),
            None => Ok(UserId::from(self.auth.default_uid.as_str())),
        }
    }
}

impl FriendApp for DevApp {}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let database_url =
        env::var("DATABASE_URL").context("DATABASE_URL is required to run friend_server")?;
    let bind = env::var("FRIEND_SERVER_BIND").unwrap_or_else(|_| "127.0.0.1:4020".to_string());
    let bind_addr: SocketAddr = bind
        .parse()
        .with_context(|| format!("invalid FRIEND_SERVER_BIND '{}'", bind))?;

    let auth = DevAuthConfig {
        default_uid: env::var("FRIEND_SERVER_DEFAULT_UID")
            .unwrap_or_else(|_| "dev:local".to_string()),
        require_dev_header: env_flag("FRIEND_SERVER_REQUIRE_DEV_HEADER"),
    };

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .context("failed to connect to postgres")?;

    friend_graph::db::create_friend_tables(&pool)
        .await
        .context("failed to run friend migrations")?;

    let app_state = DevApp {
        pool: Arc::new(pool),
        auth,
    };

    let app = Router::new()
        .route("/healthz", get(health_handler))
        .route("/whoami", get(whoami_handler))
        .merge(friend_graph::api::routes::<DevApp>())
        .with_state(app_state);

    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("failed to bind listener on {}", bind_addr))?;

    tracing::info!("friend_server listening on http://{}", bind_addr);
    tracing::info!("auth shim header: x-dev-user-id");
    tracing::info!("set FRIEND_SERVER_REQUIRE_DEV_HEADER=true to require it");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
        .context("friend_server failed")
}

fn env_flag(name: &str) -> bool {
    match env::var(name) {
        Ok(value) => {
            let normalized = value.trim().to_ascii_lowercase();
            normalized == "1" || normalized == "true" || normalized == "yes"
        }
        Err(_) => false,
    }
}

async fn health_handler() -> Json<serde_json::Value> {
    Json(json!({
        "ok": true
    }))
}

async fn whoami_handler(Caller(actor): Caller) -> Json<serde_json::Value> {
    Json(json!({
        "uid": actor.to_string()
    }))
}
