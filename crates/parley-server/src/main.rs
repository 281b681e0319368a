use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    Router,
    extract::{ConnectInfo, Query, State, WebSocketUpgrade},
    http::StatusCode,
    middleware,
    response::IntoResponse,
    routing::{get, post},
};
use jsonwebtoken::{DecodingKey, Validation, decode};
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use parley_api::auth::{self, AppState, AppStateInner};
use parley_api::middleware::require_auth;
use parley_api::{history, uploads, users};
use parley_gateway::channel::{self, ChannelGateway};
use parley_gateway::direct::{self, DirectGateway};
use parley_gateway::dispatcher::Dispatcher;
use parley_gateway::presence::Presence;
use parley_gateway::throttle::LoginThrottle;
use parley_types::api::Claims;

#[derive(Clone)]
struct ServerState {
    app: AppState,
    channel: ChannelGateway,
    direct: DirectGateway,
    jwt_secret: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "parley=debug,tower_http=debug".into()),
        )
        .init();

    // Config
    let jwt_secret =
        std::env::var("PARLEY_JWT_SECRET").unwrap_or_else(|_| "dev-secret-change-me".into());
    let db_path = std::env::var("PARLEY_DB_PATH").unwrap_or_else(|_| "parley.db".into());
    let key_path = std::env::var("PARLEY_KEY_PATH").unwrap_or_else(|_| "parley.key".into());
    let upload_dir = std::env::var("PARLEY_UPLOAD_DIR").unwrap_or_else(|_| "uploads".into());
    let host = std::env::var("PARLEY_HOST").unwrap_or_else(|_| "0.0.0.0".into());
    let port: u16 = std::env::var("PARLEY_PORT")
        .unwrap_or_else(|_| "3000".into())
        .parse()?;

    // Persistence and the channel at-rest key
    let db = Arc::new(parley_db::Database::open(&PathBuf::from(&db_path))?);
    let key = parley_crypto::keys::load_or_generate(&PathBuf::from(&key_path))?;

    // Shared in-memory state: one throttle for both login doors, one
    // dispatcher + presence per bounded context.
    let throttle = Arc::new(LoginThrottle::new());

    let channel_gateway = ChannelGateway {
        db: db.clone(),
        dispatcher: Dispatcher::new(),
        presence: Presence::new(),
        throttle: throttle.clone(),
        key,
    };

    let direct_presence = Presence::new();
    let direct_gateway = DirectGateway {
        db: db.clone(),
        dispatcher: Dispatcher::new(),
        presence: direct_presence.clone(),
    };

    let app_state: AppState = Arc::new(AppStateInner {
        db,
        jwt_secret: jwt_secret.clone(),
        throttle,
        presence: direct_presence,
        upload_dir: PathBuf::from(&upload_dir),
    });

    let state = ServerState {
        app: app_state.clone(),
        channel: channel_gateway,
        direct: direct_gateway,
        jwt_secret,
    };

    // Routes
    let public_routes = Router::new()
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .with_state(app_state.clone());

    let protected_routes = Router::new()
        .route("/auth/logout", post(auth::logout))
        .route("/users", get(users::get_users))
        .route("/history/{partner}", get(history::get_history))
        .route("/upload", post(uploads::upload))
        .layer(middleware::from_fn(require_auth))
        .with_state(app_state);

    let ws_routes = Router::new()
        .route("/gateway/channel", get(ws_channel))
        .route("/gateway/direct", get(ws_direct))
        .with_state(state);

    let app = Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .merge(ws_routes)
        .nest_service("/uploads", ServeDir::new(upload_dir))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("Parley server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

/// Channel gateway upgrade. Connections start anonymous; the peer address
/// is captured here so the login throttle can key on it.
async fn ws_channel(
    State(state): State<ServerState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| channel::handle_connection(socket, addr, state.channel))
}

#[derive(Debug, Deserialize)]
struct DirectWsQuery {
    token: String,
}

/// Direct gateway upgrade. The JWT is validated before the upgrade so the
/// connection loop starts already authenticated.
async fn ws_direct(
    State(state): State<ServerState>,
    Query(query): Query<DirectWsQuery>,
    ws: WebSocketUpgrade,
) -> Result<impl IntoResponse, StatusCode> {
    let token_data = decode::<Claims>(
        &query.token,
        &DecodingKey::from_secret(state.jwt_secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|e| {
        warn!("direct gateway rejected token: {}", e);
        StatusCode::UNAUTHORIZED
    })?;

    let username = token_data.claims.sub;
    Ok(ws.on_upgrade(move |socket| direct::handle_connection(socket, username, state.direct)))
}
