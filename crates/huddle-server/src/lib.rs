pub mod config;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Router,
    extract::{ConnectInfo, DefaultBodyLimit, State, WebSocketUpgrade},
    response::IntoResponse,
    routing::{get, post},
};
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::info;

use huddle_api::{ApiState, ApiStateInner, pages, profile};
use huddle_db::Database;
use huddle_gateway::{Dispatcher, Engine, connection};
use huddle_types::models::Identity;

use crate::config::Config;

/// Headroom for the non-file fields of the profile form.
const FORM_OVERHEAD: usize = 64 * 1024;

#[derive(Clone)]
struct ServerState {
    engine: Engine,
    default_user: String,
}

/// Wire the engine and HTTP handlers into one router.
pub fn build_router(db: Arc<Database>, config: &Config) -> Router {
    let engine = Engine::new(db, Dispatcher::new(), config.policy());
    let api_state: ApiState = Arc::new(ApiStateInner::new(&config.upload_dir));

    let state = ServerState {
        engine,
        default_user: config.default_user.clone(),
    };

    let api_routes = Router::new()
        .route("/", get(pages::index))
        .route(
            "/update-profile",
            post(profile::update_profile)
                .layer(DefaultBodyLimit::max(profile::MAX_AVATAR_SIZE + FORM_OVERHEAD)),
        )
        .with_state(api_state);

    let ws_route = Router::new()
        .route("/socket", get(ws_upgrade))
        .with_state(state);

    Router::new()
        .merge(api_routes)
        .merge(ws_route)
        .nest_service("/uploads", ServeDir::new(&config.upload_dir))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Serve until the listener fails. Peer addresses are recorded per session.
pub async fn serve(listener: TcpListener, app: Router) -> anyhow::Result<()> {
    info!("Huddle server listening on {}", listener.local_addr()?);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}

async fn ws_upgrade(
    State(state): State<ServerState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let identity = Identity::new(state.default_user.clone());
    ws.on_upgrade(move |socket| {
        connection::handle_connection(socket, state.engine, identity, Some(peer.ip()))
    })
}
