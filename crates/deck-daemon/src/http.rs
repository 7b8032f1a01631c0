use crate::core::DeckEvent;
use crate::BroadcastMessage;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Json, Response,
    },
    routing::{get, post},
    Router,
};
use deck_proto::protocol::{Album, Command, DeckSnapshot};
use deck_proto::state::SnapshotStore;
use futures_util::Stream;
use serde::Deserialize;
use std::convert::Infallible;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::sync::mpsc::{self, error::TrySendError};
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tracing::{debug, error, info, warn};

#[derive(Clone)]
struct HttpState {
    snapshot: Arc<SnapshotStore>,
    event_tx: mpsc::Sender<DeckEvent>,
    broadcast_tx: broadcast::Sender<BroadcastMessage>,
}

#[derive(Debug, Deserialize)]
struct AutoplayQuery {
    autoplay: Option<bool>,
}

pub fn start_server(
    bind_address: String,
    port: u16,
    snapshot: Arc<SnapshotStore>,
    event_tx: mpsc::Sender<DeckEvent>,
    broadcast_tx: broadcast::Sender<BroadcastMessage>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let app = router(HttpState {
            snapshot,
            event_tx,
            broadcast_tx,
        });

        let addr = format!("{}:{}", bind_address, port);
        let listener = match TcpListener::bind(&addr).await {
            Ok(l) => l,
            Err(e) => {
                error!("Failed to bind HTTP server to {}: {}", addr, e);
                return;
            }
        };

        info!("HTTP API server listening on http://{}", addr);

        if let Err(e) = axum::serve(listener, app).await {
            error!("HTTP server error: {}", e);
        }
    })
}

fn router(state: HttpState) -> Router {
    Router::new()
        .route("/api/state", get(get_state))
        .route("/api/albums", get(get_albums))
        .route("/api/albums/refresh", post(refresh_albums))
        .route("/api/load/:folder", post(load_album))
        .route("/api/play/:idx", post(play_index))
        .route("/api/toggle", post(toggle))
        .route("/api/next", post(next))
        .route("/api/prev", post(prev))
        .route("/api/seek/:fraction", post(seek))
        .route("/api/volume/:value", post(set_volume))
        .route("/api/mute", post(toggle_mute))
        .route("/api/events", get(events))
        .layer(ServiceBuilder::new().layer(CorsLayer::permissive()))
        .with_state(state)
}

/// Queue `cmd` for the core and answer with the snapshot as it is now.
async fn enqueue(state: &HttpState, cmd: Command) -> Response {
    info!("HTTP API: {:?}", cmd);
    match state.event_tx.try_send(DeckEvent::Command(cmd)) {
        Ok(()) => (StatusCode::ACCEPTED, Json(state.snapshot.get().await)).into_response(),
        Err(TrySendError::Full(_)) => {
            warn!("HTTP API: event channel full, rejecting command");
            StatusCode::SERVICE_UNAVAILABLE.into_response()
        }
        Err(TrySendError::Closed(_)) => {
            error!("HTTP API: daemon core is gone");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn get_state(State(state): State<HttpState>) -> Json<DeckSnapshot> {
    Json(state.snapshot.get().await)
}

async fn get_albums(State(state): State<HttpState>) -> Json<Vec<Album>> {
    Json(state.snapshot.get().await.albums)
}

async fn refresh_albums(State(state): State<HttpState>) -> Response {
    enqueue(&state, Command::RefreshAlbums).await
}

async fn load_album(
    State(state): State<HttpState>,
    Path(folder): Path<String>,
    Query(query): Query<AutoplayQuery>,
) -> Response {
    let cmd = Command::LoadAlbum {
        folder,
        autoplay: query.autoplay.unwrap_or(false),
    };
    enqueue(&state, cmd).await
}

async fn play_index(
    State(state): State<HttpState>,
    Path(index): Path<usize>,
    Query(query): Query<AutoplayQuery>,
) -> Response {
    let cmd = Command::PlayIndex {
        index,
        autoplay: query.autoplay.unwrap_or(true),
    };
    enqueue(&state, cmd).await
}

async fn toggle(State(state): State<HttpState>) -> Response {
    enqueue(&state, Command::TogglePause).await
}

async fn next(State(state): State<HttpState>) -> Response {
    enqueue(&state, Command::Next).await
}

async fn prev(State(state): State<HttpState>) -> Response {
    enqueue(&state, Command::Prev).await
}

async fn seek(State(state): State<HttpState>, Path(fraction): Path<f64>) -> Response {
    enqueue(&state, Command::SeekFraction { fraction }).await
}

async fn set_volume(State(state): State<HttpState>, Path(value): Path<f32>) -> Response {
    enqueue(&state, Command::Volume { value }).await
}

async fn toggle_mute(State(state): State<HttpState>) -> Response {
    enqueue(&state, Command::ToggleMute).await
}

fn state_event(snapshot: &DeckSnapshot) -> Event {
    Event::default()
        .event("state")
        .json_data(snapshot)
        .unwrap_or_else(|e| Event::default().event("error").data(e.to_string()))
}

/// Server-sent events: the current snapshot first, then `state` on every
/// update and `log` for each forwarded log line.
async fn events(State(state): State<HttpState>) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = state.broadcast_tx.subscribe();
    let first = state_event(&state.snapshot.get().await);

    let stream = futures_util::stream::unfold(
        (rx, state.snapshot, Some(first)),
        |(mut rx, snapshot, first)| async move {
            if let Some(event) = first {
                return Some((Ok::<_, Infallible>(event), (rx, snapshot, None)));
            }
            loop {
                let event = match rx.recv().await {
                    Ok(BroadcastMessage::StateUpdated) => state_event(&snapshot.get().await),
                    Ok(BroadcastMessage::Log(line)) => Event::default().event("log").data(line),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        debug!("HTTP API: event stream lagged by {} messages", n);
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                };
                return Some((Ok(event), (rx, snapshot, None)));
            }
        },
    );

    Sse::new(stream).keep_alive(KeepAlive::default())
}
