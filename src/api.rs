use std::{path::PathBuf, sync::Arc};

use axum::{
    extract::{Path, State as AxumState},
    routing::{delete, get, get_service, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tower_http::services::ServeDir;
use tracing::{error, info};

use crate::desk::{RaceDesk, ResultsPayload, TimesPayload};
use crate::error::Result;
use crate::persistence::save_snapshot;
use crate::types::*;

#[derive(Clone)]
pub struct ApiState {
    pub desk: SharedDesk,
    /// Where the snapshot is rewritten after a change. None keeps it in memory.
    pub snapshot_path: Option<Arc<PathBuf>>,
}

impl ApiState {
    pub fn new(desk: SharedDesk, snapshot_path: Option<PathBuf>) -> Self {
        ApiState {
            desk,
            snapshot_path: snapshot_path.map(Arc::new),
        }
    }
}

// ── Payloads ────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct AddParticipantRequest {
    pub name: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StartEventRequest {
    pub name: Option<String>,
    pub category: Option<String>,
    pub total_rounds: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct TimesRequest {
    pub times: TimesPayload,
}

#[derive(Debug, Deserialize)]
pub struct ResultsRequest {
    pub results: ResultsPayload,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoundResponse {
    pub event_id: EventId,
    pub round: Option<u32>,
}

// ── Helpers ─────────────────────────────────────────────────────────────

/// Lock the desk, run `f`, then persist the snapshot if `f` changed anything.
/// The change is already live in memory, so a failed write is logged and the
/// desk stays dirty for the next request to retry.
fn with_desk<F, R>(state: &ApiState, f: F) -> Result<R>
where
    F: FnOnce(&mut RaceDesk) -> Result<R>,
{
    let mut guard = state.desk.lock().unwrap_or_else(|e| e.into_inner());
    let out = f(&mut guard)?;
    if guard.take_dirty() {
        if let Some(path) = state.snapshot_path.as_deref() {
            if let Err(e) = save_snapshot(path, guard.store()) {
                error!("snapshot write to {} failed, will retry: {e}", path.display());
                guard.mark_dirty();
            }
        }
    }
    Ok(out)
}

// ── Handlers ────────────────────────────────────────────────────────────

async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "module": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn get_state(AxumState(state): AxumState<ApiState>) -> Result<Json<DeskView>> {
    with_desk(&state, |desk| Ok(Json(desk.desk_view())))
}

async fn list_participants(AxumState(state): AxumState<ApiState>) -> Result<Json<Vec<Participant>>> {
    with_desk(&state, |desk| Ok(Json(desk.list_participants())))
}

async fn add_participant(
    AxumState(state): AxumState<ApiState>,
    Json(body): Json<AddParticipantRequest>,
) -> Result<Json<Participant>> {
    with_desk(&state, |desk| desk.add_participant(&body.name).map(Json))
}

async fn seed_participants(
    AxumState(state): AxumState<ApiState>,
    Path(count): Path<usize>,
) -> Result<Json<Vec<Participant>>> {
    with_desk(&state, |desk| desk.seed_participants(count).map(Json))
}

async fn delete_all_participants(AxumState(state): AxumState<ApiState>) -> Result<Json<Value>> {
    with_desk(&state, |desk| {
        desk.delete_all_participants();
        Ok(Json(json!({ "deleted": true })))
    })
}

async fn delete_participant(
    AxumState(state): AxumState<ApiState>,
    Path(id): Path<ParticipantId>,
) -> Result<Json<Value>> {
    with_desk(&state, |desk| Ok(Json(json!({ "deleted": desk.delete_participant(id) }))))
}

async fn start_event(
    AxumState(state): AxumState<ApiState>,
    body: Option<Json<StartEventRequest>>,
) -> Result<Json<RoundResponse>> {
    let body = body.map(|Json(body)| body).unwrap_or_default();
    with_desk(&state, |desk| {
        let event_id = desk.start_event(body.name.as_deref(), body.total_rounds, body.category.as_deref())?;
        let round = desk.round_to_play(event_id)?;
        Ok(Json(RoundResponse { event_id, round }))
    })
}

async fn close_event(AxumState(state): AxumState<ApiState>, Path(id): Path<EventId>) -> Result<Json<Value>> {
    with_desk(&state, |desk| Ok(Json(json!({ "closed": desk.close_event(id) }))))
}

async fn round_to_play(
    AxumState(state): AxumState<ApiState>,
    Path(id): Path<EventId>,
) -> Result<Json<RoundResponse>> {
    with_desk(&state, |desk| {
        let round = desk.round_to_play(id)?;
        Ok(Json(RoundResponse { event_id: id, round }))
    })
}

async fn list_heats(
    AxumState(state): AxumState<ApiState>,
    Path((id, round)): Path<(EventId, u32)>,
) -> Result<Json<Vec<HeatCard>>> {
    with_desk(&state, |desk| desk.heats(id, round).map(Json))
}

async fn save_times(
    AxumState(state): AxumState<ApiState>,
    Path((id, round)): Path<(EventId, u32)>,
    Json(body): Json<TimesRequest>,
) -> Result<Json<Value>> {
    with_desk(&state, |desk| {
        let saved = desk.save_times(id, round, &body.times)?;
        Ok(Json(json!({ "saved": saved })))
    })
}

async fn save_results(
    AxumState(state): AxumState<ApiState>,
    Path((id, round)): Path<(EventId, u32)>,
    Json(body): Json<ResultsRequest>,
) -> Result<Json<Value>> {
    with_desk(&state, |desk| {
        let applied = desk.save_results(id, round, &body.results)?;
        let next = desk.round_to_play(id)?;
        Ok(Json(json!({ "applied": applied, "roundToPlay": next })))
    })
}

async fn bracket_view(AxumState(state): AxumState<ApiState>, Path(id): Path<EventId>) -> Result<Json<BracketView>> {
    with_desk(&state, |desk| desk.bracket_view(id).map(Json))
}

async fn leaderboard(
    AxumState(state): AxumState<ApiState>,
    Path(id): Path<EventId>,
) -> Result<Json<Vec<LeaderboardRow>>> {
    with_desk(&state, |desk| desk.leaderboard(id).map(Json))
}

async fn final_ranking(AxumState(state): AxumState<ApiState>, Path(id): Path<EventId>) -> Result<Json<Vec<Placement>>> {
    with_desk(&state, |desk| desk.final_ranking(id).map(Json))
}

async fn chrono_board(AxumState(state): AxumState<ApiState>, Path(id): Path<EventId>) -> Result<Json<Vec<ChronoRow>>> {
    with_desk(&state, |desk| desk.chrono_board(id).map(Json))
}

// ── Router ──────────────────────────────────────────────────────────────

pub fn build_router(state: ApiState, static_dir: Option<PathBuf>) -> Router {
    let router = Router::new()
        .route("/health", get(health))
        .route("/api/state", get(get_state))
        .route("/api/participants", get(list_participants).post(add_participant))
        .route("/api/participants/seed/:count", post(seed_participants))
        .route("/api/participants/delete-all", post(delete_all_participants))
        .route("/api/participants/:id", delete(delete_participant))
        .route("/api/events/start", post(start_event))
        .route("/api/events/:id/close", post(close_event))
        .route("/api/events/:id/round", get(round_to_play))
        .route("/api/events/:id/rounds/:round/heats", get(list_heats))
        .route("/api/events/:id/rounds/:round/times", post(save_times))
        .route("/api/events/:id/rounds/:round/results", post(save_results))
        .route("/api/events/:id/bracket", get(bracket_view))
        .route("/api/events/:id/leaderboard", get(leaderboard))
        .route("/api/events/:id/ranking", get(final_ranking))
        .route("/api/events/:id/chrono", get(chrono_board))
        .with_state(state);

    match static_dir {
        Some(dir) => router.fallback_service(get_service(ServeDir::new(dir))),
        None => router,
    }
}

pub async fn start_server(app: Router, addr: &str) {
    let listener = match TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("race desk failed to bind {addr}: {e}");
            return;
        }
    };
    info!("race desk listening at http://{addr}/");
    if let Err(e) = axum::serve(listener, app).await {
        error!("race desk server error: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use std::{
        fs,
        sync::{Arc, Mutex},
    };
    use tempfile::tempdir;

    fn make_state(snapshot_path: Option<PathBuf>) -> ApiState {
        let desk = RaceDesk::new(MemoryStore::new(), &AppConfig::default());
        ApiState::new(Arc::new(Mutex::new(desk)), snapshot_path)
    }

    #[test]
    fn test_change_is_written_to_snapshot() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("desk.json");
        let state = make_state(Some(path.clone()));

        with_desk(&state, |desk| desk.add_participant("Alice")).unwrap();
        let saved = crate::persistence::load_snapshot(&path).unwrap();
        assert_eq!(saved.participants().len(), 1);
        assert!(!state.desk.lock().unwrap().take_dirty());
    }

    #[test]
    fn test_failed_write_keeps_change_and_retries() {
        let dir = tempdir().unwrap();
        // a regular file where the snapshot directory should be
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, "x").unwrap();
        let state = make_state(Some(blocker.join("desk.json")));

        let added = with_desk(&state, |desk| desk.add_participant("Alice")).unwrap();
        assert_eq!(added.name, "Alice");

        let mut desk = state.desk.lock().unwrap();
        assert_eq!(desk.list_participants().len(), 1);
        assert!(desk.take_dirty());
    }

    #[test]
    fn test_failed_operation_skips_snapshot() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("desk.json");
        let state = make_state(Some(path.clone()));

        assert!(with_desk(&state, |desk| desk.add_participant("  ")).is_err());
        assert!(!path.exists());
    }
}
