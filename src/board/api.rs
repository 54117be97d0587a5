//! REST surface of the board server. Handlers stay thin: decode, validate
//! the scope fields by hand so errors keep stable codes, then delegate to
//! the store and let `ApiError` shape the response.

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, patch, post},
};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;

use crate::errors::BoardError;

use super::db::{DbHandle, ItemChanges, NewItem};
use super::feed::{self, FeedConfig};
use super::models::{BoardState, Claim, ItemType, Mission, MoveOutcome, Priority, Project, StageId, WorkItem};
use super::sse::sse_response;

#[derive(Clone)]
pub struct AppState {
    pub db: DbHandle,
    pub feed: FeedConfig,
}

/// `BoardError` carrier that renders as `{"error": message, "code": code}`
/// with the status the taxonomy prescribes.
pub struct ApiError(BoardError);

impl From<BoardError> for ApiError {
    fn from(e: BoardError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            BoardError::ProjectNotFound { .. }
            | BoardError::ItemNotFound { .. }
            | BoardError::MissionNotFound { .. } => StatusCode::NOT_FOUND,
            BoardError::InvalidTransition { .. }
            | BoardError::WipLimitExceeded { .. }
            | BoardError::ClaimConflict { .. } => StatusCode::CONFLICT,
            BoardError::UnknownStage { .. } | BoardError::Validation(_) => StatusCode::BAD_REQUEST,
            BoardError::Storage(_) | BoardError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!("Request failed: {}", self.0);
        }
        let body = json!({"error": self.0.to_string(), "code": self.0.code()});
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

fn require_field<T>(value: Option<T>, name: &str) -> Result<T, BoardError> {
    value.ok_or_else(|| BoardError::Validation(format!("Missing required field: {}", name)))
}

fn parse_stage(value: String) -> Result<StageId, BoardError> {
    value
        .parse::<StageId>()
        .map_err(|_| BoardError::UnknownStage { value })
}

pub fn api_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/projects", post(create_project).get(list_projects))
        .route("/api/board", get(get_board))
        .route("/api/projects/{id}/items", post(create_item))
        .route("/api/items/{id}", patch(update_item))
        .route("/api/items/{id}/move", patch(move_item))
        .route("/api/items/{id}/claim", post(claim_item))
        .route("/api/items/{id}/release", post(release_item))
        .route("/api/items/{id}/archive", post(archive_item))
        .route("/api/projects/{id}/missions", post(create_mission))
        .route("/api/missions/{id}/complete", post(complete_mission))
        .route("/api/missions/{id}/archive", post(archive_mission))
        .route("/api/events", get(events))
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

// ── Projects and board ────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct CreateProjectPayload {
    name: Option<String>,
}

async fn create_project(
    State(state): State<AppState>,
    Json(payload): Json<CreateProjectPayload>,
) -> ApiResult<(StatusCode, Json<Project>)> {
    let name = require_field(payload.name, "name")?;
    let project = state.db.call(move |db| db.create_project(&name)).await?;
    tracing::info!("Created project {} '{}'", project.id, project.name);
    Ok((StatusCode::CREATED, Json(project)))
}

async fn list_projects(State(state): State<AppState>) -> ApiResult<Json<Vec<Project>>> {
    let projects = state.db.call(|db| db.list_projects()).await?;
    Ok(Json(projects))
}

#[derive(Debug, Deserialize)]
struct BoardQuery {
    project_id: Option<i64>,
    #[serde(default)]
    include_completed: bool,
}

async fn get_board(
    State(state): State<AppState>,
    Query(query): Query<BoardQuery>,
) -> ApiResult<Json<BoardState>> {
    let project_id = require_field(query.project_id, "project_id")?;
    let include_completed = query.include_completed;
    let board = state
        .db
        .call(move |db| db.read_board(project_id, include_completed))
        .await?;
    Ok(Json(board))
}

// ── Items ─────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct CreateItemPayload {
    title: Option<String>,
    description: Option<String>,
    item_type: Option<String>,
    priority: Option<String>,
    stage: Option<String>,
    #[serde(default)]
    dependencies: Vec<i64>,
    agent: Option<String>,
}

async fn create_item(
    State(state): State<AppState>,
    Path(project_id): Path<i64>,
    Json(payload): Json<CreateItemPayload>,
) -> ApiResult<(StatusCode, Json<WorkItem>)> {
    let title = require_field(payload.title, "title")?;
    let item_type = match payload.item_type {
        Some(v) => v.parse::<ItemType>().map_err(BoardError::Validation)?,
        None => ItemType::Feature,
    };
    let priority = match payload.priority {
        Some(v) => v.parse::<Priority>().map_err(BoardError::Validation)?,
        None => Priority::Medium,
    };
    let stage = match payload.stage {
        Some(v) => parse_stage(v)?,
        None => StageId::Briefings,
    };
    let spec = NewItem {
        title,
        description: payload.description.unwrap_or_default(),
        item_type,
        priority,
        stage,
        dependencies: payload.dependencies,
        agent: payload.agent.unwrap_or_else(|| "system".to_string()),
    };
    let item = state.db.call(move |db| db.create_item(project_id, spec)).await?;
    tracing::info!(
        "Created item {} '{}' in project {}",
        item.id,
        item.title,
        project_id
    );
    Ok((StatusCode::CREATED, Json(item)))
}

#[derive(Debug, Deserialize)]
struct UpdateItemPayload {
    project_id: Option<i64>,
    title: Option<String>,
    description: Option<String>,
    priority: Option<String>,
    agent: Option<String>,
}

async fn update_item(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(payload): Json<UpdateItemPayload>,
) -> ApiResult<Json<WorkItem>> {
    let project_id = require_field(payload.project_id, "project_id")?;
    let priority = match payload.priority {
        Some(v) => Some(v.parse::<Priority>().map_err(BoardError::Validation)?),
        None => None,
    };
    let changes = ItemChanges {
        title: payload.title,
        description: payload.description,
        priority,
        agent: payload.agent,
    };
    let item = state
        .db
        .call(move |db| db.update_item(project_id, id, changes))
        .await?;
    Ok(Json(item))
}

#[derive(Debug, Deserialize)]
struct MoveItemPayload {
    project_id: Option<i64>,
    to_stage: Option<String>,
    #[serde(default)]
    force: bool,
    agent: Option<String>,
}

async fn move_item(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(payload): Json<MoveItemPayload>,
) -> ApiResult<Json<MoveOutcome>> {
    let project_id = require_field(payload.project_id, "project_id")?;
    let to = parse_stage(require_field(payload.to_stage, "to_stage")?)?;
    let force = payload.force;
    let agent = payload.agent.unwrap_or_else(|| "system".to_string());
    let outcome = state
        .db
        .call(move |db| db.move_item(project_id, id, to, force, &agent))
        .await?;
    tracing::debug!(
        "Moved item {} from {} to {}",
        id,
        outcome.previous_stage,
        outcome.item.stage
    );
    Ok(Json(outcome))
}

#[derive(Debug, Deserialize)]
struct ClaimPayload {
    project_id: Option<i64>,
    agent: Option<String>,
}

async fn claim_item(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(payload): Json<ClaimPayload>,
) -> ApiResult<(StatusCode, Json<Claim>)> {
    let project_id = require_field(payload.project_id, "project_id")?;
    let agent = require_field(payload.agent, "agent")?;
    let claim = state
        .db
        .call(move |db| db.claim_item(project_id, id, &agent))
        .await?;
    tracing::debug!("Item {} claimed by {}", claim.item_id, claim.agent_name);
    Ok((StatusCode::CREATED, Json(claim)))
}

#[derive(Debug, Deserialize)]
struct ScopePayload {
    project_id: Option<i64>,
}

async fn release_item(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(payload): Json<ScopePayload>,
) -> ApiResult<StatusCode> {
    let project_id = require_field(payload.project_id, "project_id")?;
    let released = state
        .db
        .call(move |db| db.release_item(project_id, id))
        .await?;
    if released {
        tracing::debug!("Item {} released", id);
    }
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
struct ArchiveItemPayload {
    project_id: Option<i64>,
    agent: Option<String>,
}

async fn archive_item(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(payload): Json<ArchiveItemPayload>,
) -> ApiResult<StatusCode> {
    let project_id = require_field(payload.project_id, "project_id")?;
    let agent = payload.agent.unwrap_or_else(|| "system".to_string());
    let archived = state
        .db
        .call(move |db| db.archive_item(project_id, id, &agent))
        .await?;
    if archived {
        tracing::debug!("Item {} archived", id);
    }
    Ok(StatusCode::NO_CONTENT)
}

// ── Missions ──────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct CreateMissionPayload {
    name: Option<String>,
}

async fn create_mission(
    State(state): State<AppState>,
    Path(project_id): Path<i64>,
    Json(payload): Json<CreateMissionPayload>,
) -> ApiResult<(StatusCode, Json<Mission>)> {
    let name = require_field(payload.name, "name")?;
    let mission = state
        .db
        .call(move |db| db.create_mission(project_id, &name))
        .await?;
    tracing::info!(
        "Mission {} '{}' started in project {}",
        mission.id,
        mission.name,
        project_id
    );
    Ok((StatusCode::CREATED, Json(mission)))
}

async fn complete_mission(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(payload): Json<ScopePayload>,
) -> ApiResult<Json<Mission>> {
    let project_id = require_field(payload.project_id, "project_id")?;
    let mission = state
        .db
        .call(move |db| db.complete_mission(project_id, id))
        .await?;
    tracing::info!("Mission {} completed", mission.id);
    Ok(Json(mission))
}

async fn archive_mission(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(payload): Json<ScopePayload>,
) -> ApiResult<Json<Mission>> {
    let project_id = require_field(payload.project_id, "project_id")?;
    let mission = state
        .db
        .call(move |db| db.archive_mission(project_id, id))
        .await?;
    tracing::info!("Mission {} archived", mission.id);
    Ok(Json(mission))
}

// ── Change feed ───────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct EventsQuery {
    project_id: Option<i64>,
}

/// Open an SSE subscription. Scope problems surface as plain HTTP errors
/// here, before any stream bytes are written; after that the dedicated
/// engine owns the connection until the client goes away.
async fn events(
    State(state): State<AppState>,
    Query(query): Query<EventsQuery>,
) -> ApiResult<impl IntoResponse> {
    let project_id = require_field(query.project_id, "project_id")?;
    state
        .db
        .call(move |db| db.require_project(project_id).map(|_| ()))
        .await?;

    let (tx, rx) = mpsc::channel(feed::FEED_CHANNEL_CAPACITY);
    tokio::spawn(feed::run_feed(state.db.clone(), project_id, state.feed, tx));
    tracing::info!("Feed subscriber connected for project {}", project_id);
    Ok(sse_response(rx))
}
