use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State, rejection::JsonRejection},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Deserializer, Serialize};
use taskboard_common::{AccessView, Priority, ReorderRequest, Role, TaskStatus, User};

use super::auth::{self, ActingUser};
use super::db::{BoardDb, DbHandle, NewTask, TaskUpdate};
use super::permissions::Capability;
use super::reorder::ReorderStrategy;
use crate::errors::BoardError;

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub db: DbHandle,
    pub strategy: ReorderStrategy,
}

impl AppState {
    pub fn new(db: BoardDb, strategy: ReorderStrategy) -> Self {
        Self {
            db: DbHandle::new(db),
            strategy,
        }
    }
}

pub type SharedState = Arc<AppState>;

// ── Request payload types ─────────────────────────────────────────────

#[derive(Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub name: String,
    pub password: String,
}

#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Serialize)]
pub struct AuthResponse {
    pub user: User,
    pub token: String,
}

#[derive(Deserialize)]
pub struct CreateProjectRequest {
    pub name: String,
    pub description: Option<String>,
}

#[derive(Deserialize)]
pub struct UpdateProjectRequest {
    pub name: Option<String>,
    pub description: Option<String>,
}

#[derive(Deserialize)]
pub struct AddMemberRequest {
    pub email: String,
    pub role: Role,
}

#[derive(Deserialize)]
pub struct UpdateMemberRequest {
    pub role: Role,
}

#[derive(Deserialize)]
pub struct CreateTaskRequest {
    pub title: String,
    pub description: Option<String>,
    pub status: Option<TaskStatus>,
    pub priority: Option<Priority>,
    #[serde(alias = "assigneeId")]
    pub assignee_id: Option<String>,
}

#[derive(Deserialize)]
pub struct UpdateTaskRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub status: Option<TaskStatus>,
    pub priority: Option<Priority>,
    pub order: Option<f64>,
    /// Absent leaves the assignee alone, `null` clears it.
    #[serde(default, alias = "assigneeId", deserialize_with = "present")]
    pub assignee_id: Option<Option<String>>,
    #[serde(alias = "updatedAt")]
    pub updated_at: Option<String>,
}

/// Distinguishes a field sent as `null` from one left out.
fn present<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

// ── Error handling ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Unauthorized(String),
    Forbidden(String),
    Conflict(String),
    Unavailable(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, Json(serde_json::json!({"error": message}))).into_response()
    }
}

impl From<BoardError> for ApiError {
    fn from(err: BoardError) -> Self {
        let msg = err.to_string();
        match err {
            e if e.is_not_found() => ApiError::NotFound(msg),
            BoardError::PermissionDenied => ApiError::Forbidden(msg),
            BoardError::Unauthorized => ApiError::Unauthorized(msg),
            BoardError::Validation(_) => ApiError::BadRequest(msg),
            BoardError::Conflict(_) => ApiError::Conflict(msg),
            BoardError::TransientStore(_) => {
                tracing::warn!(error = %msg, "Store busy");
                ApiError::Unavailable(msg)
            }
            _ => {
                tracing::error!(error = %msg, "Request failed");
                ApiError::Internal(msg)
            }
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        BoardError::from(err).into()
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

/// Unwrap a JSON body, turning extraction failures into 400s.
fn body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    payload.map(|Json(v)| v).map_err(ApiError::from)
}

fn require_text(field: &str, value: &str) -> Result<(), ApiError> {
    if value.trim().is_empty() {
        return Err(ApiError::BadRequest(format!("{} must not be empty", field)));
    }
    Ok(())
}

// ── Router ────────────────────────────────────────────────────────────

pub fn api_router() -> Router<SharedState> {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/auth/register", post(register))
        .route("/api/auth/login", post(login))
        .route("/api/auth/logout", post(logout))
        .route("/api/auth/me", get(me))
        .route("/api/projects", get(list_projects).post(create_project))
        .route(
            "/api/projects/{id}",
            get(get_project).patch(update_project).delete(delete_project),
        )
        .route("/api/projects/{id}/check-access", get(check_access))
        .route("/api/projects/{id}/members", get(list_members).post(add_member))
        .route(
            "/api/projects/{id}/members/{member_id}",
            axum::routing::patch(update_member).delete(remove_member),
        )
        .route("/api/projects/{id}/tasks", get(list_tasks).post(create_task))
        .route("/api/projects/{id}/tasks/reorder", post(reorder_tasks))
        .route(
            "/api/projects/{id}/tasks/{task_id}",
            get(get_task).patch(update_task).delete(delete_task),
        )
        .route("/api/projects/{id}/board", get(get_board))
}

// ── Handlers: auth ────────────────────────────────────────────────────

async fn health_check() -> &'static str {
    "ok"
}

fn with_session(status: StatusCode, user: User, token: String) -> Response {
    let cookie = auth::session_cookie(&token);
    (
        status,
        [(header::SET_COOKIE, cookie)],
        Json(AuthResponse { user, token }),
    )
        .into_response()
}

async fn register(
    State(state): State<SharedState>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let req = body(payload)?;
    require_text("Name", &req.name)?;
    if !req.email.contains('@') {
        return Err(ApiError::BadRequest(format!("Invalid email: {}", req.email)));
    }
    if req.password.len() < 6 {
        return Err(ApiError::BadRequest(
            "Password must be at least 6 characters".into(),
        ));
    }
    let email = req.email.trim().to_lowercase();
    let (user, token) = state
        .db
        .call(move |db| {
            let user = db.create_user(&email, req.name.trim(), &req.password)?;
            let token = db.create_session(&user.id)?;
            Ok((user, token))
        })
        .await?;
    tracing::info!(user_id = %user.id, "Registered user");
    Ok(with_session(StatusCode::CREATED, user, token))
}

async fn login(
    State(state): State<SharedState>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let req = body(payload)?;
    let email = req.email.trim().to_lowercase();
    let session = state
        .db
        .call(move |db| match db.verify_credentials(&email, &req.password)? {
            Some(user) => {
                let token = db.create_session(&user.id)?;
                Ok(Some((user, token)))
            }
            None => Ok(None),
        })
        .await?;
    let (user, token) =
        session.ok_or_else(|| ApiError::Unauthorized("Invalid email or password".into()))?;
    Ok(with_session(StatusCode::OK, user, token))
}

async fn logout(
    State(state): State<SharedState>,
    acting: ActingUser,
) -> Result<impl IntoResponse, ApiError> {
    let token = acting.token;
    state.db.call(move |db| db.delete_session(&token)).await?;
    Ok((
        StatusCode::NO_CONTENT,
        [(header::SET_COOKIE, auth::cleared_cookie())],
    ))
}

async fn me(acting: ActingUser) -> Json<User> {
    Json(acting.user)
}

// ── Handlers: projects & membership ───────────────────────────────────

async fn list_projects(
    State(state): State<SharedState>,
    acting: ActingUser,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = acting.user.id;
    let projects = state
        .db
        .call(move |db| db.list_projects_for_user(&user_id))
        .await?;
    Ok(Json(projects))
}

async fn create_project(
    State(state): State<SharedState>,
    acting: ActingUser,
    payload: Result<Json<CreateProjectRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let req = body(payload)?;
    require_text("Project name", &req.name)?;
    let owner_id = acting.user.id;
    let description = req.description.unwrap_or_default();
    let project = state
        .db
        .call(move |db| db.create_project(&owner_id, req.name.trim(), &description))
        .await?;
    tracing::info!(project_id = %project.id, "Created project");
    Ok((StatusCode::CREATED, Json(project)))
}

async fn get_project(
    State(state): State<SharedState>,
    acting: ActingUser,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let project = state
        .db
        .call(move |db| {
            db.authorize(&acting.user.id, &id, Capability::View)?;
            db.get_project(&id)?
                .ok_or_else(|| BoardError::ProjectNotFound { id }.into())
        })
        .await?;
    Ok(Json(project))
}

async fn update_project(
    State(state): State<SharedState>,
    acting: ActingUser,
    Path(id): Path<String>,
    payload: Result<Json<UpdateProjectRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let req = body(payload)?;
    if let Some(name) = &req.name {
        require_text("Project name", name)?;
    }
    let project = state
        .db
        .call(move |db| {
            db.authorize(&acting.user.id, &id, Capability::Edit)?;
            db.update_project(&id, req.name.as_deref().map(str::trim), req.description.as_deref())
        })
        .await?;
    Ok(Json(project))
}

async fn delete_project(
    State(state): State<SharedState>,
    acting: ActingUser,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let project_id = id.clone();
    state
        .db
        .call(move |db| {
            db.authorize(&acting.user.id, &id, Capability::Manage)?;
            db.delete_project(&id)
        })
        .await?;
    tracing::info!(%project_id, "Deleted project");
    Ok(StatusCode::NO_CONTENT)
}

async fn check_access(
    State(state): State<SharedState>,
    acting: ActingUser,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let view = state
        .db
        .call(move |db| {
            if db.get_project(&id)?.is_none() {
                return Err(BoardError::ProjectNotFound { id }.into());
            }
            let role = db.role_for(&acting.user.id, &id)?;
            Ok(AccessView {
                project_id: id,
                role,
                can_edit: role.is_some_and(|r| Capability::Edit.allows(r)),
            })
        })
        .await?;
    Ok(Json(view))
}

async fn list_members(
    State(state): State<SharedState>,
    acting: ActingUser,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let members = state
        .db
        .call(move |db| {
            db.authorize(&acting.user.id, &id, Capability::Manage)?;
            db.list_members(&id)
        })
        .await?;
    Ok(Json(members))
}

async fn add_member(
    State(state): State<SharedState>,
    acting: ActingUser,
    Path(id): Path<String>,
    payload: Result<Json<AddMemberRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let req = body(payload)?;
    let email = req.email.trim().to_lowercase();
    let member = state
        .db
        .call(move |db| {
            db.authorize(&acting.user.id, &id, Capability::Manage)?;
            db.add_member(&id, &email, req.role, &acting.user.id)
        })
        .await?;
    tracing::info!(project_id = %member.project_id, user_id = %member.user.id, role = member.role.as_str(), "Added member");
    Ok((StatusCode::CREATED, Json(member)))
}

async fn update_member(
    State(state): State<SharedState>,
    acting: ActingUser,
    Path((id, member_id)): Path<(String, String)>,
    payload: Result<Json<UpdateMemberRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let req = body(payload)?;
    let member = state
        .db
        .call(move |db| {
            db.authorize(&acting.user.id, &id, Capability::Manage)?;
            db.update_member_role(&id, &member_id, req.role)
        })
        .await?;
    Ok(Json(member))
}

async fn remove_member(
    State(state): State<SharedState>,
    acting: ActingUser,
    Path((id, member_id)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .db
        .call(move |db| {
            db.authorize(&acting.user.id, &id, Capability::Manage)?;
            if !db.remove_member(&id, &member_id)? {
                return Err(BoardError::MemberNotFound { id: member_id }.into());
            }
            Ok(())
        })
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

// ── Handlers: tasks & board ───────────────────────────────────────────

async fn list_tasks(
    State(state): State<SharedState>,
    acting: ActingUser,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let tasks = state
        .db
        .call(move |db| {
            db.authorize(&acting.user.id, &id, Capability::View)?;
            db.list_tasks(&id)
        })
        .await?;
    Ok(Json(tasks))
}

async fn create_task(
    State(state): State<SharedState>,
    acting: ActingUser,
    Path(id): Path<String>,
    payload: Result<Json<CreateTaskRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let req = body(payload)?;
    require_text("Title", &req.title)?;
    let new = NewTask {
        title: req.title.trim().to_string(),
        description: req.description.unwrap_or_default(),
        status: req.status,
        priority: req.priority,
        assignee_id: req.assignee_id,
    };
    let task = state
        .db
        .call(move |db| {
            db.authorize(&acting.user.id, &id, Capability::Edit)?;
            db.create_task(&id, &new)
        })
        .await?;
    tracing::debug!(task_id = %task.id, status = %task.status, order = task.order, "Created task");
    Ok((StatusCode::CREATED, Json(task)))
}

async fn get_task(
    State(state): State<SharedState>,
    acting: ActingUser,
    Path((id, task_id)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let task = state
        .db
        .call(move |db| {
            db.authorize(&acting.user.id, &id, Capability::View)?;
            db.get_project_task(&id, &task_id)?
                .ok_or_else(|| BoardError::TaskNotFound { id: task_id }.into())
        })
        .await?;
    Ok(Json(task))
}

async fn update_task(
    State(state): State<SharedState>,
    acting: ActingUser,
    Path((id, task_id)): Path<(String, String)>,
    payload: Result<Json<UpdateTaskRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let req = body(payload)?;
    let update = TaskUpdate {
        title: req.title.map(|t| t.trim().to_string()),
        description: req.description,
        status: req.status,
        priority: req.priority,
        order: req.order,
        assignee_id: req.assignee_id,
        updated_at: req.updated_at,
    };
    let task = state
        .db
        .call(move |db| {
            db.authorize(&acting.user.id, &id, Capability::Edit)?;
            db.update_task(&id, &task_id, &update)
        })
        .await?;
    Ok(Json(task))
}

async fn delete_task(
    State(state): State<SharedState>,
    acting: ActingUser,
    Path((id, task_id)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let deleted_id = task_id.clone();
    state
        .db
        .call(move |db| {
            db.authorize(&acting.user.id, &id, Capability::Edit)?;
            if !db.delete_task(&id, &task_id)? {
                return Err(BoardError::TaskNotFound { id: task_id }.into());
            }
            Ok(())
        })
        .await?;
    tracing::info!(task_id = %deleted_id, "Deleted task");
    Ok(StatusCode::NO_CONTENT)
}

async fn reorder_tasks(
    State(state): State<SharedState>,
    acting: ActingUser,
    Path(id): Path<String>,
    payload: Result<Json<ReorderRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let req = body(payload)?;
    let strategy = state.strategy;
    let outcome = state
        .db
        .call(move |db| {
            db.authorize(&acting.user.id, &id, Capability::Edit)?;
            Ok(db.reorder_task(&id, &req, strategy)?)
        })
        .await?;
    tracing::info!(
        task_id = %outcome.task.id,
        from_status = %outcome.from_status,
        to_status = %outcome.task.status,
        from_order = outcome.from_order,
        to_order = outcome.task.order,
        shifted = outcome.shifted,
        renumbered = outcome.renumbered,
        %strategy,
        "Reordered task"
    );
    Ok(Json(outcome.task))
}

async fn get_board(
    State(state): State<SharedState>,
    acting: ActingUser,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let board = state
        .db
        .call(move |db| {
            db.authorize(&acting.user.id, &id, Capability::View)?;
            db.get_board(&id)
        })
        .await?;
    Ok(Json(board))
}
