use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{SecondsFormat, Utc};
use rusqlite::{Connection, Row, params};
use sha2::{Digest, Sha256};
use taskboard_common::ordering;
use taskboard_common::{
    BoardView, ColumnView, Priority, Project, ProjectMember, ProjectSummary, Role, Task, TaskStatus,
    User, UserSummary,
};

use crate::errors::BoardError;

/// How long a login session stays valid.
const SESSION_TTL_DAYS: i64 = 7;

/// Async-safe handle to the board database.
///
/// Wraps `BoardDb` behind `Arc<Mutex>` and runs all access on tokio's
/// blocking thread pool via `spawn_blocking`, keeping synchronous SQLite I/O
/// off the async workers. The mutex also serialises every write transaction
/// issued by this process.
#[derive(Clone)]
pub struct DbHandle {
    inner: Arc<std::sync::Mutex<BoardDb>>,
}

impl DbHandle {
    pub fn new(db: BoardDb) -> Self {
        Self {
            inner: Arc::new(std::sync::Mutex::new(db)),
        }
    }

    /// Run a closure with access to the database on a blocking thread.
    /// All data passed into `f` must be owned (`'static`).
    pub async fn call<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&BoardDb) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let db = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let guard = db.lock().map_err(|e| anyhow::anyhow!("DB lock poisoned: {}", e))?;
            f(&guard)
        })
        .await
        .context("DB task panicked")?
    }
}

pub struct BoardDb {
    pub(super) conn: Connection,
}

/// Fields accepted when creating a task.
#[derive(Debug, Clone, Default)]
pub struct NewTask {
    pub title: String,
    pub description: String,
    pub status: Option<TaskStatus>,
    pub priority: Option<Priority>,
    pub assignee_id: Option<String>,
}

/// Fields accepted by a plain task edit. `None` leaves the column alone.
#[derive(Debug, Clone, Default)]
pub struct TaskUpdate {
    pub title: Option<String>,
    pub description: Option<String>,
    pub status: Option<TaskStatus>,
    pub priority: Option<Priority>,
    pub order: Option<f64>,
    /// `Some(None)` clears the assignee.
    pub assignee_id: Option<Option<String>>,
    /// Only honoured when `order` is the sole change.
    pub updated_at: Option<String>,
}

impl TaskUpdate {
    fn is_order_only(&self) -> bool {
        self.order.is_some()
            && self.title.is_none()
            && self.description.is_none()
            && self.status.is_none()
            && self.priority.is_none()
            && self.assignee_id.is_none()
    }
}

/// Current UTC time in the format every timestamp column uses.
pub fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Check a client-supplied timestamp and normalise it to the column format.
pub fn parse_timestamp(value: &str) -> Result<String, BoardError> {
    chrono::DateTime::parse_from_rfc3339(value)
        .map(|t| {
            t.with_timezone(&Utc)
                .to_rfc3339_opts(SecondsFormat::Millis, true)
        })
        .map_err(|e| BoardError::Validation(format!("Invalid timestamp '{}': {}", value, e)))
}

fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

fn hash_password(salt: &str, password: &str) -> String {
    let digest = Sha256::new()
        .chain_update(salt.as_bytes())
        .chain_update(b":")
        .chain_update(password.as_bytes())
        .finalize();
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Task columns plus the assignee summary; filter on the `t` alias.
const TASK_SELECT: &str = "SELECT t.id, t.project_id, t.title, t.description, t.status, t.priority,
        t.sort_order, t.created_at, t.updated_at, a.id, a.name, a.email
     FROM tasks t LEFT JOIN users a ON a.id = t.assignee_id";

/// Ordering of a whole project's task list: board column, then position.
const TASK_LIST_ORDER: &str =
    "CASE t.status WHEN 'TODO' THEN 0 WHEN 'IN_PROGRESS' THEN 1 ELSE 2 END, t.sort_order, t.id";

impl BoardDb {
    /// Open (or create) a SQLite database at the given path and run migrations.
    pub fn new(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).context("Failed to open SQLite database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Create an in-memory SQLite database (for testing).
    pub fn new_in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().context("Failed to open in-memory SQLite database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    fn init(&self) -> Result<()> {
        self.conn
            .execute_batch("PRAGMA foreign_keys = ON;")
            .context("Failed to enable foreign keys")?;
        self.run_migrations().context("Failed to run migrations")?;
        self.prune_expired_sessions()?;
        Ok(())
    }

    fn run_migrations(&self) -> Result<()> {
        self.conn
            .execute_batch(
                "
                CREATE TABLE IF NOT EXISTS users (
                    id TEXT PRIMARY KEY,
                    email TEXT NOT NULL UNIQUE,
                    name TEXT NOT NULL,
                    password_salt TEXT NOT NULL,
                    password_hash TEXT NOT NULL,
                    created_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS sessions (
                    token TEXT PRIMARY KEY,
                    user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                    created_at TEXT NOT NULL,
                    expires_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS projects (
                    id TEXT PRIMARY KEY,
                    name TEXT NOT NULL,
                    description TEXT NOT NULL DEFAULT '',
                    owner_id TEXT NOT NULL REFERENCES users(id),
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS project_members (
                    id TEXT PRIMARY KEY,
                    project_id TEXT NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
                    user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                    role TEXT NOT NULL,
                    assigned_by TEXT,
                    created_at TEXT NOT NULL,
                    UNIQUE(project_id, user_id)
                );

                CREATE TABLE IF NOT EXISTS tasks (
                    id TEXT PRIMARY KEY,
                    project_id TEXT NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
                    title TEXT NOT NULL,
                    description TEXT NOT NULL DEFAULT '',
                    status TEXT NOT NULL DEFAULT 'TODO',
                    priority TEXT NOT NULL DEFAULT 'MEDIUM',
                    sort_order REAL NOT NULL,
                    assignee_id TEXT REFERENCES users(id) ON DELETE SET NULL,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_sessions_user ON sessions(user_id);
                CREATE INDEX IF NOT EXISTS idx_members_user ON project_members(user_id);
                CREATE INDEX IF NOT EXISTS idx_tasks_partition ON tasks(project_id, status, sort_order);
                ",
            )
            .context("Failed to create tables")?;

        // Additive migrations; only "duplicate column" is ignored.
        match self.conn.execute(
            "ALTER TABLE tasks ADD COLUMN assignee_id TEXT REFERENCES users(id) ON DELETE SET NULL",
            [],
        ) {
            Ok(_) => {}
            Err(e) if e.to_string().contains("duplicate column") => {}
            Err(e) => return Err(anyhow::anyhow!("Failed to add assignee_id column: {}", e)),
        }
        Ok(())
    }

    // ── Users & sessions ──────────────────────────────────────────────

    pub fn create_user(&self, email: &str, name: &str, password: &str) -> Result<User> {
        if self.find_user_by_email(email)?.is_some() {
            return Err(BoardError::Conflict(format!("Email {} is already registered", email)).into());
        }
        let id = new_id();
        let salt = new_id();
        self.conn
            .execute(
                "INSERT INTO users (id, email, name, password_salt, password_hash, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![id, email, name, salt, hash_password(&salt, password), now()],
            )
            .context("Failed to insert user")?;
        self.get_user(&id)?.context("User not found after insert")
    }

    pub fn get_user(&self, id: &str) -> Result<Option<User>> {
        self.query_user("SELECT id, email, name, created_at FROM users WHERE id = ?1", id)
    }

    pub fn find_user_by_email(&self, email: &str) -> Result<Option<User>> {
        self.query_user(
            "SELECT id, email, name, created_at FROM users WHERE email = ?1",
            email,
        )
    }

    fn query_user(&self, sql: &str, key: &str) -> Result<Option<User>> {
        let mut stmt = self.conn.prepare(sql).context("Failed to prepare user query")?;
        let mut rows = stmt
            .query_map(params![key], user_from_row)
            .context("Failed to query user")?;
        match rows.next() {
            Some(row) => Ok(Some(row.context("Failed to read user row")?)),
            None => Ok(None),
        }
    }

    /// Returns the user when `password` matches the stored digest.
    pub fn verify_credentials(&self, email: &str, password: &str) -> Result<Option<User>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, password_salt, password_hash FROM users WHERE email = ?1")
            .context("Failed to prepare verify_credentials")?;
        let mut rows = stmt
            .query_map(params![email], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })
            .context("Failed to query credentials")?;
        let Some(row) = rows.next() else {
            return Ok(None);
        };
        let (id, salt, stored) = row.context("Failed to read credentials row")?;
        if hash_password(&salt, password) != stored {
            return Ok(None);
        }
        self.get_user(&id)
    }

    pub fn create_session(&self, user_id: &str) -> Result<String> {
        self.prune_expired_sessions()?;
        let token = new_id();
        let expires_at = (Utc::now() + chrono::Duration::days(SESSION_TTL_DAYS))
            .to_rfc3339_opts(SecondsFormat::Millis, true);
        self.conn
            .execute(
                "INSERT INTO sessions (token, user_id, created_at, expires_at) VALUES (?1, ?2, ?3, ?4)",
                params![token, user_id, now(), expires_at],
            )
            .context("Failed to insert session")?;
        Ok(token)
    }

    /// Resolve a session token to its user, ignoring expired sessions.
    pub fn user_for_session(&self, token: &str) -> Result<Option<User>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT u.id, u.email, u.name, u.created_at
                 FROM sessions s JOIN users u ON u.id = s.user_id
                 WHERE s.token = ?1 AND s.expires_at > ?2",
            )
            .context("Failed to prepare user_for_session")?;
        let mut rows = stmt
            .query_map(params![token, now()], user_from_row)
            .context("Failed to query session")?;
        match rows.next() {
            Some(row) => Ok(Some(row.context("Failed to read session row")?)),
            None => Ok(None),
        }
    }

    /// Drop sessions past their expiry. Returns how many were removed.
    pub fn prune_expired_sessions(&self) -> Result<usize> {
        self.conn
            .execute("DELETE FROM sessions WHERE expires_at <= ?1", params![now()])
            .context("Failed to prune expired sessions")
    }

    pub fn delete_session(&self, token: &str) -> Result<bool> {
        let count = self
            .conn
            .execute("DELETE FROM sessions WHERE token = ?1", params![token])
            .context("Failed to delete session")?;
        Ok(count > 0)
    }

    // ── Project CRUD ──────────────────────────────────────────────────

    /// Create a project and register `owner_id` as its OWNER in one transaction.
    pub fn create_project(&self, owner_id: &str, name: &str, description: &str) -> Result<Project> {
        let id = new_id();
        let ts = now();
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        tx.execute(
            "INSERT INTO projects (id, name, description, owner_id, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
            params![id, name, description, owner_id, ts],
        )
        .context("Failed to insert project")?;
        tx.execute(
            "INSERT INTO project_members (id, project_id, user_id, role, assigned_by, created_at)
             VALUES (?1, ?2, ?3, ?4, ?3, ?5)",
            params![new_id(), id, owner_id, Role::Owner.as_str(), ts],
        )
        .context("Failed to insert project owner")?;
        tx.commit().context("Failed to commit project creation")?;
        self.get_project(&id)?.context("Project not found after insert")
    }

    /// Projects the user is a member of, most recently updated first, with
    /// the caller's role and member and task counts.
    pub fn list_projects_for_user(&self, user_id: &str) -> Result<Vec<ProjectSummary>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT p.id, p.name, p.description, p.owner_id, p.created_at, p.updated_at,
                        o.id, o.name, o.email, m.role,
                        (SELECT COUNT(*) FROM project_members pm WHERE pm.project_id = p.id),
                        (SELECT COUNT(*) FROM tasks t WHERE t.project_id = p.id)
                 FROM projects p
                 JOIN project_members m ON m.project_id = p.id
                 JOIN users o ON o.id = p.owner_id
                 WHERE m.user_id = ?1
                 ORDER BY p.updated_at DESC, p.id",
            )
            .context("Failed to prepare list_projects_for_user")?;
        let rows = stmt
            .query_map(params![user_id], |row| {
                Ok((
                    project_from_row(row)?,
                    UserSummary {
                        id: row.get(6)?,
                        name: row.get(7)?,
                        email: row.get(8)?,
                    },
                    row.get::<_, String>(9)?,
                    row.get::<_, u32>(10)?,
                    row.get::<_, u32>(11)?,
                ))
            })
            .context("Failed to query projects")?;
        let mut projects = Vec::new();
        for row in rows {
            let (project, owner, role, member_count, task_count) =
                row.context("Failed to read project row")?;
            let role = Role::from_str(&role)
                .map_err(|e| anyhow::anyhow!(e))
                .context("Failed to parse member role")?;
            projects.push(ProjectSummary {
                project,
                owner,
                role,
                member_count,
                task_count,
            });
        }
        Ok(projects)
    }

    pub fn get_project(&self, id: &str) -> Result<Option<Project>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, name, description, owner_id, created_at, updated_at FROM projects WHERE id = ?1",
            )
            .context("Failed to prepare get_project")?;
        let mut rows = stmt
            .query_map(params![id], project_from_row)
            .context("Failed to query project")?;
        match rows.next() {
            Some(row) => Ok(Some(row.context("Failed to read project row")?)),
            None => Ok(None),
        }
    }

    pub fn update_project(
        &self,
        id: &str,
        name: Option<&str>,
        description: Option<&str>,
    ) -> Result<Project> {
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        if let Some(n) = name {
            tx.execute(
                "UPDATE projects SET name = ?1, updated_at = ?2 WHERE id = ?3",
                params![n, now(), id],
            )
            .context("Failed to update project name")?;
        }
        if let Some(d) = description {
            tx.execute(
                "UPDATE projects SET description = ?1, updated_at = ?2 WHERE id = ?3",
                params![d, now(), id],
            )
            .context("Failed to update project description")?;
        }
        tx.commit().context("Failed to commit project update")?;
        self.get_project(id)?
            .ok_or_else(|| BoardError::ProjectNotFound { id: id.to_string() }.into())
    }

    pub fn delete_project(&self, id: &str) -> Result<bool> {
        let count = self
            .conn
            .execute("DELETE FROM projects WHERE id = ?1", params![id])
            .context("Failed to delete project")?;
        Ok(count > 0)
    }

    // ── Membership ────────────────────────────────────────────────────

    pub fn role_for(&self, user_id: &str, project_id: &str) -> Result<Option<Role>> {
        let mut stmt = self
            .conn
            .prepare("SELECT role FROM project_members WHERE user_id = ?1 AND project_id = ?2")
            .context("Failed to prepare role_for")?;
        let mut rows = stmt
            .query_map(params![user_id, project_id], |row| row.get::<_, String>(0))
            .context("Failed to query role")?;
        match rows.next() {
            Some(row) => {
                let raw = row.context("Failed to read role row")?;
                let role = Role::from_str(&raw)
                    .map_err(|e| anyhow::anyhow!(e))
                    .context("Failed to parse member role")?;
                Ok(Some(role))
            }
            None => Ok(None),
        }
    }

    pub fn list_members(&self, project_id: &str) -> Result<Vec<ProjectMember>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT m.id, m.project_id, m.role, u.id, u.email, u.name, u.created_at
                 FROM project_members m JOIN users u ON u.id = m.user_id
                 WHERE m.project_id = ?1
                 ORDER BY m.created_at, m.id",
            )
            .context("Failed to prepare list_members")?;
        let rows = stmt
            .query_map(params![project_id], member_row)
            .context("Failed to query members")?;
        let mut members = Vec::new();
        for row in rows {
            let r = row.context("Failed to read member row")?;
            members.push(r.into_member()?);
        }
        Ok(members)
    }

    fn get_member(&self, project_id: &str, member_id: &str) -> Result<Option<ProjectMember>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT m.id, m.project_id, m.role, u.id, u.email, u.name, u.created_at
                 FROM project_members m JOIN users u ON u.id = m.user_id
                 WHERE m.project_id = ?1 AND m.id = ?2",
            )
            .context("Failed to prepare get_member")?;
        let mut rows = stmt
            .query_map(params![project_id, member_id], member_row)
            .context("Failed to query member")?;
        match rows.next() {
            Some(row) => Ok(Some(row.context("Failed to read member row")?.into_member()?)),
            None => Ok(None),
        }
    }

    /// Invite an existing user by email. Ownership cannot be granted this way.
    pub fn add_member(
        &self,
        project_id: &str,
        email: &str,
        role: Role,
        assigned_by: &str,
    ) -> Result<ProjectMember> {
        if role == Role::Owner {
            return Err(BoardError::Validation("Members can only be EDITOR or VIEWER".into()).into());
        }
        let user = self
            .find_user_by_email(email)?
            .ok_or_else(|| BoardError::UserNotFound(email.to_string()))?;
        if self.role_for(&user.id, project_id)?.is_some() {
            return Err(BoardError::Conflict(format!("{} is already a member", email)).into());
        }
        let id = new_id();
        self.conn
            .execute(
                "INSERT INTO project_members (id, project_id, user_id, role, assigned_by, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![id, project_id, user.id, role.as_str(), assigned_by, now()],
            )
            .context("Failed to insert member")?;
        self.get_member(project_id, &id)?
            .context("Member not found after insert")
    }

    pub fn update_member_role(
        &self,
        project_id: &str,
        member_id: &str,
        role: Role,
    ) -> Result<ProjectMember> {
        let member = self
            .get_member(project_id, member_id)?
            .ok_or_else(|| BoardError::MemberNotFound { id: member_id.to_string() })?;
        if member.role == Role::Owner || role == Role::Owner {
            return Err(BoardError::Validation("The project owner's role cannot change".into()).into());
        }
        self.conn
            .execute(
                "UPDATE project_members SET role = ?1 WHERE id = ?2",
                params![role.as_str(), member_id],
            )
            .context("Failed to update member role")?;
        self.get_member(project_id, member_id)?
            .context("Member not found after update")
    }

    pub fn remove_member(&self, project_id: &str, member_id: &str) -> Result<bool> {
        let Some(member) = self.get_member(project_id, member_id)? else {
            return Ok(false);
        };
        if member.role == Role::Owner {
            return Err(BoardError::Validation("The project owner cannot be removed".into()).into());
        }
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        tx.execute(
            "UPDATE tasks SET assignee_id = NULL WHERE project_id = ?1 AND assignee_id = ?2",
            params![project_id, member.user.id],
        )
        .context("Failed to unassign removed member")?;
        let count = tx
            .execute("DELETE FROM project_members WHERE id = ?1", params![member_id])
            .context("Failed to delete member")?;
        tx.commit().context("Failed to commit member removal")?;
        Ok(count > 0)
    }

    // ── Task CRUD ─────────────────────────────────────────────────────

    /// Insert a task at the end of its partition.
    pub fn create_task(&self, project_id: &str, new: &NewTask) -> Result<Task> {
        let status = new.status.unwrap_or(TaskStatus::Todo);
        let priority = new.priority.unwrap_or_default();
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        if let Some(assignee) = &new.assignee_id {
            ensure_assignable(&tx, project_id, assignee)?;
        }
        let orders = partition_orders(&tx, project_id, status, None)?;
        let order = ordering::assign_order(&orders, orders.len());
        let id = new_id();
        tx.execute(
            "INSERT INTO tasks (id, project_id, title, description, status, priority, sort_order, assignee_id, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)",
            params![
                id,
                project_id,
                new.title,
                new.description,
                status.as_str(),
                priority.as_str(),
                order,
                new.assignee_id,
                now()
            ],
        )
        .context("Failed to insert task")?;
        tx.commit().context("Failed to commit task creation")?;
        self.get_task(&id)?.context("Task not found after insert")
    }

    pub fn list_tasks(&self, project_id: &str) -> Result<Vec<Task>> {
        let sql = format!(
            "{} WHERE t.project_id = ?1 ORDER BY {}",
            TASK_SELECT, TASK_LIST_ORDER
        );
        let mut stmt = self.conn.prepare(&sql).context("Failed to prepare list_tasks")?;
        let rows = stmt
            .query_map(params![project_id], task_row)
            .context("Failed to query tasks")?;
        let mut tasks = Vec::new();
        for row in rows {
            let r = row.context("Failed to read task row")?;
            tasks.push(r.into_task()?);
        }
        Ok(tasks)
    }

    pub fn get_task(&self, id: &str) -> Result<Option<Task>> {
        load_task(&self.conn, id)
    }

    /// The task, provided it belongs to `project_id`.
    pub fn get_project_task(&self, project_id: &str, task_id: &str) -> Result<Option<Task>> {
        Ok(self.get_task(task_id)?.filter(|t| t.project_id == project_id))
    }

    /// Plain edit. A status change through this path appends the task to the
    /// end of its new column; an order-only change may keep `updated_at`.
    pub fn update_task(&self, project_id: &str, task_id: &str, update: &TaskUpdate) -> Result<Task> {
        if let Some(title) = &update.title
            && title.trim().is_empty()
        {
            return Err(BoardError::Validation("Title must not be empty".into()).into());
        }
        if let Some(order) = update.order
            && !order.is_finite()
        {
            return Err(BoardError::Validation("Order must be a finite number".into()).into());
        }
        let kept_updated_at = match (&update.updated_at, update.is_order_only()) {
            (Some(ts), true) => Some(parse_timestamp(ts)?),
            _ => None,
        };

        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        let existing = load_task(&tx, task_id)?
            .filter(|t| t.project_id == project_id)
            .ok_or_else(|| BoardError::TaskNotFound { id: task_id.to_string() })?;
        if let Some(Some(assignee)) = &update.assignee_id {
            ensure_assignable(&tx, project_id, assignee)?;
        }
        let assignee_id = match &update.assignee_id {
            Some(next) => next.clone(),
            None => existing.assignee.as_ref().map(|a| a.id.clone()),
        };

        let status = update.status.unwrap_or(existing.status);
        let order = if status != existing.status {
            let orders = partition_orders(&tx, project_id, status, Some(task_id))?;
            ordering::assign_order(&orders, orders.len())
        } else {
            update.order.unwrap_or(existing.order)
        };
        let updated_at = kept_updated_at.unwrap_or_else(now);

        tx.execute(
            "UPDATE tasks SET title = ?1, description = ?2, status = ?3, priority = ?4,
                 sort_order = ?5, assignee_id = ?6, updated_at = ?7
             WHERE id = ?8",
            params![
                update.title.as_deref().unwrap_or(&existing.title),
                update.description.as_deref().unwrap_or(&existing.description),
                status.as_str(),
                update.priority.unwrap_or(existing.priority).as_str(),
                order,
                assignee_id,
                updated_at,
                task_id
            ],
        )
        .context("Failed to update task")?;
        tx.commit().context("Failed to commit task update")?;
        self.get_task(task_id)?.context("Task not found after update")
    }

    /// Delete a task. Survivors keep their orders; gaps are harmless.
    pub fn delete_task(&self, project_id: &str, task_id: &str) -> Result<bool> {
        let count = self
            .conn
            .execute(
                "DELETE FROM tasks WHERE id = ?1 AND project_id = ?2",
                params![task_id, project_id],
            )
            .context("Failed to delete task")?;
        Ok(count > 0)
    }

    // ── Board view ────────────────────────────────────────────────────

    pub fn get_board(&self, project_id: &str) -> Result<BoardView> {
        let project = self
            .get_project(project_id)?
            .ok_or_else(|| BoardError::ProjectNotFound { id: project_id.to_string() })?;

        let all_tasks = self.list_tasks(project_id)?;
        let columns = TaskStatus::ALL
            .iter()
            .map(|status| {
                let mut tasks: Vec<Task> = all_tasks
                    .iter()
                    .filter(|t| t.status == *status)
                    .cloned()
                    .collect();
                tasks.sort_by(Task::cmp_position);
                ColumnView {
                    status: *status,
                    tasks,
                }
            })
            .collect();

        Ok(BoardView { project, columns })
    }
}

// ── Partition helpers (usable on a transaction) ───────────────────────

pub(super) fn load_task(conn: &Connection, id: &str) -> Result<Option<Task>> {
    let sql = format!("{} WHERE t.id = ?1", TASK_SELECT);
    let mut stmt = conn.prepare(&sql).context("Failed to prepare get_task")?;
    let mut rows = stmt
        .query_map(params![id], task_row)
        .context("Failed to query task")?;
    match rows.next() {
        Some(row) => {
            let r = row.context("Failed to read task row")?;
            Ok(Some(r.into_task()?))
        }
        None => Ok(None),
    }
}

/// An assignee must be a member of the task's project.
fn ensure_assignable(conn: &Connection, project_id: &str, user_id: &str) -> Result<()> {
    let is_member: bool = conn
        .query_row(
            "SELECT EXISTS(SELECT 1 FROM project_members WHERE project_id = ?1 AND user_id = ?2)",
            params![project_id, user_id],
            |row| row.get(0),
        )
        .context("Failed to check assignee membership")?;
    if !is_member {
        return Err(BoardError::Validation(format!(
            "Assignee {} is not a member of this project",
            user_id
        ))
        .into());
    }
    Ok(())
}

/// `(id, order)` of every task in a partition, ascending by position,
/// optionally leaving one task out.
pub(super) fn partition(
    conn: &Connection,
    project_id: &str,
    status: TaskStatus,
    exclude: Option<&str>,
) -> Result<Vec<(String, f64)>> {
    let mut stmt = conn
        .prepare(
            "SELECT id, sort_order FROM tasks
             WHERE project_id = ?1 AND status = ?2 AND id != COALESCE(?3, '')
             ORDER BY sort_order, id",
        )
        .context("Failed to prepare partition query")?;
    let rows = stmt
        .query_map(params![project_id, status.as_str(), exclude], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?))
        })
        .context("Failed to query partition")?;
    let mut entries = Vec::new();
    for row in rows {
        entries.push(row.context("Failed to read partition row")?);
    }
    Ok(entries)
}

pub(super) fn partition_orders(
    conn: &Connection,
    project_id: &str,
    status: TaskStatus,
    exclude: Option<&str>,
) -> Result<Vec<f64>> {
    Ok(partition(conn, project_id, status, exclude)?
        .into_iter()
        .map(|(_, order)| order)
        .collect())
}

// ── Internal row helpers ──────────────────────────────────────────────

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        email: row.get(1)?,
        name: row.get(2)?,
        created_at: row.get(3)?,
    })
}

fn project_from_row(row: &Row<'_>) -> rusqlite::Result<Project> {
    Ok(Project {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        owner_id: row.get(3)?,
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
    })
}

/// Intermediate row struct for reading tasks from SQLite before converting
/// the status / priority strings into typed values.
struct TaskRow {
    id: String,
    project_id: String,
    title: String,
    description: String,
    status: String,
    priority: String,
    sort_order: f64,
    created_at: String,
    updated_at: String,
    assignee_id: Option<String>,
    assignee_name: Option<String>,
    assignee_email: Option<String>,
}

fn task_row(row: &Row<'_>) -> rusqlite::Result<TaskRow> {
    Ok(TaskRow {
        id: row.get(0)?,
        project_id: row.get(1)?,
        title: row.get(2)?,
        description: row.get(3)?,
        status: row.get(4)?,
        priority: row.get(5)?,
        sort_order: row.get(6)?,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
        assignee_id: row.get(9)?,
        assignee_name: row.get(10)?,
        assignee_email: row.get(11)?,
    })
}

impl TaskRow {
    fn into_task(self) -> Result<Task> {
        let status = TaskStatus::from_str(&self.status)
            .map_err(|e| anyhow::anyhow!(e))
            .context("Failed to parse task status")?;
        let priority = Priority::from_str(&self.priority)
            .map_err(|e| anyhow::anyhow!(e))
            .context("Failed to parse task priority")?;
        let assignee = match (self.assignee_id, self.assignee_name, self.assignee_email) {
            (Some(id), Some(name), Some(email)) => Some(UserSummary { id, name, email }),
            _ => None,
        };
        Ok(Task {
            id: self.id,
            project_id: self.project_id,
            title: self.title,
            description: self.description,
            status,
            priority,
            order: self.sort_order,
            assignee,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

/// Intermediate row struct for a membership joined with its user.
struct MemberRow {
    id: String,
    project_id: String,
    role: String,
    user: User,
}

fn member_row(row: &Row<'_>) -> rusqlite::Result<MemberRow> {
    Ok(MemberRow {
        id: row.get(0)?,
        project_id: row.get(1)?,
        role: row.get(2)?,
        user: User {
            id: row.get(3)?,
            email: row.get(4)?,
            name: row.get(5)?,
            created_at: row.get(6)?,
        },
    })
}

impl MemberRow {
    fn into_member(self) -> Result<ProjectMember> {
        let role = Role::from_str(&self.role)
            .map_err(|e| anyhow::anyhow!(e))
            .context("Failed to parse member role")?;
        Ok(ProjectMember {
            id: self.id,
            project_id: self.project_id,
            user: self.user,
            role,
        })
    }
}

// ── Tests ─────────────────────────────────────────────────────────────
