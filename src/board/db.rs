use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use rusqlite::{Connection, OptionalExtension, params};

use crate::errors::BoardError;

use super::models::*;
use super::stages;

type Result<T> = std::result::Result<T, BoardError>;

/// Async-safe handle to the board database.
///
/// Wraps `BoardDb` behind `Arc<Mutex>` and runs all access on tokio's
/// blocking thread pool via `spawn_blocking`, keeping synchronous SQLite
/// I/O off the async worker threads.
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
            let guard = db
                .lock()
                .map_err(|e| BoardError::Internal(format!("DB lock poisoned: {}", e)))?;
            f(&guard)
        })
        .await
        .map_err(|e| BoardError::Internal(format!("DB task panicked: {}", e)))?
    }

    /// Acquire the database mutex synchronously. For startup initialization
    /// and tests; must not be called from a hot async path.
    pub fn lock_sync(&self) -> Result<std::sync::MutexGuard<'_, BoardDb>> {
        self.inner
            .lock()
            .map_err(|e| BoardError::Internal(format!("DB lock poisoned: {}", e)))
    }
}

/// Fields for a new work item. The API layer fills defaults before calling
/// the store.
#[derive(Debug, Clone)]
pub struct NewItem {
    pub title: String,
    pub description: String,
    pub item_type: ItemType,
    pub priority: Priority,
    pub stage: StageId,
    pub dependencies: Vec<i64>,
    pub agent: String,
}

/// Partial update for an item. `agent` is the actor recorded in the logs,
/// not the assignee; assignment changes only through claims.
#[derive(Debug, Clone, Default)]
pub struct ItemChanges {
    pub title: Option<String>,
    pub description: Option<String>,
    pub priority: Option<Priority>,
    pub agent: Option<String>,
}

pub struct BoardDb {
    conn: Connection,
}

impl BoardDb {
    /// Open (or create) a SQLite database at the given path and run migrations.
    pub fn new(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Create an in-memory SQLite database (for testing).
    pub fn new_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    fn init(&self) -> Result<()> {
        self.conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        self.run_migrations()?;
        self.seed_stages()?;
        Ok(())
    }

    fn run_migrations(&self) -> Result<()> {
        // Timestamps are TEXT in UTC with millisecond precision so that
        // updated_at comparisons and the activity cursor stay fine-grained.
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS projects (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now'))
            );

            CREATE TABLE IF NOT EXISTS stages (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                order_index INTEGER NOT NULL UNIQUE,
                wip_limit INTEGER
            );

            CREATE TABLE IF NOT EXISTS items (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                project_id INTEGER NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
                title TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                item_type TEXT NOT NULL DEFAULT 'feature',
                priority TEXT NOT NULL DEFAULT 'medium',
                stage TEXT NOT NULL DEFAULT 'briefings' REFERENCES stages(id),
                assigned_agent TEXT,
                rejection_count INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now')),
                updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now')),
                completed_at TEXT,
                archived_at TEXT
            );

            CREATE TABLE IF NOT EXISTS item_dependencies (
                item_id INTEGER NOT NULL REFERENCES items(id) ON DELETE CASCADE,
                depends_on_id INTEGER NOT NULL REFERENCES items(id) ON DELETE CASCADE,
                PRIMARY KEY (item_id, depends_on_id)
            );

            CREATE TABLE IF NOT EXISTS claims (
                item_id INTEGER PRIMARY KEY REFERENCES items(id) ON DELETE CASCADE,
                agent_name TEXT NOT NULL,
                claimed_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now'))
            );

            CREATE TABLE IF NOT EXISTS work_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                item_id INTEGER NOT NULL REFERENCES items(id) ON DELETE CASCADE,
                agent TEXT NOT NULL,
                action TEXT NOT NULL,
                summary TEXT NOT NULL DEFAULT '',
                created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now'))
            );

            CREATE TABLE IF NOT EXISTS missions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                project_id INTEGER NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
                name TEXT NOT NULL,
                state TEXT NOT NULL DEFAULT 'active',
                started_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now')),
                completed_at TEXT,
                archived_at TEXT
            );

            CREATE TABLE IF NOT EXISTS activity_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                project_id INTEGER NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
                agent TEXT NOT NULL,
                message TEXT NOT NULL,
                level TEXT NOT NULL DEFAULT 'info',
                created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now'))
            );

            CREATE INDEX IF NOT EXISTS idx_items_project ON items(project_id);
            CREATE INDEX IF NOT EXISTS idx_items_stage ON items(project_id, stage);
            CREATE INDEX IF NOT EXISTS idx_work_log_item ON work_log(item_id);
            CREATE INDEX IF NOT EXISTS idx_activity_project ON activity_log(project_id, created_at);

            CREATE UNIQUE INDEX IF NOT EXISTS idx_missions_current
                ON missions(project_id) WHERE archived_at IS NULL;
            ",
        )?;
        Ok(())
    }

    /// The registry in `stages.rs` is the source of truth; re-seed on every
    /// startup so registry edits reach the table without a separate migration.
    fn seed_stages(&self) -> Result<()> {
        for spec in &stages::STAGES {
            self.conn.execute(
                "INSERT INTO stages (id, name, order_index, wip_limit) VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(id) DO UPDATE SET
                     name = excluded.name,
                     order_index = excluded.order_index,
                     wip_limit = excluded.wip_limit",
                params![
                    spec.id.as_str(),
                    spec.name,
                    spec.order,
                    spec.wip_limit.map(|l| l as i64)
                ],
            )?;
        }
        Ok(())
    }

    // ── Projects ──────────────────────────────────────────────────────

    pub fn create_project(&self, name: &str) -> Result<Project> {
        let name = name.trim();
        if name.is_empty() {
            return Err(BoardError::Validation(
                "Project name must not be empty".to_string(),
            ));
        }
        self.conn
            .execute("INSERT INTO projects (name) VALUES (?1)", params![name])?;
        let id = self.conn.last_insert_rowid();
        self.get_project(id)?
            .ok_or_else(|| BoardError::Internal(format!("Project {} missing after insert", id)))
    }

    pub fn list_projects(&self) -> Result<Vec<Project>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, name, created_at FROM projects ORDER BY id")?;
        let rows = stmt.query_map([], |row| {
            Ok(Project {
                id: row.get(0)?,
                name: row.get(1)?,
                created_at: row.get(2)?,
            })
        })?;
        let mut projects = Vec::new();
        for row in rows {
            projects.push(row?);
        }
        Ok(projects)
    }

    pub fn get_project(&self, id: i64) -> Result<Option<Project>> {
        let project = self
            .conn
            .query_row(
                "SELECT id, name, created_at FROM projects WHERE id = ?1",
                params![id],
                |row| {
                    Ok(Project {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        created_at: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(project)
    }

    pub fn require_project(&self, id: i64) -> Result<Project> {
        self.get_project(id)?
            .ok_or(BoardError::ProjectNotFound { id })
    }

    // ── Items ─────────────────────────────────────────────────────────

    pub fn create_item(&self, project_id: i64, spec: NewItem) -> Result<WorkItem> {
        self.require_project(project_id)?;
        if spec.title.trim().is_empty() {
            return Err(BoardError::Validation(
                "Item title must not be empty".to_string(),
            ));
        }

        // Safety: DbHandle's Mutex already guarantees single-threaded access.
        let tx = self.conn.unchecked_transaction()?;

        for dep in &spec.dependencies {
            let exists: bool = tx.query_row(
                "SELECT COUNT(*) > 0 FROM items WHERE id = ?1 AND project_id = ?2 AND archived_at IS NULL",
                params![dep, project_id],
                |row| row.get(0),
            )?;
            if !exists {
                return Err(BoardError::Validation(format!(
                    "Dependency {} not found in project {}",
                    dep, project_id
                )));
            }
        }

        tx.execute(
            "INSERT INTO items (project_id, title, description, item_type, priority, stage)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                project_id,
                spec.title.trim(),
                spec.description,
                spec.item_type.as_str(),
                spec.priority.as_str(),
                spec.stage.as_str()
            ],
        )?;
        let item_id = tx.last_insert_rowid();

        for dep in &spec.dependencies {
            tx.execute(
                "INSERT OR IGNORE INTO item_dependencies (item_id, depends_on_id) VALUES (?1, ?2)",
                params![item_id, dep],
            )?;
        }

        log_work(&tx, item_id, &spec.agent, "created", spec.title.trim())?;
        log_activity(
            &tx,
            project_id,
            &spec.agent,
            &format!("{} created item {} '{}'", spec.agent, item_id, spec.title.trim()),
        )?;

        tx.commit()?;
        self.get_item(project_id, item_id)?
            .ok_or_else(|| BoardError::Internal(format!("Item {} missing after insert", item_id)))
    }

    pub fn get_item(&self, project_id: i64, id: i64) -> Result<Option<WorkItem>> {
        let row = fetch_item_row(&self.conn, project_id, id)?;
        match row {
            Some(row) => {
                let dependencies = item_dependencies(&self.conn, id)?;
                let work_log = item_work_log(&self.conn, id)?;
                Ok(Some(row.into_item(dependencies, work_log)?))
            }
            None => Ok(None),
        }
    }

    pub fn update_item(&self, project_id: i64, id: i64, changes: ItemChanges) -> Result<WorkItem> {
        if let Some(title) = &changes.title {
            if title.trim().is_empty() {
                return Err(BoardError::Validation(
                    "Item title must not be empty".to_string(),
                ));
            }
        }

        let tx = self.conn.unchecked_transaction()?;
        fetch_item_row(&tx, project_id, id)?.ok_or(BoardError::ItemNotFound { id })?;

        let agent = changes.agent.as_deref().unwrap_or("system");
        let mut changed = false;
        if let Some(title) = &changes.title {
            tx.execute(
                "UPDATE items SET title = ?1,
                     updated_at = strftime('%Y-%m-%dT%H:%M:%fZ','now')
                 WHERE id = ?2",
                params![title.trim(), id],
            )?;
            changed = true;
        }
        if let Some(description) = &changes.description {
            tx.execute(
                "UPDATE items SET description = ?1,
                     updated_at = strftime('%Y-%m-%dT%H:%M:%fZ','now')
                 WHERE id = ?2",
                params![description, id],
            )?;
            changed = true;
        }
        if let Some(priority) = &changes.priority {
            tx.execute(
                "UPDATE items SET priority = ?1,
                     updated_at = strftime('%Y-%m-%dT%H:%M:%fZ','now')
                 WHERE id = ?2",
                params![priority.as_str(), id],
            )?;
            changed = true;
        }

        if changed {
            log_work(&tx, id, agent, "updated", "fields edited")?;
            log_activity(
                &tx,
                project_id,
                agent,
                &format!("{} updated item {}", agent, id),
            )?;
        }

        tx.commit()?;
        self.get_item(project_id, id)?
            .ok_or(BoardError::ItemNotFound { id })
    }

    /// Move an item to another stage. The transition check, the WIP
    /// admission check, and every resulting write share one transaction, so
    /// a rejected move leaves no trace.
    pub fn move_item(
        &self,
        project_id: i64,
        id: i64,
        to: StageId,
        force: bool,
        agent: &str,
    ) -> Result<MoveOutcome> {
        let tx = self.conn.unchecked_transaction()?;

        let row = fetch_item_row(&tx, project_id, id)?.ok_or(BoardError::ItemNotFound { id })?;
        let from = StageId::from_str(&row.stage).map_err(BoardError::Internal)?;

        if !stages::is_valid_transition(from, to) {
            return Err(BoardError::InvalidTransition { from, to });
        }

        if !force {
            if let Some(limit) = stages::wip_limit(to) {
                let current = stage_wip(&tx, project_id, to)?.current;
                if current >= limit {
                    return Err(BoardError::WipLimitExceeded {
                        stage: to,
                        limit,
                        current,
                    });
                }
            }
        }

        let rejection_bump = if stages::is_rework_transition(from, to) { 1 } else { 0 };
        tx.execute(
            "UPDATE items SET stage = ?1,
                 rejection_count = rejection_count + ?2,
                 completed_at = CASE WHEN ?1 = 'done'
                     THEN strftime('%Y-%m-%dT%H:%M:%fZ','now') ELSE NULL END,
                 updated_at = strftime('%Y-%m-%dT%H:%M:%fZ','now')
             WHERE id = ?3",
            params![to.as_str(), rejection_bump, id],
        )?;

        log_work(
            &tx,
            id,
            agent,
            "stage-change",
            &format!("{} -> {}", from, to),
        )?;
        log_activity(
            &tx,
            project_id,
            agent,
            &format!("{} moved item {} from {} to {}", agent, id, from, to),
        )?;

        let wip = stage_wip(&tx, project_id, to)?;
        tx.commit()?;

        let item = self
            .get_item(project_id, id)?
            .ok_or(BoardError::ItemNotFound { id })?;
        Ok(MoveOutcome {
            item,
            previous_stage: from,
            wip,
        })
    }

    // ── Claims ────────────────────────────────────────────────────────

    /// Take an exclusive claim for `agent`. Exactly one of any number of
    /// concurrent attempts succeeds; the rest see `ClaimConflict` naming the
    /// holder. The claims primary key rejects a double claim even if the
    /// pre-check is ever bypassed.
    pub fn claim_item(&self, project_id: i64, item_id: i64, agent: &str) -> Result<Claim> {
        if agent.trim().is_empty() {
            return Err(BoardError::Validation(
                "Agent name must not be empty".to_string(),
            ));
        }

        let tx = self.conn.unchecked_transaction()?;
        fetch_item_row(&tx, project_id, item_id)?.ok_or(BoardError::ItemNotFound { id: item_id })?;

        let holder: Option<String> = tx
            .query_row(
                "SELECT agent_name FROM claims WHERE item_id = ?1",
                params![item_id],
                |row| row.get(0),
            )
            .optional()?;
        if let Some(held_by) = holder {
            return Err(BoardError::ClaimConflict { item_id, held_by });
        }

        let insert = tx.execute(
            "INSERT INTO claims (item_id, agent_name) VALUES (?1, ?2)",
            params![item_id, agent],
        );
        if let Err(e) = insert {
            if is_constraint_violation(&e) {
                let held_by: String = tx
                    .query_row(
                        "SELECT agent_name FROM claims WHERE item_id = ?1",
                        params![item_id],
                        |row| row.get(0),
                    )
                    .unwrap_or_else(|_| "unknown".to_string());
                return Err(BoardError::ClaimConflict { item_id, held_by });
            }
            return Err(e.into());
        }

        tx.execute(
            "UPDATE items SET assigned_agent = ?1,
                 updated_at = strftime('%Y-%m-%dT%H:%M:%fZ','now')
             WHERE id = ?2",
            params![agent, item_id],
        )?;

        log_work(&tx, item_id, agent, "claimed", "")?;
        log_activity(
            &tx,
            project_id,
            agent,
            &format!("{} claimed item {}", agent, item_id),
        )?;

        let claim = tx.query_row(
            "SELECT item_id, agent_name, claimed_at FROM claims WHERE item_id = ?1",
            params![item_id],
            |row| {
                Ok(Claim {
                    item_id: row.get(0)?,
                    agent_name: row.get(1)?,
                    claimed_at: row.get(2)?,
                })
            },
        )?;

        tx.commit()?;
        Ok(claim)
    }

    /// Drop the claim on an item if one exists. Returns whether a claim was
    /// actually released; releasing an unclaimed item is a no-op.
    pub fn release_item(&self, project_id: i64, item_id: i64) -> Result<bool> {
        let tx = self.conn.unchecked_transaction()?;
        fetch_item_row(&tx, project_id, item_id)?.ok_or(BoardError::ItemNotFound { id: item_id })?;

        let holder: Option<String> = tx
            .query_row(
                "SELECT agent_name FROM claims WHERE item_id = ?1",
                params![item_id],
                |row| row.get(0),
            )
            .optional()?;
        let Some(holder) = holder else {
            tx.commit()?;
            return Ok(false);
        };

        tx.execute("DELETE FROM claims WHERE item_id = ?1", params![item_id])?;
        tx.execute(
            "UPDATE items SET assigned_agent = NULL,
                 updated_at = strftime('%Y-%m-%dT%H:%M:%fZ','now')
             WHERE id = ?1",
            params![item_id],
        )?;

        log_work(&tx, item_id, &holder, "released", "")?;
        log_activity(
            &tx,
            project_id,
            &holder,
            &format!("item {} released by {}", item_id, holder),
        )?;

        tx.commit()?;
        Ok(true)
    }

    /// Archive an item, releasing any claim on it in the same transaction.
    /// Returns whether the item was newly archived; re-archiving is a no-op.
    pub fn archive_item(&self, project_id: i64, item_id: i64, agent: &str) -> Result<bool> {
        let tx = self.conn.unchecked_transaction()?;

        let archived_at: Option<Option<String>> = tx
            .query_row(
                "SELECT archived_at FROM items WHERE id = ?1 AND project_id = ?2",
                params![item_id, project_id],
                |row| row.get(0),
            )
            .optional()?;
        match archived_at {
            None => return Err(BoardError::ItemNotFound { id: item_id }),
            Some(Some(_)) => {
                tx.commit()?;
                return Ok(false);
            }
            Some(None) => {}
        }

        tx.execute("DELETE FROM claims WHERE item_id = ?1", params![item_id])?;
        tx.execute(
            "UPDATE items SET archived_at = strftime('%Y-%m-%dT%H:%M:%fZ','now'),
                 assigned_agent = NULL,
                 updated_at = strftime('%Y-%m-%dT%H:%M:%fZ','now')
             WHERE id = ?1",
            params![item_id],
        )?;

        log_work(&tx, item_id, agent, "archived", "")?;
        log_activity(
            &tx,
            project_id,
            agent,
            &format!("{} archived item {}", agent, item_id),
        )?;

        tx.commit()?;
        Ok(true)
    }

    pub fn wip_status(&self, project_id: i64, stage: StageId) -> Result<WipStatus> {
        self.require_project(project_id)?;
        stage_wip(&self.conn, project_id, stage)
    }

    // ── Board view ────────────────────────────────────────────────────

    /// Assemble the full board for one project. Archived items never
    /// appear; completed (`done`) items appear only when asked for.
    pub fn read_board(&self, project_id: i64, include_completed: bool) -> Result<BoardState> {
        let project = self.require_project(project_id)?;

        let item_sql = if include_completed {
            "SELECT id, project_id, title, description, item_type, priority, stage,
                    assigned_agent, rejection_count, created_at, updated_at, completed_at
             FROM items WHERE project_id = ?1 AND archived_at IS NULL ORDER BY id"
        } else {
            "SELECT id, project_id, title, description, item_type, priority, stage,
                    assigned_agent, rejection_count, created_at, updated_at, completed_at
             FROM items WHERE project_id = ?1 AND archived_at IS NULL AND stage != 'done'
             ORDER BY id"
        };
        let mut stmt = self.conn.prepare(item_sql)?;
        let rows = stmt.query_map(params![project_id], map_item_row)?;
        let mut item_rows = Vec::new();
        for row in rows {
            item_rows.push(row?);
        }

        let mut dependencies = project_dependencies(&self.conn, project_id)?;
        let mut work_logs = project_work_logs(&self.conn, project_id)?;

        let mut items = Vec::new();
        for row in item_rows {
            let id = row.id;
            items.push(row.into_item(
                dependencies.remove(&id).unwrap_or_default(),
                work_logs.remove(&id).unwrap_or_default(),
            )?);
        }

        let claim_sql = if include_completed {
            "SELECT c.item_id, c.agent_name, c.claimed_at
             FROM claims c JOIN items i ON i.id = c.item_id
             WHERE i.project_id = ?1 AND i.archived_at IS NULL ORDER BY c.item_id"
        } else {
            "SELECT c.item_id, c.agent_name, c.claimed_at
             FROM claims c JOIN items i ON i.id = c.item_id
             WHERE i.project_id = ?1 AND i.archived_at IS NULL AND i.stage != 'done'
             ORDER BY c.item_id"
        };
        let mut stmt = self.conn.prepare(claim_sql)?;
        let rows = stmt.query_map(params![project_id], |row| {
            Ok(Claim {
                item_id: row.get(0)?,
                agent_name: row.get(1)?,
                claimed_at: row.get(2)?,
            })
        })?;
        let mut claims = Vec::new();
        for row in rows {
            claims.push(row?);
        }

        let mut stage_statuses = Vec::new();
        for spec in &stages::STAGES {
            stage_statuses.push(StageStatus {
                id: spec.id,
                name: spec.name.to_string(),
                order: spec.order,
                wip: stage_wip(&self.conn, project_id, spec.id)?,
            });
        }

        Ok(BoardState {
            project,
            stages: stage_statuses,
            items,
            claims,
            current_mission: self.current_mission(project_id)?,
        })
    }

    /// Snapshot for the change feed: every non-archived item including the
    /// completed ones (completion surfaces as a move, only archival reads as
    /// a deletion), the current mission, and activity rows past the cursor.
    ///
    /// A `None` cursor returns no activity rows; the caller seeds its cursor
    /// from `latest_activity_ts` so history is never replayed.
    pub fn feed_snapshot(
        &self,
        project_id: i64,
        activity_cursor: Option<&str>,
    ) -> Result<BoardSnapshot> {
        self.require_project(project_id)?;

        let mut stmt = self.conn.prepare(
            "SELECT id, project_id, title, description, item_type, priority, stage,
                    assigned_agent, rejection_count, created_at, updated_at, completed_at
             FROM items WHERE project_id = ?1 AND archived_at IS NULL ORDER BY id",
        )?;
        let rows = stmt.query_map(params![project_id], map_item_row)?;
        let mut item_rows = Vec::new();
        for row in rows {
            item_rows.push(row?);
        }

        let mut dependencies = project_dependencies(&self.conn, project_id)?;
        let mut items = Vec::new();
        for row in item_rows {
            let id = row.id;
            // Work log entries reach subscribers as activity events, not as
            // part of the item payload.
            items.push(row.into_item(dependencies.remove(&id).unwrap_or_default(), Vec::new())?);
        }

        let activity = match activity_cursor {
            Some(cursor) => {
                let mut stmt = self.conn.prepare(
                    "SELECT id, project_id, agent, message, level, created_at
                     FROM activity_log WHERE project_id = ?1 AND created_at > ?2
                     ORDER BY created_at, id",
                )?;
                let rows = stmt.query_map(params![project_id, cursor], map_activity_row)?;
                let mut entries = Vec::new();
                for row in rows {
                    entries.push(row?.into_entry()?);
                }
                entries
            }
            None => Vec::new(),
        };

        let latest_activity_ts: Option<String> = self.conn.query_row(
            "SELECT MAX(created_at) FROM activity_log WHERE project_id = ?1",
            params![project_id],
            |row| row.get(0),
        )?;

        Ok(BoardSnapshot {
            items,
            mission: self.current_mission(project_id)?,
            activity,
            latest_activity_ts,
        })
    }

    // ── Missions ──────────────────────────────────────────────────────

    /// Start a mission. The partial unique index on non-archived missions
    /// rejects a second current mission for the same project.
    pub fn create_mission(&self, project_id: i64, name: &str) -> Result<Mission> {
        self.require_project(project_id)?;
        let name = name.trim();
        if name.is_empty() {
            return Err(BoardError::Validation(
                "Mission name must not be empty".to_string(),
            ));
        }

        let tx = self.conn.unchecked_transaction()?;
        let insert = tx.execute(
            "INSERT INTO missions (project_id, name) VALUES (?1, ?2)",
            params![project_id, name],
        );
        if let Err(e) = insert {
            if is_constraint_violation(&e) {
                return Err(BoardError::Validation(format!(
                    "Project {} already has a current mission",
                    project_id
                )));
            }
            return Err(e.into());
        }
        let id = tx.last_insert_rowid();

        log_activity(
            &tx,
            project_id,
            "system",
            &format!("mission '{}' started", name),
        )?;
        tx.commit()?;

        self.get_mission(project_id, id)?
            .ok_or_else(|| BoardError::Internal(format!("Mission {} missing after insert", id)))
    }

    /// Mark the mission completed. Completing an already-completed mission
    /// is a no-op returning the current row.
    pub fn complete_mission(&self, project_id: i64, id: i64) -> Result<Mission> {
        let tx = self.conn.unchecked_transaction()?;
        let state: Option<String> = tx
            .query_row(
                "SELECT state FROM missions
                 WHERE id = ?1 AND project_id = ?2 AND archived_at IS NULL",
                params![id, project_id],
                |row| row.get(0),
            )
            .optional()?;
        let state = state.ok_or(BoardError::MissionNotFound { id })?;

        if state != MissionState::Completed.as_str() {
            tx.execute(
                "UPDATE missions SET state = 'completed',
                     completed_at = strftime('%Y-%m-%dT%H:%M:%fZ','now')
                 WHERE id = ?1",
                params![id],
            )?;
            let name: String = tx.query_row(
                "SELECT name FROM missions WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )?;
            log_activity(
                &tx,
                project_id,
                "system",
                &format!("mission '{}' completed", name),
            )?;
        }
        tx.commit()?;

        self.get_mission(project_id, id)?
            .ok_or(BoardError::MissionNotFound { id })
    }

    /// Archive the mission, making room for a new current one. Idempotent.
    pub fn archive_mission(&self, project_id: i64, id: i64) -> Result<Mission> {
        let tx = self.conn.unchecked_transaction()?;
        let archived_at: Option<Option<String>> = tx
            .query_row(
                "SELECT archived_at FROM missions WHERE id = ?1 AND project_id = ?2",
                params![id, project_id],
                |row| row.get(0),
            )
            .optional()?;
        match archived_at {
            None => return Err(BoardError::MissionNotFound { id }),
            Some(Some(_)) => {}
            Some(None) => {
                tx.execute(
                    "UPDATE missions SET state = 'archived',
                         archived_at = strftime('%Y-%m-%dT%H:%M:%fZ','now')
                     WHERE id = ?1",
                    params![id],
                )?;
                let name: String = tx.query_row(
                    "SELECT name FROM missions WHERE id = ?1",
                    params![id],
                    |row| row.get(0),
                )?;
                log_activity(
                    &tx,
                    project_id,
                    "system",
                    &format!("mission '{}' archived", name),
                )?;
            }
        }
        tx.commit()?;

        self.get_mission(project_id, id)?
            .ok_or(BoardError::MissionNotFound { id })
    }

    pub fn get_mission(&self, project_id: i64, id: i64) -> Result<Option<Mission>> {
        let row = self
            .conn
            .query_row(
                "SELECT id, project_id, name, state, started_at, completed_at
                 FROM missions WHERE id = ?1 AND project_id = ?2",
                params![id, project_id],
                map_mission_row,
            )
            .optional()?;
        match row {
            Some(row) => Ok(Some(row.into_mission()?)),
            None => Ok(None),
        }
    }

    /// The project's single non-archived mission, if any.
    pub fn current_mission(&self, project_id: i64) -> Result<Option<Mission>> {
        let row = self
            .conn
            .query_row(
                "SELECT id, project_id, name, state, started_at, completed_at
                 FROM missions WHERE project_id = ?1 AND archived_at IS NULL",
                params![project_id],
                map_mission_row,
            )
            .optional()?;
        match row {
            Some(row) => Ok(Some(row.into_mission()?)),
            None => Ok(None),
        }
    }
}

// ── Row mapping ───────────────────────────────────────────────────────

struct ItemRow {
    id: i64,
    project_id: i64,
    title: String,
    description: String,
    item_type: String,
    priority: String,
    stage: String,
    assigned_agent: Option<String>,
    rejection_count: i64,
    created_at: String,
    updated_at: String,
    completed_at: Option<String>,
}

impl ItemRow {
    fn into_item(self, dependencies: Vec<i64>, work_log: Vec<WorkLogEntry>) -> Result<WorkItem> {
        Ok(WorkItem {
            id: self.id,
            project_id: self.project_id,
            title: self.title,
            description: self.description,
            item_type: ItemType::from_str(&self.item_type).map_err(BoardError::Internal)?,
            priority: Priority::from_str(&self.priority).map_err(BoardError::Internal)?,
            stage: StageId::from_str(&self.stage).map_err(BoardError::Internal)?,
            assigned_agent: self.assigned_agent,
            rejection_count: self.rejection_count,
            dependencies,
            work_log,
            created_at: self.created_at,
            updated_at: self.updated_at,
            completed_at: self.completed_at,
        })
    }
}

fn map_item_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ItemRow> {
    Ok(ItemRow {
        id: row.get(0)?,
        project_id: row.get(1)?,
        title: row.get(2)?,
        description: row.get(3)?,
        item_type: row.get(4)?,
        priority: row.get(5)?,
        stage: row.get(6)?,
        assigned_agent: row.get(7)?,
        rejection_count: row.get(8)?,
        created_at: row.get(9)?,
        updated_at: row.get(10)?,
        completed_at: row.get(11)?,
    })
}

struct MissionRow {
    id: i64,
    project_id: i64,
    name: String,
    state: String,
    started_at: String,
    completed_at: Option<String>,
}

impl MissionRow {
    fn into_mission(self) -> Result<Mission> {
        Ok(Mission {
            id: self.id,
            project_id: self.project_id,
            name: self.name,
            state: MissionState::from_str(&self.state).map_err(BoardError::Internal)?,
            started_at: self.started_at,
            completed_at: self.completed_at,
        })
    }
}

fn map_mission_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<MissionRow> {
    Ok(MissionRow {
        id: row.get(0)?,
        project_id: row.get(1)?,
        name: row.get(2)?,
        state: row.get(3)?,
        started_at: row.get(4)?,
        completed_at: row.get(5)?,
    })
}

struct ActivityRow {
    id: i64,
    project_id: i64,
    agent: String,
    message: String,
    level: String,
    created_at: String,
}

impl ActivityRow {
    fn into_entry(self) -> Result<ActivityEntry> {
        Ok(ActivityEntry {
            id: self.id,
            project_id: self.project_id,
            agent: self.agent,
            message: self.message,
            level: ActivityLevel::from_str(&self.level).map_err(BoardError::Internal)?,
            created_at: self.created_at,
        })
    }
}

fn map_activity_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ActivityRow> {
    Ok(ActivityRow {
        id: row.get(0)?,
        project_id: row.get(1)?,
        agent: row.get(2)?,
        message: row.get(3)?,
        level: row.get(4)?,
        created_at: row.get(5)?,
    })
}

// ── Shared helpers (usable inside and outside transactions) ───────────

fn fetch_item_row(conn: &Connection, project_id: i64, id: i64) -> Result<Option<ItemRow>> {
    let row = conn
        .query_row(
            "SELECT id, project_id, title, description, item_type, priority, stage,
                    assigned_agent, rejection_count, created_at, updated_at, completed_at
             FROM items WHERE id = ?1 AND project_id = ?2 AND archived_at IS NULL",
            params![id, project_id],
            map_item_row,
        )
        .optional()?;
    Ok(row)
}

fn item_dependencies(conn: &Connection, item_id: i64) -> Result<Vec<i64>> {
    let mut stmt = conn.prepare(
        "SELECT depends_on_id FROM item_dependencies WHERE item_id = ?1 ORDER BY depends_on_id",
    )?;
    let rows = stmt.query_map(params![item_id], |row| row.get(0))?;
    let mut deps = Vec::new();
    for row in rows {
        deps.push(row?);
    }
    Ok(deps)
}

fn item_work_log(conn: &Connection, item_id: i64) -> Result<Vec<WorkLogEntry>> {
    let mut stmt = conn.prepare(
        "SELECT id, item_id, agent, action, summary, created_at
         FROM work_log WHERE item_id = ?1 ORDER BY id",
    )?;
    let rows = stmt.query_map(params![item_id], |row| {
        Ok(WorkLogEntry {
            id: row.get(0)?,
            item_id: row.get(1)?,
            agent: row.get(2)?,
            action: row.get(3)?,
            summary: row.get(4)?,
            created_at: row.get(5)?,
        })
    })?;
    let mut entries = Vec::new();
    for row in rows {
        entries.push(row?);
    }
    Ok(entries)
}

fn project_dependencies(conn: &Connection, project_id: i64) -> Result<HashMap<i64, Vec<i64>>> {
    let mut stmt = conn.prepare(
        "SELECT d.item_id, d.depends_on_id
         FROM item_dependencies d JOIN items i ON i.id = d.item_id
         WHERE i.project_id = ?1 AND i.archived_at IS NULL
         ORDER BY d.item_id, d.depends_on_id",
    )?;
    let rows = stmt.query_map(params![project_id], |row| {
        Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?))
    })?;
    let mut map: HashMap<i64, Vec<i64>> = HashMap::new();
    for row in rows {
        let (item_id, dep) = row?;
        map.entry(item_id).or_default().push(dep);
    }
    Ok(map)
}

fn project_work_logs(conn: &Connection, project_id: i64) -> Result<HashMap<i64, Vec<WorkLogEntry>>> {
    let mut stmt = conn.prepare(
        "SELECT w.id, w.item_id, w.agent, w.action, w.summary, w.created_at
         FROM work_log w JOIN items i ON i.id = w.item_id
         WHERE i.project_id = ?1 AND i.archived_at IS NULL
         ORDER BY w.id",
    )?;
    let rows = stmt.query_map(params![project_id], |row| {
        Ok(WorkLogEntry {
            id: row.get(0)?,
            item_id: row.get(1)?,
            agent: row.get(2)?,
            action: row.get(3)?,
            summary: row.get(4)?,
            created_at: row.get(5)?,
        })
    })?;
    let mut map: HashMap<i64, Vec<WorkLogEntry>> = HashMap::new();
    for row in rows {
        let entry = row?;
        map.entry(entry.item_id).or_default().push(entry);
    }
    Ok(map)
}

fn stage_wip(conn: &Connection, project_id: i64, stage: StageId) -> Result<WipStatus> {
    let current: i64 = conn.query_row(
        "SELECT COUNT(*) FROM items
         WHERE project_id = ?1 AND stage = ?2 AND archived_at IS NULL",
        params![project_id, stage.as_str()],
        |row| row.get(0),
    )?;
    let current = current as u32;
    let limit = stages::wip_limit(stage);
    Ok(WipStatus {
        stage,
        limit,
        current,
        available: limit.map(|l| l.saturating_sub(current)),
    })
}

fn log_work(conn: &Connection, item_id: i64, agent: &str, action: &str, summary: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO work_log (item_id, agent, action, summary) VALUES (?1, ?2, ?3, ?4)",
        params![item_id, agent, action, summary],
    )?;
    Ok(())
}

fn log_activity(conn: &Connection, project_id: i64, agent: &str, message: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO activity_log (project_id, agent, message, level) VALUES (?1, ?2, ?3, 'info')",
        params![project_id, agent, message],
    )?;
    Ok(())
}

fn is_constraint_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(f, _)
            if f.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> BoardDb {
        BoardDb::new_in_memory().unwrap()
    }

    fn item_spec(title: &str) -> NewItem {
        NewItem {
            title: title.to_string(),
            description: String::new(),
            item_type: ItemType::Feature,
            priority: Priority::Medium,
            stage: StageId::Briefings,
            dependencies: vec![],
            agent: "system".to_string(),
        }
    }

    fn seed_item(db: &BoardDb, project_id: i64, title: &str, stage: StageId) -> WorkItem {
        let mut spec = item_spec(title);
        spec.stage = stage;
        db.create_item(project_id, spec).unwrap()
    }

    #[test]
    fn create_and_get_project() {
        let db = test_db();
        let project = db.create_project("atlas").unwrap();
        assert!(project.id > 0);
        assert_eq!(project.name, "atlas");
        assert!(!project.created_at.is_empty());

        let fetched = db.get_project(project.id).unwrap().unwrap();
        assert_eq!(fetched.name, "atlas");
        assert!(db.get_project(999).unwrap().is_none());
    }

    #[test]
    fn empty_project_name_is_rejected() {
        let db = test_db();
        let err = db.create_project("   ").unwrap_err();
        assert!(matches!(err, BoardError::Validation(_)));
    }

    #[test]
    fn create_item_applies_defaults_and_logs() {
        let db = test_db();
        let project = db.create_project("atlas").unwrap();
        let item = db.create_item(project.id, item_spec("First task")).unwrap();

        assert_eq!(item.stage, StageId::Briefings);
        assert_eq!(item.priority, Priority::Medium);
        assert_eq!(item.rejection_count, 0);
        assert!(item.completed_at.is_none());
        assert_eq!(item.work_log.len(), 1);
        assert_eq!(item.work_log[0].action, "created");
    }

    #[test]
    fn create_item_validates_dependencies() {
        let db = test_db();
        let project = db.create_project("atlas").unwrap();
        let base = seed_item(&db, project.id, "base", StageId::Ready);

        let mut spec = item_spec("dependent");
        spec.dependencies = vec![base.id];
        let item = db.create_item(project.id, spec).unwrap();
        assert_eq!(item.dependencies, vec![base.id]);

        let mut bad = item_spec("broken");
        bad.dependencies = vec![9999];
        let err = db.create_item(project.id, bad).unwrap_err();
        assert!(matches!(err, BoardError::Validation(_)));
        assert!(err.to_string().contains("9999"));
    }

    #[test]
    fn create_item_for_unknown_project_fails() {
        let db = test_db();
        let err = db.create_item(42, item_spec("orphan")).unwrap_err();
        assert!(matches!(err, BoardError::ProjectNotFound { id: 42 }));
    }

    #[test]
    fn move_through_the_forward_path() {
        let db = test_db();
        let project = db.create_project("atlas").unwrap();
        let item = seed_item(&db, project.id, "walk", StageId::Briefings);

        let outcome = db
            .move_item(project.id, item.id, StageId::Ready, false, "agent-a")
            .unwrap();
        assert_eq!(outcome.previous_stage, StageId::Briefings);
        assert_eq!(outcome.item.stage, StageId::Ready);
        assert_eq!(outcome.wip.current, 1);

        let last = outcome.item.work_log.last().unwrap();
        assert_eq!(last.action, "stage-change");
        assert_eq!(last.summary, "briefings -> ready");
    }

    #[test]
    fn invalid_move_is_rejected_and_mutates_nothing() {
        let db = test_db();
        let project = db.create_project("atlas").unwrap();
        let item = seed_item(&db, project.id, "stuck", StageId::Briefings);

        for _ in 0..2 {
            let err = db
                .move_item(project.id, item.id, StageId::Review, false, "agent-a")
                .unwrap_err();
            match err {
                BoardError::InvalidTransition { from, to } => {
                    assert_eq!(from, StageId::Briefings);
                    assert_eq!(to, StageId::Review);
                }
                other => panic!("Expected InvalidTransition, got {other:?}"),
            }
        }

        let unchanged = db.get_item(project.id, item.id).unwrap().unwrap();
        assert_eq!(unchanged.stage, StageId::Briefings);
        assert_eq!(unchanged.updated_at, item.updated_at);
        assert_eq!(unchanged.work_log.len(), 1);
    }

    #[test]
    fn done_is_terminal() {
        let db = test_db();
        let project = db.create_project("atlas").unwrap();
        let item = seed_item(&db, project.id, "shipped", StageId::Deployment);

        let outcome = db
            .move_item(project.id, item.id, StageId::Done, false, "agent-a")
            .unwrap();
        assert!(outcome.item.completed_at.is_some());

        let err = db
            .move_item(project.id, item.id, StageId::Ready, false, "agent-a")
            .unwrap_err();
        assert!(matches!(err, BoardError::InvalidTransition { .. }));
    }

    #[test]
    fn rework_increments_rejection_count() {
        let db = test_db();
        let project = db.create_project("atlas").unwrap();
        let item = seed_item(&db, project.id, "bounced", StageId::Review);

        let outcome = db
            .move_item(project.id, item.id, StageId::Development, false, "reviewer")
            .unwrap();
        assert_eq!(outcome.item.rejection_count, 1);

        // forward again, then bounce from testing
        db.move_item(project.id, item.id, StageId::Review, false, "dev")
            .unwrap();
        db.move_item(project.id, item.id, StageId::Testing, false, "reviewer")
            .unwrap();
        let outcome = db
            .move_item(project.id, item.id, StageId::Development, false, "tester")
            .unwrap();
        assert_eq!(outcome.item.rejection_count, 2);
    }

    #[test]
    fn wip_limit_blocks_without_force() {
        let db = test_db();
        let project = db.create_project("atlas").unwrap();
        // deployment holds at most one item
        seed_item(&db, project.id, "occupant", StageId::Deployment);
        let item = seed_item(&db, project.id, "waiting", StageId::Testing);

        let err = db
            .move_item(project.id, item.id, StageId::Deployment, false, "agent-a")
            .unwrap_err();
        match err {
            BoardError::WipLimitExceeded {
                stage,
                limit,
                current,
            } => {
                assert_eq!(stage, StageId::Deployment);
                assert_eq!(limit, 1);
                assert_eq!(current, 1);
            }
            other => panic!("Expected WipLimitExceeded, got {other:?}"),
        }

        let outcome = db
            .move_item(project.id, item.id, StageId::Deployment, true, "agent-a")
            .unwrap();
        assert_eq!(outcome.item.stage, StageId::Deployment);
        assert_eq!(outcome.wip.current, 2);
        assert_eq!(outcome.wip.available, Some(0));
    }

    #[test]
    fn unlimited_stages_always_admit() {
        let db = test_db();
        let project = db.create_project("atlas").unwrap();
        for i in 0..10 {
            let item = seed_item(&db, project.id, &format!("item-{i}"), StageId::Briefings);
            db.move_item(project.id, item.id, StageId::Ready, false, "agent-a")
                .unwrap();
        }
        let wip = db.wip_status(project.id, StageId::Ready).unwrap();
        assert_eq!(wip.current, 10);
        assert_eq!(wip.limit, None);
        assert_eq!(wip.available, None);
    }

    #[test]
    fn claim_is_exclusive_and_names_the_holder() {
        let db = test_db();
        let project = db.create_project("atlas").unwrap();
        let item = seed_item(&db, project.id, "contended", StageId::Ready);

        let claim = db.claim_item(project.id, item.id, "agent-one").unwrap();
        assert_eq!(claim.agent_name, "agent-one");

        let err = db.claim_item(project.id, item.id, "agent-two").unwrap_err();
        match err {
            BoardError::ClaimConflict { item_id, held_by } => {
                assert_eq!(item_id, item.id);
                assert_eq!(held_by, "agent-one");
            }
            other => panic!("Expected ClaimConflict, got {other:?}"),
        }

        let item = db.get_item(project.id, item.id).unwrap().unwrap();
        assert_eq!(item.assigned_agent.as_deref(), Some("agent-one"));
    }

    #[test]
    fn one_agent_may_hold_several_items() {
        let db = test_db();
        let project = db.create_project("atlas").unwrap();
        let a = seed_item(&db, project.id, "first", StageId::Ready);
        let b = seed_item(&db, project.id, "second", StageId::Ready);

        db.claim_item(project.id, a.id, "agent-one").unwrap();
        db.claim_item(project.id, b.id, "agent-one").unwrap();
    }

    #[tokio::test]
    async fn concurrent_claims_yield_one_winner() {
        let handle = DbHandle::new(BoardDb::new_in_memory().unwrap());
        let (project_id, item_id) = handle
            .call(|db| {
                let project = db.create_project("race")?;
                let item = db.create_item(project.id, NewItem {
                    title: "contended".to_string(),
                    description: String::new(),
                    item_type: ItemType::Feature,
                    priority: Priority::Medium,
                    stage: StageId::Ready,
                    dependencies: vec![],
                    agent: "system".to_string(),
                })?;
                Ok((project.id, item.id))
            })
            .await
            .unwrap();

        let mut tasks = Vec::new();
        for i in 0..5 {
            let handle = handle.clone();
            tasks.push(tokio::spawn(async move {
                handle
                    .call(move |db| db.claim_item(project_id, item_id, &format!("agent-{i}")))
                    .await
            }));
        }

        let mut winners = Vec::new();
        let mut conflicts = 0;
        for task in tasks {
            match task.await.unwrap() {
                Ok(claim) => winners.push(claim.agent_name),
                Err(BoardError::ClaimConflict { .. }) => conflicts += 1,
                Err(other) => panic!("Unexpected error: {other:?}"),
            }
        }
        assert_eq!(winners.len(), 1);
        assert_eq!(conflicts, 4);

        let assigned = handle
            .call(move |db| Ok(db.get_item(project_id, item_id)?.unwrap().assigned_agent))
            .await
            .unwrap();
        assert_eq!(assigned.as_deref(), Some(winners[0].as_str()));
    }

    #[test]
    fn release_is_idempotent() {
        let db = test_db();
        let project = db.create_project("atlas").unwrap();
        let item = seed_item(&db, project.id, "held", StageId::Ready);

        db.claim_item(project.id, item.id, "agent-one").unwrap();
        assert!(db.release_item(project.id, item.id).unwrap());
        assert!(!db.release_item(project.id, item.id).unwrap());

        let item = db.get_item(project.id, item.id).unwrap().unwrap();
        assert!(item.assigned_agent.is_none());
    }

    #[test]
    fn archive_releases_claim_and_hides_the_item() {
        let db = test_db();
        let project = db.create_project("atlas").unwrap();
        let item = seed_item(&db, project.id, "finished with", StageId::Ready);
        db.claim_item(project.id, item.id, "agent-one").unwrap();

        assert!(db.archive_item(project.id, item.id, "agent-one").unwrap());
        assert!(!db.archive_item(project.id, item.id, "agent-one").unwrap());

        assert!(db.get_item(project.id, item.id).unwrap().is_none());
        let err = db.claim_item(project.id, item.id, "agent-two").unwrap_err();
        assert!(matches!(err, BoardError::ItemNotFound { .. }));
    }

    #[test]
    fn board_is_scoped_and_hides_completed_by_default() {
        let db = test_db();
        let atlas = db.create_project("atlas").unwrap();
        let vega = db.create_project("vega").unwrap();
        seed_item(&db, atlas.id, "atlas work", StageId::Ready);
        seed_item(&db, vega.id, "vega work", StageId::Ready);
        let shipped = seed_item(&db, atlas.id, "shipped", StageId::Deployment);
        db.move_item(atlas.id, shipped.id, StageId::Done, false, "agent-a")
            .unwrap();

        let board = db.read_board(atlas.id, false).unwrap();
        assert_eq!(board.items.len(), 1);
        assert_eq!(board.items[0].title, "atlas work");
        assert_eq!(board.stages.len(), 8);

        let board = db.read_board(atlas.id, true).unwrap();
        assert_eq!(board.items.len(), 2);

        let err = db.read_board(999, false).unwrap_err();
        assert!(matches!(err, BoardError::ProjectNotFound { id: 999 }));
    }

    #[test]
    fn board_claims_follow_item_visibility() {
        let db = test_db();
        let project = db.create_project("atlas").unwrap();
        let item = seed_item(&db, project.id, "claimed", StageId::Deployment);
        db.claim_item(project.id, item.id, "agent-one").unwrap();
        db.move_item(project.id, item.id, StageId::Done, false, "agent-one")
            .unwrap();

        let board = db.read_board(project.id, false).unwrap();
        assert!(board.claims.is_empty());
        let board = db.read_board(project.id, true).unwrap();
        assert_eq!(board.claims.len(), 1);
    }

    #[test]
    fn single_current_mission_is_enforced() {
        let db = test_db();
        let project = db.create_project("atlas").unwrap();
        let mission = db.create_mission(project.id, "launch v1").unwrap();
        assert_eq!(mission.state, MissionState::Active);

        let err = db.create_mission(project.id, "launch v2").unwrap_err();
        assert!(matches!(err, BoardError::Validation(_)));
        assert!(err.to_string().contains("current mission"));

        // completing does not archive; still the current mission
        let completed = db.complete_mission(project.id, mission.id).unwrap();
        assert_eq!(completed.state, MissionState::Completed);
        assert!(completed.completed_at.is_some());
        let err = db.create_mission(project.id, "launch v2").unwrap_err();
        assert!(matches!(err, BoardError::Validation(_)));

        // archiving frees the slot
        db.archive_mission(project.id, mission.id).unwrap();
        assert!(db.current_mission(project.id).unwrap().is_none());
        db.create_mission(project.id, "launch v2").unwrap();
    }

    #[test]
    fn complete_mission_is_idempotent() {
        let db = test_db();
        let project = db.create_project("atlas").unwrap();
        let mission = db.create_mission(project.id, "launch").unwrap();

        let first = db.complete_mission(project.id, mission.id).unwrap();
        let second = db.complete_mission(project.id, mission.id).unwrap();
        assert_eq!(first.completed_at, second.completed_at);
    }

    #[test]
    fn feed_snapshot_includes_done_items_and_tails_activity() {
        let db = test_db();
        let project = db.create_project("atlas").unwrap();
        let item = seed_item(&db, project.id, "shipped", StageId::Deployment);
        db.move_item(project.id, item.id, StageId::Done, false, "agent-a")
            .unwrap();

        let snapshot = db.feed_snapshot(project.id, None).unwrap();
        assert_eq!(snapshot.items.len(), 1);
        assert_eq!(snapshot.items[0].stage, StageId::Done);
        // no cursor: history is not replayed
        assert!(snapshot.activity.is_empty());
        let cursor = snapshot.latest_activity_ts.clone().unwrap();

        // land the new activity in a later millisecond than the cursor
        std::thread::sleep(std::time::Duration::from_millis(5));
        let late = seed_item(&db, project.id, "late arrival", StageId::Briefings);
        let snapshot = db.feed_snapshot(project.id, Some(&cursor)).unwrap();
        assert_eq!(snapshot.items.len(), 2);
        assert!(!snapshot.activity.is_empty());
        assert!(snapshot.activity.iter().all(|e| e.created_at > cursor));
        assert!(
            snapshot
                .activity
                .iter()
                .any(|e| e.message.contains(&format!("item {}", late.id)))
        );
    }

    #[test]
    fn items_are_invisible_across_projects() {
        let db = test_db();
        let atlas = db.create_project("atlas").unwrap();
        let vega = db.create_project("vega").unwrap();
        let item = seed_item(&db, atlas.id, "private", StageId::Ready);

        assert!(db.get_item(vega.id, item.id).unwrap().is_none());
        let err = db
            .move_item(vega.id, item.id, StageId::Development, false, "spy")
            .unwrap_err();
        assert!(matches!(err, BoardError::ItemNotFound { .. }));
        let err = db.claim_item(vega.id, item.id, "spy").unwrap_err();
        assert!(matches!(err, BoardError::ItemNotFound { .. }));
    }

    #[test]
    fn update_item_edits_fields_and_logs_once() {
        let db = test_db();
        let project = db.create_project("atlas").unwrap();
        let item = seed_item(&db, project.id, "draft", StageId::Briefings);

        let updated = db
            .update_item(
                project.id,
                item.id,
                ItemChanges {
                    title: Some("polished".to_string()),
                    priority: Some(Priority::High),
                    agent: Some("editor".to_string()),
                    ..ItemChanges::default()
                },
            )
            .unwrap();
        assert_eq!(updated.title, "polished");
        assert_eq!(updated.priority, Priority::High);
        assert_eq!(updated.work_log.len(), 2);
        assert_eq!(updated.work_log.last().unwrap().action, "updated");

        // empty change set: nothing written
        let unchanged = db
            .update_item(project.id, item.id, ItemChanges::default())
            .unwrap();
        assert_eq!(unchanged.work_log.len(), 2);
        assert_eq!(unchanged.updated_at, updated.updated_at);
    }
}
