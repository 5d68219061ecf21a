//! SQLite-backed task store.
//!
//! `TaskDb` owns the connection and the schema; `DbHandle` wraps it behind
//! `Arc<Mutex>` and runs all access on tokio's blocking thread pool via
//! `spawn_blocking`, preventing synchronous SQLite I/O from tying up async
//! worker threads.

pub mod models;

use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use rusqlite::{Connection, params};
use uuid::Uuid;

use models::{Task, TaskPriority, TaskStatus, User};

/// Async-safe handle to the task database.
#[derive(Clone)]
pub struct DbHandle {
    inner: Arc<std::sync::Mutex<TaskDb>>,
}

impl DbHandle {
    pub fn new(db: TaskDb) -> Self {
        Self {
            inner: Arc::new(std::sync::Mutex::new(db)),
        }
    }

    /// Run a closure with access to the database on a blocking thread.
    /// All data passed into `f` must be owned (`'static`).
    pub async fn call<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&TaskDb) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let db = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let guard = db
                .lock()
                .map_err(|e| anyhow::anyhow!("DB lock poisoned: {}", e))?;
            f(&guard)
        })
        .await
        .context("DB task panicked")?
    }
}

/// Fields for a task insert.
#[derive(Debug, Clone)]
pub struct NewTask {
    pub title: String,
    pub description: Option<String>,
    pub status: TaskStatus,
    pub priority: TaskPriority,
    pub label: Option<String>,
    pub deadline: Option<String>,
    pub external_id: Option<String>,
}

/// Partial update for a task; `None` fields are left unchanged.
#[derive(Debug, Clone, Default)]
pub struct TaskPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub status: Option<TaskStatus>,
    pub priority: Option<TaskPriority>,
    pub label: Option<String>,
    pub deadline: Option<String>,
    pub external_id: Option<String>,
}

pub struct TaskDb {
    conn: Connection,
}

impl TaskDb {
    /// Open (or create) a SQLite database at the given path and run migrations.
    pub fn new(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).context("Failed to create database directory")?;
            }
        }
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
        Ok(())
    }

    fn run_migrations(&self) -> Result<()> {
        self.conn
            .execute_batch(
                "
                CREATE TABLE IF NOT EXISTS users (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    email TEXT NOT NULL UNIQUE,
                    name TEXT NOT NULL DEFAULT '',
                    api_token TEXT UNIQUE,
                    created_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE TABLE IF NOT EXISTS tasks (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                    title TEXT NOT NULL,
                    description TEXT,
                    status TEXT NOT NULL DEFAULT 'open',
                    priority TEXT NOT NULL DEFAULT 'p2',
                    label TEXT,
                    deadline TEXT,
                    external_id TEXT,
                    created_at TEXT NOT NULL DEFAULT (datetime('now')),
                    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE INDEX IF NOT EXISTS idx_tasks_user ON tasks(user_id);

                CREATE UNIQUE INDEX IF NOT EXISTS idx_tasks_external
                    ON tasks(user_id, external_id)
                    WHERE external_id IS NOT NULL;
                ",
            )
            .context("Failed to create tables")?;
        Ok(())
    }

    // ── Users ─────────────────────────────────────────────────────────

    pub fn find_or_create_user_by_email(&self, email: &str, name: &str) -> Result<User> {
        if let Some(user) = self.get_user_by_email(email)? {
            return Ok(user);
        }
        self.conn
            .execute(
                "INSERT INTO users (email, name) VALUES (?1, ?2)",
                params![email, name],
            )
            .context("Failed to insert user")?;
        let id = self.conn.last_insert_rowid();
        self.get_user(id)?.context("User not found after insert")
    }

    pub fn get_user(&self, id: i64) -> Result<Option<User>> {
        self.query_user("SELECT id, email, name, api_token, created_at FROM users WHERE id = ?1", params![id])
    }

    pub fn get_user_by_email(&self, email: &str) -> Result<Option<User>> {
        self.query_user(
            "SELECT id, email, name, api_token, created_at FROM users WHERE email = ?1",
            params![email],
        )
    }

    pub fn get_user_by_api_token(&self, token: &str) -> Result<Option<User>> {
        self.query_user(
            "SELECT id, email, name, api_token, created_at FROM users WHERE api_token = ?1",
            params![token],
        )
    }

    /// Create the user if needed and attach a fresh API token, replacing any
    /// previous one.
    pub fn issue_api_token(&self, email: &str, name: &str) -> Result<(User, String)> {
        let user = self.find_or_create_user_by_email(email, name)?;
        let token = Uuid::new_v4().to_string();
        self.conn
            .execute(
                "UPDATE users SET api_token = ?1 WHERE id = ?2",
                params![token, user.id],
            )
            .context("Failed to store API token")?;
        let user = self
            .get_user(user.id)?
            .context("User not found after token update")?;
        Ok((user, token))
    }

    fn query_user(&self, sql: &str, args: impl rusqlite::Params) -> Result<Option<User>> {
        let mut stmt = self.conn.prepare(sql).context("Failed to prepare user query")?;
        let mut rows = stmt
            .query_map(args, |row| {
                Ok(User {
                    id: row.get(0)?,
                    email: row.get(1)?,
                    name: row.get(2)?,
                    api_token: row.get(3)?,
                    created_at: row.get(4)?,
                })
            })
            .context("Failed to query user")?;
        match rows.next() {
            Some(row) => Ok(Some(row.context("Failed to read user row")?)),
            None => Ok(None),
        }
    }

    // ── Tasks ─────────────────────────────────────────────────────────

    pub fn create_task(&self, user_id: i64, new: &NewTask) -> Result<Task> {
        self.conn
            .execute(
                "INSERT INTO tasks (user_id, title, description, status, priority, label, deadline, external_id)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    user_id,
                    new.title,
                    new.description,
                    new.status.as_str(),
                    new.priority.as_str(),
                    new.label,
                    new.deadline,
                    new.external_id,
                ],
            )
            .context("Failed to insert task")?;
        let id = self.conn.last_insert_rowid();
        self.get_task(id)?.context("Task not found after insert")
    }

    pub fn get_task(&self, id: i64) -> Result<Option<Task>> {
        self.query_task(
            &format!("{} WHERE id = ?1", SELECT_TASK),
            params![id],
        )
    }

    pub fn list_tasks(&self, user_id: i64) -> Result<Vec<Task>> {
        let sql = format!(
            "{} WHERE user_id = ?1 ORDER BY created_at DESC, id DESC",
            SELECT_TASK
        );
        let mut stmt = self
            .conn
            .prepare(&sql)
            .context("Failed to prepare list_tasks")?;
        let rows = stmt
            .query_map(params![user_id], TaskRow::from_row)
            .context("Failed to query tasks")?;
        let mut tasks = Vec::new();
        for row in rows {
            tasks.push(row.context("Failed to read task row")?.into_task());
        }
        Ok(tasks)
    }

    pub fn find_task_by_external_id(&self, user_id: i64, external_id: &str) -> Result<Option<Task>> {
        self.query_task(
            &format!("{} WHERE user_id = ?1 AND external_id = ?2", SELECT_TASK),
            params![user_id, external_id],
        )
    }

    /// Title fallback for cards sighted before external-id tracking. Only
    /// tasks without an external id are candidates; when several titles
    /// collide the most recently updated row wins.
    pub fn find_task_by_title(&self, user_id: i64, title: &str) -> Result<Option<Task>> {
        self.query_task(
            &format!(
                "{} WHERE user_id = ?1 AND title = ?2 AND external_id IS NULL
                 ORDER BY updated_at DESC, id DESC LIMIT 1",
                SELECT_TASK
            ),
            params![user_id, title],
        )
    }

    pub fn update_task(&self, id: i64, patch: &TaskPatch) -> Result<Option<Task>> {
        let Some(current) = self.get_task(id)? else {
            return Ok(None);
        };
        let title = patch.title.as_deref().unwrap_or(&current.title);
        let description = patch
            .description
            .as_deref()
            .or(current.description.as_deref());
        let status = patch.status.unwrap_or(current.status);
        let priority = patch.priority.unwrap_or(current.priority);
        let label = patch.label.as_deref().or(current.label.as_deref());
        let deadline = patch.deadline.as_deref().or(current.deadline.as_deref());
        let external_id = patch
            .external_id
            .as_deref()
            .or(current.external_id.as_deref());
        self.conn
            .execute(
                "UPDATE tasks SET title = ?1, description = ?2, status = ?3, priority = ?4,
                 label = ?5, deadline = ?6, external_id = ?7, updated_at = datetime('now')
                 WHERE id = ?8",
                params![
                    title,
                    description,
                    status.as_str(),
                    priority.as_str(),
                    label,
                    deadline,
                    external_id,
                    id,
                ],
            )
            .context("Failed to update task")?;
        self.get_task(id)
    }

    pub fn delete_task(&self, id: i64) -> Result<bool> {
        let affected = self
            .conn
            .execute("DELETE FROM tasks WHERE id = ?1", params![id])
            .context("Failed to delete task")?;
        Ok(affected > 0)
    }

    pub fn count_tasks(&self) -> Result<i64> {
        self.conn
            .query_row("SELECT COUNT(*) FROM tasks", [], |row| row.get(0))
            .context("Failed to count tasks")
    }

    fn query_task(&self, sql: &str, args: impl rusqlite::Params) -> Result<Option<Task>> {
        let mut stmt = self.conn.prepare(sql).context("Failed to prepare task query")?;
        let mut rows = stmt
            .query_map(args, TaskRow::from_row)
            .context("Failed to query task")?;
        match rows.next() {
            Some(row) => Ok(Some(row.context("Failed to read task row")?.into_task())),
            None => Ok(None),
        }
    }
}

const SELECT_TASK: &str = "SELECT id, user_id, title, description, status, priority, label, deadline, external_id, created_at, updated_at FROM tasks";

struct TaskRow {
    id: i64,
    user_id: i64,
    title: String,
    description: Option<String>,
    status: String,
    priority: String,
    label: Option<String>,
    deadline: Option<String>,
    external_id: Option<String>,
    created_at: String,
    updated_at: String,
}

impl TaskRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            user_id: row.get(1)?,
            title: row.get(2)?,
            description: row.get(3)?,
            status: row.get(4)?,
            priority: row.get(5)?,
            label: row.get(6)?,
            deadline: row.get(7)?,
            external_id: row.get(8)?,
            created_at: row.get(9)?,
            updated_at: row.get(10)?,
        })
    }

    /// Malformed stored enum values clamp to safe defaults instead of
    /// failing the whole read.
    fn into_task(self) -> Task {
        Task {
            id: self.id,
            user_id: self.user_id,
            title: self.title,
            description: self.description,
            status: TaskStatus::from_str(&self.status).unwrap_or(TaskStatus::Open),
            priority: TaskPriority::from_str(&self.priority).unwrap_or(TaskPriority::P2),
            label: self.label,
            deadline: self.deadline,
            external_id: self.external_id,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}
