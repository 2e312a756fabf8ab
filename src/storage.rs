//! SQLite storage layer for cotask.
//!
//! Holds every record set the service depends on: `profiles`, `credentials`,
//! `user_relationships`, `lists`, `notes`, `tasks`, `list_shares` and
//! `note_shares`. Schema is created on open. Deleting a resource removes its
//! tasks and grants in the same transaction; deleting a profile cascades
//! through foreign keys.
//!
//! Mutations of resource content, tasks and grants take a capability from
//! [`crate::permissions`] instead of a user id.

use std::path::{Path, PathBuf};

use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};

use crate::model::{
    ListRecord, NoteRecord, Permission, Priority, Profile, Relationship, RelationshipStatus,
    Resource, ResourceKind, ShareGrant, Shareable, Task,
};
use crate::permissions::{ContentEditor, ResourceAdministrator};

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum StorageError {
    Sqlite(rusqlite::Error),
    Io(std::io::Error),
    NotFound(String),
    AlreadyExists(String),
}

impl std::fmt::Display for StorageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageError::Sqlite(e) => write!(f, "sqlite error: {e}"),
            StorageError::Io(e) => write!(f, "io error: {e}"),
            StorageError::NotFound(msg) => write!(f, "not found: {msg}"),
            StorageError::AlreadyExists(msg) => write!(f, "already exists: {msg}"),
        }
    }
}

impl std::error::Error for StorageError {}

impl From<rusqlite::Error> for StorageError {
    fn from(e: rusqlite::Error) -> Self {
        StorageError::Sqlite(e)
    }
}

impl From<std::io::Error> for StorageError {
    fn from(e: std::io::Error) -> Self {
        StorageError::Io(e)
    }
}

/// Turn a uniqueness violation into `AlreadyExists`, leave anything else alone.
fn conflict(e: rusqlite::Error, what: impl FnOnce() -> String) -> StorageError {
    match &e {
        rusqlite::Error::SqliteFailure(inner, _) if inner.code == ErrorCode::ConstraintViolation => {
            StorageError::AlreadyExists(what())
        }
        _ => StorageError::Sqlite(e),
    }
}

/// Login credentials stored next to a profile.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub user_id: String,
    pub email: String,
    pub password_hash: String,
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

const PROFILE_COLUMNS: &str = "id, username, display_name, avatar_url, created_at";
const RELATIONSHIP_COLUMNS: &str = "id, user_a, user_b, status, initiator, created_at, updated_at";
const TASK_COLUMNS: &str = "id, list_id, title, completed, completed_by, completed_at, priority,
                            due_date, created_by, created_at, updated_at";
const GRANT_COLUMNS: &str = "id, resource_id, grantee_id, permission, granted_by, granted_at";

fn profile_from_row(row: &Row<'_>) -> rusqlite::Result<Profile> {
    Ok(Profile {
        id: row.get(0)?,
        username: row.get(1)?,
        display_name: row.get(2)?,
        avatar_url: row.get(3)?,
        created_at: row.get::<_, i64>(4)? as u64,
    })
}

fn relationship_from_row(row: &Row<'_>) -> rusqlite::Result<Relationship> {
    Ok(Relationship {
        id: row.get(0)?,
        user_a: row.get(1)?,
        user_b: row.get(2)?,
        status: RelationshipStatus::from_db(&row.get::<_, String>(3)?),
        initiator: row.get(4)?,
        created_at: row.get::<_, i64>(5)? as u64,
        updated_at: row.get::<_, i64>(6)? as u64,
    })
}

fn resource_columns(kind: ResourceKind, alias: &str) -> String {
    let body = kind.body_column();
    format!(
        "{alias}.id, {alias}.owner_id, {alias}.title, {alias}.{body}, {alias}.pinned, \
         {alias}.archived, {alias}.created_at, {alias}.updated_at"
    )
}

fn resource_from_row(kind: ResourceKind, row: &Row<'_>) -> rusqlite::Result<Resource> {
    let id: String = row.get(0)?;
    let owner_id: String = row.get(1)?;
    let title: String = row.get(2)?;
    let body: Option<String> = row.get(3)?;
    let pinned = row.get::<_, i32>(4)? != 0;
    let archived = row.get::<_, i32>(5)? != 0;
    let created_at = row.get::<_, i64>(6)? as u64;
    let updated_at = row.get::<_, i64>(7)? as u64;
    Ok(match kind {
        ResourceKind::List => Resource::List(ListRecord {
            id,
            owner_id,
            title,
            description: body,
            pinned,
            archived,
            created_at,
            updated_at,
        }),
        ResourceKind::Note => Resource::Note(NoteRecord {
            id,
            owner_id,
            title,
            content: body,
            pinned,
            archived,
            created_at,
            updated_at,
        }),
    })
}

fn task_from_row(row: &Row<'_>) -> rusqlite::Result<Task> {
    Ok(Task {
        id: row.get(0)?,
        list_id: row.get(1)?,
        title: row.get(2)?,
        completed: row.get::<_, i32>(3)? != 0,
        completed_by: row.get(4)?,
        completed_at: row.get::<_, Option<i64>>(5)?.map(|t| t as u64),
        priority: Priority::from_db(&row.get::<_, String>(6)?),
        due_date: row.get::<_, Option<i64>>(7)?.map(|t| t as u64),
        created_by: row.get(8)?,
        created_at: row.get::<_, i64>(9)? as u64,
        updated_at: row.get::<_, i64>(10)? as u64,
    })
}

/// Grant rows start at column `offset` so joins can reuse the mapper.
fn grant_from_row(kind: ResourceKind, row: &Row<'_>, offset: usize) -> rusqlite::Result<ShareGrant> {
    let permission: String = row.get(offset + 3)?;
    Ok(ShareGrant {
        id: row.get(offset)?,
        kind,
        resource_id: row.get(offset + 1)?,
        grantee_id: row.get(offset + 2)?,
        permission: Permission::parse(&permission).unwrap_or(Permission::View),
        granted_by: row.get(offset + 4)?,
        granted_at: row.get::<_, i64>(offset + 5)? as u64,
    })
}

// ---------------------------------------------------------------------------
// Storage handle
// ---------------------------------------------------------------------------

pub struct Storage {
    conn: Connection,
}

impl Storage {
    /// Open or create a database at the given path.
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        let storage = Self { conn };
        storage.create_schema()?;
        Ok(storage)
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        let storage = Self { conn };
        storage.create_schema()?;
        Ok(storage)
    }

    fn create_schema(&self) -> Result<(), StorageError> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS profiles (
                id              TEXT PRIMARY KEY,
                username        TEXT NOT NULL UNIQUE,
                display_name    TEXT NOT NULL,
                avatar_url      TEXT,
                created_at      INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS credentials (
                user_id         TEXT PRIMARY KEY REFERENCES profiles(id) ON DELETE CASCADE,
                email           TEXT NOT NULL UNIQUE,
                password_hash   TEXT NOT NULL,
                created_at      INTEGER NOT NULL
            );

            -- One row per unordered pair, enforced through (pair_low, pair_high).
            CREATE TABLE IF NOT EXISTS user_relationships (
                id          TEXT PRIMARY KEY,
                user_a      TEXT NOT NULL REFERENCES profiles(id) ON DELETE CASCADE,
                user_b      TEXT NOT NULL REFERENCES profiles(id) ON DELETE CASCADE,
                status      TEXT NOT NULL DEFAULT 'pending',
                initiator   TEXT NOT NULL,
                created_at  INTEGER NOT NULL,
                updated_at  INTEGER NOT NULL,
                pair_low    TEXT NOT NULL,
                pair_high   TEXT NOT NULL,
                CHECK (user_a <> user_b)
            );

            CREATE UNIQUE INDEX IF NOT EXISTS idx_relationships_pair
                ON user_relationships(pair_low, pair_high);
            CREATE INDEX IF NOT EXISTS idx_relationships_a
                ON user_relationships(user_a, created_at);
            CREATE INDEX IF NOT EXISTS idx_relationships_b
                ON user_relationships(user_b, created_at);

            CREATE TABLE IF NOT EXISTS lists (
                id          TEXT PRIMARY KEY,
                owner_id    TEXT NOT NULL REFERENCES profiles(id) ON DELETE CASCADE,
                title       TEXT NOT NULL,
                description TEXT,
                pinned      INTEGER NOT NULL DEFAULT 0,
                archived    INTEGER NOT NULL DEFAULT 0,
                created_at  INTEGER NOT NULL,
                updated_at  INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_lists_owner ON lists(owner_id);

            CREATE TABLE IF NOT EXISTS notes (
                id          TEXT PRIMARY KEY,
                owner_id    TEXT NOT NULL REFERENCES profiles(id) ON DELETE CASCADE,
                title       TEXT NOT NULL,
                content     TEXT,
                pinned      INTEGER NOT NULL DEFAULT 0,
                archived    INTEGER NOT NULL DEFAULT 0,
                created_at  INTEGER NOT NULL,
                updated_at  INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_notes_owner ON notes(owner_id);

            CREATE TABLE IF NOT EXISTS tasks (
                id              TEXT PRIMARY KEY,
                list_id         TEXT NOT NULL REFERENCES lists(id) ON DELETE CASCADE,
                title           TEXT NOT NULL,
                completed       INTEGER NOT NULL DEFAULT 0,
                completed_by    TEXT,
                completed_at    INTEGER,
                priority        TEXT NOT NULL DEFAULT 'medium',
                due_date        INTEGER,
                created_by      TEXT NOT NULL,
                created_at      INTEGER NOT NULL,
                updated_at      INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_tasks_list ON tasks(list_id, created_at);

            CREATE TABLE IF NOT EXISTS list_shares (
                id          TEXT PRIMARY KEY,
                resource_id TEXT NOT NULL REFERENCES lists(id) ON DELETE CASCADE,
                grantee_id  TEXT NOT NULL REFERENCES profiles(id) ON DELETE CASCADE,
                permission  TEXT NOT NULL CHECK (permission IN ('view', 'edit')),
                granted_by  TEXT NOT NULL,
                granted_at  INTEGER NOT NULL,
                UNIQUE (resource_id, grantee_id)
            );

            CREATE INDEX IF NOT EXISTS idx_list_shares_grantee ON list_shares(grantee_id);

            CREATE TABLE IF NOT EXISTS note_shares (
                id          TEXT PRIMARY KEY,
                resource_id TEXT NOT NULL REFERENCES notes(id) ON DELETE CASCADE,
                grantee_id  TEXT NOT NULL REFERENCES profiles(id) ON DELETE CASCADE,
                permission  TEXT NOT NULL CHECK (permission IN ('view', 'edit')),
                granted_by  TEXT NOT NULL,
                granted_at  INTEGER NOT NULL,
                UNIQUE (resource_id, grantee_id)
            );

            CREATE INDEX IF NOT EXISTS idx_note_shares_grantee ON note_shares(grantee_id);
            ",
        )?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Profiles and credentials
    // -----------------------------------------------------------------------

    pub fn insert_profile(&self, profile: &Profile) -> Result<(), StorageError> {
        self.conn
            .execute(
                "INSERT INTO profiles (id, username, display_name, avatar_url, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    profile.id,
                    profile.username,
                    profile.display_name,
                    profile.avatar_url,
                    profile.created_at as i64,
                ],
            )
            .map_err(|e| conflict(e, || format!("username {}", profile.username)))?;
        Ok(())
    }

    /// Insert a profile and its login credentials atomically.
    pub fn insert_account(
        &self,
        profile: &Profile,
        email: &str,
        password_hash: &str,
    ) -> Result<(), StorageError> {
        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "INSERT INTO profiles (id, username, display_name, avatar_url, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                profile.id,
                profile.username,
                profile.display_name,
                profile.avatar_url,
                profile.created_at as i64,
            ],
        )
        .map_err(|e| conflict(e, || format!("username {}", profile.username)))?;
        tx.execute(
            "INSERT INTO credentials (user_id, email, password_hash, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![profile.id, email, password_hash, profile.created_at as i64],
        )
        .map_err(|e| conflict(e, || format!("email {email}")))?;
        tx.commit()?;
        Ok(())
    }

    pub fn get_profile(&self, id: &str) -> Result<Option<Profile>, StorageError> {
        let sql = format!("SELECT {PROFILE_COLUMNS} FROM profiles WHERE id = ?1");
        let row = self
            .conn
            .query_row(&sql, params![id], profile_from_row)
            .optional()?;
        Ok(row)
    }

    pub fn get_profile_by_username(&self, username: &str) -> Result<Option<Profile>, StorageError> {
        let sql = format!("SELECT {PROFILE_COLUMNS} FROM profiles WHERE username = ?1");
        let row = self
            .conn
            .query_row(&sql, params![username], profile_from_row)
            .optional()?;
        Ok(row)
    }

    /// Profiles whose username starts with `prefix`, alphabetically.
    pub fn search_profiles(&self, prefix: &str, limit: u32) -> Result<Vec<Profile>, StorageError> {
        let escaped = prefix
            .replace('\\', "\\\\")
            .replace('%', "\\%")
            .replace('_', "\\_");
        let sql = format!(
            "SELECT {PROFILE_COLUMNS} FROM profiles
             WHERE username LIKE ?1 ESCAPE '\\'
             ORDER BY username LIMIT ?2"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![format!("{escaped}%"), limit], profile_from_row)?;
        let mut result = Vec::new();
        for row in rows {
            result.push(row?);
        }
        Ok(result)
    }

    pub fn update_profile(
        &self,
        id: &str,
        display_name: &str,
        avatar_url: Option<&str>,
    ) -> Result<bool, StorageError> {
        let affected = self.conn.execute(
            "UPDATE profiles SET display_name = ?1, avatar_url = ?2 WHERE id = ?3",
            params![display_name, avatar_url, id],
        )?;
        Ok(affected > 0)
    }

    /// Remove a profile. Credentials, relationships, owned resources and
    /// grants naming the profile go with it.
    pub fn delete_profile(&self, id: &str) -> Result<bool, StorageError> {
        let affected = self
            .conn
            .execute("DELETE FROM profiles WHERE id = ?1", params![id])?;
        Ok(affected > 0)
    }

    pub fn get_credentials_by_email(&self, email: &str) -> Result<Option<Credentials>, StorageError> {
        let row = self
            .conn
            .query_row(
                "SELECT user_id, email, password_hash FROM credentials WHERE email = ?1",
                params![email],
                |row| {
                    Ok(Credentials {
                        user_id: row.get(0)?,
                        email: row.get(1)?,
                        password_hash: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    pub fn get_email(&self, user_id: &str) -> Result<Option<String>, StorageError> {
        let row = self
            .conn
            .query_row(
                "SELECT email FROM credentials WHERE user_id = ?1",
                params![user_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(row)
    }

    // -----------------------------------------------------------------------
    // Relationships
    // -----------------------------------------------------------------------

    pub fn insert_relationship(&self, rel: &Relationship) -> Result<(), StorageError> {
        let (low, high) = if rel.user_a <= rel.user_b {
            (&rel.user_a, &rel.user_b)
        } else {
            (&rel.user_b, &rel.user_a)
        };
        self.conn
            .execute(
                "INSERT INTO user_relationships
                 (id, user_a, user_b, status, initiator, created_at, updated_at, pair_low, pair_high)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    rel.id,
                    rel.user_a,
                    rel.user_b,
                    rel.status.as_str(),
                    rel.initiator,
                    rel.created_at as i64,
                    rel.updated_at as i64,
                    low,
                    high,
                ],
            )
            .map_err(|e| {
                conflict(e, || {
                    format!("relationship between {} and {}", rel.user_a, rel.user_b)
                })
            })?;
        Ok(())
    }

    pub fn get_relationship(&self, id: &str) -> Result<Option<Relationship>, StorageError> {
        let sql = format!("SELECT {RELATIONSHIP_COLUMNS} FROM user_relationships WHERE id = ?1");
        let row = self
            .conn
            .query_row(&sql, params![id], relationship_from_row)
            .optional()?;
        Ok(row)
    }

    /// The row for the unordered pair {a, b}, whichever side sent it.
    pub fn find_relationship_between(
        &self,
        a: &str,
        b: &str,
    ) -> Result<Option<Relationship>, StorageError> {
        let (low, high) = if a <= b { (a, b) } else { (b, a) };
        let sql = format!(
            "SELECT {RELATIONSHIP_COLUMNS} FROM user_relationships
             WHERE pair_low = ?1 AND pair_high = ?2"
        );
        let row = self
            .conn
            .query_row(&sql, params![low, high], relationship_from_row)
            .optional()?;
        Ok(row)
    }

    pub fn update_relationship_status(
        &self,
        id: &str,
        status: RelationshipStatus,
        now: u64,
    ) -> Result<bool, StorageError> {
        let affected = self.conn.execute(
            "UPDATE user_relationships SET status = ?1, updated_at = ?2 WHERE id = ?3",
            params![status.as_str(), now as i64, id],
        )?;
        Ok(affected > 0)
    }

    pub fn delete_relationship(&self, id: &str) -> Result<bool, StorageError> {
        let affected = self
            .conn
            .execute("DELETE FROM user_relationships WHERE id = ?1", params![id])?;
        Ok(affected > 0)
    }

    /// One page of relationships touching `user_id`, ordered by
    /// `(created_at, id)` and starting strictly after `after`.
    pub fn list_relationships_page(
        &self,
        user_id: &str,
        after: Option<(u64, &str)>,
        limit: u32,
    ) -> Result<Vec<Relationship>, StorageError> {
        let (after_ts, after_id) = after.unwrap_or((0, ""));
        let sql = format!(
            "SELECT {RELATIONSHIP_COLUMNS} FROM user_relationships
             WHERE (user_a = ?1 OR user_b = ?1)
               AND (created_at > ?2 OR (created_at = ?2 AND id > ?3))
             ORDER BY created_at, id
             LIMIT ?4"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(
            params![user_id, after_ts as i64, after_id, limit],
            relationship_from_row,
        )?;
        let mut result = Vec::new();
        for row in rows {
            result.push(row?);
        }
        Ok(result)
    }

    pub fn count_pending_received(&self, user_id: &str) -> Result<u32, StorageError> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM user_relationships
             WHERE (user_a = ?1 OR user_b = ?1) AND status = 'pending' AND initiator <> ?1",
            params![user_id],
            |row| row.get(0),
        )?;
        Ok(count as u32)
    }

    // -----------------------------------------------------------------------
    // Lists and notes
    // -----------------------------------------------------------------------

    pub fn insert_resource(&self, resource: &Resource) -> Result<(), StorageError> {
        let kind = resource.kind();
        let sql = format!(
            "INSERT INTO {} (id, owner_id, title, {}, pinned, archived, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            kind.table(),
            kind.body_column()
        );
        let (created_at, updated_at) = match resource {
            Resource::List(l) => (l.created_at, l.updated_at),
            Resource::Note(n) => (n.created_at, n.updated_at),
        };
        self.conn
            .execute(
                &sql,
                params![
                    resource.id(),
                    resource.owner_id(),
                    resource.title(),
                    resource.body(),
                    resource.pinned() as i32,
                    resource.archived() as i32,
                    created_at as i64,
                    updated_at as i64,
                ],
            )
            .map_err(|e| conflict(e, || format!("{} {}", kind.as_str(), resource.id())))?;
        Ok(())
    }

    pub fn get_resource(&self, kind: ResourceKind, id: &str) -> Result<Option<Resource>, StorageError> {
        let sql = format!(
            "SELECT {} FROM {} r WHERE r.id = ?1",
            resource_columns(kind, "r"),
            kind.table()
        );
        let row = self
            .conn
            .query_row(&sql, params![id], |row| resource_from_row(kind, row))
            .optional()?;
        Ok(row)
    }

    /// Whole-row content update: title and body are both overwritten.
    pub fn update_resource_content(
        &self,
        editor: &ContentEditor,
        title: &str,
        body: Option<&str>,
        now: u64,
    ) -> Result<bool, StorageError> {
        let kind = editor.kind();
        let sql = format!(
            "UPDATE {} SET title = ?1, {} = ?2, updated_at = ?3 WHERE id = ?4",
            kind.table(),
            kind.body_column()
        );
        let affected = self
            .conn
            .execute(&sql, params![title, body, now as i64, editor.resource_id()])?;
        Ok(affected > 0)
    }

    pub fn set_resource_pinned(
        &self,
        admin: &ResourceAdministrator,
        pinned: bool,
        now: u64,
    ) -> Result<bool, StorageError> {
        let sql = format!(
            "UPDATE {} SET pinned = ?1, updated_at = ?2 WHERE id = ?3",
            admin.kind().table()
        );
        let affected = self
            .conn
            .execute(&sql, params![pinned as i32, now as i64, admin.resource_id()])?;
        Ok(affected > 0)
    }

    pub fn set_resource_archived(
        &self,
        admin: &ResourceAdministrator,
        archived: bool,
        now: u64,
    ) -> Result<bool, StorageError> {
        let sql = format!(
            "UPDATE {} SET archived = ?1, updated_at = ?2 WHERE id = ?3",
            admin.kind().table()
        );
        let affected = self
            .conn
            .execute(&sql, params![archived as i32, now as i64, admin.resource_id()])?;
        Ok(affected > 0)
    }

    /// Delete a resource together with its tasks and grants.
    pub fn delete_resource(&self, admin: &ResourceAdministrator) -> Result<bool, StorageError> {
        let kind = admin.kind();
        let tx = self.conn.unchecked_transaction()?;
        if kind == ResourceKind::List {
            tx.execute(
                "DELETE FROM tasks WHERE list_id = ?1",
                params![admin.resource_id()],
            )?;
        }
        tx.execute(
            &format!("DELETE FROM {} WHERE resource_id = ?1", kind.share_table()),
            params![admin.resource_id()],
        )?;
        let affected = tx.execute(
            &format!("DELETE FROM {} WHERE id = ?1", kind.table()),
            params![admin.resource_id()],
        )?;
        tx.commit()?;
        Ok(affected > 0)
    }

    pub fn list_owned(&self, kind: ResourceKind, owner_id: &str) -> Result<Vec<Resource>, StorageError> {
        let sql = format!(
            "SELECT {} FROM {} r WHERE r.owner_id = ?1
             ORDER BY r.pinned DESC, r.updated_at DESC, r.id",
            resource_columns(kind, "r"),
            kind.table()
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![owner_id], |row| resource_from_row(kind, row))?;
        let mut result = Vec::new();
        for row in rows {
            result.push(row?);
        }
        Ok(result)
    }

    /// Resources of `kind` shared with `grantee_id`, each with the grant.
    pub fn list_shared_with(
        &self,
        kind: ResourceKind,
        grantee_id: &str,
    ) -> Result<Vec<(Resource, ShareGrant)>, StorageError> {
        let sql = format!(
            "SELECT {}, s.id, s.resource_id, s.grantee_id, s.permission, s.granted_by, s.granted_at
             FROM {} r JOIN {} s ON s.resource_id = r.id
             WHERE s.grantee_id = ?1
             ORDER BY r.updated_at DESC, r.id",
            resource_columns(kind, "r"),
            kind.table(),
            kind.share_table()
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![grantee_id], |row| {
            Ok((resource_from_row(kind, row)?, grant_from_row(kind, row, 8)?))
        })?;
        let mut result = Vec::new();
        for row in rows {
            result.push(row?);
        }
        Ok(result)
    }

    // -----------------------------------------------------------------------
    // Tasks
    // -----------------------------------------------------------------------

    /// Insert a task into the list the editor capability was issued for.
    pub fn insert_task(&self, editor: &ContentEditor, task: &Task) -> Result<(), StorageError> {
        self.conn
            .execute(
                "INSERT INTO tasks
                 (id, list_id, title, completed, completed_by, completed_at, priority,
                  due_date, created_by, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    task.id,
                    editor.resource_id(),
                    task.title,
                    task.completed as i32,
                    task.completed_by,
                    task.completed_at.map(|t| t as i64),
                    task.priority.as_str(),
                    task.due_date.map(|t| t as i64),
                    task.created_by,
                    task.created_at as i64,
                    task.updated_at as i64,
                ],
            )
            .map_err(|e| conflict(e, || format!("task {}", task.id)))?;
        Ok(())
    }

    pub fn get_task(&self, id: &str) -> Result<Option<Task>, StorageError> {
        let sql = format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1");
        let row = self
            .conn
            .query_row(&sql, params![id], task_from_row)
            .optional()?;
        Ok(row)
    }

    /// Whole-row task update, scoped to the editor's list.
    pub fn update_task(&self, editor: &ContentEditor, task: &Task) -> Result<bool, StorageError> {
        let affected = self.conn.execute(
            "UPDATE tasks SET title = ?1, completed = ?2, completed_by = ?3, completed_at = ?4,
                              priority = ?5, due_date = ?6, updated_at = ?7
             WHERE id = ?8 AND list_id = ?9",
            params![
                task.title,
                task.completed as i32,
                task.completed_by,
                task.completed_at.map(|t| t as i64),
                task.priority.as_str(),
                task.due_date.map(|t| t as i64),
                task.updated_at as i64,
                task.id,
                editor.resource_id(),
            ],
        )?;
        Ok(affected > 0)
    }

    pub fn delete_task(&self, editor: &ContentEditor, id: &str) -> Result<bool, StorageError> {
        let affected = self.conn.execute(
            "DELETE FROM tasks WHERE id = ?1 AND list_id = ?2",
            params![id, editor.resource_id()],
        )?;
        Ok(affected > 0)
    }

    /// Tasks of a list in creation order.
    pub fn list_tasks(&self, list_id: &str) -> Result<Vec<Task>, StorageError> {
        let sql = format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE list_id = ?1 ORDER BY created_at, rowid"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![list_id], task_from_row)?;
        let mut result = Vec::new();
        for row in rows {
            result.push(row?);
        }
        Ok(result)
    }

    /// (open, completed) task counts for a list.
    pub fn count_tasks(&self, list_id: &str) -> Result<(u32, u32), StorageError> {
        let (open, done): (i64, i64) = self.conn.query_row(
            "SELECT COALESCE(SUM(completed = 0), 0), COALESCE(SUM(completed <> 0), 0)
             FROM tasks WHERE list_id = ?1",
            params![list_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        Ok((open as u32, done as u32))
    }

    // -----------------------------------------------------------------------
    // Share grants
    // -----------------------------------------------------------------------

    pub fn insert_grant(
        &self,
        admin: &ResourceAdministrator,
        grant: &ShareGrant,
    ) -> Result<(), StorageError> {
        let sql = format!(
            "INSERT INTO {} ({GRANT_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            admin.kind().share_table()
        );
        self.conn
            .execute(
                &sql,
                params![
                    grant.id,
                    admin.resource_id(),
                    grant.grantee_id,
                    grant.permission.as_str(),
                    grant.granted_by,
                    grant.granted_at as i64,
                ],
            )
            .map_err(|e| {
                conflict(e, || {
                    format!(
                        "grant on {} {} for {}",
                        admin.kind().as_str(),
                        admin.resource_id(),
                        grant.grantee_id
                    )
                })
            })?;
        Ok(())
    }

    pub fn get_grant(&self, kind: ResourceKind, id: &str) -> Result<Option<ShareGrant>, StorageError> {
        let sql = format!("SELECT {GRANT_COLUMNS} FROM {} WHERE id = ?1", kind.share_table());
        let row = self
            .conn
            .query_row(&sql, params![id], |row| grant_from_row(kind, row, 0))
            .optional()?;
        Ok(row)
    }

    pub fn find_grant(
        &self,
        kind: ResourceKind,
        resource_id: &str,
        grantee_id: &str,
    ) -> Result<Option<ShareGrant>, StorageError> {
        let sql = format!(
            "SELECT {GRANT_COLUMNS} FROM {} WHERE resource_id = ?1 AND grantee_id = ?2",
            kind.share_table()
        );
        let row = self
            .conn
            .query_row(&sql, params![resource_id, grantee_id], |row| {
                grant_from_row(kind, row, 0)
            })
            .optional()?;
        Ok(row)
    }

    pub fn list_grants(&self, kind: ResourceKind, resource_id: &str) -> Result<Vec<ShareGrant>, StorageError> {
        let sql = format!(
            "SELECT {GRANT_COLUMNS} FROM {} WHERE resource_id = ?1 ORDER BY granted_at, id",
            kind.share_table()
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![resource_id], |row| grant_from_row(kind, row, 0))?;
        let mut result = Vec::new();
        for row in rows {
            result.push(row?);
        }
        Ok(result)
    }

    pub fn list_grants_for_grantee(
        &self,
        kind: ResourceKind,
        grantee_id: &str,
    ) -> Result<Vec<ShareGrant>, StorageError> {
        let sql = format!(
            "SELECT {GRANT_COLUMNS} FROM {} WHERE grantee_id = ?1 ORDER BY granted_at, id",
            kind.share_table()
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![grantee_id], |row| grant_from_row(kind, row, 0))?;
        let mut result = Vec::new();
        for row in rows {
            result.push(row?);
        }
        Ok(result)
    }

    pub fn update_grant_permission(
        &self,
        admin: &ResourceAdministrator,
        grant_id: &str,
        permission: Permission,
    ) -> Result<bool, StorageError> {
        let sql = format!(
            "UPDATE {} SET permission = ?1 WHERE id = ?2 AND resource_id = ?3",
            admin.kind().share_table()
        );
        let affected = self
            .conn
            .execute(&sql, params![permission.as_str(), grant_id, admin.resource_id()])?;
        Ok(affected > 0)
    }

    pub fn delete_grant(
        &self,
        admin: &ResourceAdministrator,
        grant_id: &str,
    ) -> Result<bool, StorageError> {
        let sql = format!(
            "DELETE FROM {} WHERE id = ?1 AND resource_id = ?2",
            admin.kind().share_table()
        );
        let affected = self
            .conn
            .execute(&sql, params![grant_id, admin.resource_id()])?;
        Ok(affected > 0)
    }

    /// A grantee removing their own grant. Only ever touches the row naming
    /// `grantee_id`.
    pub fn delete_own_grant(
        &self,
        kind: ResourceKind,
        resource_id: &str,
        grantee_id: &str,
    ) -> Result<bool, StorageError> {
        let sql = format!(
            "DELETE FROM {} WHERE resource_id = ?1 AND grantee_id = ?2",
            kind.share_table()
        );
        let affected = self.conn.execute(&sql, params![resource_id, grantee_id])?;
        Ok(affected > 0)
    }
}

/// Database location inside a data directory: `{data_dir}/cotask.db`.
pub fn db_path(data_dir: &Path) -> PathBuf {
    data_dir.join("cotask.db")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
