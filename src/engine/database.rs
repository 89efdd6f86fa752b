//! Rolegate Database Module
//! SQLite connection pooling and ACL schema bootstrap

use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::engine::adapter::{validate_identifier, StoreOptions};

pub type DbPool = Pool<SqliteConnectionManager>;
pub type DbConnection = PooledConnection<SqliteConnectionManager>;

pub const DEFAULT_POOL_SIZE: u32 = 10;
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("Failed to create database pool: {0}")]
    PoolError(#[from] r2d2::Error),
    #[error("SQLite error: {0}")]
    SqliteError(#[from] rusqlite::Error),
    #[error("Invalid schema identifier: {0:?}")]
    InvalidIdentifier(String),
    #[error("Failed to create database directory: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Clone)]
pub struct Database {
    pool: DbPool,
}

impl Database {
    pub fn new(db_path: &Path) -> Result<Self, DatabaseError> {
        Self::with_options(db_path, DEFAULT_POOL_SIZE, DEFAULT_BUSY_TIMEOUT)
    }

    pub fn with_options(
        db_path: &Path,
        pool_size: u32,
        busy_timeout: Duration,
    ) -> Result<Self, DatabaseError> {
        // Ensure parent directory exists
        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let manager = SqliteConnectionManager::file(db_path).with_init(move |conn| {
            conn.busy_timeout(busy_timeout)?;
            conn.execute_batch("PRAGMA foreign_keys=ON")
        });
        let pool = Pool::builder().max_size(pool_size.max(1)).build(manager)?;

        let db = Self { pool };
        db.enable_wal()?;
        Ok(db)
    }

    /// Single-connection pool over a private in-memory database
    pub fn in_memory() -> Result<Self, DatabaseError> {
        let manager = SqliteConnectionManager::memory()
            .with_init(|conn| conn.execute_batch("PRAGMA foreign_keys=ON"));
        let pool = Pool::builder().max_size(1).build(manager)?;
        Ok(Self { pool })
    }

    fn enable_wal(&self) -> Result<(), DatabaseError> {
        let conn = self.pool.get()?;
        // PRAGMA journal_mode returns the resulting mode as a row
        let _: String = conn.query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))?;
        Ok(())
    }

    pub fn get_connection(&self) -> Result<DbConnection, DatabaseError> {
        Ok(self.pool.get()?)
    }

    /// Create the five access-control tables if they are missing.
    ///
    /// The account table named in `options` is not created here.
    pub fn init_acl_schema(&self, options: &StoreOptions) -> Result<(), DatabaseError> {
        validate_identifier(&options.user_roles_table)
            .map_err(|_| DatabaseError::InvalidIdentifier(options.user_roles_table.clone()))?;

        let conn = self.get_connection()?;
        conn.execute_batch(&format!(
            "BEGIN;
            CREATE TABLE IF NOT EXISTS roles (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE
            );
            CREATE TABLE IF NOT EXISTS permissions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE
            );
            CREATE TABLE IF NOT EXISTS role_has_permissions (
                role_id INTEGER NOT NULL REFERENCES roles(id) ON DELETE CASCADE,
                permission_id INTEGER NOT NULL REFERENCES permissions(id) ON DELETE CASCADE,
                PRIMARY KEY (role_id, permission_id)
            );
            CREATE TABLE IF NOT EXISTS \"{user_roles}\" (
                user_id INTEGER NOT NULL,
                role_id INTEGER NOT NULL REFERENCES roles(id) ON DELETE CASCADE,
                PRIMARY KEY (user_id, role_id)
            );
            CREATE TABLE IF NOT EXISTS user_has_permissions (
                user_id INTEGER NOT NULL,
                permission_id INTEGER NOT NULL REFERENCES permissions(id) ON DELETE CASCADE,
                PRIMARY KEY (user_id, permission_id)
            );
            COMMIT;",
            user_roles = options.user_roles_table,
        ))?;

        Ok(())
    }

    /// Create a bare account table `(id INTEGER PRIMARY KEY)` when none exists.
    /// Deployments that own their account table never need this.
    pub fn ensure_account_table(&self, options: &StoreOptions) -> Result<(), DatabaseError> {
        validate_identifier(&options.account_table)
            .map_err(|_| DatabaseError::InvalidIdentifier(options.account_table.clone()))?;

        let conn = self.get_connection()?;
        let mut sql = format!(
            "CREATE TABLE IF NOT EXISTS \"{}\" (id INTEGER PRIMARY KEY",
            options.account_table
        );
        if let Some(column) = &options.account_role_column {
            validate_identifier(column)
                .map_err(|_| DatabaseError::InvalidIdentifier(column.clone()))?;
            sql.push_str(&format!(", \"{}\" TEXT", column));
        }
        sql.push(')');
        conn.execute(&sql, [])?;
        Ok(())
    }

    /// Insert an account row if it is not there yet
    pub fn ensure_account(&self, options: &StoreOptions, id: i64) -> Result<(), DatabaseError> {
        validate_identifier(&options.account_table)
            .map_err(|_| DatabaseError::InvalidIdentifier(options.account_table.clone()))?;

        let conn = self.get_connection()?;
        conn.execute(
            &format!("INSERT OR IGNORE INTO \"{}\" (id) VALUES (?1)", options.account_table),
            [id],
        )?;
        Ok(())
    }

    pub fn get_tables(&self) -> Result<Vec<String>, DatabaseError> {
        let conn = self.get_connection()?;
        let mut stmt = conn.prepare(
            "SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
        )?;
        let tables = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(tables)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_acl_schema() {
        let db = Database::in_memory().unwrap();
        db.init_acl_schema(&StoreOptions::default()).unwrap();

        let tables = db.get_tables().unwrap();
        assert_eq!(
            tables,
            vec![
                "permissions",
                "role_has_permissions",
                "roles",
                "user_has_permissions",
                "user_has_roles",
            ]
        );
    }

    #[test]
    fn test_init_is_idempotent() {
        let db = Database::in_memory().unwrap();
        let options = StoreOptions::default().with_user_roles_table("account_roles");
        db.init_acl_schema(&options).unwrap();
        db.init_acl_schema(&options).unwrap();
        assert!(db.get_tables().unwrap().contains(&"account_roles".to_string()));
    }

    #[test]
    fn test_rejects_bad_table_name() {
        let db = Database::in_memory().unwrap();
        let options = StoreOptions::default().with_user_roles_table("roles; --");
        assert!(matches!(
            db.init_acl_schema(&options),
            Err(DatabaseError::InvalidIdentifier(_))
        ));
    }

    #[test]
    fn test_file_database() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(&dir.path().join("data").join("acl.db")).unwrap();
        db.init_acl_schema(&StoreOptions::default()).unwrap();
        assert_eq!(db.get_tables().unwrap().len(), 5);
    }

    #[test]
    fn test_unusable_parent_directory_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("data");
        std::fs::write(&blocker, b"not a directory").unwrap();

        let result = Database::new(&blocker.join("acl.db"));
        assert!(matches!(result, Err(DatabaseError::Io(_))));
    }

    #[test]
    fn test_ensure_account_table() {
        let db = Database::in_memory().unwrap();
        let options = StoreOptions::default().with_account_role_column("role_name");
        db.ensure_account_table(&options).unwrap();
        db.ensure_account(&options, 7).unwrap();
        db.ensure_account(&options, 7).unwrap();

        let count: i64 = db
            .get_connection()
            .unwrap()
            .query_row("SELECT COUNT(*) FROM users WHERE role_name IS NULL", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }
}
