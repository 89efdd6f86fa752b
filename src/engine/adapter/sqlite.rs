//! SQLite Store
//!
//! Implements AclStore for SQLite on top of the pooled `Database`.
//! Every statement runs under a progress handler wired to the caller's
//! `QueryContext`, so cancellation and deadlines interrupt in-flight queries.

use rusqlite::{ffi, params, params_from_iter, Connection, ErrorCode};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::Ordering;
use std::time::Instant;
use tracing::debug;

use super::{AclStore, Permission, Role, StoreError, StoreOptions, StoreResult};
use crate::engine::context::{Interruption, QueryContext};
use crate::engine::database::{Database, DbConnection};

/// SQLite virtual machine instructions between cancellation checks
const PROGRESS_OPS: i32 = 1_000;

pub struct SqliteStore {
    db: Database,
    options: StoreOptions,
}

impl SqliteStore {
    pub fn new(db: Database, options: StoreOptions) -> StoreResult<Self> {
        options.validate()?;
        Ok(Self { db, options })
    }

    pub fn options(&self) -> &StoreOptions {
        &self.options
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    fn get_conn(&self) -> StoreResult<DbConnection> {
        Ok(self.db.get_connection()?)
    }

    fn insert_unique(
        &self,
        ctx: &QueryContext,
        sql: &str,
        args: impl rusqlite::Params,
        on_duplicate: impl FnOnce() -> StoreError,
    ) -> StoreResult<i64> {
        let conn = self.get_conn()?;
        let _guard = InterruptGuard::install(&conn, ctx)?;

        match conn.execute(sql, args) {
            Ok(_) => Ok(conn.last_insert_rowid()),
            Err(e) if is_unique_violation(&e) => Err(on_duplicate()),
            Err(e) => Err(classify(ctx, e)),
        }
    }

    /// Resolve names against `table`, returning IDs in request order plus
    /// the names that had no row
    fn resolve_ids(
        &self,
        ctx: &QueryContext,
        table: &str,
        names: &[String],
    ) -> StoreResult<(Vec<i64>, Vec<String>)> {
        let wanted = dedup_preserving_order(names);
        if wanted.is_empty() {
            return Ok((Vec::new(), Vec::new()));
        }

        let conn = self.get_conn()?;
        let _guard = InterruptGuard::install(&conn, ctx)?;

        let sql = format!(
            "SELECT id, name FROM {} WHERE name IN ({})",
            table,
            placeholders(1, wanted.len())
        );
        let found: HashMap<String, i64> = query_pairs(&conn, &sql, params_from_iter(wanted.iter()))
            .map_err(|e| classify(ctx, e))?;

        let mut ids = Vec::with_capacity(wanted.len());
        let mut missing = Vec::new();
        for name in wanted {
            match found.get(name) {
                Some(id) => ids.push(*id),
                None => missing.push(name.clone()),
            }
        }
        Ok((ids, missing))
    }

    fn query_names(
        &self,
        ctx: &QueryContext,
        sql: &str,
        args: Vec<i64>,
    ) -> StoreResult<Vec<String>> {
        let conn = self.get_conn()?;
        let _guard = InterruptGuard::install(&conn, ctx)?;

        let mut stmt = conn.prepare(sql).map_err(|e| classify(ctx, e))?;
        let names = stmt
            .query_map(params_from_iter(args.iter()), |row| row.get::<_, String>(0))
            .map_err(|e| classify(ctx, e))?
            .collect::<Result<Vec<String>, _>>()
            .map_err(|e| classify(ctx, e))?;
        Ok(names)
    }

    fn list_named(&self, ctx: &QueryContext, table: &str) -> StoreResult<Vec<(i64, String)>> {
        let conn = self.get_conn()?;
        let _guard = InterruptGuard::install(&conn, ctx)?;

        let mut stmt = conn
            .prepare(&format!("SELECT id, name FROM {} ORDER BY id", table))
            .map_err(|e| classify(ctx, e))?;
        let rows = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
            .map_err(|e| classify(ctx, e))?
            .collect::<Result<Vec<(i64, String)>, _>>()
            .map_err(|e| classify(ctx, e))?;
        Ok(rows)
    }
}

impl AclStore for SqliteStore {
    fn create_role(&self, ctx: &QueryContext, name: &str) -> StoreResult<i64> {
        self.insert_unique(ctx, "INSERT INTO roles (name) VALUES (?1)", params![name], || {
            StoreError::DuplicateRole(name.to_string())
        })
    }

    fn create_permission(&self, ctx: &QueryContext, name: &str) -> StoreResult<i64> {
        self.insert_unique(
            ctx,
            "INSERT INTO permissions (name) VALUES (?1)",
            params![name],
            || StoreError::DuplicatePermission(name.to_string()),
        )
    }

    fn role_ids_by_name(&self, ctx: &QueryContext, names: &[String]) -> StoreResult<Vec<i64>> {
        let (ids, missing) = self.resolve_ids(ctx, "roles", names)?;
        if !missing.is_empty() {
            return Err(StoreError::RoleNotFound(missing));
        }
        Ok(ids)
    }

    fn permission_ids_by_name(&self, ctx: &QueryContext, names: &[String]) -> StoreResult<Vec<i64>> {
        let (ids, missing) = self.resolve_ids(ctx, "permissions", names)?;
        if !missing.is_empty() {
            return Err(StoreError::PermissionNotFound(missing));
        }
        Ok(ids)
    }

    fn find_role_ids(&self, ctx: &QueryContext, names: &[String]) -> StoreResult<Vec<i64>> {
        let (ids, missing) = self.resolve_ids(ctx, "roles", names)?;
        if !missing.is_empty() {
            debug!(missing = ?missing, "skipping unregistered roles");
        }
        Ok(ids)
    }

    fn find_permission_ids(&self, ctx: &QueryContext, names: &[String]) -> StoreResult<Vec<i64>> {
        let (ids, missing) = self.resolve_ids(ctx, "permissions", names)?;
        if !missing.is_empty() {
            debug!(missing = ?missing, "skipping unregistered permissions");
        }
        Ok(ids)
    }

    fn give_permissions_to_role(
        &self,
        ctx: &QueryContext,
        role_id: i64,
        permission_ids: &[i64],
    ) -> StoreResult<()> {
        let conn = self.get_conn()?;
        let _guard = InterruptGuard::install(&conn, ctx)?;

        // Dropping the transaction without commit rolls it back
        let tx = conn.unchecked_transaction().map_err(|e| classify(ctx, e))?;
        {
            let mut stmt = tx
                .prepare("INSERT INTO role_has_permissions (role_id, permission_id) VALUES (?1, ?2)")
                .map_err(|e| classify(ctx, e))?;

            for &permission_id in permission_ids {
                match stmt.execute(params![role_id, permission_id]) {
                    Ok(_) => {}
                    Err(e) if is_unique_violation(&e) => {
                        return Err(StoreError::DuplicateRolePermission {
                            role_id,
                            permission_id,
                        });
                    }
                    Err(e) => return Err(classify(ctx, e)),
                }
            }
        }
        tx.commit().map_err(|e| classify(ctx, e))?;

        debug!(role_id, count = permission_ids.len(), "linked permissions to role");
        Ok(())
    }

    fn give_role_to_user(&self, ctx: &QueryContext, user_id: i64, role_id: i64) -> StoreResult<()> {
        let sql = format!(
            "INSERT INTO \"{}\" (user_id, role_id) VALUES (?1, ?2)",
            self.options.user_roles_table
        );
        self.insert_unique(ctx, &sql, params![user_id, role_id], || {
            StoreError::DuplicateUserRole { user_id, role_id }
        })?;
        Ok(())
    }

    fn give_permission_to_user(
        &self,
        ctx: &QueryContext,
        user_id: i64,
        permission_id: i64,
    ) -> StoreResult<()> {
        self.insert_unique(
            ctx,
            "INSERT INTO user_has_permissions (user_id, permission_id) VALUES (?1, ?2)",
            params![user_id, permission_id],
            || StoreError::DuplicateUserPermission {
                user_id,
                permission_id,
            },
        )?;
        Ok(())
    }

    fn account_role_names(&self, ctx: &QueryContext, user_id: i64) -> StoreResult<Vec<String>> {
        let mut sql = format!(
            "SELECT r.name
            FROM \"{user_roles}\" ur
            JOIN \"{accounts}\" a ON ur.user_id = a.id
            JOIN roles r ON ur.role_id = r.id
            WHERE a.id = ?1",
            user_roles = self.options.user_roles_table,
            accounts = self.options.account_table,
        );
        if let Some(column) = &self.options.account_role_column {
            sql.push_str(&format!(
                "
            UNION
            SELECT a.\"{column}\" FROM \"{accounts}\" a
            WHERE a.id = ?1 AND a.\"{column}\" IS NOT NULL",
                column = column,
                accounts = self.options.account_table,
            ));
        }

        self.query_names(ctx, &sql, vec![user_id])
    }

    fn role_permissions_for_account(
        &self,
        ctx: &QueryContext,
        user_id: i64,
        role_ids: &[i64],
    ) -> StoreResult<Vec<String>> {
        if role_ids.is_empty() {
            return Ok(Vec::new());
        }

        let sql = format!(
            "SELECT DISTINCT p.name
            FROM \"{user_roles}\" ur
            JOIN \"{accounts}\" a ON ur.user_id = a.id
            JOIN role_has_permissions rp ON rp.role_id = ur.role_id
            JOIN permissions p ON p.id = rp.permission_id
            WHERE ur.user_id = ?1 AND ur.role_id IN ({ids})",
            user_roles = self.options.user_roles_table,
            accounts = self.options.account_table,
            ids = placeholders(2, role_ids.len()),
        );

        let mut args = Vec::with_capacity(role_ids.len() + 1);
        args.push(user_id);
        args.extend_from_slice(role_ids);
        self.query_names(ctx, &sql, args)
    }

    fn direct_permissions_for_account(
        &self,
        ctx: &QueryContext,
        user_id: i64,
        permission_ids: &[i64],
    ) -> StoreResult<Vec<String>> {
        if permission_ids.is_empty() {
            return Ok(Vec::new());
        }

        let sql = format!(
            "SELECT DISTINCT p.name
            FROM user_has_permissions up
            JOIN \"{accounts}\" a ON up.user_id = a.id
            JOIN permissions p ON up.permission_id = p.id
            WHERE up.user_id = ?1 AND up.permission_id IN ({ids})",
            accounts = self.options.account_table,
            ids = placeholders(2, permission_ids.len()),
        );

        let mut args = Vec::with_capacity(permission_ids.len() + 1);
        args.push(user_id);
        args.extend_from_slice(permission_ids);
        self.query_names(ctx, &sql, args)
    }

    fn list_roles(&self, ctx: &QueryContext) -> StoreResult<Vec<Role>> {
        Ok(self
            .list_named(ctx, "roles")?
            .into_iter()
            .map(|(id, name)| Role { id, name })
            .collect())
    }

    fn list_permissions(&self, ctx: &QueryContext) -> StoreResult<Vec<Permission>> {
        Ok(self
            .list_named(ctx, "permissions")?
            .into_iter()
            .map(|(id, name)| Permission { id, name })
            .collect())
    }
}

/// Installs a progress handler bound to the caller's context and removes it
/// when dropped, so pooled connections come back clean
struct InterruptGuard<'c> {
    conn: &'c Connection,
}

impl<'c> InterruptGuard<'c> {
    fn install(conn: &'c Connection, ctx: &QueryContext) -> StoreResult<Self> {
        if let Some(reason) = ctx.interruption() {
            return Err(reason.into());
        }

        let cancelled = ctx.cancel_flag();
        let deadline = ctx.deadline();
        conn.progress_handler(
            PROGRESS_OPS,
            Some(move || {
                cancelled.load(Ordering::SeqCst)
                    || deadline.is_some_and(|deadline| Instant::now() >= deadline)
            }),
        );

        Ok(Self { conn })
    }
}

impl Drop for InterruptGuard<'_> {
    fn drop(&mut self) {
        self.conn.progress_handler(0, None::<fn() -> bool>);
    }
}

/// Map a rusqlite failure, turning interruptions into the context's reason
fn classify(ctx: &QueryContext, err: rusqlite::Error) -> StoreError {
    match &err {
        rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::OperationInterrupted => ctx
            .interruption()
            .map(StoreError::from)
            .unwrap_or(StoreError::from(Interruption::Cancelled)),
        _ => StoreError::Query(err),
    }
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation => {
            e.extended_code == ffi::SQLITE_CONSTRAINT_UNIQUE
                || e.extended_code == ffi::SQLITE_CONSTRAINT_PRIMARYKEY
                || e.extended_code == ffi::SQLITE_CONSTRAINT
        }
        _ => false,
    }
}

/// `?start, ?start+1, ...` for `count` parameters
fn placeholders(start: usize, count: usize) -> String {
    (start..start + count)
        .map(|i| format!("?{}", i))
        .collect::<Vec<_>>()
        .join(", ")
}

fn dedup_preserving_order(names: &[String]) -> Vec<&String> {
    let mut seen = HashSet::new();
    names.iter().filter(|name| seen.insert(name.as_str())).collect()
}

fn query_pairs(
    conn: &Connection,
    sql: &str,
    args: impl rusqlite::Params,
) -> Result<HashMap<String, i64>, rusqlite::Error> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(args, |row| Ok((row.get::<_, String>(1)?, row.get::<_, i64>(0)?)))?;
    rows.collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> SqliteStore {
        let db = Database::in_memory().unwrap();
        db.init_acl_schema(&StoreOptions::default()).unwrap();
        db.get_connection()
            .unwrap()
            .execute_batch(
                "CREATE TABLE users (id INTEGER PRIMARY KEY, full_name TEXT, role_name TEXT);
                INSERT INTO users (id, full_name, role_name) VALUES (1, 'Ada', NULL), (2, 'Grace', 'Superadmin');",
            )
            .unwrap();
        SqliteStore::new(db, StoreOptions::default()).unwrap()
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_placeholders() {
        assert_eq!(placeholders(1, 3), "?1, ?2, ?3");
        assert_eq!(placeholders(2, 1), "?2");
        assert_eq!(placeholders(1, 0), "");
    }

    #[test]
    fn test_create_role_duplicate() {
        let store = store();
        let ctx = QueryContext::background();
        let id = store.create_role(&ctx, "admin").unwrap();
        assert!(id > 0);
        assert!(matches!(
            store.create_role(&ctx, "admin"),
            Err(StoreError::DuplicateRole(name)) if name == "admin"
        ));
    }

    #[test]
    fn test_create_permission_duplicate() {
        let store = store();
        let ctx = QueryContext::background();
        store.create_permission(&ctx, "read").unwrap();
        assert!(matches!(
            store.create_permission(&ctx, "read"),
            Err(StoreError::DuplicatePermission(_))
        ));
    }

    #[test]
    fn test_resolution_keeps_request_order() {
        let store = store();
        let ctx = QueryContext::background();
        let read = store.create_permission(&ctx, "read").unwrap();
        let write = store.create_permission(&ctx, "write").unwrap();

        let ids = store
            .permission_ids_by_name(&ctx, &names(&["write", "read", "write"]))
            .unwrap();
        assert_eq!(ids, vec![write, read]);
    }

    #[test]
    fn test_resolution_fails_on_any_missing_name() {
        let store = store();
        let ctx = QueryContext::background();
        store.create_role(&ctx, "admin").unwrap();

        match store.role_ids_by_name(&ctx, &names(&["admin", "ghost", "phantom"])) {
            Err(StoreError::RoleNotFound(missing)) => {
                assert_eq!(missing, names(&["ghost", "phantom"]))
            }
            other => panic!("expected RoleNotFound, got {:?}", other),
        }
    }

    #[test]
    fn test_lenient_resolution_skips_unknown_names() {
        let store = store();
        let ctx = QueryContext::background();
        let editor = store.create_role(&ctx, "editor").unwrap();
        let read = store.create_permission(&ctx, "read").unwrap();

        let ids = store
            .find_role_ids(&ctx, &names(&["ghost", "editor", "phantom"]))
            .unwrap();
        assert_eq!(ids, vec![editor]);
        assert!(store.find_role_ids(&ctx, &names(&["ghost"])).unwrap().is_empty());

        let ids = store
            .find_permission_ids(&ctx, &names(&["read", "ghost"]))
            .unwrap();
        assert_eq!(ids, vec![read]);
    }

    #[test]
    fn test_batch_insert_rolls_back() {
        let store = store();
        let ctx = QueryContext::background();
        let role = store.create_role(&ctx, "editor").unwrap();
        let read = store.create_permission(&ctx, "read").unwrap();
        let write = store.create_permission(&ctx, "write").unwrap();

        store.give_permissions_to_role(&ctx, role, &[write]).unwrap();
        let err = store
            .give_permissions_to_role(&ctx, role, &[read, write])
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::DuplicateRolePermission { permission_id, .. } if permission_id == write
        ));

        store.give_role_to_user(&ctx, 1, role).unwrap();
        let granted = store.role_permissions_for_account(&ctx, 1, &[role]).unwrap();
        assert_eq!(granted, names(&["write"]));
    }

    #[test]
    fn test_duplicate_user_role() {
        let store = store();
        let ctx = QueryContext::background();
        let role = store.create_role(&ctx, "admin").unwrap();
        store.give_role_to_user(&ctx, 1, role).unwrap();
        assert!(matches!(
            store.give_role_to_user(&ctx, 1, role),
            Err(StoreError::DuplicateUserRole { user_id: 1, .. })
        ));
    }

    #[test]
    fn test_account_role_names_with_column() {
        let db = Database::in_memory().unwrap();
        db.init_acl_schema(&StoreOptions::default()).unwrap();
        db.get_connection()
            .unwrap()
            .execute_batch(
                "CREATE TABLE users (id INTEGER PRIMARY KEY, full_name TEXT, role_name TEXT);
                INSERT INTO users (id, full_name, role_name) VALUES (2, 'Grace', 'Superadmin');",
            )
            .unwrap();
        let store = SqliteStore::new(
            db,
            StoreOptions::default().with_account_role_column("role_name"),
        )
        .unwrap();
        let ctx = QueryContext::background();

        assert_eq!(store.account_role_names(&ctx, 2).unwrap(), names(&["Superadmin"]));
        assert!(store.account_role_names(&ctx, 99).unwrap().is_empty());
    }

    #[test]
    fn test_direct_permissions_restricted_to_ids() {
        let store = store();
        let ctx = QueryContext::background();
        let read = store.create_permission(&ctx, "read").unwrap();
        let write = store.create_permission(&ctx, "write").unwrap();
        store.give_permission_to_user(&ctx, 1, read).unwrap();
        store.give_permission_to_user(&ctx, 1, write).unwrap();

        let granted = store.direct_permissions_for_account(&ctx, 1, &[read]).unwrap();
        assert_eq!(granted, names(&["read"]));
        assert!(store.direct_permissions_for_account(&ctx, 1, &[]).unwrap().is_empty());
    }

    #[test]
    fn test_cancelled_context_aborts_before_query() {
        let store = store();
        let ctx = QueryContext::background();
        ctx.cancel();
        assert!(matches!(store.create_role(&ctx, "admin"), Err(StoreError::Cancelled)));

        let fresh = QueryContext::background();
        assert!(store.list_roles(&fresh).unwrap().is_empty());
    }

    #[test]
    fn test_deadline_interrupts_running_query() {
        let store = store();
        let ctx = QueryContext::with_timeout(std::time::Duration::from_millis(20));
        let sql = "WITH RECURSIVE n(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM n) \
                   SELECT CAST(x AS TEXT) FROM n WHERE x < 0";
        let err = store.query_names(&ctx, sql, Vec::new()).unwrap_err();
        assert!(matches!(err, StoreError::DeadlineExceeded));
    }

    #[test]
    fn test_list_roles() {
        let store = store();
        let ctx = QueryContext::background();
        store.create_role(&ctx, "admin").unwrap();
        store.create_role(&ctx, "viewer").unwrap();
        let roles: Vec<String> = store.list_roles(&ctx).unwrap().into_iter().map(|r| r.name).collect();
        assert_eq!(roles, names(&["admin", "viewer"]));
    }
}
