//! Check-in SQLite database.
//!
//! Two tables: `accounts` (credentials managed from the panel or synced
//! from config) and `runs` (one row per account per batch).

use async_trait::async_trait;
use leafcheck_core::error::{LeafcheckError, Result as CoreResult};
use leafcheck_core::traits::{AccountSource, RunSink};
use leafcheck_core::types::{Account, RunResult};
use rusqlite::{Connection, params};
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

pub struct CheckinDb {
    conn: Mutex<Connection>,
}

/// Account as listed by the API. Never carries the password.
#[derive(Debug, Clone, serde::Serialize)]
pub struct AccountRow {
    pub id: i64,
    pub email: String,
    pub created_at: String,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct RunRow {
    pub id: i64,
    pub account_id: Option<i64>,
    pub email: String,
    pub success: bool,
    pub result: String,
    pub balance: String,
    pub created_at: String,
}

impl CheckinDb {
    /// Open or create the database; `:memory:` works for tests.
    pub fn open(path: &Path) -> Result<Self, String> {
        if path != Path::new(":memory:")
            && let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| format!("Create DB dir: {e}"))?;
        }

        let conn = Connection::open(path).map_err(|e| format!("Checkin DB open error: {e}"))?;
        conn.execute_batch("PRAGMA journal_mode=WAL;").ok();
        conn.busy_timeout(Duration::from_secs(30))
            .map_err(|e| format!("Busy timeout: {e}"))?;

        let db = Self {
            conn: Mutex::new(conn),
        };
        db.migrate()?;
        Ok(db)
    }

    fn migrate(&self) -> Result<(), String> {
        let conn = self.conn.lock().map_err(|e| format!("Lock: {e}"))?;
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS accounts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                email TEXT NOT NULL,
                password TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS runs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                account_id INTEGER,
                email TEXT NOT NULL,
                success INTEGER NOT NULL,
                result TEXT,
                balance TEXT,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_runs_created ON runs(created_at);
        ",
        )
        .map_err(|e| format!("Migration error: {e}"))
    }

    // ── Accounts ────────────────────────────────────────────

    /// Newest first, without passwords.
    pub fn list_accounts(&self) -> Result<Vec<AccountRow>, String> {
        let conn = self.conn.lock().map_err(|e| format!("Lock: {e}"))?;
        let mut stmt = conn
            .prepare("SELECT id, email, created_at FROM accounts ORDER BY id DESC")
            .map_err(|e| format!("Prepare: {e}"))?;
        let rows = stmt
            .query_map([], |row| {
                Ok(AccountRow {
                    id: row.get(0)?,
                    email: row.get(1)?,
                    created_at: row.get(2)?,
                })
            })
            .map_err(|e| format!("Query: {e}"))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    /// Accounts with credentials, in insertion order, for a batch.
    pub fn load_accounts(&self) -> Result<Vec<Account>, String> {
        let conn = self.conn.lock().map_err(|e| format!("Lock: {e}"))?;
        let mut stmt = conn
            .prepare("SELECT id, email, password FROM accounts ORDER BY id ASC")
            .map_err(|e| format!("Prepare: {e}"))?;
        let accounts = stmt
            .query_map([], |row| {
                let id: i64 = row.get(0)?;
                Ok(Account::new(row.get::<_, String>(1)?, row.get::<_, String>(2)?).with_id(id))
            })
            .map_err(|e| format!("Query: {e}"))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(accounts)
    }

    pub fn add_account(&self, email: &str, password: &str) -> Result<i64, String> {
        let conn = self.conn.lock().map_err(|e| format!("Lock: {e}"))?;
        conn.execute(
            "INSERT INTO accounts (email, password, created_at) VALUES (?1, ?2, ?3)",
            params![email, password, chrono::Utc::now().to_rfc3339()],
        )
        .map_err(|e| format!("Add account: {e}"))?;
        Ok(conn.last_insert_rowid())
    }

    /// `Ok(false)` when no row had that id.
    pub fn delete_account(&self, id: i64) -> Result<bool, String> {
        let conn = self.conn.lock().map_err(|e| format!("Lock: {e}"))?;
        let n = conn
            .execute("DELETE FROM accounts WHERE id=?1", params![id])
            .map_err(|e| format!("Delete account: {e}"))?;
        Ok(n > 0)
    }

    /// Insert configured accounts whose email is not stored yet.
    pub fn sync_accounts(&self, accounts: &[Account]) -> Result<usize, String> {
        let existing: std::collections::HashSet<String> = self
            .list_accounts()?
            .into_iter()
            .map(|a| a.email)
            .collect();

        let mut added = 0;
        let mut seen = existing;
        for account in accounts {
            if seen.insert(account.email.clone()) {
                self.add_account(&account.email, &account.password)?;
                added += 1;
            }
        }
        Ok(added)
    }

    // ── Runs ────────────────────────────────────────────────

    pub fn record_run(&self, account_id: Option<i64>, result: &RunResult) -> Result<i64, String> {
        let conn = self.conn.lock().map_err(|e| format!("Lock: {e}"))?;
        conn.execute(
            "INSERT INTO runs (account_id, email, success, result, balance, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                account_id,
                result.email,
                result.success as i32,
                result.result,
                result.balance,
                result.timestamp.to_rfc3339(),
            ],
        )
        .map_err(|e| format!("Record run: {e}"))?;
        Ok(conn.last_insert_rowid())
    }

    /// Most recent first.
    pub fn list_runs(&self, limit: u32) -> Result<Vec<RunRow>, String> {
        let conn = self.conn.lock().map_err(|e| format!("Lock: {e}"))?;
        let mut stmt = conn
            .prepare(
                "SELECT id, account_id, email, success, result, balance, created_at
                 FROM runs ORDER BY id DESC LIMIT ?1",
            )
            .map_err(|e| format!("Prepare: {e}"))?;
        let rows = stmt
            .query_map(params![limit], |row| {
                Ok(RunRow {
                    id: row.get(0)?,
                    account_id: row.get(1)?,
                    email: row.get(2)?,
                    success: row.get::<_, i32>(3)? != 0,
                    result: row.get::<_, Option<String>>(4)?.unwrap_or_default(),
                    balance: row.get::<_, Option<String>>(5)?.unwrap_or_default(),
                    created_at: row.get(6)?,
                })
            })
            .map_err(|e| format!("Query: {e}"))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }
}

#[async_trait]
impl RunSink for CheckinDb {
    async fn record(&self, account: &Account, result: &RunResult) -> CoreResult<()> {
        self.record_run(account.id, result)
            .map(|_| ())
            .map_err(LeafcheckError::Database)
    }
}

#[async_trait]
impl AccountSource for CheckinDb {
    async fn accounts(&self) -> CoreResult<Vec<Account>> {
        self.load_accounts().map_err(LeafcheckError::Database)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn temp_db() -> CheckinDb {
        CheckinDb::open(&PathBuf::from(":memory:")).unwrap()
    }

    #[test]
    fn test_account_crud() {
        let db = temp_db();
        let a = db.add_account("a@example.com", "pw-a").unwrap();
        let b = db.add_account("b@example.com", "pw-b").unwrap();

        let listed = db.list_accounts().unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, b);

        let loaded = db.load_accounts().unwrap();
        assert_eq!(loaded[0].email, "a@example.com");
        assert_eq!(loaded[0].password, "pw-a");
        assert_eq!(loaded[0].id, Some(a));

        assert!(db.delete_account(a).unwrap());
        assert!(!db.delete_account(a).unwrap());
        assert_eq!(db.list_accounts().unwrap().len(), 1);
    }

    #[test]
    fn test_sync_skips_known_emails() {
        let db = temp_db();
        db.add_account("a@example.com", "old").unwrap();

        let added = db
            .sync_accounts(&[
                Account::new("a@example.com", "new"),
                Account::new("b@example.com", "pw"),
                Account::new("b@example.com", "dup"),
            ])
            .unwrap();
        assert_eq!(added, 1);

        let loaded = db.load_accounts().unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].password, "old");
    }

    #[test]
    fn test_runs_newest_first_with_limit() {
        let db = temp_db();
        for i in 0..5 {
            db.record_run(Some(1), &RunResult::new(format!("u{i}@x.y"), i % 2 == 0, "ok", "1元"))
                .unwrap();
        }
        let runs = db.list_runs(3).unwrap();
        assert_eq!(runs.len(), 3);
        assert_eq!(runs[0].email, "u4@x.y");
        assert!(runs[0].success);
        assert!(!runs[1].success);
    }

    #[tokio::test]
    async fn test_sink_and_source() {
        let db = temp_db();
        let id = db.add_account("a@example.com", "pw").unwrap();

        let accounts = AccountSource::accounts(&db).await.unwrap();
        assert_eq!(accounts.len(), 1);

        let result = RunResult::failure("a@example.com", "Check-in failed: nope");
        db.record(&accounts[0], &result).await.unwrap();
        let runs = db.list_runs(10).unwrap();
        assert_eq!(runs[0].account_id, Some(id));
        assert_eq!(runs[0].balance, "unknown");
    }

    #[test]
    fn test_file_backed_db_creates_parent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("leafcheck.db");
        let db = CheckinDb::open(&path).unwrap();
        db.add_account("a@example.com", "pw").unwrap();
        assert!(path.exists());
    }
}
