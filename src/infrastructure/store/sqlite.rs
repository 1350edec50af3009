//! SQLite store
//!
//! Persistent backend used in production

use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::{bail, Result};
use async_trait::async_trait;
use rusqlite::{Connection, OptionalExtension};

use crate::core::store::Store;
use crate::domain::{Account, MatrixUser};

/// SQLite store
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (or create) the database file and make sure the tables exist
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        if let Some(parent) = db_path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(db_path)?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// In-memory database (tests)
    pub fn new_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock()
            .map_err(|e| anyhow::anyhow!("Failed to acquire database lock: {}", e))?;

        conn.execute_batch(
            "
            PRAGMA foreign_keys = ON;

            CREATE TABLE IF NOT EXISTS accounts (
                email TEXT PRIMARY KEY,
                first_name TEXT,
                last_name TEXT
            );

            CREATE TABLE IF NOT EXISTS matrix_users (
                id TEXT PRIMARY KEY,
                token TEXT UNIQUE NOT NULL,
                account_email TEXT,
                FOREIGN KEY (account_email) REFERENCES accounts(email)
            );

            CREATE INDEX IF NOT EXISTS idx_matrix_users_account ON matrix_users(account_email);
            "
        )?;

        Ok(())
    }

    /// Run a database operation on the blocking pool
    async fn execute<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = conn.lock()
                .map_err(|e| anyhow::anyhow!("Failed to acquire database lock: {}", e))?;
            f(&mut conn)
        })
        .await
        .map_err(|e| anyhow::anyhow!("Task failed: {}", e))?
    }
}

fn matrix_user_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<MatrixUser> {
    Ok(MatrixUser {
        id: row.get(0)?,
        token: row.get(1)?,
        account_email: row.get(2)?,
    })
}

#[async_trait]
impl Store for SqliteStore {
    async fn get_matrix_user(&self, id: &str) -> Result<Option<MatrixUser>> {
        let id = id.to_string();
        self.execute(move |conn| {
            let user = conn
                .query_row(
                    "SELECT id, token, account_email FROM matrix_users WHERE id = ?1",
                    [id],
                    matrix_user_from_row,
                )
                .optional()?;
            Ok(user)
        }).await
    }

    async fn get_matrix_user_by_token(&self, token: &str) -> Result<Option<MatrixUser>> {
        let token = token.to_string();
        self.execute(move |conn| {
            let user = conn
                .query_row(
                    "SELECT id, token, account_email FROM matrix_users WHERE token = ?1",
                    [token],
                    matrix_user_from_row,
                )
                .optional()?;
            Ok(user)
        }).await
    }

    async fn save_matrix_user(&self, user: &MatrixUser) -> Result<()> {
        let user = user.clone();
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO matrix_users (id, token, account_email) VALUES (?1, ?2, ?3)",
                rusqlite::params![&user.id, &user.token, &user.account_email],
            )?;
            Ok(())
        }).await
    }

    async fn merge_account(&self, account: &Account) -> Result<Account> {
        let account = account.clone();
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO accounts (email, first_name, last_name) VALUES (?1, ?2, ?3)
                 ON CONFLICT(email) DO UPDATE SET
                    first_name = excluded.first_name,
                    last_name = excluded.last_name",
                rusqlite::params![&account.email, &account.first_name, &account.last_name],
            )?;
            Ok(account)
        }).await
    }

    async fn get_account(&self, email: &str) -> Result<Option<Account>> {
        let email = email.to_string();
        self.execute(move |conn| {
            let account = conn
                .query_row(
                    "SELECT email, first_name, last_name FROM accounts WHERE email = ?1",
                    [email],
                    |row| {
                        Ok(Account {
                            email: row.get(0)?,
                            first_name: row.get(1)?,
                            last_name: row.get(2)?,
                        })
                    },
                )
                .optional()?;
            Ok(account)
        }).await
    }

    async fn link_matrix_user(&self, token: &str, email: &str) -> Result<MatrixUser> {
        let token = token.to_string();
        let email = email.to_string();
        self.execute(move |conn| {
            let tx = conn.transaction()?;

            let account_exists: bool = tx.query_row(
                "SELECT EXISTS(SELECT 1 FROM accounts WHERE email = ?1)",
                [&email],
                |row| row.get(0),
            )?;
            if !account_exists {
                bail!("Account not found: {}", email);
            }

            let updated = tx.execute(
                "UPDATE matrix_users SET account_email = ?1 WHERE token = ?2",
                rusqlite::params![&email, &token],
            )?;
            if updated == 0 {
                bail!("No Matrix user owns the given token");
            }

            let user = tx.query_row(
                "SELECT id, token, account_email FROM matrix_users WHERE token = ?1",
                [&token],
                matrix_user_from_row,
            )?;
            tx.commit()?;
            Ok(user)
        }).await
    }

    async fn list_matrix_users_for_account(&self, email: &str) -> Result<Vec<MatrixUser>> {
        let email = email.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, token, account_email FROM matrix_users
                 WHERE account_email = ?1 ORDER BY id"
            )?;

            let user_iter = stmt.query_map([email], matrix_user_from_row)?;

            let mut users = Vec::new();
            for user in user_iter {
                users.push(user?);
            }
            Ok(users)
        }).await
    }
}
