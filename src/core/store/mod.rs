//! Storage interface
//!
//! Persistence abstraction for accounts and Matrix users, with in-memory
//! and SQLite implementations

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;

use crate::domain::{Account, MatrixUser};

pub use memory::MemoryStore;

/// Storage interface
///
/// Every email and every Matrix id appears at most once; tokens are unique.
#[async_trait]
pub trait Store: Send + Sync {
    /// Load a Matrix user by its Matrix id
    async fn get_matrix_user(&self, id: &str) -> Result<Option<MatrixUser>>;

    /// Load a Matrix user by its web token
    async fn get_matrix_user_by_token(&self, token: &str) -> Result<Option<MatrixUser>>;

    /// Insert a Matrix user
    ///
    /// Fails if the id or the token is already taken.
    async fn save_matrix_user(&self, user: &MatrixUser) -> Result<()>;

    /// Return the stored Matrix user, creating an unlinked one with a fresh
    /// token on first contact
    async fn get_or_create_matrix_user(&self, id: &str) -> Result<MatrixUser> {
        if let Some(user) = self.get_matrix_user(id).await? {
            return Ok(user);
        }

        let user = MatrixUser::new(id);
        self.save_matrix_user(&user).await?;
        tracing::info!("Created Matrix user record for {}", id);
        Ok(user)
    }

    /// Insert or update an account, keyed by email
    async fn merge_account(&self, account: &Account) -> Result<Account>;

    /// Load an account by email
    async fn get_account(&self, email: &str) -> Result<Option<Account>>;

    /// Link the Matrix user owning `token` to the account with `email`
    ///
    /// Fails if either side is unknown.
    async fn link_matrix_user(&self, token: &str, email: &str) -> Result<MatrixUser>;

    /// All Matrix users linked to an account
    async fn list_matrix_users_for_account(&self, email: &str) -> Result<Vec<MatrixUser>>;
}
