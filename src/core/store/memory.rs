//! In-memory store
//!
//! Default store for tests and throwaway runs, data is lost on restart

use std::collections::HashMap;

use anyhow::{bail, Result};
use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::domain::{Account, MatrixUser};

use super::Store;

/// In-memory store
pub struct MemoryStore {
    accounts: RwLock<HashMap<String, Account>>,
    matrix_users: RwLock<HashMap<String, MatrixUser>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            accounts: RwLock::new(HashMap::new()),
            matrix_users: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get_matrix_user(&self, id: &str) -> Result<Option<MatrixUser>> {
        let users = self.matrix_users.read().await;
        Ok(users.get(id).cloned())
    }

    async fn get_matrix_user_by_token(&self, token: &str) -> Result<Option<MatrixUser>> {
        let users = self.matrix_users.read().await;
        Ok(users.values().find(|u| u.token == token).cloned())
    }

    async fn save_matrix_user(&self, user: &MatrixUser) -> Result<()> {
        let mut users = self.matrix_users.write().await;
        if users.contains_key(&user.id) {
            bail!("Matrix user already exists: {}", user.id);
        }
        if users.values().any(|u| u.token == user.token) {
            bail!("Token already in use");
        }
        users.insert(user.id.clone(), user.clone());
        Ok(())
    }

    async fn merge_account(&self, account: &Account) -> Result<Account> {
        let mut accounts = self.accounts.write().await;
        accounts.insert(account.email.clone(), account.clone());
        Ok(account.clone())
    }

    async fn get_account(&self, email: &str) -> Result<Option<Account>> {
        let accounts = self.accounts.read().await;
        Ok(accounts.get(email).cloned())
    }

    async fn link_matrix_user(&self, token: &str, email: &str) -> Result<MatrixUser> {
        if !self.accounts.read().await.contains_key(email) {
            bail!("Account not found: {}", email);
        }

        let mut users = self.matrix_users.write().await;
        let Some(user) = users.values_mut().find(|u| u.token == token) else {
            bail!("No Matrix user owns the given token");
        };
        user.account_email = Some(email.to_string());
        Ok(user.clone())
    }

    async fn list_matrix_users_for_account(&self, email: &str) -> Result<Vec<MatrixUser>> {
        let users = self.matrix_users.read().await;
        let mut linked: Vec<MatrixUser> = users
            .values()
            .filter(|u| u.account_email.as_deref() == Some(email))
            .cloned()
            .collect();
        linked.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(linked)
    }
}
