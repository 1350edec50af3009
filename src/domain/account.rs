//! Verified OAuth2 account model

use serde::{Deserialize, Serialize};

/// A Google account that completed the OAuth2 flow with a verified email
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Account {
    /// Verified email, unique
    pub email: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

impl Account {
    pub fn new(
        email: impl Into<String>,
        first_name: Option<String>,
        last_name: Option<String>,
    ) -> Self {
        Self {
            email: email.into(),
            first_name,
            last_name,
        }
    }

    /// Full name of the account owner, falling back to the email
    pub fn display_name(&self) -> String {
        let parts: Vec<&str> = [self.first_name.as_deref(), self.last_name.as_deref()]
            .into_iter()
            .flatten()
            .filter(|s| !s.trim().is_empty())
            .collect();

        if parts.is_empty() {
            self.email.clone()
        } else {
            parts.join(" ")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_name_full() {
        let account = Account::new(
            "123456@studenti.unimore.it",
            Some("Mario".to_string()),
            Some("Rossi".to_string()),
        );
        assert_eq!(account.display_name(), "Mario Rossi");
    }

    #[test]
    fn test_display_name_falls_back_to_email() {
        let account = Account::new("123456@studenti.unimore.it", None, Some(" ".to_string()));
        assert_eq!(account.display_name(), "123456@studenti.unimore.it");
    }
}
