use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::infrastructure::logger::LogFormat;
use crate::infrastructure::matrix::ClientConfig;

/// Default pattern of the emails allowed to link
pub const DEFAULT_EMAIL_PATTERN: &str = r"^(.+)@studenti[.]unimore[.]it$";

/// Store backend
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StoreType {
    Memory,
    Sqlite,
}

impl std::str::FromStr for StoreType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "memory" => Ok(StoreType::Memory),
            "sqlite" => Ok(StoreType::Sqlite),
            _ => Err(format!("Unknown store type: {}", s)),
        }
    }
}

impl std::fmt::Display for StoreType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreType::Memory => write!(f, "memory"),
            StoreType::Sqlite => write!(f, "sqlite"),
        }
    }
}

#[derive(Parser, Debug, Clone)]
#[command(
    author,
    version,
    about = "Links studenti@UniMoRe Google accounts to Matrix users"
)]
pub struct AppConfig {
    // Web
    /// Address the web server listens on
    #[arg(long, env = "LOKI_BIND", default_value = "127.0.0.1:30008")]
    pub bind: String,

    /// Public base url, such as https://loki.example.org; derived from the
    /// request (and reverse proxy headers) when unset
    #[arg(long, env = "LOKI_PUBLIC_URL")]
    pub public_url: Option<String>,

    /// Key signing the session cookies
    #[arg(long, env = "LOKI_SESSION_SECRET", hide_env_values = true)]
    pub session_secret: String,

    /// Log layout: pretty, compact
    #[arg(long, env = "LOKI_LOG_FORMAT", default_value = "compact")]
    pub log_format: LogFormat,

    // Storage
    /// Store type: memory, sqlite
    #[arg(long, env = "LOKI_STORE_TYPE", default_value = "sqlite")]
    pub store_type: StoreType,

    #[arg(long, env = "LOKI_DATABASE_PATH", default_value = "./data/loki.sqlite")]
    pub database_path: String,

    // Google
    #[arg(long, env = "GOOGLE_CLIENT_ID")]
    pub google_client_id: String,

    #[arg(long, env = "GOOGLE_CLIENT_SECRET", hide_env_values = true)]
    pub google_client_secret: String,

    #[arg(
        long,
        env = "GOOGLE_DISCOVERY_URL",
        default_value = "https://accounts.google.com/.well-known/openid-configuration"
    )]
    pub google_discovery_url: String,

    /// Workspace domain hint shown on the Google account chooser
    #[arg(long, env = "GOOGLE_HOSTED_DOMAIN")]
    pub google_hosted_domain: Option<String>,

    /// Regex the verified email must match
    #[arg(long, env = "LOKI_EMAIL_PATTERN", default_value = DEFAULT_EMAIL_PATTERN)]
    pub email_pattern: String,

    // Matrix, all optional: without a homeserver the bot does not run
    #[arg(long, env = "MATRIX_HOMESERVER")]
    pub matrix_homeserver: Option<String>,

    /// Full user id of the bot, such as @loki:example.org
    #[arg(long, env = "MATRIX_USER_ID")]
    pub matrix_user_id: Option<String>,

    #[arg(long, env = "MATRIX_DEVICE_ID", default_value = "LOKI")]
    pub matrix_device_id: String,

    /// Secret of the shared-secret login module
    #[arg(long, env = "MATRIX_LOGIN_SECRET", hide_env_values = true)]
    pub matrix_login_secret: Option<String>,

    /// Synapse registration secret, registers the bot on startup when set
    #[arg(long, env = "MATRIX_REGISTRATION_SECRET", hide_env_values = true)]
    pub matrix_registration_secret: Option<String>,

    /// Password given to the bot account on registration
    #[arg(long, env = "MATRIX_PASSWORD", hide_env_values = true)]
    pub matrix_password: Option<String>,

    #[arg(long, env = "MATRIX_DISPLAYNAME", default_value = "Loki")]
    pub matrix_displayname: String,

    #[arg(long, env = "MATRIX_STORE_PATH", default_value = "./data/matrix")]
    pub matrix_store_path: String,

    /// Community space linked users are invited to
    #[arg(long, env = "MATRIX_SPACE_ID")]
    pub matrix_space_id: Option<String>,

    /// How deep to look for suggested rooms inside the space
    #[arg(long, env = "MATRIX_SPACE_MAX_DEPTH", default_value_t = 1)]
    pub matrix_space_max_depth: u32,

    /// Room whose new members are greeted with their link
    #[arg(long, env = "MATRIX_WELCOME_ROOM_ID")]
    pub matrix_welcome_room_id: Option<String>,

    /// Seconds between two sync cursor checkpoints
    #[arg(long, env = "MATRIX_STATE_DUMP_INTERVAL", default_value_t = 300)]
    pub matrix_state_dump_interval: u64,

    /// Long polling timeout of /sync, in milliseconds
    #[arg(long, env = "MATRIX_SYNC_TIMEOUT", default_value_t = 30_000)]
    pub matrix_sync_timeout: u64,
}

impl AppConfig {
    /// Check the settings that depend on each other
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.session_secret.is_empty() {
            anyhow::bail!("LOKI_SESSION_SECRET is required");
        }
        if self.google_client_id.is_empty() || self.google_client_secret.is_empty() {
            anyhow::bail!("GOOGLE_CLIENT_ID and GOOGLE_CLIENT_SECRET are required");
        }
        if let Err(e) = regex::Regex::new(&self.email_pattern) {
            anyhow::bail!("LOKI_EMAIL_PATTERN is not a valid regex: {}", e);
        }

        let matrix_settings = [
            self.matrix_homeserver.is_some(),
            self.matrix_user_id.is_some(),
            self.matrix_login_secret.is_some(),
        ];
        if matrix_settings.iter().any(|set| *set) && !matrix_settings.iter().all(|set| *set) {
            anyhow::bail!(
                "MATRIX_HOMESERVER, MATRIX_USER_ID and MATRIX_LOGIN_SECRET must be set together"
            );
        }
        if !self.matrix_enabled()
            && (self.matrix_space_id.is_some() || self.matrix_welcome_room_id.is_some())
        {
            anyhow::bail!("MATRIX_SPACE_ID and MATRIX_WELCOME_ROOM_ID need the Matrix settings");
        }
        if self.matrix_registration_secret.is_some() && self.matrix_password.is_none() {
            anyhow::bail!("MATRIX_PASSWORD is required for registration");
        }
        if self.matrix_state_dump_interval == 0 {
            anyhow::bail!("MATRIX_STATE_DUMP_INTERVAL must be positive");
        }

        Ok(())
    }

    pub fn matrix_enabled(&self) -> bool {
        self.matrix_homeserver.is_some() && self.matrix_user_id.is_some()
    }

    /// Client settings, if the bot is configured
    pub fn matrix_client_config(&self) -> Option<ClientConfig> {
        match (self.matrix_homeserver.as_ref(), self.matrix_user_id.as_ref()) {
            (Some(homeserver), Some(user_id)) => Some(ClientConfig {
                homeserver: homeserver.clone(),
                user_id: user_id.clone(),
                device_id: self.matrix_device_id.clone(),
                store_path: PathBuf::from(&self.matrix_store_path),
                state_dump_interval: Duration::from_secs(self.matrix_state_dump_interval),
                sync_timeout: Duration::from_millis(self.matrix_sync_timeout),
            }),
            _ => None,
        }
    }

    /// Localpart of the bot user id, the username used on registration
    pub fn matrix_localpart(&self) -> Option<&str> {
        let user_id = self.matrix_user_id.as_deref()?;
        let without_sigil = user_id.strip_prefix('@').unwrap_or(user_id);
        Some(without_sigil.split(':').next().unwrap_or(without_sigil))
    }
}
