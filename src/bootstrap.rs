//! Startup
//!
//! Wires store, Google provider, Matrix bot and web server together from an
//! [`AppConfig`] and runs them until Ctrl-C or until the bot stops syncing.

use std::sync::Arc;

use anyhow::{Context, Result};
use regex::Regex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::application::{authenticate, BotCredentials, LokiBot, Registration, SpaceAccess};
use crate::config::{AppConfig, StoreType};
use crate::core::store::{MemoryStore, Store};
use crate::infrastructure::auth::google::GoogleOidc;
use crate::infrastructure::auth::SessionService;
use crate::infrastructure::matrix::{ExtendedClient, MatrixError, SyncHandler};
use crate::infrastructure::store::SqliteStore;
use crate::infrastructure::web::{start_web_server, AppState};

/// Running Matrix side of the service
struct MatrixRuntime {
    client: Arc<ExtendedClient>,
    sync_task: JoinHandle<Result<(), MatrixError>>,
}

/// Sync with `handler` until shutdown
///
/// A failed sync flips `shutdown` so the web server stops too, and the
/// error is returned from the task.
pub fn spawn_sync<H>(
    client: Arc<ExtendedClient>,
    handler: H,
    shutdown: Arc<watch::Sender<bool>>,
) -> JoinHandle<Result<(), MatrixError>>
where
    H: SyncHandler + 'static,
{
    let stop = shutdown.subscribe();
    tokio::spawn(async move {
        let result = client.sync_forever(&handler, stop).await;
        match &result {
            Ok(()) => info!("Matrix sync stopped"),
            Err(e) => {
                error!("Matrix sync failed, shutting down: {}", e);
                let _ = shutdown.send(true);
            }
        }
        result
    })
}

pub struct Launcher {
    config: AppConfig,
}

impl Launcher {
    pub fn with_config(config: AppConfig) -> Self {
        Self { config }
    }

    /// Run every configured service until shutdown
    pub async fn launch(&self) -> Result<()> {
        info!("Launching Loki...");

        let store = self.build_store()?;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let shutdown_tx = Arc::new(shutdown_tx);

        let matrix = self.start_matrix(store.clone(), shutdown_tx.clone()).await?;

        let space = match (&matrix, &self.config.matrix_space_id) {
            (Some(runtime), Some(space_id)) => Some(SpaceAccess::new(
                runtime.client.clone(),
                space_id.clone(),
                self.config.matrix_space_max_depth,
            )),
            _ => None,
        };

        let provider = GoogleOidc::new(
            self.config.google_client_id.clone(),
            self.config.google_client_secret.clone(),
        )
        .with_discovery_url(self.config.google_discovery_url.clone())
        .with_hosted_domain(self.config.google_hosted_domain.clone());

        let state = Arc::new(AppState {
            store,
            sessions: SessionService::new(&self.config.session_secret),
            provider: Arc::new(provider),
            email_pattern: Regex::new(&self.config.email_pattern)
                .context("invalid email pattern")?,
            public_url: self.config.public_url.clone(),
            space,
        });

        let signal_tx = shutdown_tx.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("Received Ctrl-C, shutting down..."),
                Err(e) => error!("Could not listen for Ctrl-C: {}", e),
            }
            let _ = signal_tx.send(true);
        });

        let served = start_web_server(&self.config.bind, state, shutdown_rx).await;

        // the web server also returns on errors, stop syncing in any case
        let _ = shutdown_tx.send(true);
        let synced = match matrix {
            Some(runtime) => match runtime.sync_task.await {
                Ok(result) => result.context("Matrix sync failed"),
                Err(e) => Err(anyhow::anyhow!("Matrix sync task panicked: {}", e)),
            },
            None => Ok(()),
        };

        served?;
        synced
    }

    fn build_store(&self) -> Result<Arc<dyn Store>> {
        let store: Arc<dyn Store> = match self.config.store_type {
            StoreType::Memory => {
                warn!("Using the in-memory store, links are lost on restart");
                Arc::new(MemoryStore::new())
            }
            StoreType::Sqlite => {
                info!("Opening database {}", self.config.database_path);
                Arc::new(SqliteStore::new(&self.config.database_path)?)
            }
        };
        Ok(store)
    }

    fn public_url(&self) -> String {
        match &self.config.public_url {
            Some(url) => url.clone(),
            None => {
                warn!("LOKI_PUBLIC_URL is not set, the bot will send links to the bind address");
                format!("http://{}", self.config.bind)
            }
        }
    }

    fn credentials(&self) -> Option<BotCredentials> {
        let login_secret = self.config.matrix_login_secret.clone()?;

        let registration = match (
            &self.config.matrix_registration_secret,
            &self.config.matrix_password,
            self.config.matrix_localpart(),
        ) {
            (Some(secret), Some(password), Some(username)) => Some(Registration {
                shared_secret: secret.clone(),
                username: username.to_string(),
                displayname: self.config.matrix_displayname.clone(),
                password: password.clone(),
            }),
            _ => None,
        };

        Some(BotCredentials {
            login_secret,
            registration,
        })
    }

    async fn start_matrix(
        &self,
        store: Arc<dyn Store>,
        shutdown: Arc<watch::Sender<bool>>,
    ) -> Result<Option<MatrixRuntime>> {
        let (Some(client_config), Some(credentials)) =
            (self.config.matrix_client_config(), self.credentials())
        else {
            info!("Matrix is not configured, running the web frontend only");
            return Ok(None);
        };

        let client = Arc::new(ExtendedClient::new(client_config)?);
        authenticate(&client, &credentials).await?;

        let bot = LokiBot::new(
            store,
            self.public_url(),
            self.config.matrix_welcome_room_id.clone(),
        );

        let sync_task = spawn_sync(client.clone(), bot, shutdown);

        Ok(Some(MatrixRuntime { client, sync_task }))
    }
}
