use std::sync::Arc;

use chrono::Utc;
use diesel::{
    pg::PgConnection,
    r2d2::{ConnectionManager, PooledConnection},
};

use crate::{
    activity::ActivityLogger,
    auth::{jwt::JwtService, policy::AccessPolicy, AuthenticatedUser},
    config::AppConfig,
    db::PgPool,
    error::{AppError, AppResult},
    lifecycle::CommandContext,
    notifier::Notifier,
    storage::BlobStore,
};

type PgPooledConnection = PooledConnection<ConnectionManager<PgConnection>>;

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Arc<AppConfig>,
    pub storage: Arc<dyn BlobStore>,
    pub notifier: Arc<dyn Notifier>,
    pub policy: Arc<dyn AccessPolicy>,
    pub activity: ActivityLogger,
    pub jwt: JwtService,
}

pub struct Collaborators {
    pub storage: Arc<dyn BlobStore>,
    pub notifier: Arc<dyn Notifier>,
    pub policy: Arc<dyn AccessPolicy>,
    pub activity: ActivityLogger,
}

impl AppState {
    pub fn new(
        pool: PgPool,
        config: AppConfig,
        collaborators: Collaborators,
        jwt: JwtService,
    ) -> Self {
        let Collaborators {
            storage,
            notifier,
            policy,
            activity,
        } = collaborators;
        Self {
            pool,
            config: Arc::new(config),
            storage,
            notifier,
            policy,
            activity,
            jwt,
        }
    }

    pub fn db(&self) -> AppResult<PgPooledConnection> {
        self.pool
            .get()
            .map_err(|err| AppError::internal(format!("database pool error: {err}")))
    }

    /// Context for a command issued by `actor`, dated today (UTC).
    pub fn command<'a>(&'a self, actor: &'a AuthenticatedUser) -> CommandContext<'a> {
        CommandContext {
            actor,
            policy: self.policy.as_ref(),
            activity: &self.activity,
            today: Utc::now().date_naive(),
        }
    }
}
