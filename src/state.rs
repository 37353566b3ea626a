use crate::auth::google::{FirebaseVerifier, IdentityVerifier};
use crate::auth::jwt::JwtKeys;
use crate::auth::repo::{PgUserStore, UserStore};
use crate::config::AppConfig;
use anyhow::Context;
use sqlx::PgPool;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub keys: JwtKeys,
    pub users: Arc<dyn UserStore>,
    pub verifier: Arc<dyn IdentityVerifier>,
}

impl AppState {
    /// Connects to the database; returns the pool too so the caller can migrate.
    pub async fn init(config: AppConfig) -> anyhow::Result<(Self, PgPool)> {
        let db = sqlx::postgres::PgPoolOptions::new()
            .max_connections(10)
            .connect(&config.database_url)
            .await
            .context("connect to database")?;

        let verifier = Arc::new(FirebaseVerifier::new(&config.google)?) as Arc<dyn IdentityVerifier>;
        let users = Arc::new(PgUserStore::new(db.clone())) as Arc<dyn UserStore>;

        Ok((Self::from_parts(Arc::new(config), users, verifier), db))
    }

    pub fn from_parts(
        config: Arc<AppConfig>,
        users: Arc<dyn UserStore>,
        verifier: Arc<dyn IdentityVerifier>,
    ) -> Self {
        Self {
            keys: JwtKeys::from_secret(&config.jwt.secret),
            config,
            users,
            verifier,
        }
    }
}
