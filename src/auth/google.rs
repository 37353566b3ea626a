use std::time::{Duration, Instant};

use anyhow::Context;
use axum::async_trait;
use jsonwebtoken::{decode, decode_header, jwk::JwkSet, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::debug;

use crate::config::GoogleConfig;

const JWKS_TTL: Duration = Duration::from_secs(60 * 60);
const JWKS_MIN_REFRESH: Duration = Duration::from_secs(60);

/// Verified identity claims extracted from a provider token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FederatedIdentity {
    pub email: String,
    pub name: Option<String>,
    pub picture: Option<String>,
}

#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> anyhow::Result<FederatedIdentity>;
}

#[derive(Debug, Deserialize)]
struct FirebaseClaims {
    email: Option<String>,
    name: Option<String>,
    picture: Option<String>,
}

/// Verifies Google sign-in ID tokens minted by Firebase Auth.
pub struct FirebaseVerifier {
    client: reqwest::Client,
    project_id: String,
    jwks_url: String,
    min_refresh: Duration,
    jwks: RwLock<Option<(JwkSet, Instant)>>,
}

impl FirebaseVerifier {
    pub fn new(config: &GoogleConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .context("build http client")?;
        Ok(Self {
            client,
            project_id: config.project_id.clone(),
            jwks_url: config.jwks_url.clone(),
            min_refresh: JWKS_MIN_REFRESH,
            jwks: RwLock::new(None),
        })
    }

    fn issuer(&self) -> String {
        format!("https://securetoken.google.com/{}", self.project_id)
    }

    async fn fetch(&self) -> anyhow::Result<JwkSet> {
        let set: JwkSet = self
            .client
            .get(&self.jwks_url)
            .send()
            .await
            .context("fetch jwks")?
            .error_for_status()
            .context("jwks status")?
            .json()
            .await
            .context("decode jwks")?;
        debug!(keys = set.keys.len(), "jwks refreshed");
        Ok(set)
    }

    async fn cached_keys(&self) -> anyhow::Result<JwkSet> {
        if let Some((set, fetched_at)) = self.jwks.read().await.as_ref() {
            if fetched_at.elapsed() < JWKS_TTL {
                return Ok(set.clone());
            }
        }

        let mut cache = self.jwks.write().await;
        if let Some((set, fetched_at)) = cache.as_ref() {
            if fetched_at.elapsed() < JWKS_TTL {
                return Ok(set.clone());
            }
        }
        let set = self.fetch().await?;
        *cache = Some((set.clone(), Instant::now()));
        Ok(set)
    }

    /// Refetch for a `kid` missing from the cache, at most once per `min_refresh`.
    /// `None` means the cache is too recent to be refetched.
    async fn refreshed_keys(&self) -> anyhow::Result<Option<JwkSet>> {
        let mut cache = self.jwks.write().await;
        if let Some((_, fetched_at)) = cache.as_ref() {
            if fetched_at.elapsed() < self.min_refresh {
                return Ok(None);
            }
        }
        let set = self.fetch().await?;
        *cache = Some((set.clone(), Instant::now()));
        Ok(Some(set))
    }
}

#[async_trait]
impl IdentityVerifier for FirebaseVerifier {
    async fn verify(&self, token: &str) -> anyhow::Result<FederatedIdentity> {
        let header = decode_header(token).context("decode token header")?;
        anyhow::ensure!(header.alg == Algorithm::RS256, "unexpected alg {:?}", header.alg);
        let kid = header.kid.context("token has no kid")?;

        // The kid is unverified here; an unknown one refetches at most once per `min_refresh`.
        let mut set = self.cached_keys().await?;
        if set.find(&kid).is_none() {
            match self.refreshed_keys().await? {
                Some(fresh) => set = fresh,
                None => debug!(%kid, "unknown kid, jwks refreshed too recently"),
            }
        }
        let jwk = set.find(&kid).context("unknown signing key")?;
        let key = DecodingKey::from_jwk(jwk).context("build decoding key")?;

        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_audience(std::slice::from_ref(&self.project_id));
        validation.set_issuer(&[self.issuer()]);
        let data = decode::<FirebaseClaims>(token, &key, &validation)?;

        let email = data
            .claims
            .email
            .filter(|e| !e.is_empty())
            .context("token has no email")?;
        Ok(FederatedIdentity {
            email,
            name: data.claims.name,
            picture: data.claims.picture,
        })
    }
}

/// Swap the default 96px size token in a Google avatar URL for a larger one.
pub fn normalize_picture(picture: &str) -> String {
    picture.replace("s96-c", "s384-c")
}
