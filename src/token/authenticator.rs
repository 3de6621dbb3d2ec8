use std::time::{Instant, SystemTime};

use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::{debug, error, warn};

use crate::config::{Credentials, ServiceAccountKey};
use crate::errors::Error;
use crate::telemetry::{RefreshReason, RefreshTelemetry};

use super::{RefreshPolicy, TokenEnvelope, crypto};

const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const DEFAULT_EXPIRES_IN: u64 = 3600;

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
    #[serde(default)]
    token_type: Option<String>,
}

/// Hands out bearer tokens, refreshing service-account tokens before they expire.
pub struct Authenticator {
    http: Client,
    credentials: Credentials,
    policy: RefreshPolicy,
    envelope: Option<TokenEnvelope>,
}

impl Authenticator {
    pub fn new(http: Client, credentials: Credentials) -> Self {
        Self {
            http,
            credentials,
            policy: RefreshPolicy::default(),
            envelope: None,
        }
    }

    pub fn with_policy(mut self, policy: RefreshPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Whether a rejected token can be replaced by a fresh one.
    pub fn can_refresh(&self) -> bool {
        matches!(self.credentials, Credentials::ServiceAccount(_))
    }

    pub async fn bearer(&mut self) -> Result<String, Error> {
        let reason = match (&self.credentials, &self.envelope) {
            (Credentials::AccessToken(token), _) => return Ok(token.clone()),
            (Credentials::ServiceAccount(_), None) => RefreshReason::Initial,
            (Credentials::ServiceAccount(_), Some(env)) => {
                if !self.policy.should_refresh(env, SystemTime::now()) {
                    return Ok(env.value().to_string());
                }
                RefreshReason::Expiring
            }
        };
        self.refresh(reason).await
    }

    /// Replaces the current token after the server rejected it.
    pub async fn force_refresh(&mut self) -> Result<String, Error> {
        if !self.can_refresh() {
            return Err(Error::Auth(
                "Access token was rejected and cannot be refreshed".into(),
            ));
        }
        self.refresh(RefreshReason::Rejected).await
    }

    /// Handles an `UNAUTHENTICATED` reply to `operation`.
    ///
    /// The first rejection of a request refreshes the token so the caller can
    /// resend once. A second rejection, or any rejection of a token that cannot
    /// be refreshed, is `Error::Auth`.
    pub async fn on_unauthenticated(
        &mut self,
        operation: &str,
        detail: &str,
        already_refreshed: bool,
    ) -> Result<(), Error> {
        if already_refreshed || !self.can_refresh() {
            error!("{}: UNAUTHENTICATED: {}", operation, detail);
            return Err(Error::Auth(format!("{operation}: UNAUTHENTICATED: {detail}")));
        }
        warn!(
            "{}: UNAUTHENTICATED; refreshing token and resending",
            operation
        );
        self.force_refresh().await.map(|_| ())
    }

    async fn refresh(&mut self, reason: RefreshReason) -> Result<String, Error> {
        let Credentials::ServiceAccount(key) = &self.credentials else {
            return Err(Error::Auth("No refreshable credentials".into()));
        };
        let telemetry = RefreshTelemetry::new(key.client_email.clone(), reason);
        telemetry.emit_start();
        let started = Instant::now();
        match exchange_assertion(&self.http, key).await {
            Ok(envelope) => {
                telemetry.emit_success(envelope.lifetime(), started.elapsed());
                let value = envelope.value().to_string();
                self.envelope = Some(envelope);
                Ok(value)
            }
            Err(err) => {
                telemetry.emit_failure(&err);
                Err(err)
            }
        }
    }
}

async fn exchange_assertion(http: &Client, key: &ServiceAccountKey) -> Result<TokenEnvelope, Error> {
    let now = SystemTime::now();
    let assertion = crypto::build_assertion(key, now)?;
    let body = format!(
        "grant_type={}&assertion={}",
        urlencoding::encode(JWT_BEARER_GRANT),
        urlencoding::encode(&assertion)
    );
    let resp = http
        .post(&key.token_uri)
        .header("Content-Type", "application/x-www-form-urlencoded")
        .body(body)
        .send()
        .await?;

    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        error!("token exchange failed: status={} body='{}'", status, body);
        return Err(match status {
            StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                Error::Auth(format!("token exchange rejected ({status}): {body}"))
            }
            _ => Error::Http(status, body),
        });
    }

    let token: TokenResponse = resp.json().await?;
    debug!(
        "token exchange ok: type={:?} expires_in={:?}",
        token.token_type, token.expires_in
    );
    TokenEnvelope::from_expires_in(
        token.access_token,
        now,
        token.expires_in.unwrap_or(DEFAULT_EXPIRES_IN),
    )
}
