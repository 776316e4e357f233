//! # Token Refresh
//!
//! Every Cal.com call made with a managed user's access token goes through
//! [`TokenRefreshService::execute`]: load the integration, refresh ahead of an
//! imminent expiry, run the call, and on the expired-token status refresh and
//! retry once. There is no backoff and no background loop. A single `execute`
//! retries at most once; the proactive refresh does not use up that retry.

use std::future::Future;

use chrono::{Duration, Utc};
use metrics::counter;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::cal::{CalClient, CalError, CalTokens};
use crate::models::calendar_integration;
use crate::repositories::CalendarIntegrationRepository;

#[derive(Debug, Error)]
pub enum TokenRefreshError {
    #[error("calendar integration '{0}' not found")]
    IntegrationNotFound(Uuid),

    #[error("calendar integration '{0}' has no stored access token")]
    MissingAccessToken(Uuid),

    #[error("calendar integration '{0}' cannot be refreshed: no refresh token or managed user")]
    NotRefreshable(Uuid),

    #[error(transparent)]
    Cal(#[from] CalError),

    #[error("token storage failed: {0:#}")]
    Storage(anyhow::Error),
}

#[derive(Debug, Clone)]
pub struct TokenRefreshService {
    cal: CalClient,
    integrations: CalendarIntegrationRepository,
    lead_time: Duration,
}

impl TokenRefreshService {
    pub fn new(
        cal: CalClient,
        integrations: CalendarIntegrationRepository,
        lead_time_seconds: u64,
    ) -> Self {
        Self {
            cal,
            integrations,
            lead_time: Duration::seconds(i64::try_from(lead_time_seconds).unwrap_or(i64::MAX)),
        }
    }

    /// Runs `op` with the integration's access token.
    ///
    /// `op` is invoked at most twice: once with the current token and, only if
    /// Cal.com reports the token expired, once more with a refreshed token. The
    /// second outcome is returned whatever it is.
    #[instrument(skip_all, fields(integration_id = %integration_id))]
    pub async fn execute<T, F, Fut>(&self, integration_id: Uuid, op: F) -> Result<T, TokenRefreshError>
    where
        F: Fn(String) -> Fut,
        Fut: Future<Output = Result<T, CalError>>,
    {
        let mut integration = self
            .integrations
            .get_by_id(integration_id)
            .await
            .map_err(TokenRefreshError::Storage)?
            .ok_or(TokenRefreshError::IntegrationNotFound(integration_id))?;

        if integration.access_token_expires_within(Utc::now(), self.lead_time) {
            debug!("Access token expires within lead time, refreshing before the call");
            match self.refresh(&integration).await {
                Ok(updated) => integration = updated,
                Err(err) => {
                    warn!(error = %err, "Proactive token refresh failed, using current token");
                }
            }
        }

        let token = self.access_token(&integration)?;
        match op(token).await {
            Ok(value) => Ok(value),
            Err(err) if err.is_access_token_expired() => {
                info!("Cal.com reported an expired access token, refreshing and retrying once");
                counter!("cal_token_expired_retries_total").increment(1);
                let integration = self.refresh(&integration).await?;
                let token = self.access_token(&integration)?;
                op(token).await.map_err(TokenRefreshError::from)
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Obtains and stores a new token pair for `integration`.
    ///
    /// Uses the stored refresh token; when it is missing, expired or rejected
    /// and the integration belongs to a managed user, falls back to a forced
    /// refresh with the platform client credentials.
    #[instrument(skip_all, fields(integration_id = %integration.id))]
    pub async fn refresh(
        &self,
        integration: &calendar_integration::Model,
    ) -> Result<calendar_integration::Model, TokenRefreshError> {
        let stored = self
            .integrations
            .decrypt_tokens(integration)
            .map_err(TokenRefreshError::Storage)?;

        let refresh_token_expired = integration
            .refresh_token_expires_at
            .is_some_and(|expires_at| expires_at.with_timezone(&Utc) <= Utc::now());

        let issued = match stored.refresh_token {
            Some(refresh_token) if !refresh_token_expired => {
                match self.cal.refresh_tokens(&refresh_token).await {
                    Ok(tokens) => {
                        counter!("cal_token_refresh_total", "mode" => "refresh_token", "outcome" => "success")
                            .increment(1);
                        tokens
                    }
                    Err(err) if refresh_token_rejected(&err) => {
                        warn!(error = %err, "Refresh token rejected by Cal.com");
                        self.force_refresh(integration).await?
                    }
                    Err(err) => {
                        counter!("cal_token_refresh_total", "mode" => "refresh_token", "outcome" => "failure")
                            .increment(1);
                        return Err(err.into());
                    }
                }
            }
            _ => self.force_refresh(integration).await?,
        };

        let updated = self
            .integrations
            .store_tokens(integration.id, &issued)
            .await
            .map_err(TokenRefreshError::Storage)?;

        info!(
            access_token_expires_at = ?issued.access_token_expires_at,
            "Stored refreshed Cal.com tokens"
        );
        Ok(updated)
    }

    async fn force_refresh(
        &self,
        integration: &calendar_integration::Model,
    ) -> Result<CalTokens, TokenRefreshError> {
        let managed_user_id = integration
            .cal_managed_user_id
            .ok_or(TokenRefreshError::NotRefreshable(integration.id))?;

        let result = self.cal.force_refresh(managed_user_id).await;
        let outcome = if result.is_ok() { "success" } else { "failure" };
        counter!("cal_token_refresh_total", "mode" => "force", "outcome" => outcome).increment(1);
        Ok(result?)
    }

    fn access_token(
        &self,
        integration: &calendar_integration::Model,
    ) -> Result<String, TokenRefreshError> {
        self.integrations
            .decrypt_tokens(integration)
            .map_err(TokenRefreshError::Storage)?
            .access_token
            .ok_or(TokenRefreshError::MissingAccessToken(integration.id))
    }
}

fn refresh_token_rejected(err: &CalError) -> bool {
    matches!(
        err,
        CalError::Unauthorized { .. } | CalError::Http { status: 400, .. }
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_credential_rejections_trigger_forced_refresh() {
        assert!(refresh_token_rejected(&CalError::Unauthorized {
            status: 401,
            body: String::new()
        }));
        assert!(refresh_token_rejected(&CalError::Http {
            status: 400,
            body: String::new()
        }));
        assert!(!refresh_token_rejected(&CalError::Http {
            status: 500,
            body: String::new()
        }));
        assert!(!refresh_token_rejected(&CalError::AccessTokenExpired));
    }
}
