//! Calendar integration repository
//!
//! Owns encryption of the Cal.com token pair. Callers only ever see plaintext
//! tokens through [`CalendarIntegrationRepository::decrypt_tokens`].

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, IntoActiveModel,
    QueryFilter, Set,
};
use std::sync::Arc;
use uuid::Uuid;

use crate::cal::CalTokens;
use crate::crypto::{CryptoKey, decrypt_token, encrypt_token, integration_aad};
use crate::models::calendar_integration::{self, Entity as CalendarIntegration, PROVIDER_CAL};

/// Plaintext token pair of an integration
#[derive(Clone, PartialEq, Eq)]
pub struct DecryptedTokens {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
}

impl std::fmt::Debug for DecryptedTokens {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecryptedTokens")
            .field("access_token", &self.access_token.as_ref().map(|_| "<redacted>"))
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Managed-user identity attached to an integration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagedIdentity {
    pub managed_user_id: i64,
    pub username: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CalendarIntegrationRepository {
    pub db: Arc<DatabaseConnection>,
    pub crypto_key: CryptoKey,
}

impl CalendarIntegrationRepository {
    pub fn new(db: Arc<DatabaseConnection>, crypto_key: CryptoKey) -> Self {
        Self { db, crypto_key }
    }

    pub async fn get_by_id(&self, id: Uuid) -> Result<Option<calendar_integration::Model>> {
        Ok(CalendarIntegration::find_by_id(id).one(&*self.db).await?)
    }

    pub async fn find_by_user(&self, user_id: Uuid) -> Result<Option<calendar_integration::Model>> {
        Ok(CalendarIntegration::find()
            .filter(calendar_integration::Column::UserId.eq(user_id))
            .one(&*self.db)
            .await?)
    }

    /// Creates the user's integration or replaces the identity and tokens of
    /// the existing one
    pub async fn upsert_for_user(
        &self,
        user_id: Uuid,
        identity: Option<ManagedIdentity>,
        tokens: &CalTokens,
    ) -> Result<calendar_integration::Model> {
        let now = Utc::now();

        if let Some(existing) = self.find_by_user(user_id).await? {
            let (access, refresh) =
                self.encrypt_pair(existing.user_id, &existing.provider, existing.id, tokens)?;
            let mut active = existing.into_active_model();
            if let Some(identity) = identity {
                active.cal_managed_user_id = Set(Some(identity.managed_user_id));
                active.cal_username = Set(identity.username);
            }
            active.access_token_ciphertext = Set(Some(access));
            active.refresh_token_ciphertext = Set(Some(refresh));
            active.access_token_expires_at = Set(tokens.access_token_expires_at.map(Into::into));
            active.refresh_token_expires_at = Set(tokens.refresh_token_expires_at.map(Into::into));
            active.updated_at = Set(now.into());
            return Ok(active.update(&*self.db).await?);
        }

        let id = Uuid::now_v7();
        let (access, refresh) = self.encrypt_pair(user_id, PROVIDER_CAL, id, tokens)?;

        let (managed_user_id, username) = match identity {
            Some(identity) => (Some(identity.managed_user_id), identity.username),
            None => (None, None),
        };

        let model = calendar_integration::ActiveModel {
            id: Set(id),
            user_id: Set(user_id),
            provider: Set(PROVIDER_CAL.to_string()),
            cal_managed_user_id: Set(managed_user_id),
            cal_username: Set(username),
            access_token_ciphertext: Set(Some(access)),
            refresh_token_ciphertext: Set(Some(refresh)),
            access_token_expires_at: Set(tokens.access_token_expires_at.map(Into::into)),
            refresh_token_expires_at: Set(tokens.refresh_token_expires_at.map(Into::into)),
            last_synced_at: Set(None),
            created_at: Set(now.into()),
            updated_at: Set(now.into()),
        };
        Ok(model.insert(&*self.db).await?)
    }

    /// Persists a freshly issued token pair
    pub async fn store_tokens(
        &self,
        integration_id: Uuid,
        tokens: &CalTokens,
    ) -> Result<calendar_integration::Model> {
        let existing = self
            .get_by_id(integration_id)
            .await?
            .ok_or_else(|| anyhow!("calendar integration '{}' not found", integration_id))?;

        let (access, refresh) =
            self.encrypt_pair(existing.user_id, &existing.provider, existing.id, tokens)?;
        let mut active = existing.into_active_model();
        active.access_token_ciphertext = Set(Some(access));
        active.refresh_token_ciphertext = Set(Some(refresh));
        active.access_token_expires_at = Set(tokens.access_token_expires_at.map(Into::into));
        active.refresh_token_expires_at = Set(tokens.refresh_token_expires_at.map(Into::into));
        active.updated_at = Set(Utc::now().into());

        Ok(active.update(&*self.db).await?)
    }

    pub fn decrypt_tokens(&self, integration: &calendar_integration::Model) -> Result<DecryptedTokens> {
        let aad = integration_aad(integration.user_id, &integration.provider, integration.id);
        let decrypt = |ciphertext: &Option<Vec<u8>>| -> Result<Option<String>> {
            ciphertext
                .as_deref()
                .map(|bytes| decrypt_token(&self.crypto_key, &aad, bytes))
                .transpose()
                .map_err(|e| {
                    tracing::error!(
                        integration_id = %integration.id,
                        user_id = %integration.user_id,
                        "Token decryption failed"
                    );
                    anyhow!("token decryption failed: {}", e)
                })
        };

        Ok(DecryptedTokens {
            access_token: decrypt(&integration.access_token_ciphertext)?,
            refresh_token: decrypt(&integration.refresh_token_ciphertext)?,
        })
    }

    /// Removes the integration bound to a Cal.com managed user, returning
    /// whether one existed
    pub async fn delete_by_managed_user(&self, managed_user_id: i64) -> Result<bool> {
        let result = CalendarIntegration::delete_many()
            .filter(calendar_integration::Column::CalManagedUserId.eq(managed_user_id))
            .exec(&*self.db)
            .await?;
        Ok(result.rows_affected > 0)
    }

    /// Stamps `last_synced_at`; runs on the caller's connection so it can join
    /// an open transaction
    pub async fn mark_synced<C: ConnectionTrait>(
        conn: &C,
        integration_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let active = calendar_integration::ActiveModel {
            id: Set(integration_id),
            last_synced_at: Set(Some(at.into())),
            updated_at: Set(at.into()),
            ..Default::default()
        };
        active.update(conn).await?;
        Ok(())
    }

    fn encrypt_pair(
        &self,
        user_id: Uuid,
        provider: &str,
        integration_id: Uuid,
        tokens: &CalTokens,
    ) -> Result<(Vec<u8>, Vec<u8>)> {
        let aad = integration_aad(user_id, provider, integration_id);
        let access = encrypt_token(&self.crypto_key, &aad, &tokens.access_token)
            .context("access token encryption failed")?;
        let refresh = encrypt_token(&self.crypto_key, &aad, &tokens.refresh_token)
            .context("refresh token encryption failed")?;
        Ok((access, refresh))
    }
}
