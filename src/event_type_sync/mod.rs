//! # Event Type Sync
//!
//! Reconciles a coach's Cal.com event types with the local `cal_event_types`
//! mirror. [`plan::plan`] computes the diff; [`EventTypeSyncService::sync`]
//! applies it inside one transaction with a savepoint per action, so a failed
//! action only rolls back itself while an unexpected fault rolls back the batch.

pub mod plan;

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use metrics::{counter, histogram};
use sea_orm::{DatabaseConnection, DatabaseTransaction, DbErr, TransactionTrait};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::cal::{CalClient, RemoteEventType};
use crate::repositories::event_type::EventTypeOwner;
use crate::repositories::{CalendarIntegrationRepository, EventTypeRepository};
use crate::token_refresh::{TokenRefreshError, TokenRefreshService};

pub use plan::{SyncAction, SyncPlan, plan};

/// Aggregate outcome of one reconciliation run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct SyncReport {
    pub fetched: usize,
    pub created: usize,
    pub updated: usize,
    pub deactivated: usize,
    pub deleted: usize,
    pub skipped: usize,
    /// Actions that failed and were rolled back individually
    pub failed: usize,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SyncReport {
    fn record(&mut self, action: &SyncAction) {
        match action {
            SyncAction::Create { .. } => self.created += 1,
            SyncAction::Update { .. } => self.updated += 1,
            SyncAction::Deactivate { .. } => self.deactivated += 1,
            SyncAction::Delete { .. } => self.deleted += 1,
        }
    }

    /// Discards counts of applied actions after the batch was rolled back
    fn rolled_back(mut self, error: String) -> Self {
        self.failed += self.created + self.updated + self.deactivated + self.deleted;
        self.created = 0;
        self.updated = 0;
        self.deactivated = 0;
        self.deleted = 0;
        self.success = false;
        self.error = Some(error);
        self
    }
}

#[derive(Debug, Error)]
pub enum EventTypeSyncError {
    #[error("calendar integration '{0}' not found")]
    IntegrationNotFound(Uuid),

    #[error("calendar integration '{integration_id}' does not belong to user '{user_id}'")]
    IntegrationOwnership { integration_id: Uuid, user_id: Uuid },

    #[error("failed to fetch remote event types: {0}")]
    RemoteFetch(#[source] TokenRefreshError),

    #[error("failed to load local event types: {0:#}")]
    LocalFetch(anyhow::Error),
}

/// Parameters of one reconciliation run
#[derive(Debug, Clone)]
pub struct SyncRequest {
    pub user_id: Uuid,
    pub calendar_integration_id: Uuid,
    /// Pre-fetched remote list; empty means fetch from Cal.com
    pub remote: Vec<RemoteEventType>,
    /// Overrides the configured delete-missing behaviour
    pub delete_missing: Option<bool>,
}

#[derive(Debug, Clone)]
pub struct EventTypeSyncService {
    db: Arc<DatabaseConnection>,
    cal: CalClient,
    integrations: CalendarIntegrationRepository,
    tokens: TokenRefreshService,
    delete_missing_default: bool,
}

impl EventTypeSyncService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        cal: CalClient,
        integrations: CalendarIntegrationRepository,
        tokens: TokenRefreshService,
        delete_missing_default: bool,
    ) -> Self {
        Self {
            db,
            cal,
            integrations,
            tokens,
            delete_missing_default,
        }
    }

    #[instrument(
        skip_all,
        fields(user_id = %request.user_id, integration_id = %request.calendar_integration_id)
    )]
    pub async fn sync(&self, request: SyncRequest) -> Result<SyncReport, EventTypeSyncError> {
        let started = Instant::now();
        let integration_id = request.calendar_integration_id;
        let delete_missing = request.delete_missing.unwrap_or(self.delete_missing_default);

        let integration = self
            .integrations
            .get_by_id(integration_id)
            .await
            .map_err(EventTypeSyncError::LocalFetch)?
            .ok_or(EventTypeSyncError::IntegrationNotFound(integration_id))?;
        if integration.user_id != request.user_id {
            return Err(EventTypeSyncError::IntegrationOwnership {
                integration_id,
                user_id: request.user_id,
            });
        }

        let remote = if request.remote.is_empty() {
            let cal = &self.cal;
            self.tokens
                .execute(integration_id, |token| async move {
                    cal.list_event_types(&token).await
                })
                .await
                .map_err(EventTypeSyncError::RemoteFetch)?
        } else {
            request.remote
        };

        let local = EventTypeRepository::list_for_integration_with(&*self.db, integration_id)
            .await
            .map_err(EventTypeSyncError::LocalFetch)?;

        let diff = plan(&remote, &local, delete_missing);
        let mut report = SyncReport {
            fetched: remote.len(),
            skipped: diff.skipped,
            ..SyncReport::default()
        };

        info!(
            fetched = report.fetched,
            local = local.len(),
            actions = diff.actions.len(),
            skipped = diff.skipped,
            delete_missing,
            "Planned event type sync"
        );

        let owner = EventTypeOwner {
            user_id: integration.user_id,
            calendar_integration_id: integration_id,
        };

        let report = match self.apply(owner, diff.actions, &mut report).await {
            Ok(()) => {
                report.success = true;
                report
            }
            Err(err) => {
                error!(error = %err, "Event type sync aborted, batch rolled back");
                counter!("event_type_sync_runs_total", "outcome" => "aborted").increment(1);
                report.rolled_back(err.to_string())
            }
        };

        if report.success {
            counter!("event_type_sync_runs_total", "outcome" => "success").increment(1);
        }
        histogram!("event_type_sync_duration_seconds").record(started.elapsed().as_secs_f64());

        info!(
            created = report.created,
            updated = report.updated,
            deactivated = report.deactivated,
            deleted = report.deleted,
            skipped = report.skipped,
            failed = report.failed,
            success = report.success,
            "Event type sync finished"
        );

        Ok(report)
    }

    /// Applies the actions in one transaction. Errors returned from here are
    /// transaction-level faults; per-action failures are counted in `report`.
    async fn apply(
        &self,
        owner: EventTypeOwner,
        actions: Vec<SyncAction>,
        report: &mut SyncReport,
    ) -> Result<(), DbErr> {
        let txn = self.db.begin().await?;

        for action in actions {
            let kind = action.kind();
            let cal_event_type_id = action.cal_event_type_id();
            let savepoint = txn.begin().await?;

            match apply_action(&savepoint, owner, &action).await {
                Ok(()) => {
                    savepoint.commit().await?;
                    report.record(&action);
                    counter!("event_type_sync_actions_total", "action" => kind, "outcome" => "applied")
                        .increment(1);
                }
                Err(err) => {
                    savepoint.rollback().await?;
                    report.failed += 1;
                    warn!(
                        action = kind,
                        cal_event_type_id = ?cal_event_type_id,
                        error = %err,
                        "Event type sync action failed"
                    );
                    counter!("event_type_sync_actions_total", "action" => kind, "outcome" => "failed")
                        .increment(1);
                }
            }
        }

        CalendarIntegrationRepository::mark_synced(&txn, owner.calendar_integration_id, Utc::now())
            .await
            .map_err(|e| DbErr::Custom(format!("failed to stamp last sync: {e:#}")))?;

        txn.commit().await
    }
}

async fn apply_action(
    conn: &DatabaseTransaction,
    owner: EventTypeOwner,
    action: &SyncAction,
) -> anyhow::Result<()> {
    match action {
        SyncAction::Create {
            cal_event_type_id,
            is_default,
            fields,
        } => {
            EventTypeRepository::insert_with(
                conn,
                owner,
                Some(*cal_event_type_id),
                *is_default,
                fields.clone(),
            )
            .await?;
        }
        SyncAction::Update {
            local,
            changed,
            fields,
        } => {
            tracing::debug!(event_type_id = %local.id, ?changed, "Updating event type");
            EventTypeRepository::update_with(conn, local.clone(), fields.clone()).await?;
        }
        SyncAction::Deactivate { local } => {
            EventTypeRepository::set_active_with(conn, local.clone(), false).await?;
        }
        SyncAction::Delete { local } => {
            EventTypeRepository::delete_with(conn, local).await?;
        }
    }
    Ok(())
}
