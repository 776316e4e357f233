//! Pure diff between the remote event type list and the local mirror.
//!
//! Nothing here touches the database or the network; [`plan`] turns two lists
//! into the ordered actions the reconciler applies.

use std::collections::{HashMap, HashSet};

use serde_json::Value as JsonValue;

use crate::cal::RemoteEventType;
use crate::models::cal_event_type::{self, EventTypeFields, SchedulingType};

/// Metadata key Cal.com event types use to mark marketplace defaults
pub const METADATA_IS_DEFAULT: &str = "isDefault";
/// Metadata key overriding the derived scheduling type
pub const METADATA_SCHEDULING_TYPE: &str = "schedulingType";
/// Metadata key carrying the discount configuration
pub const METADATA_DISCOUNT: &str = "discount";

#[derive(Debug, Clone, PartialEq)]
pub enum SyncAction {
    Create {
        cal_event_type_id: i64,
        is_default: bool,
        fields: EventTypeFields,
    },
    Update {
        local: cal_event_type::Model,
        changed: Vec<&'static str>,
        fields: EventTypeFields,
    },
    Deactivate {
        local: cal_event_type::Model,
    },
    Delete {
        local: cal_event_type::Model,
    },
}

impl SyncAction {
    pub fn kind(&self) -> &'static str {
        match self {
            SyncAction::Create { .. } => "create",
            SyncAction::Update { .. } => "update",
            SyncAction::Deactivate { .. } => "deactivate",
            SyncAction::Delete { .. } => "delete",
        }
    }

    pub fn cal_event_type_id(&self) -> Option<i64> {
        match self {
            SyncAction::Create {
                cal_event_type_id, ..
            } => Some(*cal_event_type_id),
            SyncAction::Update { local, .. }
            | SyncAction::Deactivate { local }
            | SyncAction::Delete { local } => local.cal_event_type_id,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncPlan {
    pub actions: Vec<SyncAction>,
    /// Records that need no change
    pub skipped: usize,
}

/// Computes the actions that bring `local` in line with `remote`.
///
/// Local records without a remote id are never matched, deactivated or deleted.
/// Default records are only ever deactivated. Remote duplicates of an id are
/// ignored after the first occurrence.
pub fn plan(
    remote: &[RemoteEventType],
    local: &[cal_event_type::Model],
    delete_missing: bool,
) -> SyncPlan {
    let local_by_remote_id: HashMap<i64, &cal_event_type::Model> = local
        .iter()
        .filter_map(|record| record.cal_event_type_id.map(|id| (id, record)))
        .collect();

    let mut result = SyncPlan::default();
    let mut seen = HashSet::new();

    for remote_record in remote {
        if !seen.insert(remote_record.id) {
            continue;
        }

        match local_by_remote_id.get(&remote_record.id) {
            Some(existing) => {
                let current = EventTypeFields::of(existing);
                let desired = fields_from_remote(remote_record, Some(existing));
                let changed = current.changed_fields(&desired);
                if changed.is_empty() {
                    result.skipped += 1;
                } else {
                    result.actions.push(SyncAction::Update {
                        local: (*existing).clone(),
                        changed,
                        fields: desired,
                    });
                }
            }
            None => result.actions.push(SyncAction::Create {
                cal_event_type_id: remote_record.id,
                is_default: remote_is_default(remote_record),
                fields: fields_from_remote(remote_record, None),
            }),
        }
    }

    for record in local {
        let Some(remote_id) = record.cal_event_type_id else {
            continue;
        };
        if seen.contains(&remote_id) {
            continue;
        }

        if delete_missing && !record.is_default {
            result.actions.push(SyncAction::Delete {
                local: record.clone(),
            });
        } else if record.is_active {
            result.actions.push(SyncAction::Deactivate {
                local: record.clone(),
            });
        } else {
            result.skipped += 1;
        }
    }

    result
}

/// Maps a remote event type onto local fields.
///
/// Values Cal.com leaves unset fall back to the existing local value where one
/// exists, so an unchanged remote record never produces an update.
pub fn fields_from_remote(
    remote: &RemoteEventType,
    existing: Option<&cal_event_type::Model>,
) -> EventTypeFields {
    let price = remote.price.filter(|price| *price > 0);

    EventTypeFields {
        name: remote.title.clone(),
        description: remote.description.clone(),
        slug: remote.slug.clone(),
        duration_minutes: remote.length_in_minutes,
        is_free: price.is_none(),
        price,
        currency: price.and(remote.currency.clone()),
        is_active: !remote.hidden,
        scheduling_type: scheduling_type_of(remote),
        position: remote
            .position
            .or(existing.map(|record| record.position))
            .unwrap_or(0),
        minimum_booking_notice: remote.minimum_booking_notice.unwrap_or(0),
        max_participants: remote.seats.as_ref().map(|seats| seats.seats_per_time_slot),
        discount: metadata_value(remote, METADATA_DISCOUNT),
        locations: remote.locations.clone(),
        metadata: remote.metadata.clone(),
    }
}

pub fn remote_is_default(remote: &RemoteEventType) -> bool {
    metadata_value(remote, METADATA_IS_DEFAULT)
        .and_then(|value| value.as_bool())
        .unwrap_or(false)
}

/// Explicit metadata wins; otherwise seated events are group sessions.
pub fn scheduling_type_of(remote: &RemoteEventType) -> SchedulingType {
    let from_metadata = metadata_value(remote, METADATA_SCHEDULING_TYPE)
        .and_then(|value| value.as_str().map(str::to_ascii_uppercase))
        .and_then(|value| match value.as_str() {
            "ONE_ON_ONE" => Some(SchedulingType::OneOnOne),
            "OFFICE_HOURS" => Some(SchedulingType::OfficeHours),
            "GROUP_SESSION" => Some(SchedulingType::GroupSession),
            _ => None,
        });

    from_metadata.unwrap_or_else(|| match &remote.seats {
        Some(seats) if seats.seats_per_time_slot > 1 => SchedulingType::GroupSession,
        _ => SchedulingType::OneOnOne,
    })
}

fn metadata_value(remote: &RemoteEventType, key: &str) -> Option<JsonValue> {
    remote
        .metadata
        .as_ref()
        .and_then(|metadata| metadata.get(key))
        .filter(|value| !value.is_null())
        .cloned()
}
