//! New-log notifications: logs that other family members wrote for a child
//! after the reader's last-read time.

use anyhow::Result;
use chrono::{DateTime, Utc};
use shared::{LogNotification, NotificationsResponse, ObservationLog, RecordId};
use tracing::{debug, warn};

use super::access_resolver::AccessResolver;
use super::session::SessionContext;
use crate::storage::collections::{LastRead, Logs};
use crate::storage::RecordStore;

const PREVIEW_CHARS: usize = 10;
const UNKNOWN_SENDER: &str = "Family";

fn parse_time(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw).ok().map(|dt| dt.with_timezone(&Utc))
}

fn to_notification(log: ObservationLog) -> LogNotification {
    let mut preview: String = log.text.chars().take(PREVIEW_CHARS).collect();
    if log.text.chars().count() > PREVIEW_CHARS {
        preview.push_str("...");
    }
    LogNotification {
        id: format!("noti_{}", log.id),
        sender_name: log.author_name.clone().unwrap_or_else(|| UNKNOWN_SENDER.to_string()),
        preview,
        created_at: log.created_at.clone(),
        log,
    }
}

#[derive(Clone)]
pub struct NotificationService {
    store: RecordStore,
    access: AccessResolver,
}

impl NotificationService {
    pub fn new(store: RecordStore, access: AccessResolver) -> Self {
        Self { store, access }
    }

    /// Logs of the child written by someone else after the user's last-read
    /// time, newest first. Logs without an author count as someone else's.
    pub async fn new_logs(&self, ctx: &SessionContext, child_id: &RecordId) -> Result<NotificationsResponse> {
        if !self.access.can_access(ctx.user_id(), child_id).await? {
            warn!("User {} cannot read notifications of child {}", ctx.user_id(), child_id);
            return Ok(NotificationsResponse {
                unread_count: 0,
                notifications: Vec::new(),
            });
        }

        let last_read = self
            .store
            .find::<LastRead, _>(ctx.user_id())
            .await?
            .and_then(|raw| parse_time(&raw))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);

        let mut fresh: Vec<(DateTime<Utc>, ObservationLog)> = self
            .store
            .read::<Logs>()
            .await?
            .into_iter()
            .filter(|log| &log.child_id == child_id)
            .filter(|log| log.author_id.as_deref() != Some(ctx.user_id()))
            .filter_map(|log| parse_time(&log.created_at).map(|at| (at, log)))
            .filter(|(at, _)| *at > last_read)
            .collect();
        fresh.sort_by(|a, b| b.0.cmp(&a.0));

        let notifications: Vec<LogNotification> = fresh.into_iter().map(|(_, log)| to_notification(log)).collect();
        debug!("{} unread family logs for {}", notifications.len(), ctx.user_id());
        Ok(NotificationsResponse {
            unread_count: notifications.len(),
            notifications,
        })
    }

    /// Mark everything up to now as read
    pub async fn mark_read(&self, ctx: &SessionContext) -> Result<()> {
        self.store
            .put::<LastRead, _>(ctx.user_id(), Utc::now().to_rfc3339())
            .await
    }
}
