/// Security event recorder
///
/// Appends one audit entry per session lifecycle transition. The log is
/// read-only for everything else (the profile security view lists the most
/// recent entries). An append failure is logged at error level and never
/// changes the outcome of the transition it describes.

use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::error::AppError;
use crate::store::{bounded, SecurityEvent, SecurityEventKind, SecurityEventStore};

/// Number of events shown by the security view
pub const RECENT_EVENTS_LIMIT: i64 = 5;

#[derive(Clone)]
pub struct SecurityEventRecorder {
    store: Arc<dyn SecurityEventStore>,
    timeout: Duration,
}

impl SecurityEventRecorder {
    pub fn new(store: Arc<dyn SecurityEventStore>, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    pub async fn record(
        &self,
        kind: SecurityEventKind,
        user_id: Uuid,
        session_id: Option<Uuid>,
        message: impl Into<String>,
    ) {
        let event = SecurityEvent::new(kind, user_id, session_id, message);

        tracing::info!(
            event = %event.kind,
            user_id = %event.user_id,
            session_id = ?event.session_id,
            "Security event"
        );

        if let Err(e) = bounded(self.timeout, "append_security_event", self.store.append(&event)).await
        {
            tracing::error!(
                event = %event.kind,
                event_id = %event.id,
                user_id = %event.user_id,
                error = %e,
                "Failed to persist security event"
            );
        }
    }

    /// Most recent events for a user, newest first
    pub async fn recent(&self, user_id: Uuid) -> Result<Vec<SecurityEvent>, AppError> {
        bounded(
            self.timeout,
            "recent_security_events",
            self.store.recent_for_user(user_id, RECENT_EVENTS_LIMIT),
        )
        .await
    }
}
