// Assignment notifications
//
// Assignment events are published fire-and-forget. Delivery failures are
// logged and never affect the assignment that triggered them.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::models::RequestStatus;
use crate::scheduling::types::AssignmentStrategy;

/// A service request was assigned to a team member
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssignmentEvent {
    pub tenant_id: Uuid,
    pub service_request_id: Uuid,
    pub team_member_id: Uuid,
    pub status: RequestStatus,
    pub assigned_at: DateTime<Utc>,
    /// `None` for system assignments
    pub assigned_by: Option<Uuid>,
    /// Set for automatic assignments
    pub strategy: Option<AssignmentStrategy>,
}

/// Event fan-out collaborator
#[async_trait]
pub trait Broadcaster: Send + Sync {
    async fn publish(&self, event: AssignmentEvent);
}

/// Publishes to an in-process broadcast channel
#[derive(Debug, Clone)]
pub struct ChannelBroadcaster {
    sender: broadcast::Sender<AssignmentEvent>,
}

impl ChannelBroadcaster {
    /// Create a broadcaster buffering `capacity` events per subscriber
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AssignmentEvent> {
        self.sender.subscribe()
    }
}

#[async_trait]
impl Broadcaster for ChannelBroadcaster {
    async fn publish(&self, event: AssignmentEvent) {
        let request_id = event.service_request_id;
        if self.sender.send(event).is_err() {
            tracing::debug!("No subscribers for assignment of request {}", request_id);
        }
    }
}

/// Writes events to the log only
#[derive(Debug, Clone, Copy, Default)]
pub struct LogBroadcaster;

#[async_trait]
impl Broadcaster for LogBroadcaster {
    async fn publish(&self, event: AssignmentEvent) {
        tracing::info!(
            "Request {} assigned to {} ({})",
            event.service_request_id,
            event.team_member_id,
            event.status
        );
    }
}
