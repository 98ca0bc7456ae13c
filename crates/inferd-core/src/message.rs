//! Inter-agent message type.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::data::AgentData;

/// A point-to-point or broadcast message between agents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentMessage {
    pub id: Uuid,
    pub from_agent: String,
    pub to_agent: String,
    pub msg_type: String,
    pub payload: AgentData,
    pub timestamp: DateTime<Utc>,
    pub priority: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<Uuid>,
}

impl AgentMessage {
    #[must_use]
    pub fn new(
        from_agent: impl Into<String>,
        to_agent: impl Into<String>,
        msg_type: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            from_agent: from_agent.into(),
            to_agent: to_agent.into(),
            msg_type: msg_type.into(),
            payload: AgentData::new(),
            timestamp: Utc::now(),
            priority: 0,
            correlation_id: None,
        }
    }

    #[must_use]
    pub fn with_payload(mut self, payload: AgentData) -> Self {
        self.payload = payload;
        self
    }

    #[must_use]
    pub fn with_correlation(mut self, correlation_id: Uuid) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }
}
