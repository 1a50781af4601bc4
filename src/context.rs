//! Request Context
//!
//! Already-resolved actor and tenant identity, threaded explicitly through
//! every governance call. Never ambient state.

use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct RequestContext {
    pub organization_id: Uuid,
    /// None for system-initiated operations (e.g. seed jobs).
    pub actor_id: Option<Uuid>,
    pub correlation_id: String,
}

impl RequestContext {
    pub fn new(organization_id: Uuid, actor_id: Uuid) -> Self {
        Self {
            organization_id,
            actor_id: Some(actor_id),
            correlation_id: Uuid::new_v4().to_string(),
        }
    }

    pub fn system(organization_id: Uuid) -> Self {
        Self {
            organization_id,
            actor_id: None,
            correlation_id: Uuid::new_v4().to_string(),
        }
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = correlation_id.into();
        self
    }

    /// Actor id as stored in audit rows: empty string when system-initiated.
    pub fn actor_str(&self) -> String {
        self.actor_id.map(|id| id.to_string()).unwrap_or_default()
    }
}
