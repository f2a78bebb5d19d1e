use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

use super::identity::{TenantId, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    LoginSucceeded,
    LoginFailed,
    TokenRefreshed,
    TokenRevoked,
    UserTokensRevoked,
    TenantTokensRevoked,
    RefreshReuseDetected,
}

impl fmt::Display for AuditEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AuditEventType::LoginSucceeded => "login_succeeded",
            AuditEventType::LoginFailed => "login_failed",
            AuditEventType::TokenRefreshed => "token_refreshed",
            AuditEventType::TokenRevoked => "token_revoked",
            AuditEventType::UserTokensRevoked => "user_tokens_revoked",
            AuditEventType::TenantTokensRevoked => "tenant_tokens_revoked",
            AuditEventType::RefreshReuseDetected => "refresh_reuse_detected",
        };
        f.write_str(s)
    }
}

/// Security-relevant state change handed to the audit collaborator.
#[derive(Debug, Clone, Serialize)]
pub struct AuditEvent {
    pub event_type: AuditEventType,
    pub tenant_id: TenantId,
    pub user_id: Option<UserId>,
    pub actor: Option<String>,
    pub occurred_at: DateTime<Utc>,
    pub details: BTreeMap<String, String>,
}

impl AuditEvent {
    pub fn new(event_type: AuditEventType, tenant_id: TenantId) -> Self {
        Self {
            event_type,
            tenant_id,
            user_id: None,
            actor: None,
            occurred_at: Utc::now(),
            details: BTreeMap::new(),
        }
    }

    pub fn user(mut self, user_id: UserId) -> Self {
        self.user_id = Some(user_id);
        self
    }

    pub fn actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }

    pub fn detail(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.details.insert(key.into(), value.to_string());
        self
    }
}
