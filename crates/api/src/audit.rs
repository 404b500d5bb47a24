//! Audit events
//!
//! One typed [`AuditEvent`] per facade operation, handed to an injected
//! [`AuditSink`]. Credentials never reach the sink; the event only records
//! whether one was presented.

use std::sync::Mutex;

use fleetseat_shared::UserId;
use serde::Serialize;

/// Facade operations that produce audit records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    InviteUser,
    RespondToInvitation,
    RespondToInvitationByEmail,
    CreateSubscription,
    CancelSubscription,
    RefundAndCancel,
    DeleteCustomer,
    DeleteAccount,
    SignUp,
    SignIn,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::InviteUser => "invite_user",
            Operation::RespondToInvitation => "respond_to_invitation",
            Operation::RespondToInvitationByEmail => "respond_to_invitation_by_email",
            Operation::CreateSubscription => "create_subscription",
            Operation::CancelSubscription => "cancel_subscription",
            Operation::RefundAndCancel => "refund_and_cancel",
            Operation::DeleteCustomer => "delete_customer",
            Operation::DeleteAccount => "delete_account",
            Operation::SignUp => "sign_up",
            Operation::SignIn => "sign_in",
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Redacted stand-in for the bearer credential
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialMarker {
    Present,
    Absent,
}

impl CredentialMarker {
    pub fn of(credential: Option<&str>) -> Self {
        match credential {
            Some(c) if !c.trim().is_empty() => Self::Present,
            _ => Self::Absent,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuditEvent {
    pub operation: Operation,
    /// Resolved caller, when identification succeeded
    pub actor: Option<UserId>,
    pub credential: CredentialMarker,
    /// Envelope status code
    pub outcome: u16,
    pub message: String,
}

impl AuditEvent {
    pub fn succeeded(&self) -> bool {
        self.outcome == 200
    }
}

pub trait AuditSink: Send + Sync {
    fn record(&self, event: AuditEvent);
}

/// Writes audit events as structured `tracing` records
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, event: AuditEvent) {
        let actor = event.actor.map(|a| a.to_string()).unwrap_or_default();
        let credential = match event.credential {
            CredentialMarker::Present => "present",
            CredentialMarker::Absent => "absent",
        };
        if event.outcome >= 500 {
            tracing::error!(
                target: "fleetseat::audit",
                operation = %event.operation,
                actor = %actor,
                credential = credential,
                outcome = event.outcome,
                message = %event.message,
                "operation failed"
            );
        } else {
            tracing::info!(
                target: "fleetseat::audit",
                operation = %event.operation,
                actor = %actor,
                credential = credential,
                outcome = event.outcome,
                message = %event.message,
                "operation completed"
            );
        }
    }
}

/// Keeps events in memory
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    events: Mutex<Vec<AuditEvent>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn last(&self) -> Option<AuditEvent> {
        self.events().pop()
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, event: AuditEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credential_marker() {
        assert_eq!(CredentialMarker::of(Some("token")), CredentialMarker::Present);
        assert_eq!(CredentialMarker::of(Some("  ")), CredentialMarker::Absent);
        assert_eq!(CredentialMarker::of(None), CredentialMarker::Absent);
    }

    #[test]
    fn test_memory_sink_keeps_order() {
        let sink = MemoryAuditSink::new();
        for (operation, outcome) in [(Operation::SignIn, 200), (Operation::InviteUser, 403)] {
            sink.record(AuditEvent {
                operation,
                actor: None,
                credential: CredentialMarker::Present,
                outcome,
                message: String::new(),
            });
        }
        let last = sink.last();
        assert_eq!(last.as_ref().map(|e| e.operation), Some(Operation::InviteUser));
        assert!(!last.is_some_and(|e| e.succeeded()));
        assert_eq!(sink.events().len(), 2);
    }

    #[test]
    fn test_serialized_event_has_no_credential_value() {
        let event = AuditEvent {
            operation: Operation::DeleteAccount,
            actor: Some(UserId::new()),
            credential: CredentialMarker::Present,
            outcome: 200,
            message: "Account deleted".to_string(),
        };
        let json = serde_json::to_value(&event).unwrap_or_default();
        assert_eq!(json["credential"], "present");
        assert_eq!(json["operation"], "delete_account");
    }
}
