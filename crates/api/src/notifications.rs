//! Notification messages
//!
//! Transitions emit one-way [`Notification`]s after their writes succeed.
//! Delivery belongs to a [`NotificationDispatcher`]; a dispatch failure is
//! logged and never undoes the transition that produced it.

use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sqlx::PgPool;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::email::ResendMailer;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "template", rename_all = "snake_case")]
pub enum Notification {
    /// Invitation to an email with no account yet
    InviteUnregistered {
        recipient: String,
        fleet_name: String,
        owner_email: String,
    },
    /// Invitation to an existing account
    InviteRegistered {
        recipient: String,
        fleet_name: String,
        owner_email: String,
    },
    /// Sent to the fleet owner
    InvitationAccepted {
        owner_email: String,
        driver_email: String,
        fleet_name: String,
    },
    /// Sent to the fleet owner
    InvitationRejected {
        owner_email: String,
        driver_email: String,
        fleet_name: String,
    },
}

impl Notification {
    pub fn template_key(&self) -> &'static str {
        match self {
            Notification::InviteUnregistered { .. } => "invite-unregistered",
            Notification::InviteRegistered { .. } => "invite-registered",
            Notification::InvitationAccepted { .. } => "invitation-accepted",
            Notification::InvitationRejected { .. } => "invitation-rejected",
        }
    }

    pub fn recipient(&self) -> &str {
        match self {
            Notification::InviteUnregistered { recipient, .. }
            | Notification::InviteRegistered { recipient, .. } => recipient,
            Notification::InvitationAccepted { owner_email, .. }
            | Notification::InvitationRejected { owner_email, .. } => owner_email,
        }
    }

    pub fn template_data(&self) -> Value {
        match self {
            Notification::InviteUnregistered {
                fleet_name,
                owner_email,
                ..
            }
            | Notification::InviteRegistered {
                fleet_name,
                owner_email,
                ..
            } => json!({ "fleet_name": fleet_name, "owner_email": owner_email }),
            Notification::InvitationAccepted {
                driver_email,
                fleet_name,
                ..
            }
            | Notification::InvitationRejected {
                driver_email,
                fleet_name,
                ..
            } => json!({ "fleet_name": fleet_name, "driver_email": driver_email }),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("Failed to enqueue notification: {0}")]
    Enqueue(String),
    #[error("Notification channel closed")]
    Closed,
}

#[async_trait]
pub trait NotificationDispatcher: Send + Sync {
    async fn dispatch(&self, notification: Notification) -> Result<(), DispatchError>;
}

/// Dispatch and log failures. The caller's operation result is unaffected.
pub async fn dispatch_best_effort(
    dispatcher: &dyn NotificationDispatcher,
    notification: Notification,
) {
    let template_key = notification.template_key();
    let recipient = notification.recipient().to_string();
    if let Err(e) = dispatcher.dispatch(notification).await {
        tracing::warn!(
            template_key = %template_key,
            recipient = %recipient,
            error = %e,
            "Failed to dispatch notification"
        );
    }
}

/// Writes messages to `notification_outbox` for the worker to deliver
#[derive(Clone)]
pub struct OutboxDispatcher {
    pool: PgPool,
}

impl OutboxDispatcher {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl NotificationDispatcher for OutboxDispatcher {
    async fn dispatch(&self, notification: Notification) -> Result<(), DispatchError> {
        sqlx::query(
            r#"
            INSERT INTO notification_outbox (id, template_key, recipient, template_data)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(notification.template_key())
        .bind(notification.recipient())
        .bind(notification.template_data())
        .execute(&self.pool)
        .await
        .map_err(|e| DispatchError::Enqueue(e.to_string()))?;
        Ok(())
    }
}

/// In-process queue for single-binary deployments without the worker
#[derive(Clone)]
pub struct ChannelDispatcher {
    tx: mpsc::UnboundedSender<Notification>,
}

impl ChannelDispatcher {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Notification>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Deliver queued messages until every sender is dropped
    pub fn spawn_delivery(
        mut rx: mpsc::UnboundedReceiver<Notification>,
        mailer: ResendMailer,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(notification) = rx.recv().await {
                if let Err(e) = mailer
                    .send(
                        notification.template_key(),
                        &notification.template_data(),
                        notification.recipient(),
                        None,
                    )
                    .await
                {
                    tracing::error!(
                        template_key = %notification.template_key(),
                        error = %e,
                        "Notification delivery failed"
                    );
                }
            }
        })
    }
}

#[async_trait]
impl NotificationDispatcher for ChannelDispatcher {
    async fn dispatch(&self, notification: Notification) -> Result<(), DispatchError> {
        self.tx.send(notification).map_err(|_| DispatchError::Closed)
    }
}

/// Keeps every dispatched message in memory
#[derive(Default)]
pub struct RecordingDispatcher {
    sent: Mutex<Vec<Notification>>,
    failing: Mutex<bool>,
}

impl RecordingDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every dispatch fail after recording the attempt
    pub fn set_failing(&self, failing: bool) {
        if let Ok(mut f) = self.failing.lock() {
            *f = failing;
        }
    }

    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn sent_with_key(&self, template_key: &str) -> Vec<Notification> {
        self.sent()
            .into_iter()
            .filter(|n| n.template_key() == template_key)
            .collect()
    }
}

#[async_trait]
impl NotificationDispatcher for RecordingDispatcher {
    async fn dispatch(&self, notification: Notification) -> Result<(), DispatchError> {
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(notification);
        }
        if self.failing.lock().map(|f| *f).unwrap_or(false) {
            return Err(DispatchError::Enqueue(
                "recording dispatcher set to fail".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    fn invite() -> Notification {
        Notification::InviteUnregistered {
            recipient: "driver@example.com".to_string(),
            fleet_name: "Acme Haulage".to_string(),
            owner_email: "owner@example.com".to_string(),
        }
    }

    #[test]
    fn test_template_keys_and_recipients() {
        assert_eq!(invite().template_key(), "invite-unregistered");
        assert_eq!(invite().recipient(), "driver@example.com");

        let rejected = Notification::InvitationRejected {
            owner_email: "owner@example.com".to_string(),
            driver_email: "driver@example.com".to_string(),
            fleet_name: "Acme Haulage".to_string(),
        };
        assert_eq!(rejected.template_key(), "invitation-rejected");
        assert_eq!(rejected.recipient(), "owner@example.com");
        assert_eq!(rejected.template_data()["driver_email"], "driver@example.com");
    }

    #[tokio::test]
    async fn test_channel_dispatcher_delivers_in_order() {
        let (dispatcher, mut rx) = ChannelDispatcher::new();
        dispatcher.dispatch(invite()).await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), invite());

        drop(rx);
        assert!(matches!(
            dispatcher.dispatch(invite()).await,
            Err(DispatchError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_best_effort_swallows_failures() {
        let dispatcher = RecordingDispatcher::new();
        dispatcher.set_failing(true);
        dispatch_best_effort(&dispatcher, invite()).await;
        assert_eq!(dispatcher.sent().len(), 1);
    }
}
