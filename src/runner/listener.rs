// src/runner/listener.rs

//! Observer contract between a job and whoever runs it.
//!
//! Runners never call back into jobs from a listener. Each runner session
//! owns a fan-in channel and installs a [`ChannelListener`] on every job it
//! submits; notifications become [`Notification`] messages that the session
//! coordinator consumes in order.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::trace;

use crate::action::Action;
use crate::job::Job;

pub trait JobNotificationListener: Send + Sync {
    /// `sender` asks for a workflow mutation.
    fn react_to_request_of_action(&self, action: Action, sender: &Arc<Job>);

    /// `sender` finished its run.
    fn notify_termination(&self, sender: &Arc<Job>);
}

/// Message delivered to a session coordinator.
///
/// `epoch` is the sender's restart count at the time of sending, so a
/// session can tell a stale notification from a job it already resubmitted.
#[derive(Debug, Clone)]
pub enum Notification {
    ActionRequested {
        action: Action,
        sender: Arc<Job>,
        epoch: u32,
    },
    Terminated {
        sender: Arc<Job>,
        epoch: u32,
    },
}

impl Notification {
    pub fn sender(&self) -> &Arc<Job> {
        match self {
            Notification::ActionRequested { sender, .. } | Notification::Terminated { sender, .. } => {
                sender
            }
        }
    }
}

/// Listener forwarding into a session's notification channel.
///
/// Sends after the session ended are silently dropped.
#[derive(Debug, Clone)]
pub struct ChannelListener {
    tx: mpsc::UnboundedSender<Notification>,
}

impl ChannelListener {
    pub fn new(tx: mpsc::UnboundedSender<Notification>) -> Self {
        Self { tx }
    }

    fn send(&self, notification: Notification) {
        if self.tx.send(notification).is_err() {
            trace!("notification after session end dropped");
        }
    }
}

impl JobNotificationListener for ChannelListener {
    fn react_to_request_of_action(&self, action: Action, sender: &Arc<Job>) {
        self.send(Notification::ActionRequested {
            action,
            sender: Arc::clone(sender),
            epoch: sender.restart_count(),
        });
    }

    fn notify_termination(&self, sender: &Arc<Job>) {
        self.send(Notification::Terminated {
            sender: Arc::clone(sender),
            epoch: sender.restart_count(),
        });
    }
}
