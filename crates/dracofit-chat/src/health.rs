use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::errors::ChatError;

/// Body of the chatbot service's `/health` endpoint.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct HealthReport {
    /// `success` when the model is loaded and serving.
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl HealthReport {
    pub fn is_online(&self) -> bool {
        self.status.eq_ignore_ascii_case("success")
    }
}

/// Source of health reports, implemented by `ChatClient`.
#[async_trait::async_trait]
pub trait HealthProbe: Send + Sync {
    async fn check_health(&self) -> Result<HealthReport, ChatError>;
}

/// Coarse availability of the chatbot model.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Availability {
    /// No probe has completed yet.
    #[default]
    Unknown,
    Online,
    Offline,
    /// The probe itself failed.
    Error,
}

impl fmt::Display for Availability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Unknown => "unknown",
            Self::Online => "online",
            Self::Offline => "offline",
            Self::Error => "error",
        })
    }
}

/// Latest known model status as shown next to the chat.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ModelStatus {
    pub availability: Availability,
    pub last_checked: Option<DateTime<Utc>>,
    pub details: Option<serde_json::Value>,
    pub error: Option<String>,
}

impl ModelStatus {
    /// Builds a status from the result of one probe.
    pub fn from_probe(result: Result<HealthReport, ChatError>) -> Self {
        let last_checked = Some(Utc::now());
        match result {
            Ok(report) => Self {
                availability: if report.is_online() {
                    Availability::Online
                } else {
                    Availability::Offline
                },
                last_checked,
                error: if report.is_online() {
                    None
                } else {
                    report.message.clone()
                },
                details: report.data,
            },
            Err(err) => Self {
                availability: Availability::Error,
                last_checked,
                details: None,
                error: Some(err.to_string()),
            },
        }
    }

    /// Status that lets messages through without probing.
    pub fn assumed_online() -> Self {
        Self {
            availability: Availability::Online,
            ..Self::default()
        }
    }

    pub fn is_online(&self) -> bool {
        self.availability == Availability::Online
    }

    /// Short badge text for the status.
    pub fn badge(&self) -> String {
        match self.availability {
            Availability::Unknown => "CHECKING...".to_string(),
            other => other.to_string().to_ascii_uppercase(),
        }
    }
}

/// Polls a `HealthProbe` on a fixed interval and publishes `ModelStatus`.
///
/// The first probe runs immediately. Dropping the monitor stops polling.
pub struct HealthMonitor {
    rx: watch::Receiver<ModelStatus>,
    task: JoinHandle<()>,
}

impl HealthMonitor {
    /// Poll interval used by the chat screen.
    pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(60);

    /// Starts polling on the current tokio runtime.
    pub fn spawn(probe: Arc<dyn HealthProbe>, interval: Duration) -> Result<Self, ChatError> {
        if interval.is_zero() {
            return Err(ChatError::Validation(
                "health poll interval must be greater than 0".into(),
            ));
        }
        let (tx, rx) = watch::channel(ModelStatus::default());
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let status = ModelStatus::from_probe(probe.check_health().await);
                match status.availability {
                    Availability::Online => debug!("chatbot health probe: online"),
                    other => {
                        warn!(availability = %other, error = ?status.error, "chatbot health probe")
                    }
                }
                if tx.send(status).is_err() {
                    break;
                }
            }
        });
        Ok(Self { rx, task })
    }

    /// Returns a receiver that observes every published status.
    pub fn subscribe(&self) -> watch::Receiver<ModelStatus> {
        self.rx.clone()
    }

    /// Latest published status; `Unknown` until the first probe completes.
    pub fn current(&self) -> ModelStatus {
        self.rx.borrow().clone()
    }

    /// Stops polling.
    pub fn stop(self) {
        self.task.abort();
    }
}

impl Drop for HealthMonitor {
    fn drop(&mut self) {
        self.task.abort();
    }
}
