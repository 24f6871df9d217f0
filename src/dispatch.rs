use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::attachments::{AttachmentResolution, AttachmentSources, resolve_attachments};
use crate::config::Capabilities;
use crate::error::DispatchError;
use crate::fs::FileAccess;
use crate::model::{AttachmentDescriptor, Dataset, LogEntry, LogStatus, RelaySettings, Template};
use crate::overrides::OverrideStore;
use crate::resolve::resolve;

// ── Collaborators ───────────────────────────────────────────────────────────

/// Wall clock plus suspension, swappable for a simulated one in tests.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    fn sleep(&self, duration: Duration) -> impl Future<Output = ()> + Send;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn sleep(&self, duration: Duration) -> impl Future<Output = ()> + Send {
        tokio::time::sleep(duration)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutgoingMessage {
    pub from: String,
    pub to: String,
    pub cc: String,
    pub bcc: String,
    pub subject: String,
    pub html: String,
    pub attachments: Vec<AttachmentDescriptor>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SendOutcome {
    pub success: bool,
    pub message_id: Option<String>,
    pub response_message: Option<String>,
    pub error: Option<String>,
}

/// The outbound send operation. `Err` and `success: false` are both failures.
pub trait Mailer: Send + Sync {
    fn send(
        &self,
        message: OutgoingMessage,
        relay: &RelaySettings,
    ) -> impl Future<Output = Result<SendOutcome, String>> + Send;
}

// ── Campaign ────────────────────────────────────────────────────────────────

/// Everything one run reads, captured by value when the run is triggered.
#[derive(Debug, Clone, Default)]
pub struct CampaignInputs {
    pub dataset: Dataset,
    pub template: Template,
    pub relay: RelaySettings,
    pub overrides: OverrideStore,
    pub sources: AttachmentSources,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum CampaignEvent {
    Started { total: usize },
    Logged { index: usize, entry: LogEntry, progress: f64 },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CampaignReport {
    pub success_count: usize,
    pub fail_count: usize,
    pub log: Vec<LogEntry>,
}

/// Rejects a run whose relay settings could never deliver anything.
pub fn preflight(inputs: &CampaignInputs) -> Result<(), DispatchError> {
    let relay = &inputs.relay;
    if relay.host.trim().is_empty() {
        return Err(DispatchError::Config("missing relay host".into()));
    }
    if relay.user.is_empty() || relay.pass.is_empty() {
        return Err(DispatchError::Config("missing relay credentials".into()));
    }
    let template_sender = inputs
        .template
        .from_email_override
        .as_deref()
        .unwrap_or_default();
    if template_sender.is_empty() && relay.from_email.is_empty() {
        return Err(DispatchError::Config("missing sender address".into()));
    }
    Ok(())
}

pub struct Dispatcher<M, C, F> {
    pub mailer: M,
    pub clock: C,
    pub files: F,
    pub capabilities: Capabilities,
}

impl<M: Mailer, C: Clock, F: FileAccess> Dispatcher<M, C, F> {
    /// Sends to every record in order, one at a time.
    ///
    /// Per-record problems (no recipient, missing attachment, transport
    /// failure) are logged and counted; they never stop the run.
    pub async fn run_campaign(
        &self,
        inputs: &CampaignInputs,
        delay: Duration,
        events: &mpsc::UnboundedSender<CampaignEvent>,
    ) -> CampaignReport {
        let total = inputs.dataset.len();
        let mut report = CampaignReport::default();
        let _ = events.send(CampaignEvent::Started { total });
        info!(total, delay_ms = delay.as_millis() as u64, "campaign started");

        for (i, record) in inputs.dataset.rows().iter().enumerate() {
            let fields = resolve(
                i,
                &inputs.dataset,
                &inputs.template,
                &inputs.relay,
                &inputs.overrides,
            );

            let entry = if fields.to.is_empty() {
                warn!(row = i + 1, "no recipient, skipping");
                report.fail_count += 1;
                self.entry("N/A", LogStatus::Error, format!("No email for row {}", i + 1))
            } else {
                if i > 0 && !delay.is_zero() {
                    self.clock.sleep(delay).await;
                }

                let resolution = resolve_attachments(
                    record,
                    &inputs.template,
                    &inputs.sources,
                    self.capabilities,
                    &self.files,
                )
                .await;
                if let AttachmentResolution::NotFound { filename } = &resolution {
                    warn!(row = i + 1, filename = %filename, "attachment not found, sending without it");
                }

                let message = OutgoingMessage {
                    from: fields.from_header(),
                    to: fields.to.clone(),
                    cc: fields.cc,
                    bcc: fields.bcc,
                    subject: fields.subject,
                    html: fields.body,
                    attachments: resolution.into_attachments(),
                };
                debug!(row = i + 1, attachments = message.attachments.len(), "sending");

                match self.mailer.send(message, &inputs.relay).await {
                    Ok(outcome) if outcome.success => {
                        info!(row = i + 1, to = %fields.to, message_id = ?outcome.message_id, "sent");
                        report.success_count += 1;
                        let message = outcome
                            .response_message
                            .filter(|m| !m.is_empty())
                            .unwrap_or_else(|| "OK".to_string());
                        self.entry(&fields.to, LogStatus::Success, message)
                    }
                    Ok(outcome) => {
                        let message = outcome
                            .error
                            .filter(|m| !m.is_empty())
                            .unwrap_or_else(|| "Failed".to_string());
                        warn!(row = i + 1, to = %fields.to, "send rejected: {message}");
                        report.fail_count += 1;
                        self.entry(&fields.to, LogStatus::Error, message)
                    }
                    Err(e) => {
                        warn!(row = i + 1, to = %fields.to, "send failed: {e}");
                        report.fail_count += 1;
                        let message = if e.is_empty() { "Failed".to_string() } else { e };
                        self.entry(&fields.to, LogStatus::Error, message)
                    }
                }
            };

            let progress = (i + 1) as f64 / total as f64 * 100.0;
            report.log.push(entry.clone());
            let _ = events.send(CampaignEvent::Logged {
                index: i,
                entry,
                progress,
            });
        }

        info!(
            success = report.success_count,
            failed = report.fail_count,
            "campaign finished"
        );
        report
    }

    fn entry(&self, email: &str, status: LogStatus, message: String) -> LogEntry {
        LogEntry {
            email: email.to_string(),
            status,
            message,
            timestamp: self.clock.now(),
        }
    }
}
