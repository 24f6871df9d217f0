use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, Path, State},
    http::StatusCode,
    routing::{get, post, put},
};
use base64::{Engine, engine::general_purpose::STANDARD};
use chrono::{DateTime, Utc};
use maud::{DOCTYPE, Markup, html};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock, mpsc};
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info};

use crate::attachments::{AttachmentResolution, AttachmentSources, UploadedFile, resolve_attachments};
use crate::config::Config;
use crate::dispatch::{CampaignEvent, CampaignInputs, Clock, Dispatcher, SystemClock, preflight};
use crate::error::{DispatchError, StoreError};
use crate::fs::{FileAccess, FileInfo, LocalFs};
use crate::import::parse_delimited;
use crate::model::{
    Dataset, EffectiveFields, LogEntry, LogStatus, Override, OverrideField, Record, RelaySettings,
    Template,
};
use crate::overrides::OverrideStore;
use crate::resolve::resolve;
use crate::schedule::ScheduleGate;
use crate::smtp::SmtpMailer;
use crate::store::{self, DataSnapshot, RelaySnapshot, Snapshot, TemplateSnapshot};

// ── State ───────────────────────────────────────────────────────────────────

/// What the user is currently editing. Values are copied into a campaign when it is triggered.
#[derive(Debug, Clone, Default)]
pub struct Session {
    pub dataset: Dataset,
    pub template: Template,
    pub relay: RelaySettings,
    pub overrides: OverrideStore,
    pub sources: AttachmentSources,
}

impl Session {
    fn campaign_inputs(&self) -> CampaignInputs {
        CampaignInputs {
            dataset: self.dataset.clone(),
            template: self.template.clone(),
            relay: self.relay.clone(),
            overrides: self.overrides.clone(),
            sources: self.sources.clone(),
        }
    }

    fn replace_dataset(&mut self, dataset: Dataset) {
        self.dataset = dataset;
        self.overrides.clear();
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CampaignStatus {
    pub is_sending: bool,
    pub is_scheduled_wait: bool,
    pub scheduled_for: Option<DateTime<Utc>>,
    pub total: usize,
    pub progress: f64,
    pub success_count: usize,
    pub fail_count: usize,
    pub log: Vec<LogEntry>,
}

pub struct AppState {
    pub db: Mutex<Connection>,
    pub config: Config,
    pub session: Mutex<Session>,
    pub campaign: RwLock<CampaignStatus>,
    pub gate: ScheduleGate,
    pub dispatcher: Dispatcher<SmtpMailer, SystemClock, LocalFs>,
}

impl AppState {
    pub fn new(config: Config, conn: Connection) -> Self {
        let session = Session {
            relay: config.seed_relay.clone(),
            ..Default::default()
        };
        let dispatcher = Dispatcher {
            mailer: SmtpMailer {
                accept_invalid_certs: config.accept_invalid_certs,
            },
            clock: SystemClock,
            files: LocalFs,
            capabilities: config.capabilities,
        };
        Self {
            db: Mutex::new(conn),
            session: Mutex::new(session),
            campaign: RwLock::new(CampaignStatus::default()),
            gate: ScheduleGate::default(),
            dispatcher,
            config,
        }
    }
}

// ── Errors ──────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, e: impl Display) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: e.to_string(),
        }),
    )
}

fn bad_request(e: impl Display) -> ApiError {
    api_error(StatusCode::BAD_REQUEST, e)
}

fn not_found(what: &str) -> ApiError {
    api_error(StatusCode::NOT_FOUND, format!("{what} not found"))
}

fn store_error(e: StoreError) -> ApiError {
    match e {
        StoreError::InvalidBundle(_) => bad_request(e),
        other => {
            error!("store: {other}");
            api_error(StatusCode::INTERNAL_SERVER_ERROR, other)
        }
    }
}

fn dispatch_error(e: DispatchError) -> ApiError {
    match e {
        DispatchError::Config(_) => bad_request(e),
        DispatchError::AlreadyRunning | DispatchError::AlreadyScheduled => {
            api_error(StatusCode::CONFLICT, e)
        }
    }
}

fn ok() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok"}))
}

// ── Requests / Responses ────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: String,
    records: usize,
    is_sending: bool,
    is_scheduled_wait: bool,
}

#[derive(Debug, Serialize)]
struct DatasetResponse {
    columns: Vec<String>,
    rows: Vec<Record>,
}

#[derive(Debug, Deserialize)]
struct CellRequest {
    value: String,
}

#[derive(Debug, Deserialize)]
struct ColumnRequest {
    name: String,
}

#[derive(Debug, Deserialize)]
struct RenameRequest {
    to: String,
}

#[derive(Debug, Serialize)]
struct RelayView {
    host: String,
    port: u16,
    user: String,
    has_pass: bool,
    from_name: String,
    from_email: String,
}

impl From<&RelaySettings> for RelayView {
    fn from(r: &RelaySettings) -> Self {
        Self {
            host: r.host.clone(),
            port: r.port,
            user: r.user.clone(),
            has_pass: !r.pass.is_empty(),
            from_name: r.from_name.clone(),
            from_email: r.from_email.clone(),
        }
    }
}

/// `pass: None` keeps the stored password, since reads never return it.
#[derive(Debug, Deserialize)]
struct RelayUpdate {
    host: String,
    #[serde(default = "default_port")]
    port: u16,
    #[serde(default)]
    user: String,
    pass: Option<String>,
    #[serde(default)]
    from_name: String,
    #[serde(default)]
    from_email: String,
}

fn default_port() -> u16 {
    RelaySettings::default().port
}

#[derive(Debug, Serialize)]
struct UploadedView {
    name: String,
    size: usize,
}

#[derive(Debug, Serialize)]
struct AttachmentsView {
    local_access: bool,
    uploaded: Vec<UploadedView>,
    local_files: Vec<FileInfo>,
    folder: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UploadRequest {
    name: String,
    /// Base64 file bytes.
    content: String,
}

#[derive(Debug, Deserialize)]
struct LocalFilesRequest {
    paths: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct FolderRequest {
    path: Option<String>,
}

/// Attachment outcome without file contents.
#[derive(Debug, Serialize)]
struct AttachmentPreview {
    outcome: &'static str,
    filenames: Vec<String>,
}

impl From<&AttachmentResolution> for AttachmentPreview {
    fn from(resolution: &AttachmentResolution) -> Self {
        let outcome = match resolution {
            AttachmentResolution::Static { .. } => "static",
            AttachmentResolution::Found { .. } => "found",
            AttachmentResolution::NotFound { .. } => "not_found",
            AttachmentResolution::Blank => "blank",
        };
        Self {
            outcome,
            filenames: resolution.filenames(),
        }
    }
}

#[derive(Debug, Serialize)]
struct PreviewResponse {
    index: usize,
    total: usize,
    has_override: bool,
    fields: EffectiveFields,
    attachments: AttachmentPreview,
}

#[derive(Debug, Deserialize)]
struct OverrideRequest {
    field: OverrideField,
    value: String,
}

#[derive(Debug, Default, Deserialize)]
struct CampaignRequest {
    delay_ms: Option<u64>,
    scheduled_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
struct CampaignStarted {
    status: String,
    total: usize,
    scheduled_for: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "lowercase")]
enum SavedKind {
    Data,
    Template,
    Smtp,
}

impl SavedKind {
    fn as_str(self) -> &'static str {
        match self {
            Self::Data => DataSnapshot::KIND,
            Self::Template => TemplateSnapshot::KIND,
            Self::Smtp => RelaySnapshot::KIND,
        }
    }
}

#[derive(Debug, Deserialize)]
struct SaveRequest {
    name: String,
}

// ── Health & Index ──────────────────────────────────────────────────────────

async fn health_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let records = state.session.lock().await.dataset.len();
    let campaign = state.campaign.read().await;
    Json(HealthResponse {
        status: "ok".into(),
        records,
        is_sending: campaign.is_sending,
        is_scheduled_wait: campaign.is_scheduled_wait,
    })
}

async fn index_handler(State(state): State<Arc<AppState>>) -> Markup {
    let (records, columns, subject, relay) = {
        let session = state.session.lock().await;
        (
            session.dataset.len(),
            session.dataset.columns(),
            session.template.subject.clone(),
            RelayView::from(&session.relay),
        )
    };
    let campaign = state.campaign.read().await.clone();
    let status_label = if campaign.is_sending {
        "sending"
    } else if campaign.is_scheduled_wait {
        "scheduled"
    } else {
        "idle"
    };

    html! {
        (DOCTYPE)
        html lang="en" {
            head {
                meta charset="utf-8";
                meta name="viewport" content="width=device-width, initial-scale=1";
                @if campaign.is_sending || campaign.is_scheduled_wait {
                    meta http-equiv="refresh" content="2";
                }
                title { "mailmerge" }
                style {
                    (maud::PreEscaped("
                        * { margin: 0; padding: 0; box-sizing: border-box; }
                        body { font-family: system-ui, -apple-system, sans-serif; background: #0a0a0a; color: #e0e0e0; padding: 2rem; }
                        .container { max-width: 760px; margin: 0 auto; }
                        h1 { font-size: 2rem; margin-bottom: 0.5rem; color: #fff; }
                        .subtitle { color: #888; margin-bottom: 2rem; }
                        .card { background: #161616; border: 1px solid #2a2a2a; border-radius: 8px; padding: 1.25rem; margin-bottom: 1rem; }
                        .card h2 { font-size: 0.875rem; text-transform: uppercase; letter-spacing: 0.05em; color: #888; margin-bottom: 0.75rem; }
                        .stat-grid { display: grid; grid-template-columns: repeat(4, 1fr); gap: 1rem; }
                        .stat .value { font-size: 1.5rem; font-weight: 600; color: #fff; }
                        .stat .label { font-size: 0.75rem; color: #888; }
                        .mono { font-family: monospace; font-size: 0.875rem; color: #aaa; }
                        .empty { color: #555; font-style: italic; font-size: 0.875rem; }
                        .bar { height: 6px; background: #2a2a2a; border-radius: 3px; margin-top: 0.75rem; overflow: hidden; }
                        .bar div { height: 100%; background: #4ec970; }
                        table { width: 100%; border-collapse: collapse; font-size: 0.8rem; }
                        td { padding: 0.3rem 0.4rem; border-bottom: 1px solid #2a2a2a; font-family: monospace; }
                        td.success { color: #4ec970; }
                        td.error { color: #f85149; }
                    "))
                }
            }
            body {
                .container {
                    h1 { "mailmerge" }
                    p.subtitle { "merge and dispatch" }

                    .card {
                        h2 { "Campaign" }
                        .stat-grid {
                            .stat {
                                .value { (status_label) }
                                .label { "status" }
                            }
                            .stat {
                                .value { (format!("{:.0}%", campaign.progress)) }
                                .label { "progress" }
                            }
                            .stat {
                                .value { (campaign.success_count) }
                                .label { "sent" }
                            }
                            .stat {
                                .value { (campaign.fail_count) }
                                .label { "failed" }
                            }
                        }
                        .bar { div style=(format!("width: {:.0}%", campaign.progress)) {} }
                        @if let Some(at) = campaign.scheduled_for {
                            @if campaign.is_scheduled_wait {
                                p.mono { "starts at " (at.to_rfc3339()) }
                            }
                        }
                    }

                    .card {
                        h2 { "Data" }
                        p.mono { (records) " records" }
                        @if columns.is_empty() {
                            p.empty { "No data imported" }
                        } @else {
                            p.mono { (columns.join(", ")) }
                        }
                    }

                    .card {
                        h2 { "Template" }
                        @if subject.is_empty() {
                            p.empty { "No subject" }
                        } @else {
                            p.mono { (subject) }
                        }
                    }

                    .card {
                        h2 { "Relay" }
                        @if relay.host.is_empty() {
                            p.empty { "no relay configured" }
                        } @else {
                            p.mono { (relay.host) ":" (relay.port) }
                            p.mono { "user: " (relay.user) }
                        }
                    }

                    .card {
                        h2 { "Log" }
                        @if campaign.log.is_empty() {
                            p.empty { "Nothing sent yet" }
                        } @else {
                            table {
                                @for entry in &campaign.log {
                                    tr {
                                        td { (entry.timestamp.format("%H:%M:%S").to_string()) }
                                        td { (entry.email) }
                                        @match entry.status {
                                            LogStatus::Success => { td.success { "ok" } }
                                            LogStatus::Error => { td.error { "error" } }
                                        }
                                        td { (entry.message) }
                                    }
                                }
                            }
                        }
                    }
                }
            }
        }
    }
}

// ── Dataset Handlers ────────────────────────────────────────────────────────

async fn get_dataset_handler(State(state): State<Arc<AppState>>) -> Json<DatasetResponse> {
    let session = state.session.lock().await;
    Json(DatasetResponse {
        columns: session.dataset.columns(),
        rows: session.dataset.rows().to_vec(),
    })
}

async fn put_dataset_handler(
    State(state): State<Arc<AppState>>,
    Json(rows): Json<Vec<Record>>,
) -> Json<serde_json::Value> {
    let mut session = state.session.lock().await;
    info!(rows = rows.len(), "dataset replaced");
    session.replace_dataset(Dataset::new(rows));
    ok()
}

async fn import_dataset_handler(
    State(state): State<Arc<AppState>>,
    body: String,
) -> Result<Json<DatasetResponse>, ApiError> {
    let dataset = parse_delimited(&body).map_err(bad_request)?;
    let response = DatasetResponse {
        columns: dataset.columns(),
        rows: dataset.rows().to_vec(),
    };
    state.session.lock().await.replace_dataset(dataset);
    Ok(Json(response))
}

async fn set_cell_handler(
    State(state): State<Arc<AppState>>,
    Path((row, column)): Path<(usize, String)>,
    Json(payload): Json<CellRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let mut session = state.session.lock().await;
    session
        .dataset
        .set_cell(row, &column, &payload.value)
        .map_err(|e| api_error(StatusCode::NOT_FOUND, e))?;
    Ok(ok())
}

async fn add_row_handler(State(state): State<Arc<AppState>>) -> (StatusCode, Json<serde_json::Value>) {
    let index = state.session.lock().await.dataset.add_row();
    (StatusCode::CREATED, Json(serde_json::json!({ "index": index })))
}

async fn delete_row_handler(
    State(state): State<Arc<AppState>>,
    Path(row): Path<usize>,
) -> Result<StatusCode, ApiError> {
    let mut session = state.session.lock().await;
    session
        .dataset
        .delete_row(row)
        .map_err(|e| api_error(StatusCode::NOT_FOUND, e))?;
    session.overrides.remove_row(row);
    Ok(StatusCode::NO_CONTENT)
}

async fn add_column_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<ColumnRequest>,
) -> Result<StatusCode, ApiError> {
    let mut session = state.session.lock().await;
    session.dataset.add_column(&payload.name).map_err(bad_request)?;
    Ok(StatusCode::CREATED)
}

async fn delete_column_handler(
    State(state): State<Arc<AppState>>,
    Path(column): Path<String>,
) -> Result<StatusCode, ApiError> {
    let mut session = state.session.lock().await;
    session.dataset.delete_column(&column).map_err(bad_request)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn rename_column_handler(
    State(state): State<Arc<AppState>>,
    Path(column): Path<String>,
    Json(payload): Json<RenameRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let mut session = state.session.lock().await;
    session
        .dataset
        .rename_column(&column, &payload.to)
        .map_err(bad_request)?;
    Ok(ok())
}

// ── Template & Relay Handlers ───────────────────────────────────────────────

async fn get_template_handler(State(state): State<Arc<AppState>>) -> Json<Template> {
    Json(state.session.lock().await.template.clone())
}

async fn put_template_handler(
    State(state): State<Arc<AppState>>,
    Json(template): Json<Template>,
) -> Json<serde_json::Value> {
    state.session.lock().await.template = template;
    ok()
}

async fn get_relay_handler(State(state): State<Arc<AppState>>) -> Json<RelayView> {
    Json(RelayView::from(&state.session.lock().await.relay))
}

async fn put_relay_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<RelayUpdate>,
) -> Result<Json<RelayView>, ApiError> {
    if payload.host.trim().is_empty() {
        return Err(bad_request("host is required"));
    }
    let mut session = state.session.lock().await;
    let pass = payload.pass.unwrap_or_else(|| session.relay.pass.clone());
    session.relay = RelaySettings {
        host: payload.host.trim().to_string(),
        port: payload.port,
        user: payload.user,
        pass,
        from_name: payload.from_name,
        from_email: payload.from_email,
    };
    info!(host = %session.relay.host, port = session.relay.port, "relay settings updated");
    Ok(Json(RelayView::from(&session.relay)))
}

// ── Attachment Handlers ─────────────────────────────────────────────────────

async fn attachments_view(state: &AppState) -> AttachmentsView {
    let session = state.session.lock().await;
    AttachmentsView {
        local_access: state.config.capabilities.has_local_file_access,
        uploaded: session
            .sources
            .uploaded
            .iter()
            .map(|f| UploadedView {
                name: f.name.clone(),
                size: f.bytes.len(),
            })
            .collect(),
        local_files: session.sources.local_files.clone(),
        folder: session.sources.folder.clone(),
    }
}

async fn get_attachments_handler(State(state): State<Arc<AppState>>) -> Json<AttachmentsView> {
    Json(attachments_view(&state).await)
}

async fn upload_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<UploadRequest>,
) -> Result<(StatusCode, Json<AttachmentsView>), ApiError> {
    let name = payload.name.trim().to_string();
    if name.is_empty() {
        return Err(bad_request("name is required"));
    }
    let bytes = STANDARD
        .decode(payload.content.as_bytes())
        .map_err(|e| bad_request(format!("invalid base64 content: {e}")))?;
    {
        let mut session = state.session.lock().await;
        let uploaded = &mut session.sources.uploaded;
        uploaded.retain(|f| f.name != name);
        uploaded.push(UploadedFile { name, bytes });
    }
    Ok((StatusCode::CREATED, Json(attachments_view(&state).await)))
}

async fn delete_upload_handler(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<StatusCode, ApiError> {
    let mut session = state.session.lock().await;
    let before = session.sources.uploaded.len();
    session.sources.uploaded.retain(|f| f.name != name);
    if session.sources.uploaded.len() == before {
        return Err(not_found("attachment"));
    }
    Ok(StatusCode::NO_CONTENT)
}

fn require_local_access(state: &AppState) -> Result<(), ApiError> {
    if state.config.capabilities.has_local_file_access {
        Ok(())
    } else {
        Err(api_error(StatusCode::FORBIDDEN, "local file access is disabled"))
    }
}

async fn add_local_files_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<LocalFilesRequest>,
) -> Result<Json<AttachmentsView>, ApiError> {
    require_local_access(&state)?;
    let mut found = Vec::new();
    for path in &payload.paths {
        match state.dispatcher.files.file_info(path).await {
            Some(info) => found.push(info),
            None => return Err(bad_request(format!("not a readable file: {path}"))),
        }
    }
    {
        let mut session = state.session.lock().await;
        for info in found {
            session.sources.local_files.retain(|f| f.path != info.path);
            session.sources.local_files.push(info);
        }
    }
    Ok(Json(attachments_view(&state).await))
}

async fn delete_local_file_handler(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<StatusCode, ApiError> {
    let mut session = state.session.lock().await;
    let before = session.sources.local_files.len();
    session.sources.local_files.retain(|f| f.name != name);
    if session.sources.local_files.len() == before {
        return Err(not_found("local file"));
    }
    Ok(StatusCode::NO_CONTENT)
}

async fn set_folder_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<FolderRequest>,
) -> Result<Json<AttachmentsView>, ApiError> {
    require_local_access(&state)?;
    let folder = payload.path.filter(|p| !p.trim().is_empty());
    if let Some(path) = &folder {
        if !state.dispatcher.files.is_dir(path).await {
            return Err(bad_request(format!("not a directory: {path}")));
        }
    }
    state.session.lock().await.sources.folder = folder;
    Ok(Json(attachments_view(&state).await))
}

// ── Preview & Overrides ─────────────────────────────────────────────────────

async fn preview_handler(
    State(state): State<Arc<AppState>>,
    Path(index): Path<usize>,
) -> Result<Json<PreviewResponse>, ApiError> {
    let (record, inputs, has_override) = {
        let session = state.session.lock().await;
        let record = session
            .dataset
            .get(index)
            .cloned()
            .ok_or_else(|| not_found("record"))?;
        (record, session.campaign_inputs(), session.overrides.has(index))
    };

    let fields = resolve(
        index,
        &inputs.dataset,
        &inputs.template,
        &inputs.relay,
        &inputs.overrides,
    );
    let resolution = resolve_attachments(
        &record,
        &inputs.template,
        &inputs.sources,
        state.config.capabilities,
        &state.dispatcher.files,
    )
    .await;

    Ok(Json(PreviewResponse {
        index,
        total: inputs.dataset.len(),
        has_override,
        fields,
        attachments: AttachmentPreview::from(&resolution),
    }))
}

async fn set_override_handler(
    State(state): State<Arc<AppState>>,
    Path(index): Path<usize>,
    Json(payload): Json<OverrideRequest>,
) -> Result<Json<Override>, ApiError> {
    let mut session = state.session.lock().await;
    if session.dataset.get(index).is_none() {
        return Err(not_found("record"));
    }
    session.overrides.set(index, payload.field, payload.value);
    Ok(Json(session.overrides.get(index)))
}

async fn reset_override_handler(
    State(state): State<Arc<AppState>>,
    Path(index): Path<usize>,
) -> StatusCode {
    state.session.lock().await.overrides.reset(index);
    StatusCode::NO_CONTENT
}

// ── Campaign ────────────────────────────────────────────────────────────────

async fn apply_event(state: &AppState, event: CampaignEvent) {
    let mut campaign = state.campaign.write().await;
    match event {
        CampaignEvent::Started { total } => campaign.total = total,
        CampaignEvent::Logged {
            index,
            entry,
            progress,
        } => {
            debug!(row = index + 1, progress, "campaign progress");
            match entry.status {
                LogStatus::Success => campaign.success_count += 1,
                LogStatus::Error => campaign.fail_count += 1,
            }
            campaign.log.push(entry);
            campaign.progress = progress;
        }
    }
}

async fn run_campaign(state: Arc<AppState>, inputs: CampaignInputs, delay: Duration) {
    {
        let mut campaign = state.campaign.write().await;
        *campaign = CampaignStatus {
            is_sending: true,
            total: inputs.dataset.len(),
            ..Default::default()
        };
    }

    let (tx, mut rx) = mpsc::unbounded_channel::<CampaignEvent>();
    let updater = {
        let state = Arc::clone(&state);
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                apply_event(&state, event).await;
            }
        })
    };

    let report = state.dispatcher.run_campaign(&inputs, delay, &tx).await;
    drop(tx);
    if let Err(e) = updater.await {
        error!("campaign status updater: {e}");
    }

    let mut campaign = state.campaign.write().await;
    campaign.is_sending = false;
    campaign.success_count = report.success_count;
    campaign.fail_count = report.fail_count;
    campaign.log = report.log;
    info!(
        sent = campaign.success_count,
        failed = campaign.fail_count,
        "completed"
    );
}

async fn start_campaign_handler(
    State(state): State<Arc<AppState>>,
    payload: Option<Json<CampaignRequest>>,
) -> Result<(StatusCode, Json<CampaignStarted>), ApiError> {
    let request = payload.map(|Json(r)| r).unwrap_or_default();
    let delay = Duration::from_millis(request.delay_ms.unwrap_or(state.config.default_delay_ms));
    let inputs = state.session.lock().await.campaign_inputs();

    // Holding the write lock makes check-and-arm atomic against a second trigger.
    let mut campaign = state.campaign.write().await;
    if campaign.is_sending {
        return Err(dispatch_error(DispatchError::AlreadyRunning));
    }
    if campaign.is_scheduled_wait {
        return Err(dispatch_error(DispatchError::AlreadyScheduled));
    }
    preflight(&inputs).map_err(dispatch_error)?;
    let wait = state
        .gate
        .arm(state.dispatcher.clock.now(), request.scheduled_at)
        .map_err(dispatch_error)?;

    let total = inputs.dataset.len();
    let scheduled_for = wait.and(request.scheduled_at);
    campaign.is_scheduled_wait = wait.is_some();
    campaign.is_sending = wait.is_none();
    campaign.scheduled_for = scheduled_for;
    drop(campaign);

    let task_state = Arc::clone(&state);
    tokio::spawn(async move {
        let gate = task_state.gate.clone();
        gate.fire(&task_state.dispatcher.clock, wait, || {
            run_campaign(Arc::clone(&task_state), inputs, delay)
        })
        .await;
    });

    let status = if wait.is_some() { "scheduled" } else { "started" };
    info!(total, status, "campaign triggered");
    Ok((
        StatusCode::ACCEPTED,
        Json(CampaignStarted {
            status: status.into(),
            total,
            scheduled_for,
        }),
    ))
}

async fn campaign_status_handler(State(state): State<Arc<AppState>>) -> Json<CampaignStatus> {
    Json(state.campaign.read().await.clone())
}

// ── Saved Items ─────────────────────────────────────────────────────────────

async fn list_saved_handler(
    State(state): State<Arc<AppState>>,
    Path(kind): Path<SavedKind>,
) -> Result<Json<Vec<store::SavedItemInfo>>, ApiError> {
    let db = state.db.lock().await;
    store::list_info(&db, kind.as_str())
        .map(Json)
        .map_err(store_error)
}

async fn save_item_handler(
    State(state): State<Arc<AppState>>,
    Path(kind): Path<SavedKind>,
    Json(payload): Json<SaveRequest>,
) -> Result<(StatusCode, Json<store::SavedItemInfo>), ApiError> {
    let name = payload.name.trim();
    if name.is_empty() {
        return Err(bad_request("name is required"));
    }
    let session = state.session.lock().await.clone();
    let db = state.db.lock().await;
    let info = match kind {
        SavedKind::Data => {
            let item = store::save(&db, name, DataSnapshot::of(&session.dataset)).map_err(store_error)?;
            (item.id, item.created_at)
        }
        SavedKind::Template => {
            let item = store::save(
                &db,
                name,
                TemplateSnapshot {
                    template: session.template,
                },
            )
            .map_err(store_error)?;
            (item.id, item.created_at)
        }
        SavedKind::Smtp => {
            let item = store::save(
                &db,
                name,
                RelaySnapshot {
                    settings: session.relay,
                },
            )
            .map_err(store_error)?;
            (item.id, item.created_at)
        }
    };
    Ok((
        StatusCode::CREATED,
        Json(store::SavedItemInfo {
            id: info.0,
            name: name.to_string(),
            created_at: info.1,
        }),
    ))
}

async fn get_saved_handler(
    State(state): State<Arc<AppState>>,
    Path((kind, id)): Path<(SavedKind, String)>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let db = state.db.lock().await;
    let value = match kind {
        SavedKind::Data => store::get::<DataSnapshot>(&db, &id)
            .map_err(store_error)?
            .map(|i| serde_json::to_value(i)),
        SavedKind::Template => store::get::<TemplateSnapshot>(&db, &id)
            .map_err(store_error)?
            .map(|i| serde_json::to_value(i)),
        SavedKind::Smtp => store::get::<RelaySnapshot>(&db, &id)
            .map_err(store_error)?
            .map(|i| serde_json::to_value(i)),
    };
    value
        .ok_or_else(|| not_found("saved item"))?
        .map(Json)
        .map_err(|e| store_error(e.into()))
}

async fn delete_saved_handler(
    State(state): State<Arc<AppState>>,
    Path((kind, id)): Path<(SavedKind, String)>,
) -> Result<StatusCode, ApiError> {
    let db = state.db.lock().await;
    if store::delete(&db, kind.as_str(), &id).map_err(store_error)? {
        info!(kind = kind.as_str(), id = %id, "saved item deleted");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(not_found("saved item"))
    }
}

async fn load_saved_handler(
    State(state): State<Arc<AppState>>,
    Path((kind, id)): Path<(SavedKind, String)>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let db = state.db.lock().await;
    let mut session = state.session.lock().await;
    match kind {
        SavedKind::Data => {
            let item = store::get::<DataSnapshot>(&db, &id)
                .map_err(store_error)?
                .ok_or_else(|| not_found("saved item"))?;
            session.replace_dataset(item.payload.rows);
        }
        SavedKind::Template => {
            let item = store::get::<TemplateSnapshot>(&db, &id)
                .map_err(store_error)?
                .ok_or_else(|| not_found("saved item"))?;
            session.template = item.payload.template;
        }
        SavedKind::Smtp => {
            let item = store::get::<RelaySnapshot>(&db, &id)
                .map_err(store_error)?
                .ok_or_else(|| not_found("saved item"))?;
            session.relay = item.payload.settings;
        }
    }
    info!(kind = kind.as_str(), id = %id, "saved item loaded");
    Ok(ok())
}

async fn export_bundle_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<store::Bundle>, ApiError> {
    let db = state.db.lock().await;
    store::export_bundle(&db).map(Json).map_err(store_error)
}

async fn import_bundle_handler(
    State(state): State<Arc<AppState>>,
    body: String,
) -> Result<Json<store::ImportCounts>, ApiError> {
    let mut db = state.db.lock().await;
    store::import_bundle(&mut db, &body)
        .map(Json)
        .map_err(store_error)
}

// ── Router ──────────────────────────────────────────────────────────────────

pub fn router(state: Arc<AppState>) -> Router {
    let body_limit = state.config.max_upload_mb * 1024 * 1024;

    Router::new()
        .route("/", get(index_handler))
        .route("/health", get(health_handler))
        .route("/dataset", get(get_dataset_handler).put(put_dataset_handler))
        .route("/dataset/import", post(import_dataset_handler))
        .route("/dataset/rows", post(add_row_handler))
        .route("/dataset/rows/{row}", axum::routing::delete(delete_row_handler))
        .route("/dataset/rows/{row}/cells/{column}", put(set_cell_handler))
        .route("/dataset/columns", post(add_column_handler))
        .route(
            "/dataset/columns/{column}",
            axum::routing::delete(delete_column_handler),
        )
        .route("/dataset/columns/{column}/rename", post(rename_column_handler))
        .route("/template", get(get_template_handler).put(put_template_handler))
        .route("/relay", get(get_relay_handler).put(put_relay_handler))
        .route("/attachments", get(get_attachments_handler))
        .route("/attachments/uploads", post(upload_handler))
        .route(
            "/attachments/uploads/{name}",
            axum::routing::delete(delete_upload_handler),
        )
        .route("/attachments/local", post(add_local_files_handler))
        .route(
            "/attachments/local/{name}",
            axum::routing::delete(delete_local_file_handler),
        )
        .route("/attachments/folder", put(set_folder_handler))
        .route("/preview/{index}", get(preview_handler))
        .route(
            "/overrides/{index}",
            put(set_override_handler).delete(reset_override_handler),
        )
        .route(
            "/campaign",
            get(campaign_status_handler).post(start_campaign_handler),
        )
        .route("/saved/{kind}", get(list_saved_handler).post(save_item_handler))
        .route(
            "/saved/{kind}/{id}",
            get(get_saved_handler).delete(delete_saved_handler),
        )
        .route("/saved/{kind}/{id}/load", post(load_saved_handler))
        .route("/bundle", get(export_bundle_handler).post(import_bundle_handler))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
