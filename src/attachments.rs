use std::path::{Component, Path};

use base64::{Engine, engine::general_purpose::STANDARD};
use serde::Serialize;
use tracing::{debug, warn};

use crate::config::Capabilities;
use crate::fs::{FileAccess, FileInfo};
use crate::model::{AttachmentDescriptor, Record, Template};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedFile {
    pub name: String,
    pub bytes: Vec<u8>,
}

impl UploadedFile {
    fn descriptor(&self) -> AttachmentDescriptor {
        AttachmentDescriptor {
            filename: self.name.clone(),
            content: Some(STANDARD.encode(&self.bytes)),
            path: None,
        }
    }
}

/// Every place an attachment can come from.
#[derive(Debug, Clone, Default)]
pub struct AttachmentSources {
    pub uploaded: Vec<UploadedFile>,
    pub local_files: Vec<FileInfo>,
    pub folder: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AttachmentResolution {
    /// No attachment column: the whole pool goes to every record.
    Static { attachments: Vec<AttachmentDescriptor> },
    Found { attachment: AttachmentDescriptor },
    /// The column names a file no source could produce.
    NotFound { filename: String },
    /// The column is configured but blank for this record.
    Blank,
}

impl AttachmentResolution {
    pub fn into_attachments(self) -> Vec<AttachmentDescriptor> {
        match self {
            Self::Static { attachments } => attachments,
            Self::Found { attachment } => vec![attachment],
            Self::NotFound { .. } | Self::Blank => Vec::new(),
        }
    }

    pub fn filenames(&self) -> Vec<String> {
        match self {
            Self::Static { attachments } => {
                attachments.iter().map(|a| a.filename.clone()).collect()
            }
            Self::Found { attachment } => vec![attachment.filename.clone()],
            Self::NotFound { .. } | Self::Blank => Vec::new(),
        }
    }
}

pub async fn resolve_attachments<F: FileAccess>(
    record: &Record,
    template: &Template,
    sources: &AttachmentSources,
    capabilities: Capabilities,
    files: &F,
) -> AttachmentResolution {
    match template.attachment_column() {
        Some(column) => {
            let filename = record.get(column).map(|v| v.trim()).unwrap_or_default();
            if filename.is_empty() {
                return AttachmentResolution::Blank;
            }
            match find_named(filename, sources, capabilities, files).await {
                Some(attachment) => AttachmentResolution::Found { attachment },
                None => {
                    debug!(filename, "attachment not found in any source");
                    AttachmentResolution::NotFound {
                        filename: filename.to_string(),
                    }
                }
            }
        }
        None => AttachmentResolution::Static {
            attachments: collect_pool(sources, capabilities, files).await,
        },
    }
}

async fn find_named<F: FileAccess>(
    filename: &str,
    sources: &AttachmentSources,
    capabilities: Capabilities,
    files: &F,
) -> Option<AttachmentDescriptor> {
    if capabilities.has_local_file_access {
        let local = sources
            .local_files
            .iter()
            .find(|f| f.name == filename || f.path == filename);
        if let Some(file) = local {
            if let Some(content) = files.read_base64(&file.path).await {
                return Some(AttachmentDescriptor {
                    filename: file.name.clone(),
                    content: Some(content),
                    path: None,
                });
            }
            warn!(path = %file.path, "pooled local file unreadable");
        } else if let Some(folder) = sources
            .folder
            .as_deref()
            .filter(|f| !f.is_empty() && is_bare_file_name(filename))
        {
            let full = Path::new(folder).join(filename);
            let full = full.to_string_lossy();
            if files.exists(&full).await {
                if let Some(content) = files.read_base64(&full).await {
                    return Some(AttachmentDescriptor {
                        filename: filename.to_string(),
                        content: Some(content),
                        path: None,
                    });
                }
                warn!(path = %full, "folder attachment unreadable");
            }
        }
    }

    sources
        .uploaded
        .iter()
        .find(|f| f.name == filename)
        .map(UploadedFile::descriptor)
}

/// True for a single plain path segment, so a folder lookup cannot leave the folder.
fn is_bare_file_name(filename: &str) -> bool {
    let mut components = Path::new(filename).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    ) && !filename.contains(['/', '\\'])
}

async fn collect_pool<F: FileAccess>(
    sources: &AttachmentSources,
    capabilities: Capabilities,
    files: &F,
) -> Vec<AttachmentDescriptor> {
    let mut attachments: Vec<AttachmentDescriptor> =
        sources.uploaded.iter().map(UploadedFile::descriptor).collect();

    if capabilities.has_local_file_access {
        for file in &sources.local_files {
            match files.read_base64(&file.path).await {
                Some(content) => attachments.push(AttachmentDescriptor {
                    filename: file.name.clone(),
                    content: Some(content),
                    path: None,
                }),
                None => warn!(path = %file.path, "skipping unreadable attachment"),
            }
        }
    }
    attachments
}
