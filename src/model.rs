use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::DatasetError;

/// One row of the dataset. Key order is column order.
pub type Record = IndexMap<String, String>;

// ── Dataset ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Dataset {
    rows: Vec<Record>,
}

impl Dataset {
    pub fn new(rows: Vec<Record>) -> Self {
        Self { rows }
    }

    pub fn rows(&self) -> &[Record] {
        &self.rows
    }

    pub fn get(&self, index: usize) -> Option<&Record> {
        self.rows.get(index)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Columns of the first record; records are assumed to share them.
    pub fn columns(&self) -> Vec<String> {
        self.rows
            .first()
            .map(|r| r.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn set_cell(&mut self, row: usize, column: &str, value: &str) -> Result<(), DatasetError> {
        let record = self
            .rows
            .get_mut(row)
            .ok_or(DatasetError::RowOutOfRange(row))?;
        if !record.contains_key(column) {
            return Err(DatasetError::UnknownColumn(column.to_string()));
        }
        record.insert(column.to_string(), value.to_string());
        Ok(())
    }

    /// Appends a row with every current column blank and returns its index.
    pub fn add_row(&mut self) -> usize {
        let record: Record = self
            .columns()
            .into_iter()
            .map(|c| (c, String::new()))
            .collect();
        self.rows.push(record);
        self.rows.len() - 1
    }

    pub fn delete_row(&mut self, row: usize) -> Result<Record, DatasetError> {
        if row >= self.rows.len() {
            return Err(DatasetError::RowOutOfRange(row));
        }
        Ok(self.rows.remove(row))
    }

    pub fn add_column(&mut self, name: &str) -> Result<(), DatasetError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(DatasetError::BlankColumn);
        }
        if self.rows.is_empty() {
            return Err(DatasetError::NoRows);
        }
        if self.columns().iter().any(|c| c == name) {
            return Err(DatasetError::DuplicateColumn(name.to_string()));
        }
        for record in &mut self.rows {
            record.insert(name.to_string(), String::new());
        }
        Ok(())
    }

    pub fn delete_column(&mut self, name: &str) -> Result<(), DatasetError> {
        let columns = self.columns();
        if !columns.iter().any(|c| c == name) {
            return Err(DatasetError::UnknownColumn(name.to_string()));
        }
        if columns.len() == 1 {
            return Err(DatasetError::LastColumn);
        }
        for record in &mut self.rows {
            record.shift_remove(name);
        }
        Ok(())
    }

    pub fn rename_column(&mut self, from: &str, to: &str) -> Result<(), DatasetError> {
        let to = to.trim();
        if to.is_empty() {
            return Err(DatasetError::BlankColumn);
        }
        if from == to {
            return Ok(());
        }
        let columns = self.columns();
        if !columns.iter().any(|c| c == from) {
            return Err(DatasetError::UnknownColumn(from.to_string()));
        }
        if columns.iter().any(|c| c == to) {
            return Err(DatasetError::DuplicateColumn(to.to_string()));
        }
        for record in &mut self.rows {
            if let Some(position) = record.get_index_of(from) {
                let value = record.shift_remove(from).unwrap_or_default();
                record.shift_insert(position, to.to_string(), value);
            }
        }
        Ok(())
    }
}

// ── Template & Relay ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Template {
    pub subject: String,
    pub body: String,
    pub from_name: Option<String>,
    pub from_email_override: Option<String>,
    pub cc: Option<String>,
    pub bcc: Option<String>,
    pub attachment_variable: Option<String>,
}

impl Template {
    /// The attachment column, if variable attachment mode is active.
    pub fn attachment_column(&self) -> Option<&str> {
        self.attachment_variable
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelaySettings {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub pass: String,
    pub from_name: String,
    pub from_email: String,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 587,
            user: String::new(),
            pass: String::new(),
            from_name: String::new(),
            from_email: String::new(),
        }
    }
}

// ── Overrides ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverrideField {
    To,
    FromName,
    FromEmail,
    Subject,
    Body,
    Cc,
    Bcc,
}

/// Per-record patch. `Some("")` blanks a field on purpose; `None` keeps the computed value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Override {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from_email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cc: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bcc: Option<String>,
}

impl Override {
    pub fn set(&mut self, field: OverrideField, value: String) {
        let slot = match field {
            OverrideField::To => &mut self.to,
            OverrideField::FromName => &mut self.from_name,
            OverrideField::FromEmail => &mut self.from_email,
            OverrideField::Subject => &mut self.subject,
            OverrideField::Body => &mut self.body,
            OverrideField::Cc => &mut self.cc,
            OverrideField::Bcc => &mut self.bcc,
        };
        *slot = Some(value);
    }
}

// ── Resolved output ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EffectiveFields {
    pub to: String,
    pub from_name: String,
    pub from_email: String,
    pub subject: String,
    pub body: String,
    pub cc: String,
    pub bcc: String,
}

impl EffectiveFields {
    /// `"Name" <addr>` when a display name is set, else the bare address.
    pub fn from_header(&self) -> String {
        if self.from_name.is_empty() {
            self.from_email.clone()
        } else {
            format!("\"{}\" <{}>", self.from_name, self.from_email)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentDescriptor {
    pub filename: String,
    /// Base64 file bytes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogStatus {
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub email: String,
    pub status: LogStatus,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}
