//! Named snapshots of datasets, templates and relay settings.
//!
//! Each kind is listed, saved and deleted on its own so a user can mix a
//! saved dataset with any saved template and relay. The whole store can be
//! exported as a single JSON bundle and merged back in elsewhere.

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tracing::info;

use crate::error::StoreError;
use crate::model::{Dataset, RelaySettings, Template};

pub const BUNDLE_VERSION: u32 = 2;

pub fn init_db(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS saved_items (
            id TEXT PRIMARY KEY,
            kind TEXT NOT NULL,
            name TEXT NOT NULL,
            created_at TEXT NOT NULL,
            payload TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_saved_kind ON saved_items(kind);",
    )?;
    Ok(())
}

// ── Snapshot kinds ──────────────────────────────────────────────────────────

pub trait Snapshot: Serialize + DeserializeOwned {
    const KIND: &'static str;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataSnapshot {
    pub rows: Dataset,
    pub headers: Vec<String>,
}

impl DataSnapshot {
    pub fn of(dataset: &Dataset) -> Self {
        Self {
            headers: dataset.columns(),
            rows: dataset.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateSnapshot {
    pub template: Template,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelaySnapshot {
    pub settings: RelaySettings,
}

impl Snapshot for DataSnapshot {
    const KIND: &'static str = "data";
}

impl Snapshot for TemplateSnapshot {
    const KIND: &'static str = "template";
}

impl Snapshot for RelaySnapshot {
    const KIND: &'static str = "smtp";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedItem<T> {
    pub id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    #[serde(flatten)]
    pub payload: T,
}

/// Summary row for listings that should not ship whole payloads.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SavedItemInfo {
    pub id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

// ── CRUD ────────────────────────────────────────────────────────────────────

fn insert<T: Snapshot>(conn: &Connection, item: &SavedItem<T>) -> Result<(), StoreError> {
    let payload = serde_json::to_string(&item.payload)?;
    conn.execute(
        "INSERT INTO saved_items (id, kind, name, created_at, payload) VALUES (?1, ?2, ?3, ?4, ?5)",
        params![item.id, T::KIND, item.name, item.created_at.to_rfc3339(), payload],
    )?;
    Ok(())
}

pub fn save<T: Snapshot>(conn: &Connection, name: &str, payload: T) -> Result<SavedItem<T>, StoreError> {
    let item = SavedItem {
        id: uuid::Uuid::new_v4().to_string(),
        name: name.to_string(),
        created_at: Utc::now(),
        payload,
    };
    insert(conn, &item)?;
    info!(kind = T::KIND, id = %item.id, name, "saved item");
    Ok(item)
}

fn parse_row<T: Snapshot>(
    id: String,
    name: String,
    created_at: String,
    payload: String,
) -> Result<SavedItem<T>, StoreError> {
    let created_at = DateTime::parse_from_rfc3339(&created_at)
        .map(|d| d.with_timezone(&Utc))
        .unwrap_or_default();
    Ok(SavedItem {
        id,
        name,
        created_at,
        payload: serde_json::from_str(&payload)?,
    })
}

/// Newest first.
pub fn list<T: Snapshot>(conn: &Connection) -> Result<Vec<SavedItem<T>>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT id, name, created_at, payload FROM saved_items WHERE kind = ?1 ORDER BY rowid DESC",
    )?;
    let rows = stmt
        .query_map([T::KIND], |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
        })?
        .collect::<Result<Vec<(String, String, String, String)>, _>>()?;
    rows.into_iter()
        .map(|(id, name, created_at, payload)| parse_row(id, name, created_at, payload))
        .collect()
}

pub fn list_info(conn: &Connection, kind: &str) -> Result<Vec<SavedItemInfo>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT id, name, created_at FROM saved_items WHERE kind = ?1 ORDER BY rowid DESC",
    )?;
    let rows = stmt
        .query_map([kind], |row| {
            let created_at: String = row.get(2)?;
            Ok(SavedItemInfo {
                id: row.get(0)?,
                name: row.get(1)?,
                created_at: DateTime::parse_from_rfc3339(&created_at)
                    .map(|d| d.with_timezone(&Utc))
                    .unwrap_or_default(),
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn get<T: Snapshot>(conn: &Connection, id: &str) -> Result<Option<SavedItem<T>>, StoreError> {
    let row: Option<(String, String, String, String)> = conn
        .query_row(
            "SELECT id, name, created_at, payload FROM saved_items WHERE kind = ?1 AND id = ?2",
            params![T::KIND, id],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
        )
        .optional()?;
    row.map(|(id, name, created_at, payload)| parse_row(id, name, created_at, payload))
        .transpose()
}

pub fn delete(conn: &Connection, kind: &str, id: &str) -> Result<bool, StoreError> {
    let deleted = conn.execute(
        "DELETE FROM saved_items WHERE kind = ?1 AND id = ?2",
        params![kind, id],
    )?;
    Ok(deleted > 0)
}

// ── Bundles ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bundle {
    pub version: u32,
    pub exported_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Vec<SavedItem<DataSnapshot>>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub templates: Option<Vec<SavedItem<TemplateSnapshot>>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub smtp: Option<Vec<SavedItem<RelaySnapshot>>>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ImportCounts {
    pub data: usize,
    pub templates: usize,
    pub smtp: usize,
}

pub fn export_bundle(conn: &Connection) -> Result<Bundle, StoreError> {
    Ok(Bundle {
        version: BUNDLE_VERSION,
        exported_at: Utc::now(),
        data: Some(list(conn)?),
        templates: Some(list(conn)?),
        smtp: Some(list(conn)?),
    })
}

/// Inserts `items` under fresh ids so they list ahead of existing ones, in bundle order.
fn import_items<T: Snapshot>(conn: &Connection, items: Vec<SavedItem<T>>) -> Result<usize, StoreError> {
    let count = items.len();
    for item in items.into_iter().rev() {
        insert(
            conn,
            &SavedItem {
                id: uuid::Uuid::new_v4().to_string(),
                ..item
            },
        )?;
    }
    Ok(count)
}

pub fn import_bundle(conn: &mut Connection, json: &str) -> Result<ImportCounts, StoreError> {
    let bundle: Bundle = serde_json::from_str(json)
        .map_err(|e| StoreError::InvalidBundle(format!("Invalid JSON file: {e}")))?;

    let tx = conn.transaction()?;
    let counts = ImportCounts {
        data: import_items(&tx, bundle.data.unwrap_or_default())?,
        templates: import_items(&tx, bundle.templates.unwrap_or_default())?,
        smtp: import_items(&tx, bundle.smtp.unwrap_or_default())?,
    };
    tx.commit()?;

    info!(
        data = counts.data,
        templates = counts.templates,
        smtp = counts.smtp,
        "bundle imported"
    );
    Ok(counts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Record;

    fn conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        init_db(&conn).unwrap();
        conn
    }

    fn dataset() -> Dataset {
        let record: Record = [("email", "a@x.com"), ("name", "Ann")]
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Dataset::new(vec![record])
    }

    fn template(subject: &str) -> TemplateSnapshot {
        TemplateSnapshot {
            template: Template {
                subject: subject.into(),
                body: "<p>Hi {{name}}</p>".into(),
                ..Default::default()
            },
        }
    }

    #[test]
    fn test_init_db() {
        let conn = conn();
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name = 'saved_items'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(count, 1);
        init_db(&conn).unwrap();
    }

    #[test]
    fn test_kinds_are_independent() {
        let conn = conn();
        save(&conn, "march list", DataSnapshot::of(&dataset())).unwrap();
        save(&conn, "welcome", template("Welcome")).unwrap();

        let data: Vec<SavedItem<DataSnapshot>> = list(&conn).unwrap();
        let templates: Vec<SavedItem<TemplateSnapshot>> = list(&conn).unwrap();
        let relays: Vec<SavedItem<RelaySnapshot>> = list(&conn).unwrap();
        assert_eq!(data.len(), 1);
        assert_eq!(data[0].payload.headers, vec!["email", "name"]);
        assert_eq!(templates.len(), 1);
        assert!(relays.is_empty());
    }

    #[test]
    fn test_list_newest_first_and_get_delete() {
        let conn = conn();
        let first = save(&conn, "one", template("1")).unwrap();
        let second = save(&conn, "two", template("2")).unwrap();

        let names: Vec<_> = list_info(&conn, TemplateSnapshot::KIND)
            .unwrap()
            .into_iter()
            .map(|i| i.name)
            .collect();
        assert_eq!(names, vec!["two", "one"]);

        let loaded: SavedItem<TemplateSnapshot> = get(&conn, &first.id).unwrap().unwrap();
        assert_eq!(loaded.payload.template.subject, "1");
        assert!(get::<RelaySnapshot>(&conn, &first.id).unwrap().is_none());

        assert!(delete(&conn, TemplateSnapshot::KIND, &second.id).unwrap());
        assert!(!delete(&conn, TemplateSnapshot::KIND, &second.id).unwrap());
        assert_eq!(list_info(&conn, TemplateSnapshot::KIND).unwrap().len(), 1);
    }

    #[test]
    fn test_bundle_import_prepends_with_fresh_ids() {
        let source = conn();
        save(&source, "a", template("A")).unwrap();
        save(&source, "b", template("B")).unwrap();
        save(
            &source,
            "relay",
            RelaySnapshot {
                settings: RelaySettings {
                    host: "smtp.x.com".into(),
                    ..Default::default()
                },
            },
        )
        .unwrap();
        let bundle = export_bundle(&source).unwrap();
        assert_eq!(bundle.version, BUNDLE_VERSION);
        let json = serde_json::to_string(&bundle).unwrap();

        let mut target = conn();
        let existing = save(&target, "old", template("Old")).unwrap();
        let counts = import_bundle(&mut target, &json).unwrap();
        assert_eq!(
            counts,
            ImportCounts {
                data: 0,
                templates: 2,
                smtp: 1
            }
        );

        let templates: Vec<SavedItem<TemplateSnapshot>> = list(&target).unwrap();
        let names: Vec<_> = templates.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["b", "a", "old"]);
        assert!(templates.iter().filter(|t| t.id == existing.id).count() == 1);
        let source_ids: Vec<_> = bundle.templates.unwrap().into_iter().map(|t| t.id).collect();
        assert!(templates.iter().all(|t| !source_ids.contains(&t.id)));
    }

    #[test]
    fn test_bundle_import_rejects_garbage() {
        let mut conn = conn();
        assert!(matches!(
            import_bundle(&mut conn, "not json"),
            Err(StoreError::InvalidBundle(_))
        ));
        let counts = import_bundle(&mut conn, r#"{"version":2,"exported_at":"2026-01-01T00:00:00Z"}"#).unwrap();
        assert_eq!(counts, ImportCounts::default());
    }
}
