use csv::ReaderBuilder;
use tracing::info;

use crate::error::ImportError;
use crate::model::{Dataset, Record};

const DELIMITERS: [u8; 4] = [b',', b';', b'\t', b'|'];

/// Picks the candidate delimiter that appears most often in the header, comma on ties.
pub fn detect_delimiter(header_line: &str) -> u8 {
    let mut best = b',';
    let mut best_count = 0;
    for d in DELIMITERS {
        let count = header_line.bytes().filter(|b| *b == d).count();
        if count > best_count {
            best = d;
            best_count = count;
        }
    }
    best
}

/// Repeated header names get `_1`, `_2`, ... suffixes so no column is lost.
fn unique_headers<'a>(raw: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut headers: Vec<String> = Vec::new();
    for name in raw {
        let mut candidate = name.to_string();
        let mut n = 1;
        while headers.contains(&candidate) {
            candidate = format!("{name}_{n}");
            n += 1;
        }
        headers.push(candidate);
    }
    headers
}

/// Parses delimited text with a header row into a dataset.
///
/// Column order follows the header. Short rows are padded with empty
/// values, extra trailing cells are dropped.
pub fn parse_delimited(text: &str) -> Result<Dataset, ImportError> {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    let header_line = text
        .lines()
        .find(|l| !l.trim().is_empty())
        .ok_or(ImportError::MissingHeader)?;
    let delimiter = detect_delimiter(header_line);

    let mut reader = ReaderBuilder::new()
        .delimiter(delimiter)
        .flexible(true)
        .from_reader(text.as_bytes());

    let headers = unique_headers(reader.headers()?.iter().map(str::trim));
    if headers.iter().all(String::is_empty) {
        return Err(ImportError::MissingHeader);
    }

    let mut rows = Vec::new();
    for result in reader.records() {
        let row = result?;
        if row.iter().all(|cell| cell.is_empty()) && row.len() <= 1 {
            continue;
        }
        let record: Record = headers
            .iter()
            .enumerate()
            .map(|(i, h)| (h.clone(), row.get(i).unwrap_or_default().to_string()))
            .collect();
        rows.push(record);
    }

    if rows.is_empty() {
        return Err(ImportError::NoData);
    }
    info!(rows = rows.len(), columns = headers.len(), "dataset imported");
    Ok(Dataset::new(rows))
}
