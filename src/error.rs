use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DatasetError {
    #[error("row {0} does not exist")]
    RowOutOfRange(usize),

    #[error("column '{0}' does not exist")]
    UnknownColumn(String),

    #[error("column '{0}' already exists")]
    DuplicateColumn(String),

    #[error("column name must not be blank")]
    BlankColumn,

    #[error("cannot delete the last column")]
    LastColumn,

    #[error("dataset has no rows")]
    NoRows,
}

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("failed to parse delimited data: {0}")]
    Parse(#[from] csv::Error),

    #[error("header row is missing")]
    MissingHeader,

    #[error("no valid data found")]
    NoData,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid bundle: {0}")]
    InvalidBundle(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error("relay configuration error: {0}")]
    Config(String),

    #[error("a campaign is already running")]
    AlreadyRunning,

    #[error("a campaign is already scheduled")]
    AlreadyScheduled,
}
