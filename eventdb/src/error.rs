use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("event storage allocation failed: {0}")]
    Allocation(#[from] std::collections::TryReserveError),
}

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("unknown zone id {0}")]
    UnknownZone(usize),

    #[error("unknown event type id {0}")]
    UnknownEventType(u32),

    #[error("unknown source id {0}")]
    UnknownSource(usize),

    #[error("no insert batch is open")]
    BatchNotOpen,

    #[error("an insert batch is already open")]
    BatchAlreadyOpen,

    #[error("zone {0} was marked invalid after an allocation failure")]
    ZoneInvalid(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Error, Debug)]
pub enum QueryError {
    #[error("empty query expression")]
    Empty,

    #[error("unterminated regex literal")]
    UnterminatedRegex,

    #[error("invalid regex: {0}")]
    Regex(#[from] regex::Error),
}

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("failed to read trace: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed trace document: {0}")]
    Parse(#[from] serde_json::Error),

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

pub type Result<T, E = DatabaseError> = std::result::Result<T, E>;
