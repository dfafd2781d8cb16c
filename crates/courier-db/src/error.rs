use thiserror::Error;

/// Every store failure names the operation that failed.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{op}: database error: {source}")]
    Sqlite {
        op: &'static str,
        #[source]
        source: rusqlite::Error,
    },

    #[error("{op}: connection lock poisoned")]
    LockPoisoned { op: &'static str },

    #[error("{op}: serialisation error: {source}")]
    Serialisation {
        op: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

impl StoreError {
    pub fn op(&self) -> &'static str {
        match self {
            Self::Sqlite { op, .. } | Self::LockPoisoned { op } | Self::Serialisation { op, .. } => op,
        }
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
