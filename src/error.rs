use thiserror::Error;

pub type Result<T> = std::result::Result<T, ChatVaultError>;

#[derive(Debug, Error)]
pub enum ChatVaultError {
    #[error("I/O error")]
    Io(#[from] std::io::Error),

    #[error("invalid backup header: {0}")]
    InvalidHeader(&'static str),

    #[error("unsupported backup file version {0}")]
    UnsupportedVersion(u32),

    #[error("{unit} integrity check failed at frame {ordinal} (offset {offset:#x}): wrong password, wrong file, or corrupted data")]
    Integrity {
        unit: &'static str,
        ordinal: u64,
        offset: u64,
    },

    #[error("backup truncated in frame {ordinal} (offset {offset:#x})")]
    Truncated { ordinal: u64, offset: u64 },

    #[error("frame {ordinal} (offset {offset:#x}) does not decode: {reason}")]
    Decode {
        ordinal: u64,
        offset: u64,
        reason: String,
    },

    #[error("frame {ordinal} (offset {offset:#x}) carries no recognised record type")]
    UnknownRecordType { ordinal: u64, offset: u64 },

    #[error("{kind} consumer failed")]
    Consumer {
        kind: &'static str,
        #[source]
        source: Box<ChatVaultError>,
    },

    #[error("database error")]
    Database(#[from] rusqlite::Error),

    #[error("settings serialisation error")]
    Settings(#[from] serde_json::Error),
}
