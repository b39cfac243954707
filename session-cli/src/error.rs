use thiserror::Error;

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Client error: {0}")]
    Client(#[from] session_client::ClientError),

    #[error("Credential store error: {0}")]
    Store(#[from] session_client::StoreError),

    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Config write error: {0}")]
    ConfigWrite(#[from] toml::ser::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Not signed in - run `sesh login` first")]
    NotSignedIn,
}

impl AppError {
    /// Process exit code for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Client(e) if e.is_session_invalid() => 3,
            Self::NotSignedIn => 3,
            Self::InvalidInput(_) => 2,
            _ => 1,
        }
    }
}
