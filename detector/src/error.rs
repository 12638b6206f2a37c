#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Catalog request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Failed to parse game catalog: {0}")]
    CatalogParse(#[from] serde_json::Error),

    #[error("Failed to parse config: {0}")]
    Config(#[from] toml::de::Error),

    #[error("Failed to start listener: {0}")]
    ListenerStart(String),

    #[error("Detector is already running")]
    AlreadyRunning,

    #[error("Detector must be started inside a tokio runtime")]
    NoRuntime,
}

pub type Result<T> = std::result::Result<T, Error>;
