use thiserror::Error;

#[derive(Error, Debug)]
pub enum PlayerError {
    #[error("Stream cache error: {0}")]
    Cache(#[from] pmocache::CacheError),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Repository error: {0}")]
    Repository(String),
    #[error("No tokio runtime available: {0}")]
    NoRuntime(String),
    #[error("Player session is closed")]
    SessionClosed,
}

impl PlayerError {
    pub fn config(err: anyhow::Error) -> Self {
        PlayerError::Config(format!("{:#}", err))
    }

    pub fn repository(err: anyhow::Error) -> Self {
        PlayerError::Repository(format!("{:#}", err))
    }
}

pub type Result<T> = std::result::Result<T, PlayerError>;

/// Échec de la restauration d'une qualité vidéo mémorisée.
///
/// C'est un résultat attendu (la disposition des pistes a changé depuis la
/// dernière lecture), pas une erreur de lecture.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    #[error("video group {index} out of range ({available} supported video groups)")]
    GroupOutOfRange { index: usize, available: usize },
    #[error("track {index} out of range in video group {group} ({available} tracks)")]
    TrackOutOfRange {
        group: usize,
        index: usize,
        available: usize,
    },
}
