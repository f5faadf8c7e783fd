use std::path::PathBuf;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{0}")]
    General(String),
    #[error("file not found: {}", .0.display())]
    NotFound(PathBuf),
    #[error("invalid CZI file: {0}")]
    InvalidCzi(String),
    #[error("unsupported: {0}")]
    Unsupported(String),
    #[error("scene {scene} out of range, file has {count} scene(s)")]
    SceneOutOfRange { scene: usize, count: usize },
    #[error("output already exists (use --overwrite to replace it): {}", .0.display())]
    OutputExists(PathBuf),
    #[error("file has no scenes and cannot be written as a plate")]
    NotAPlate,
    #[error("OME-NGFF validation failed: {0}")]
    Validation(String),
    #[error("could not launch viewer `{command}`: {source}")]
    Viewer {
        command: String,
        source: std::io::Error,
    },
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    SerdeJson(#[from] serde_json::Error),
    #[error(transparent)]
    Xml(#[from] roxmltree::Error),
    #[error(transparent)]
    Wrapped(Box<dyn std::error::Error + Send + Sync>),
}

impl Error {
    pub fn general(message: impl Into<String>) -> Self {
        Self::General(message.into())
    }

    pub fn invalid_czi(message: impl Into<String>) -> Self {
        Self::InvalidCzi(message.into())
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn wrap(error: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Wrapped(Box::new(error))
    }
}
