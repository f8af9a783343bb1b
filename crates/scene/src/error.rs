#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SceneError {
    /// The engine could not create its rendering context.
    ContextUnavailable(String),
    Destroyed,
    BoundsUnavailable(String),
    PrimitiveFailed(String),
    Capture(String),
}

impl std::fmt::Display for SceneError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SceneError::ContextUnavailable(msg) => {
                write!(f, "rendering context unavailable: {msg}")
            }
            SceneError::Destroyed => write!(f, "scene has been destroyed"),
            SceneError::BoundsUnavailable(msg) => write!(f, "bounding sphere unavailable: {msg}"),
            SceneError::PrimitiveFailed(msg) => write!(f, "primitive failed to load: {msg}"),
            SceneError::Capture(msg) => write!(f, "canvas capture failed: {msg}"),
        }
    }
}

impl std::error::Error for SceneError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PickError {
    Provider { url: Option<String>, message: String },
    Request(String),
}

impl std::fmt::Display for PickError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PickError::Provider {
                url: Some(url),
                message,
            } => write!(f, "feature pick failed for {url}: {message}"),
            PickError::Provider { url: None, message } => {
                write!(f, "feature pick failed: {message}")
            }
            PickError::Request(msg) => write!(f, "feature pick request failed: {msg}"),
        }
    }
}

impl std::error::Error for PickError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerrainError {
    NotReady(String),
    Sample(String),
}

impl std::fmt::Display for TerrainError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TerrainError::NotReady(msg) => write!(f, "terrain provider failed to load: {msg}"),
            TerrainError::Sample(msg) => write!(f, "terrain sampling failed: {msg}"),
        }
    }
}

impl std::error::Error for TerrainError {}
