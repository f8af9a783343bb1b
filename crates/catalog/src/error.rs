use foundation::Id;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CatalogError {
    NotFound(Id),
    /// The terrain provider rejected its readiness check.
    TerrainLoad(String),
    Fetch(FetchError),
}

impl std::fmt::Display for CatalogError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CatalogError::NotFound(id) => write!(f, "catalog item {id} not found"),
            CatalogError::TerrainLoad(msg) => write!(f, "failed to load terrain provider: {msg}"),
            CatalogError::Fetch(err) => write!(f, "catalog request failed: {err}"),
        }
    }
}

impl std::error::Error for CatalogError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CatalogError::Fetch(err) => Some(err),
            _ => None,
        }
    }
}

impl From<FetchError> for CatalogError {
    fn from(err: FetchError) -> Self {
        CatalogError::Fetch(err)
    }
}

/// Failure of a feature-info request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    Http(String),
    Status(u16),
    Decode(String),
    NotFound(String),
}

impl std::fmt::Display for FetchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FetchError::Http(msg) => write!(f, "http error: {msg}"),
            FetchError::Status(code) => write!(f, "unexpected status {code}"),
            FetchError::Decode(msg) => write!(f, "invalid response body: {msg}"),
            FetchError::NotFound(url) => write!(f, "no response registered for {url}"),
        }
    }
}

impl std::error::Error for FetchError {}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) => FetchError::Status(status.as_u16()),
            None if err.is_decode() => FetchError::Decode(err.to_string()),
            None => FetchError::Http(err.to_string()),
        }
    }
}
