use std::fmt;
use std::time::Duration;

use scene::SceneError;

use crate::config::ConfigError;

#[derive(Debug)]
pub enum ViewerError {
    /// The engine could not be created. `message` is shown to the user.
    Construction { app_name: String, message: String },
    /// Data source entities never settled their bounds.
    ZoomTimeout(Duration),
    Scene(SceneError),
    Screenshot(String),
    Destroyed,
    Config(ConfigError),
}

impl ViewerError {
    pub fn construction(app_name: &str, cause: impl fmt::Display) -> Self {
        ViewerError::Construction {
            app_name: app_name.to_string(),
            message: format!(
                "{app_name} could not start the 3D viewer ({cause}). Your device or browser \
                 may not support 3D rendering; try the 2D map instead."
            ),
        }
    }
}

impl fmt::Display for ViewerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ViewerError::Construction { message, .. } => f.write_str(message),
            ViewerError::ZoomTimeout(after) => write!(
                f,
                "timed out after {} ms waiting for data source bounds",
                after.as_millis()
            ),
            ViewerError::Scene(err) => write!(f, "rendering engine error: {err}"),
            ViewerError::Screenshot(msg) => write!(f, "screenshot failed: {msg}"),
            ViewerError::Destroyed => write!(f, "viewer has been destroyed"),
            ViewerError::Config(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for ViewerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ViewerError::Scene(err) => Some(err),
            ViewerError::Config(err) => Some(err),
            _ => None,
        }
    }
}

impl From<SceneError> for ViewerError {
    fn from(err: SceneError) -> Self {
        ViewerError::Scene(err)
    }
}

impl From<ConfigError> for ViewerError {
    fn from(err: ConfigError) -> Self {
        ViewerError::Config(err)
    }
}
