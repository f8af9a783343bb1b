pub mod config;
pub mod context;
pub mod credits;
pub mod error;
pub mod flight;
pub mod pauser;
pub mod pick;
pub mod provider_coords;
pub mod reconcile;
pub mod selection;
pub mod splitter;
pub mod terrain;
pub mod viewer;

pub use config::*;
pub use context::*;
pub use credits::*;
pub use error::*;
pub use flight::*;
pub use pauser::*;
pub use pick::*;
pub use provider_coords::*;
pub use reconcile::*;
pub use selection::*;
pub use splitter::*;
pub use terrain::*;
pub use viewer::Viewer;
