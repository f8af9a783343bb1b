pub mod camera;
pub mod collection;
pub mod credit;
pub mod data_source;
pub mod error;
pub mod headless;
pub mod imagery;
pub mod input;
pub mod picking;
pub mod primitive;
pub mod scene;
pub mod terrain;

pub use camera::*;
pub use collection::CollectionOp;
pub use credit::*;
pub use data_source::*;
pub use error::*;
pub use imagery::*;
pub use input::*;
pub use picking::*;
pub use primitive::*;
pub use scene::*;
pub use terrain::*;
