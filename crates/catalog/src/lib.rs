pub mod error;
pub mod feature;
pub mod feature_info;
pub mod item;
pub mod terrain_item;
pub mod workbench;

pub use error::*;
pub use feature::*;
pub use feature_info::*;
pub use item::*;
pub use terrain_item::*;
pub use workbench::*;
