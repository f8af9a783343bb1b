pub mod imagery_cache;
pub mod map_item;

pub use imagery_cache::*;
pub use map_item::*;
