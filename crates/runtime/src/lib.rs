pub mod event;
pub mod observable;
pub mod poll;
pub mod reaction;

pub use event::*;
pub use observable::*;
pub use poll::*;
pub use reaction::*;
