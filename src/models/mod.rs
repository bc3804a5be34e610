pub mod enums;
pub mod events;
pub mod filters;
pub mod summary;

pub use enums::*;
pub use events::*;
pub use filters::*;
pub use summary::*;
