mod decode;
mod summary;

pub use decode::Decoded;
pub use summary::*;
