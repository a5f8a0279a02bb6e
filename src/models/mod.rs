pub mod sync;
pub mod vendor;

pub use sync::*;
pub use vendor::*;
