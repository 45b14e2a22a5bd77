pub mod delivery;
pub mod observe;
pub mod persist;

pub use delivery::*;
pub use observe::*;
pub use persist::*;
