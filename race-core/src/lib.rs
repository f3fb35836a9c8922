pub mod rotation;
pub mod stats;
pub mod sync;
pub mod throttle;

// Re-export main components
pub use rotation::*;
pub use stats::*;
pub use sync::*;
pub use throttle::*;
