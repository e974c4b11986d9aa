pub mod enums;
pub mod medication;
pub mod dose_log;
pub mod occurrence;

pub use enums::*;
pub use medication::*;
pub use dose_log::*;
pub use occurrence::*;
