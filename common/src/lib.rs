pub mod types;
pub mod device;
pub mod error;

pub use types::*;
pub use device::*;
pub use error::*;
