pub mod clock;
pub mod config;
pub mod error;
pub mod hash;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::FramegateConfig;
pub use error::{FramegateError, Result};
pub use hash::hash_payload;
pub use types::*;
