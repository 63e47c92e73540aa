pub mod clock;
pub mod config;
pub mod error;
pub mod header;
pub mod lead;
pub mod phone;

pub use clock::{CallWindow, Clock, FixedClock, SystemClock};
pub use config::Config;
pub use error::*;
pub use lead::*;
