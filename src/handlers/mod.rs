pub mod config;
pub mod sessions;

pub use self::config::*;
pub use self::sessions::*;
