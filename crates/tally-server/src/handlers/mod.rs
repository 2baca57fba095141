//! API handlers organized by domain

pub mod health;
pub mod imports;
pub mod sessions;

pub use health::*;
pub use imports::*;
pub use sessions::*;
