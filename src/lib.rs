#![allow(clippy::upper_case_acronyms)]

pub mod activate;
pub mod codec;
pub mod config;
pub mod device;
pub mod dispatch;
pub mod domain;
pub mod error;
pub mod features;
pub mod format;
pub mod geometry;
pub mod meta;
pub mod meta_layout;
pub mod rdwr;
pub mod realm;
pub mod report;
pub mod state;
pub mod stats;
pub mod zone;

pub use device::Device;
pub use error::{ZbcError, ZbcResult};
