//! Analysis module - robust statistics over sample windows

mod trimmed_mean;

pub use trimmed_mean::*;
