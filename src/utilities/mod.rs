//! Small shared helpers.

pub mod logger;
