#![allow(clippy::missing_errors_doc)]

pub mod context;
pub mod executor;
pub mod gpu;
pub mod jobs;
pub mod worker;
