//! Blob store backend implementations.

pub mod azure;
pub mod local;
pub mod s3;
