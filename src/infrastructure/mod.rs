//! Infrastructure layer - stores, credentials, orchestration and plumbing

pub mod identity;
pub mod observability;
pub mod storage;
