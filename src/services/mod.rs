//! Service-layer orchestration

pub mod submission;
