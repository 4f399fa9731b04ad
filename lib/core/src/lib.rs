//! Core domain types and utilities for the tidemark platform.
//!
//! This crate provides the strongly-typed identifiers and the error
//! handling foundation shared by the workflow automation crates.

pub mod error;
pub mod id;

pub use error::Result;
pub use id::{EventId, ExecutionId, ProjectId, TaskId, TenantId, WorkflowId};
