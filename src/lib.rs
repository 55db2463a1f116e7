//! Loom — code-generation orchestration backend.
//!
//! Turns user prompts into running web apps: a planning model scaffolds
//! initial files, a tool-using agent iterates inside an ephemeral sandbox,
//! a probe verifies the live endpoint, and the outcome is persisted as a
//! message plus fragment in the project's history.

pub mod agent;
pub mod api;
pub mod config;
pub mod errors;
pub mod llm;
pub mod sandbox;
pub mod sanitize;
pub mod server;
pub mod store;
pub mod workflow;
