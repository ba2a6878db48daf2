//! Collaborator clients and the turn pipeline.
//!
//! Everything here is constructed once at process start and shared read-only
//! across turns; per-turn state lives inside [`pipeline::TurnPipeline::run`].

pub mod agent;
pub mod authorization;
pub mod config;
pub mod database;
pub mod http;
pub mod identity;
pub mod llm;
pub mod pipeline;
pub mod prompt;
pub mod retrieval;
pub mod store;
pub mod tools;

#[cfg(test)]
mod test_support;
