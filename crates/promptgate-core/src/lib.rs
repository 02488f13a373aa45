//! Promptgate Core: the request pipeline behind the `prompt_engine` tool.
//!
//! A single request flows through an ordered list of stages that parse the
//! command, bind a chain session, apply quality gates, decide which guidance
//! to inject and render the current step. Multi-step chains survive across
//! stateless calls through the session store.
//!
//! The crate has no transport dependency; [`rpc::RpcRouter`] exposes the
//! engine as JSON-RPC 2.0 for whichever transport hosts it.

pub mod chain;
pub mod command_parser;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod frameworks;
pub mod fuzzy;
pub mod gates;
pub mod injection;
pub mod models;
pub mod pipeline;
pub mod prompts;
pub mod renderer;
pub mod rpc;
pub mod scripts;
pub mod state;

// Convenience re-exports
pub use config::EngineConfig;
pub use db::Database;
pub use engine::PromptEngine;
pub use error::EngineError;
pub use models::{ExecutionRequest, ToolResponse};
pub use state::{EngineState, EngineStateInner};
