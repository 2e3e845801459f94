//! Hestia daemon library - exposes modules for testing.

pub mod config;
pub mod constraints;
pub mod context;
pub mod devices;
pub mod escalation;
pub mod executor;
pub mod fallback;
pub mod modes;
pub mod notify;
pub mod orchestrator;
pub mod patterns;
pub mod planner;
pub mod prompts;
pub mod store;
