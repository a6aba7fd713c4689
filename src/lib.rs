//! # ensemble
//!
//! Multi-agent orchestration engine for LLM-driven software generation.
//!
//! A team of role-bound agents (planner, coder, tester, reviewer,
//! coordinator) runs in a fixed order over bounded iterations against a
//! shared evolving context. Each agent's output becomes the next agent's
//! input; structured tool actions embedded in the output are applied to the
//! project workspace along the way.
//!
//! ## Pipeline
//!
//! ```text
//!   ┌─────────────────────────────────────────────────────┐
//!   │                 SessionScheduler                    │
//!   │  per iteration, per enabled agent in order:         │
//!   │   guard check → invoke → extract/apply → record     │
//!   └───────┬──────────────┬──────────────┬───────────────┘
//!           │              │              │
//!           ▼              ▼              ▼
//!    RateBudgetGuard  AgentInvoker   coordinator vote
//!                          │
//!                          ▼
//!                  LlmClient / Workspace
//! ```
//!
//! ## Modules
//! - `scheduler`: iteration loop and session state machine
//! - `invoker`: one agent turn (prompt, LLM call, actions, cost)
//! - `actions`: tool-action extraction from model output
//! - `guard`: sliding-window rate limits and team budget pre-checks
//! - `roles`: dynamic role adaptation between iterations
//! - `fallback`: single-agent degraded recovery
//! - `store`: persistence (memory and sqlite backends)
//! - `api`: axum HTTP surface

pub mod actions;
pub mod api;
pub mod config;
pub mod credentials;
pub mod error;
pub mod fallback;
pub mod guard;
pub mod invoker;
pub mod llm;
pub mod model;
pub mod progress;
pub mod roles;
pub mod scheduler;
pub mod store;
pub mod workspace;

pub use config::Config;
pub use error::{OrchestratorError, Result};
pub use model::{Agent, AgentRole, Message, Session, SessionStatus, Team};
pub use scheduler::{SessionScheduler, StartSessionRequest};
