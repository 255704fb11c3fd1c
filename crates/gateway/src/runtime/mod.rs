//! Core runtime — the orchestrator that ties sessions, prompt building, LLM
//! streaming, tool dispatch, and persistence into one deterministic loop.
//!
//! Entry point: [`run_turn`] takes a session + user message and returns a
//! stream of [`TurnEvent`]s suitable for SSE or non-streaming aggregation.

pub mod apikeys;
pub mod approval;
pub mod cancel;
pub mod context;
pub mod marathon;
pub mod session_lock;
pub mod token_accountant;
pub mod turn;
pub mod webhook;

pub use turn::{run_turn, TurnEvent, TurnInput, TurnMode};
