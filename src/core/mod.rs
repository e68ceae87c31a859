//! Leaf primitives: the completion boundary, structured-output extraction,
//! and token-budget accounting. Everything here is conversation-agnostic;
//! the agents and orchestrator layers compose these into task flows.

pub mod budget;
pub mod extract;
pub mod llm;
