//! Core orchestration logic for patchwright: the agent contract, the
//! build/task state machines, and the dispatcher that drives tasks through
//! them. Concrete agent bodies (LLM prompting, git, build tools, GitHub,
//! SMTP) are not implemented here -- only the contract they satisfy.

pub mod contract;
pub mod dispatcher;
pub mod state;
