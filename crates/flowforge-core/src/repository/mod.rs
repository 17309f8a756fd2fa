//! Persistence ports.
//!
//! Repositories hold no business logic; the orchestrator and approval gate
//! decide every state transition and use these traits to record them.

pub mod memory;
pub mod workflow;

pub use memory::InMemoryWorkflowRepository;
pub use workflow::WorkflowRepository;
