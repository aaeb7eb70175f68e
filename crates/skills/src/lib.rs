//! Skill registry and execution.
//!
//! Skills are named external capabilities the LLM invokes through tool
//! calls. The registry holds the vocabulary and projects tool definitions
//! for a worker's assigned subset. Execution goes through the
//! [`SkillExecutor`] trait: [`ScriptRunner`] spawns script-backed skills
//! (web search) as child processes, and both executors answer
//! script-less skills in prompt mode.

pub mod executor;
pub mod registry;
pub mod script;
pub mod types;

pub use executor::{PromptModeExecutor, SkillExecutor, SkillInvocation};
pub use registry::SkillRegistry;
pub use script::ScriptRunner;
pub use types::{SkillOutcome, SkillSpec};
