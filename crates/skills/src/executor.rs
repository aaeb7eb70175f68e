//! Skill execution seam.
//!
//! The worker runtime builds a [`SkillInvocation`] from the LLM's tool
//! call and hands it to a [`SkillExecutor`]. The production executor is
//! [`crate::script::ScriptRunner`], which spawns script-backed skills as
//! child processes; [`PromptModeExecutor`] covers deployments without a
//! skill pack on disk, where every skill is answered in prompt mode.

use std::sync::Arc;

use crate::registry::SkillRegistry;
use crate::types::{SkillOutcome, SkillSpec};
use sg_domain::error::{Error, Result};

/// One skill call, fully resolved: the skill name, the natural-language
/// task, and the script argv when the skill runs as a script.
#[derive(Debug, Clone)]
pub struct SkillInvocation {
    pub skill_name: String,
    pub task: String,
    /// Command-line arguments for script-mode skills (e.g. web search's
    /// `--query`/`--max-results` contract). Empty in prompt mode.
    pub script_args: Vec<String>,
}

#[async_trait::async_trait]
pub trait SkillExecutor: Send + Sync {
    /// Execute a skill. Failures are reported inside the outcome; `Err` is
    /// reserved for executor-level problems (unknown skill, broken runner).
    async fn execute(&self, invocation: &SkillInvocation) -> Result<SkillOutcome>;
}

/// Prompt-mode outcome: the registry entry's description becomes working
/// guidance for the model to apply itself.
pub(crate) fn prompt_outcome(spec: &SkillSpec, task: &str) -> SkillOutcome {
    SkillOutcome::ok(
        format!(
            "以专业方式运用「{}」能力处理：{task}\n\n能力说明：{}",
            spec.display_name, spec.description
        ),
        format!("{} 已以提示模式执行", spec.display_name),
    )
}

/// Prompt-only executor: script-less skills succeed in prompt mode;
/// script skills need [`crate::script::ScriptRunner`] and fail cleanly
/// inside the outcome here.
pub struct PromptModeExecutor {
    registry: Arc<SkillRegistry>,
}

impl PromptModeExecutor {
    pub fn new(registry: Arc<SkillRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait::async_trait]
impl SkillExecutor for PromptModeExecutor {
    async fn execute(&self, invocation: &SkillInvocation) -> Result<SkillOutcome> {
        let spec = self
            .registry
            .get(&invocation.skill_name)
            .ok_or_else(|| Error::SkillNotFound(invocation.skill_name.clone()))?;

        if spec.has_script() {
            tracing::warn!(
                skill = %spec.name,
                "script skill invoked on the prompt-only executor"
            );
            return Ok(SkillOutcome::failure(format!(
                "skill '{}' requires the script runner which is not configured",
                spec.name
            )));
        }

        tracing::debug!(skill = %spec.name, task = %invocation.task, "prompt-mode skill execution");
        Ok(prompt_outcome(&spec, &invocation.task))
    }
}
