//! Script-mode skill execution.
//!
//! Script-backed skills (web search's `search.py` is the builtin case)
//! live on disk under `<root>/<skill>/scripts/<script>` and run as child
//! processes with the invocation's argv — the `--query`/`--max-results`
//! contract the worker builds. Stdout is the result, stderr the error;
//! non-zero exits and spawn failures are failure outcomes, never panics.
//! Callers bound wall time; `kill_on_drop` makes that bound terminate the
//! child too.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use tokio::process::Command;

use crate::executor::{prompt_outcome, SkillExecutor, SkillInvocation};
use crate::registry::SkillRegistry;
use crate::types::{SkillOutcome, SkillSpec};
use sg_domain::error::{Error, Result};
use sg_domain::model::truncate_chars;

/// Cap on captured stdout/stderr, in chars.
const MAX_SCRIPT_OUTPUT_CHARS: usize = 20_000;

pub struct ScriptRunner {
    registry: Arc<SkillRegistry>,
    /// Directory holding one subdirectory per skill.
    skills_root: PathBuf,
}

impl ScriptRunner {
    pub fn new(registry: Arc<SkillRegistry>, skills_root: impl Into<PathBuf>) -> Self {
        Self {
            registry,
            skills_root: skills_root.into(),
        }
    }

    fn skill_dir(&self, spec: &SkillSpec) -> PathBuf {
        self.skills_root.join(&spec.name)
    }

    fn script_path(&self, spec: &SkillSpec, script: &str) -> PathBuf {
        self.skill_dir(spec).join("scripts").join(script)
    }
}

/// Pick the interpreter by extension; anything else must be executable
/// on its own.
fn command_for(script_path: &Path) -> Command {
    let interpreter = match script_path.extension().and_then(|e| e.to_str()) {
        Some("py") => Some("python3"),
        Some("sh") => Some("sh"),
        Some("js") => Some("node"),
        _ => None,
    };
    match interpreter {
        Some(interpreter) => {
            let mut cmd = Command::new(interpreter);
            cmd.arg(script_path);
            cmd
        }
        None => Command::new(script_path),
    }
}

#[async_trait::async_trait]
impl SkillExecutor for ScriptRunner {
    async fn execute(&self, invocation: &SkillInvocation) -> Result<SkillOutcome> {
        let spec = self
            .registry
            .get(&invocation.skill_name)
            .ok_or_else(|| Error::SkillNotFound(invocation.skill_name.clone()))?;

        // Script-less skills run in prompt mode here too.
        let Some(script) = spec.script.clone() else {
            return Ok(prompt_outcome(&spec, &invocation.task));
        };

        let script_path = self.script_path(&spec, &script);
        if !script_path.exists() {
            tracing::warn!(skill = %spec.name, path = %script_path.display(), "skill script missing");
            return Ok(SkillOutcome::failure(format!(
                "脚本文件不存在: {}",
                script_path.display()
            )));
        }

        let mut cmd = command_for(&script_path);
        cmd.args(&invocation.script_args)
            .current_dir(self.skill_dir(&spec))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        tracing::debug!(
            skill = %spec.name,
            script = %script,
            args = ?invocation.script_args,
            "executing skill script"
        );

        let output = match cmd.output().await {
            Ok(output) => output,
            Err(e) => {
                tracing::warn!(skill = %spec.name, error = %e, "skill script failed to spawn");
                return Ok(SkillOutcome::failure(format!("脚本启动失败: {e}")));
            }
        };

        let stdout = truncate_chars(
            &String::from_utf8_lossy(&output.stdout),
            MAX_SCRIPT_OUTPUT_CHARS,
        );
        let stderr = truncate_chars(
            &String::from_utf8_lossy(&output.stderr),
            MAX_SCRIPT_OUTPUT_CHARS,
        );

        if output.status.success() {
            Ok(SkillOutcome::ok(stdout, format!("脚本 {script} 执行成功")))
        } else {
            let code = output.status.code();
            tracing::warn!(skill = %spec.name, code = ?code, "skill script exited with failure");
            Ok(SkillOutcome {
                success: false,
                // Partial stdout is still worth feeding back to the model.
                result: stdout,
                summary: format!("脚本 {script} 执行失败"),
                error: Some(if stderr.trim().is_empty() {
                    format!("exit code {:?}", code)
                } else {
                    stderr
                }),
            })
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
