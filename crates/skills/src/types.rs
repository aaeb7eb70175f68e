use serde::{Deserialize, Serialize};

/// A named capability the LLM can invoke through a tool call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillSpec {
    pub name: String,
    pub display_name: String,
    pub description: String,
    /// JSON Schema for the tool arguments exposed to the LLM.
    pub parameters: serde_json::Value,
    /// Script entry point, when the skill runs as an external process.
    /// Script-less skills run in prompt mode.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script: Option<String>,
}

impl SkillSpec {
    pub fn has_script(&self) -> bool {
        self.script.is_some()
    }
}

/// What a skill execution produced. This is the executor's call contract:
/// failures are data, not panics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillOutcome {
    pub success: bool,
    #[serde(default)]
    pub result: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SkillOutcome {
    pub fn ok(result: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            success: true,
            result: result.into(),
            summary: summary.into(),
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        let error = error.into();
        Self {
            success: false,
            result: String::new(),
            summary: format!("Error: {error}"),
            error: Some(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_carries_summary_and_error() {
        let outcome = SkillOutcome::failure("timeout");
        assert!(!outcome.success);
        assert_eq!(outcome.error.as_deref(), Some("timeout"));
        assert!(outcome.summary.contains("timeout"));
    }

    #[test]
    fn outcome_serializes_without_null_error() {
        let json = serde_json::to_string(&SkillOutcome::ok("r", "s")).unwrap();
        assert!(!json.contains("error"));
    }
}
