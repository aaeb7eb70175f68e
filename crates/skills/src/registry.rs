//! Skill registry: the vocabulary of capabilities the planner assigns and
//! workers invoke.

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::types::SkillSpec;
use sg_domain::tool::ToolDefinition;

pub struct SkillRegistry {
    skills: RwLock<HashMap<String, SkillSpec>>,
}

impl SkillRegistry {
    pub fn new() -> Self {
        Self {
            skills: RwLock::new(HashMap::new()),
        }
    }

    /// Registry pre-loaded with the builtin vocabulary the planner knows
    /// how to assign.
    pub fn builtin() -> Self {
        let registry = Self::new();
        registry.register(SkillSpec {
            name: "web_search".into(),
            display_name: "网络搜索".into(),
            description: "在互联网上搜索信息，获取最新数据和知识".into(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "query": {"type": "string", "description": "搜索关键词"},
                    "max_results": {"type": "integer", "description": "返回结果数量上限"},
                    "type": {"type": "string", "description": "搜索类型 (web/news)"},
                    "region": {"type": "string"},
                    "time_range": {"type": "string"}
                },
                "required": ["query"]
            }),
            script: Some("search.py".into()),
        });
        registry.register(SkillSpec {
            name: "data_analysis".into(),
            display_name: "数据分析".into(),
            description: "对结构化数据进行统计分析、趋势分析".into(),
            parameters: task_only_parameters(),
            script: None,
        });
        registry.register(SkillSpec {
            name: "code_execution".into(),
            display_name: "代码执行".into(),
            description: "执行代码进行计算和数据处理".into(),
            parameters: task_only_parameters(),
            script: None,
        });
        registry.register(SkillSpec {
            name: "document_summary".into(),
            display_name: "文档摘要".into(),
            description: "对长文本进行摘要和关键信息提取".into(),
            parameters: task_only_parameters(),
            script: None,
        });
        registry.register(SkillSpec {
            name: "reasoning".into(),
            display_name: "推理分析".into(),
            description: "进行深度逻辑推理、因果分析".into(),
            parameters: task_only_parameters(),
            script: None,
        });
        registry
    }

    pub fn register(&self, spec: SkillSpec) {
        self.skills.write().insert(spec.name.clone(), spec);
    }

    pub fn get(&self, name: &str) -> Option<SkillSpec> {
        self.skills.read().get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.skills.read().contains_key(name)
    }

    pub fn list_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.skills.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Project tool definitions for the given assignment. Unknown names
    /// are skipped with a warning — a worker only ever sees the
    /// intersection of assigned and registered skills.
    pub fn tool_definitions(&self, assigned: &[String]) -> Vec<ToolDefinition> {
        let skills = self.skills.read();
        assigned
            .iter()
            .filter_map(|name| match skills.get(name) {
                Some(spec) => Some(ToolDefinition {
                    name: spec.name.clone(),
                    description: format!("{} — {}", spec.display_name, spec.description),
                    parameters: spec.parameters.clone(),
                }),
                None => {
                    tracing::warn!(skill = %name, "assigned skill not registered, skipping");
                    None
                }
            })
            .collect()
    }
}

impl Default for SkillRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

fn task_only_parameters() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "task": {"type": "string", "description": "要执行的具体任务描述"}
        },
        "required": ["task"]
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_vocabulary_present() {
        let registry = SkillRegistry::builtin();
        for name in [
            "web_search",
            "data_analysis",
            "code_execution",
            "document_summary",
            "reasoning",
        ] {
            assert!(registry.contains(name), "missing builtin skill {name}");
        }
    }

    #[test]
    fn tool_definitions_filter_unknown() {
        let registry = SkillRegistry::builtin();
        let defs = registry.tool_definitions(&[
            "web_search".into(),
            "definitely_not_a_skill".into(),
        ]);
        assert_eq!(defs.len(), 1);
        assert_eq!(defs[0].name, "web_search");
    }

    #[test]
    fn web_search_requires_query() {
        let registry = SkillRegistry::builtin();
        let spec = registry.get("web_search").unwrap();
        assert!(spec.has_script());
        assert_eq!(spec.parameters["required"][0], "query");
    }
}
