//! Role emergence — the planning call that turns a task into a cast of
//! specialist roles, their skill assignments, and the phase layout.
//!
//! One streamed LLM call against a fixed system prompt demanding strict
//! JSON; extraction tolerates fenced blocks, prose around the object, and
//! bare JSON. Anything unparseable is a planning error that aborts the
//! run.

use std::sync::Arc;

use futures_util::StreamExt;
use regex::Regex;
use uuid::Uuid;

use sg_domain::error::{Error, Result};
use sg_domain::model::{
    PlanPhase, PreviousRole, RoleProfile, SkillAssignment, Station, TaskPlan, WorkMethodology,
    WorkerSpec,
};
use sg_domain::stream::StreamEvent;
use sg_domain::tool::Message;
use sg_providers::{ChatRequest, LlmProvider};

use super::prompts;

pub const MAX_ROLES: usize = 5;
pub const MIN_ROLES: usize = 2;

pub struct RolePlanner {
    provider: Arc<dyn LlmProvider>,
    model: Option<String>,
}

impl RolePlanner {
    pub fn new(provider: Arc<dyn LlmProvider>, model: Option<String>) -> Self {
        Self { provider, model }
    }

    /// Run the planning call, forwarding raw text deltas to `on_delta`
    /// (they become the planning text stream), then parse the accumulated
    /// output into a [`TaskPlan`].
    pub async fn emerge<F>(
        &self,
        task: &str,
        context: Option<&str>,
        previous_roles: &[PreviousRole],
        mut on_delta: F,
    ) -> Result<TaskPlan>
    where
        F: FnMut(&str),
    {
        let messages = vec![
            Message::system(prompts::ROLE_EMERGENCE_SYSTEM_PROMPT),
            Message::user(prompts::build_planner_user_prompt(
                task,
                context,
                previous_roles,
            )),
        ];
        let mut req = ChatRequest::new(messages).with_model(self.model.clone());
        // Role emergence wants some creativity.
        req.temperature = Some(0.7);

        let mut stream = self
            .provider
            .chat_stream(&req)
            .await
            .map_err(|e| Error::Planning(e.to_string()))?;

        let mut full = String::new();
        while let Some(event) = stream.next().await {
            match event.map_err(|e| Error::Planning(e.to_string()))? {
                StreamEvent::Token { text } => {
                    on_delta(&text);
                    full.push_str(&text);
                }
                StreamEvent::Error { message } => return Err(Error::Planning(message)),
                StreamEvent::Done { .. } => break,
                _ => {}
            }
        }

        parse_plan(task, &full)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Parsing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Parse the planner's response into a validated [`TaskPlan`].
pub fn parse_plan(original_task: &str, response: &str) -> Result<TaskPlan> {
    let json_str = extract_json(response).ok_or_else(|| {
        Error::Planning(format!(
            "无法从响应中提取 JSON: {}",
            sg_domain::model::truncate_chars(response, 200)
        ))
    })?;

    let data: serde_json::Value =
        serde_json::from_str(&json_str).map_err(|e| Error::Planning(format!("JSON 解析失败: {e}")))?;

    let roles_data = data
        .get("roles")
        .and_then(|v| v.as_array())
        .filter(|a| !a.is_empty())
        .ok_or_else(|| Error::Planning("响应中没有 roles 字段或为空".into()))?;

    let mut roles_data: Vec<&serde_json::Value> = roles_data.iter().collect();
    if roles_data.len() > MAX_ROLES {
        tracing::warn!(
            count = roles_data.len(),
            "too many roles in plan, truncating to {MAX_ROLES}"
        );
        roles_data.truncate(MAX_ROLES);
    }
    if roles_data.len() < MIN_ROLES {
        tracing::warn!(
            count = roles_data.len(),
            "fewer than {MIN_ROLES} roles in plan, coverage may be thin"
        );
    }

    let mut workers = Vec::new();
    for (idx, role_data) in roles_data.iter().enumerate() {
        let worker = parse_role(idx, role_data)
            .map_err(|e| Error::Planning(format!("解析角色 {idx} 失败: {e}")))?;
        workers.push(worker);
    }

    let phases: Vec<PlanPhase> = data
        .get("phases")
        .and_then(|v| serde_json::from_value(v.clone()).ok())
        .filter(|p: &Vec<PlanPhase>| !p.is_empty())
        .unwrap_or_else(|| {
            vec![PlanPhase {
                phase_number: 1,
                name: "执行阶段".into(),
                ..Default::default()
            }]
        });

    // One station per phase; a plan always carries at least one.
    let stations: Vec<Station> = phases
        .iter()
        .map(|phase| Station::new(format!("阶段{}中继站", phase.phase_number), phase.phase_number))
        .collect();

    Ok(TaskPlan {
        id: Uuid::new_v4().to_string(),
        original_task: original_task.to_string(),
        analysis: data
            .get("analysis")
            .and_then(|v| v.as_str())
            .unwrap_or("任务分析中...")
            .to_string(),
        workers,
        stations,
        phases,
        estimated_duration_seconds: data
            .get("estimated_duration_seconds")
            .and_then(|v| v.as_u64())
            .unwrap_or(300),
        integration_strategy: data
            .get("integration_strategy")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string(),
    })
}

fn parse_role(idx: usize, role_data: &serde_json::Value) -> Result<WorkerSpec> {
    let obj = role_data
        .as_object()
        .ok_or_else(|| Error::Planning(format!("角色 {idx} 不是有效的对象")))?;

    let name = obj
        .get("name")
        .and_then(|v| v.as_str())
        .ok_or_else(|| Error::Planning(format!("角色 {idx} 缺少 name 字段")))?
        .to_string();
    let description = obj
        .get("description")
        .and_then(|v| v.as_str())
        .unwrap_or(&name)
        .to_string();

    let methodology: Option<WorkMethodology> = obj
        .get("methodology")
        .filter(|v| v.is_object())
        .and_then(|v| serde_json::from_value(v.clone()).ok());

    let mut assigned_skills: Vec<SkillAssignment> = obj
        .get("assigned_skills")
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|s| {
                    let skill_name = s.get("skill_name")?.as_str()?.to_string();
                    Some(SkillAssignment {
                        skill_display_name: s
                            .get("skill_display_name")
                            .and_then(|v| v.as_str())
                            .unwrap_or(&skill_name)
                            .to_string(),
                        reason: s
                            .get("reason")
                            .and_then(|v| v.as_str())
                            .unwrap_or_default()
                            .to_string(),
                        skill_name,
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    if assigned_skills.is_empty() {
        assigned_skills = default_skills(&name, &description);
    }

    let string_list = |key: &str| -> Vec<String> {
        obj.get(key)
            .and_then(|v| v.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| v.as_str().map(String::from))
                    .collect()
            })
            .unwrap_or_default()
    };

    let role = RoleProfile {
        id: Uuid::new_v4().to_string(),
        description: description.clone(),
        capabilities: string_list("capabilities"),
        focus_areas: string_list("focus_areas"),
        expertise_level: obj
            .get("expertise_level")
            .and_then(|v| v.as_str())
            .unwrap_or("expert")
            .to_string(),
        work_objective: obj
            .get("work_objective")
            .and_then(|v| v.as_str())
            .map(String::from)
            .unwrap_or_else(|| format!("完成{name}相关的分析任务")),
        deliverables: string_list("deliverables"),
        methodology,
        assigned_skills,
        system_prompt: obj
            .get("system_prompt")
            .and_then(|v| v.as_str())
            .map(String::from)
            .unwrap_or_else(|| format!("你是{name}，负责相关领域的分析工作。")),
        relay_triggers: string_list("relay_triggers"),
        emergence_reasoning: obj
            .get("emergence_reasoning")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string(),
        name: name.clone(),
    };

    let task_segment = obj
        .get("task_segment")
        .and_then(|v| v.as_str())
        .map(String::from)
        .unwrap_or_else(|| format!("执行{name}相关的分析任务"));

    Ok(WorkerSpec::new(role, task_segment))
}

/// Keyword heuristics mapping a role's name+description onto the builtin
/// skill vocabulary. Fallback is `reasoning`.
fn default_skills(name: &str, description: &str) -> Vec<SkillAssignment> {
    let combined = format!("{} {}", name.to_lowercase(), description.to_lowercase());
    let assignment = |skill_name: &str, display: &str, reason: &str| SkillAssignment {
        skill_name: skill_name.into(),
        skill_display_name: display.into(),
        reason: reason.into(),
    };
    let mut skills = Vec::new();

    if ["分析", "研究", "评估", "analysis", "研判", "解读"]
        .iter()
        .any(|k| combined.contains(k))
    {
        skills.push(assignment("reasoning", "推理分析", "用于深度分析和推理"));
    }
    if ["数据", "统计", "指标", "data", "metrics"]
        .iter()
        .any(|k| combined.contains(k))
    {
        skills.push(assignment("data_analysis", "数据分析", "用于数据处理和分析"));
    }
    if ["搜索", "调研", "信息", "search", "research", "资料"]
        .iter()
        .any(|k| combined.contains(k))
    {
        skills.push(assignment("web_search", "网络搜索", "用于信息检索"));
    }
    if ["文档", "报告", "摘要", "document", "summary", "整理"]
        .iter()
        .any(|k| combined.contains(k))
    {
        skills.push(assignment("document_summary", "文档摘要", "用于文档处理"));
    }

    if skills.is_empty() {
        skills.push(assignment("reasoning", "推理分析", "通用分析能力"));
    }

    skills
}

/// Pull a JSON object out of model output: ```json fence, then any fence,
/// then a brace-balanced scan, then the stripped raw text.
pub fn extract_json(text: &str) -> Option<String> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }

    let json_fence = Regex::new(r"```json\s*([\s\S]*?)\s*```").ok()?;
    if let Some(caps) = json_fence.captures(text) {
        let extracted = caps.get(1)?.as_str().trim();
        if !extracted.is_empty() {
            return Some(extracted.to_string());
        }
    }

    let any_fence = Regex::new(r"```\s*([\s\S]*?)\s*```").ok()?;
    if let Some(caps) = any_fence.captures(text) {
        let extracted = caps.get(1)?.as_str().trim();
        if extracted.starts_with('{') {
            return Some(extracted.to_string());
        }
    }

    // Brace-balanced scan for the outermost object.
    let mut depth = 0usize;
    let mut start = None;
    for (i, ch) in text.char_indices() {
        match ch {
            '{' => {
                if depth == 0 {
                    start = Some(i);
                }
                depth += 1;
            }
            '}' => {
                if depth > 0 {
                    depth -= 1;
                    if depth == 0 {
                        if let Some(s) = start {
                            return Some(text[s..=i].to_string());
                        }
                    }
                }
            }
            _ => {}
        }
    }

    if text.starts_with('{') && text.ends_with('}') {
        return Some(text.to_string());
    }

    None
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use sg_providers::{ChatResponse, MockProvider};

    fn plan_json(role_count: usize) -> String {
        let roles: Vec<String> = (0..role_count)
            .map(|i| {
                format!(
                    r#"{{
                        "name": "角色{i}",
                        "description": "负责维度{i}的数据研究",
                        "capabilities": ["能力{i}"],
                        "work_objective": "完成维度{i}",
                        "assigned_skills": [
                            {{"skill_name": "reasoning", "skill_display_name": "推理分析", "reason": "分析"}}
                        ],
                        "system_prompt": "你是角色{i}，一名专业分析师。",
                        "task_segment": "分析维度{i}"
                    }}"#
                )
            })
            .collect();
        format!(
            r#"{{
                "analysis": "任务需要多角度协作",
                "roles": [{}],
                "phases": [
                    {{"phase_number": 1, "name": "并行分析", "participating_roles": ["角色0"]}},
                    {{"phase_number": 2, "name": "整合"}}
                ],
                "estimated_duration_seconds": 240,
                "integration_strategy": "统筹整合"
            }}"#,
            roles.join(",")
        )
    }

    #[test]
    fn extract_json_fenced_block() {
        let text = format!("分析如下：\n```json\n{}\n```\n完毕。", r#"{"roles": []}"#);
        assert_eq!(extract_json(&text).unwrap(), r#"{"roles": []}"#);
    }

    #[test]
    fn extract_json_plain_fence() {
        let text = "```\n{\"a\": 1}\n```";
        assert_eq!(extract_json(text).unwrap(), "{\"a\": 1}");
    }

    #[test]
    fn extract_json_brace_scan_in_prose() {
        let text = "前置说明 {\"a\": {\"b\": 2}} 后记";
        assert_eq!(extract_json(text).unwrap(), "{\"a\": {\"b\": 2}}");
    }

    #[test]
    fn extract_json_raw_object() {
        assert_eq!(extract_json("  {\"x\": 1}  ").unwrap(), "{\"x\": 1}");
    }

    #[test]
    fn extract_json_none_for_prose() {
        assert!(extract_json("Sorry, I cannot help with that.").is_none());
        assert!(extract_json("").is_none());
    }

    #[test]
    fn parse_plan_happy_path() {
        let plan = parse_plan("分析电影X", &plan_json(3)).unwrap();
        assert_eq!(plan.workers.len(), 3);
        assert_eq!(plan.original_task, "分析电影X");
        assert_eq!(plan.phases.len(), 2);
        assert_eq!(plan.stations.len(), 2);
        assert_eq!(plan.stations[0].name, "阶段1中继站");
        assert_eq!(plan.estimated_duration_seconds, 240);
        assert_eq!(plan.workers[0].task_segment, "分析维度0");
    }

    #[test]
    fn parse_plan_truncates_excess_roles() {
        let plan = parse_plan("任务", &plan_json(7)).unwrap();
        assert_eq!(plan.workers.len(), MAX_ROLES);
    }

    #[test]
    fn parse_plan_single_role_allowed_with_warning() {
        let plan = parse_plan("任务", &plan_json(1)).unwrap();
        assert_eq!(plan.workers.len(), 1);
    }

    #[test]
    fn parse_plan_unparseable_is_planning_error() {
        let err = parse_plan("任务", "Sorry, I cannot...").unwrap_err();
        assert!(matches!(err, Error::Planning(_)));
    }

    #[test]
    fn parse_plan_missing_roles_is_planning_error() {
        let err = parse_plan("任务", r#"{"analysis": "无角色"}"#).unwrap_err();
        assert!(matches!(err, Error::Planning(_)));
        let err = parse_plan("任务", r#"{"roles": []}"#).unwrap_err();
        assert!(matches!(err, Error::Planning(_)));
    }

    #[test]
    fn parse_plan_role_without_name_fails() {
        let response = r#"{"roles": [{"description": "匿名角色"}]}"#;
        let err = parse_plan("任务", response).unwrap_err();
        assert!(matches!(err, Error::Planning(_)));
    }

    #[test]
    fn parse_plan_defaults_missing_phases_and_station() {
        let response = r#"{"analysis": "a", "roles": [{"name": "分析师", "description": "数据研究"}]}"#;
        let plan = parse_plan("任务", response).unwrap();
        assert_eq!(plan.phases.len(), 1);
        assert_eq!(plan.phases[0].name, "执行阶段");
        assert_eq!(plan.stations.len(), 1);
    }

    #[test]
    fn missing_skills_filled_by_keyword_heuristics() {
        let response = r#"{"roles": [
            {"name": "数据统计专员", "description": "负责指标统计"},
            {"name": "资料调研员", "description": "负责搜索资料"}
        ]}"#;
        let plan = parse_plan("任务", response).unwrap();
        let names: Vec<&str> = plan.workers[0]
            .role
            .assigned_skills
            .iter()
            .map(|s| s.skill_name.as_str())
            .collect();
        assert!(names.contains(&"data_analysis"));
        let names: Vec<&str> = plan.workers[1]
            .role
            .assigned_skills
            .iter()
            .map(|s| s.skill_name.as_str())
            .collect();
        assert!(names.contains(&"web_search"));
    }

    #[test]
    fn unmatched_role_falls_back_to_reasoning() {
        let skills = default_skills("神秘角色", "无法归类");
        assert_eq!(skills.len(), 1);
        assert_eq!(skills[0].skill_name, "reasoning");
    }

    #[tokio::test]
    async fn emerge_streams_deltas_and_parses() {
        let provider = Arc::new(MockProvider::new(vec![ChatResponse::text(format!(
            "正在规划角色...\n```json\n{}\n```",
            plan_json(2)
        ))]));
        let planner = RolePlanner::new(provider, None);

        let mut streamed = String::new();
        let plan = planner
            .emerge("分析电影X", None, &[], |delta| streamed.push_str(delta))
            .await
            .unwrap();

        assert_eq!(plan.workers.len(), 2);
        assert!(streamed.contains("正在规划角色"));
    }

    #[tokio::test]
    async fn emerge_provider_error_is_planning_error() {
        let provider = Arc::new(MockProvider::new(vec![]));
        provider.push_error("upstream down");
        let planner = RolePlanner::new(provider, None);
        let err = planner.emerge("任务", None, &[], |_| {}).await.unwrap_err();
        assert!(matches!(err, Error::Planning(_)));
    }
}
