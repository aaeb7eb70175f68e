//! Prompt assembly for the planner, workers, and the integration pass.
//!
//! The relay tags and completion markers in these prompts are part of the
//! system's contract: the worker runtime scans its own output for exactly
//! these markers.

use sg_domain::model::{Intervention, InterventionKind, RelayKind, RelayMessage, RoleProfile};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Role emergence (planner)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub const ROLE_EMERGENCE_SYSTEM_PROMPT: &str = r#"你是一个高级任务规划器，专门负责分析复杂任务并设计最优的多Agent协作方案。

你的核心能力是"角色涌现"——根据任务需求，自动创造最适合的专业角色，并为每个角色分配合适的技能。

## ⚠️ 重要约束

**角色数量限制**：创建的角色数量必须控制在 2-5 个之间，绝对不要超过 5 个。
- 简单任务：2-3 个角色
- 中等复杂任务：3-4 个角色
- 复杂任务：4-5 个角色

## 可用技能列表

1. **web_search** (网络搜索)：在互联网上搜索信息，获取最新数据和知识
2. **data_analysis** (数据分析)：对结构化数据进行统计分析、趋势分析
3. **code_execution** (代码执行)：执行代码进行计算和数据处理
4. **document_summary** (文档摘要)：对长文本进行摘要和关键信息提取
5. **reasoning** (推理分析)：进行深度逻辑推理、因果分析

## 角色设计原则

1. 专业深度：每个角色在其领域内应该是"专家级"的
2. 目标明确：清晰定义工作目标和预期交付物
3. 方法论科学：提供具体的工作方法和步骤
4. 技能适配：根据工作需要分配合适的技能
5. 协作互补：角色之间能够互相验证和补充，而非重叠

## 输出格式

你必须输出一个严格的 JSON 对象：

```json
{
  "analysis": "对任务的深度分析",
  "roles": [
    {
      "name": "角色名称",
      "description": "角色的详细描述",
      "capabilities": ["能力1", "能力2"],
      "focus_areas": ["关注领域1"],
      "expertise_level": "expert",
      "work_objective": "明确的工作目标",
      "deliverables": ["交付物1"],
      "methodology": {
        "approach": "总体工作方法",
        "steps": ["步骤1", "步骤2"],
        "tools_and_frameworks": ["框架1"],
        "success_criteria": ["成功标准1"],
        "quality_metrics": ["质量指标1"]
      },
      "assigned_skills": [
        {"skill_name": "技能名称", "skill_display_name": "技能显示名", "reason": "分配原因"}
      ],
      "system_prompt": "该角色的完整系统提示词",
      "relay_triggers": ["触发中继的条件1"],
      "task_segment": "分配给该角色的具体任务描述",
      "emergence_reasoning": "为什么需要涌现这个角色"
    }
  ],
  "phases": [
    {
      "phase_number": 1,
      "name": "阶段名称",
      "description": "阶段描述",
      "participating_roles": ["角色名称1"],
      "relay_strategy": "该阶段的中继策略",
      "expected_output": "该阶段的预期产出"
    }
  ],
  "estimated_duration_seconds": 300,
  "integration_strategy": "如何将各角色的输出整合成最终结果的策略"
}
```

现在，请分析以下任务并设计最优的多Agent协作方案："#;

/// The planner's user turn: task, optional context, and (on followups)
/// the previous round's cast for reuse.
pub fn build_planner_user_prompt(
    task: &str,
    context: Option<&str>,
    previous_roles: &[sg_domain::model::PreviousRole],
) -> String {
    let mut prompt = format!("## 任务\n{task}\n");

    if let Some(context) = context {
        if !context.is_empty() {
            prompt.push_str(&format!("\n## 上下文信息\n{context}\n"));
        }
    }

    if !previous_roles.is_empty() {
        prompt.push_str("\n## 上一轮角色配置（参考复用）\n");
        prompt.push_str("以下是上一轮任务使用的角色配置。请基于新任务的需求决定：\n");
        prompt.push_str("- 如果新任务方向相似，可以**复用**这些角色（适当微调描述和任务分配）\n");
        prompt.push_str("- 如果新任务方向变化较大，可以**替换或调整**部分角色\n");
        prompt.push_str("- 优先复用已有角色，除非有明确理由需要新角色\n\n");
        for (i, role) in previous_roles.iter().enumerate() {
            prompt.push_str(&format!("### 角色 {}: {}\n", i + 1, role.name));
            prompt.push_str(&format!("- 描述: {}\n", role.description));
            prompt.push_str(&format!("- 能力: {}\n", role.capabilities.join(", ")));
            prompt.push_str(&format!("- 关注领域: {}\n", role.focus_areas.join(", ")));
            prompt.push_str(&format!("- 上轮任务分段: {}\n\n", role.task_segment));
        }
    }

    prompt.push_str("\n请分析这个任务，并设计最优的多Agent协作方案。输出严格的 JSON 格式。");
    prompt
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Worker prompts
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The worker's system prompt: the emergent role's own prompt plus its
/// full profile, skills, relay protocol and optional user memory.
pub fn build_worker_system_prompt(role: &RoleProfile, user_memory: &str) -> String {
    let mut parts = vec![
        role.system_prompt.clone(),
        String::new(),
        "## 🎭 你的身份".into(),
        format!("- **角色名称**：{}", role.name),
        format!("- **专业描述**：{}", role.description),
        format!("- **专业水平**：{}", role.expertise_level),
    ];

    if !role.work_objective.is_empty() {
        parts.push(String::new());
        parts.push("## 🎯 你的工作目标".into());
        parts.push(role.work_objective.clone());
    }

    if !role.deliverables.is_empty() {
        parts.push(String::new());
        parts.push("## 📦 预期交付物".into());
        for deliverable in &role.deliverables {
            parts.push(format!("- {deliverable}"));
        }
    }

    if let Some(methodology) = &role.methodology {
        parts.push(String::new());
        parts.push("## 📋 工作方法论".into());
        parts.push(format!("**总体方法**：{}", methodology.approach));
        if !methodology.steps.is_empty() {
            parts.push("**工作步骤**：".into());
            for (i, step) in methodology.steps.iter().enumerate() {
                parts.push(format!("{}. {step}", i + 1));
            }
        }
        if !methodology.success_criteria.is_empty() {
            parts.push("**成功标准**：".into());
            for criteria in &methodology.success_criteria {
                parts.push(format!("- {criteria}"));
            }
        }
    }

    if !role.capabilities.is_empty() {
        parts.push(String::new());
        parts.push("## 💪 你的核心能力".into());
        for cap in &role.capabilities {
            parts.push(format!("- {cap}"));
        }
    }

    if !role.focus_areas.is_empty() {
        parts.push(String::new());
        parts.push("## 🔍 关注领域".into());
        for area in &role.focus_areas {
            parts.push(format!("- {area}"));
        }
    }

    if !role.assigned_skills.is_empty() {
        parts.push(String::new());
        parts.push("## 🛠️ 你拥有的技能".into());
        for skill in &role.assigned_skills {
            parts.push(format!(
                "- **{}** ({})",
                skill.skill_display_name, skill.skill_name
            ));
            if !skill.reason.is_empty() {
                parts.push(format!("  用途：{}", skill.reason));
            }
        }
        parts.push(String::new());
        parts.push("⚠️ **技能限制**：你只能使用以上已分配的技能，不得调用或假设未分配的技能能力。".into());
    }

    parts.push(String::new());
    parts.push("## 📝 工作规范".into());
    parts.push("1. 深入分析你被分配的任务，发挥你的专业能力".into());
    parts.push("2. 按照你的工作方法论系统性地开展工作".into());
    parts.push("3. 当你有重要发现时，明确标注 **[关键发现]**".into());
    parts.push("4. 当你完成任务时，用 **[任务完成]** 标记，并给出完整的分析结果".into());

    if !role.relay_triggers.is_empty() {
        parts.push(String::new());
        parts.push("## 🔄 中继协作机制".into());
        parts.push("### 触发中继的条件".into());
        for trigger in &role.relay_triggers {
            parts.push(format!("- {trigger}"));
        }
        parts.push(String::new());
        parts.push("### 中继消息格式".into());
        parts.push("**请求对齐**：`[请求中继: 简短说明请求原因]`，随后写明你需要什么信息或确认。".into());
        parts.push("**响应对齐**：`[响应对齐: 针对XXX的回复]`，随后写出完整的回复内容。".into());
        parts.push("**分享发现**：`[关键发现]`，随后详细描述发现内容。".into());
        parts.push(String::new());
        parts.push("⚠️ **重要**：所有中继消息必须包含完整、具体的内容，不要只写称呼或空泛的确认。".into());
    }

    if !user_memory.is_empty() {
        parts.push(String::new());
        parts.push("## 👤 用户偏好与记忆".into());
        parts.push("以下是关于当前用户的偏好和历史记忆信息，请在执行任务时充分考虑：".into());
        parts.push(user_memory.to_string());
    }

    parts.join("\n")
}

/// The worker's opening user turn: its task segment and the multi-round
/// workflow rules.
pub fn build_task_prompt(role: &RoleProfile, task_segment: &str) -> String {
    let mut parts = vec!["## 🎯 你的任务".to_string(), task_segment.to_string(), String::new()];

    if !role.deliverables.is_empty() {
        parts.push("## 📦 请确保你的输出包含".into());
        for deliverable in &role.deliverables {
            parts.push(format!("- {deliverable}"));
        }
        parts.push(String::new());
    }

    parts.push("## 📝 工作流程说明".into());
    parts.push("1. 你需要进行深入、多轮的分析，不要急于给出最终结论".into());
    parts.push("2. 每轮分析后，我会询问你是否需要继续深入或有新的发现".into());
    parts.push("3. 当你认为分析已经完整且深入时，使用 **[任务完成]** 标记，并给出完整的分析结果".into());
    parts.push("4. 如果发现重要信息需要与其他 Agent 共享，请使用 **[关键发现]** 标记".into());
    parts.push(String::new());
    parts.push("请开始你的第一轮分析，先从整体框架入手，逐步深入。".into());

    parts.join("\n")
}

/// Directly injected operator information — a mandatory-integration
/// directive appended straight to the worker's log.
pub fn build_injection_prompt(information: &str) -> String {
    format!(
        "⚠️ **[重要：人工注入信息]** ⚠️\n\n\
         以下是人类操作员直接注入给你的重要信息，请务必认真阅读并整合到你的工作中：\n\n\
         ---\n{information}\n---\n\n\
         **你需要做的**：\n\
         1. 仔细阅读上述注入的信息\n\
         2. 评估这些信息与你当前任务的相关性\n\
         3. 如果相关，将其整合到你的分析或工作中\n\
         4. 在你的下一轮输出中体现对这些信息的考虑\n\n\
         请继续你的工作，并考虑上述注入的信息。"
    )
}

/// The prompt shape for a human-intervention relay message drained from
/// the inbox, keyed by intervention kind.
pub fn build_intervention_prompt(message: &RelayMessage) -> String {
    let priority = message.intervention_priority();
    let kind = message.intervention_kind();
    let payload = message
        .metadata
        .get("payload")
        .and_then(|v| v.as_object())
        .cloned()
        .unwrap_or_default();

    let mut parts = vec![
        format!("⚠️ **[重要：人工干预通知 - 优先级 {priority}/10]**"),
        String::new(),
        format!("来自: {}", message.source_worker_name),
        String::new(),
    ];

    match kind {
        Some(InterventionKind::Inject) => {
            let info = payload
                .get("information")
                .and_then(|v| v.as_str())
                .unwrap_or(&message.content);
            parts.push("**类型**: 信息注入".into());
            parts.push(String::new());
            parts.push("**注入内容**:".into());
            parts.push(info.to_string());
            parts.push(String::new());
            parts.push("**请执行以下操作**:".into());
            parts.push("1. 仔细阅读上述注入的信息".into());
            parts.push("2. 评估这些信息与你当前任务的相关性".into());
            parts.push("3. 如果相关，将其整合到你的分析中".into());
            parts.push("4. 在下一轮输出中体现对这些信息的考虑".into());
        }
        Some(InterventionKind::Adjust) => {
            parts.push("**类型**: 行为调整指令".into());
            parts.push(String::new());
            parts.push("**调整要求**:".into());
            if let Some(adjustments) = payload.get("adjustments").and_then(|v| v.as_object()) {
                for (key, value) in adjustments {
                    parts.push(format!("- {key}: {value}"));
                }
            }
            parts.push(String::new());
            parts.push("**请执行以下操作**:".into());
            parts.push("1. 理解上述调整要求".into());
            parts.push("2. 在保持任务目标的前提下融入这些调整".into());
            parts.push("3. 如果某些调整与当前任务冲突，请说明原因".into());
        }
        Some(InterventionKind::Pause) => {
            parts.push("**类型**: 暂停通知".into());
            parts.push(String::new());
            parts.push(message.content.clone());
            parts.push(String::new());
            parts.push("**注意**: 你可能即将被暂停，请在当前响应中总结进度。".into());
        }
        Some(InterventionKind::Resume) => {
            parts.push("**类型**: 恢复通知".into());
            parts.push(String::new());
            parts.push(message.content.clone());
            parts.push(String::new());
            parts.push("请回顾之前的工作进度，继续未完成的任务。".into());
        }
        _ => {
            parts.push(message.content.clone());
            parts.push(String::new());
            parts.push("请根据上述人工干预信息，适当调整你的工作。".into());
        }
    }

    if message.requires_acknowledgement() {
        parts.push(String::new());
        parts.push("---".into());
        parts.push("📝 请在你的下一轮响应开头确认收到此干预通知。".into());
    }

    parts.join("\n")
}

/// The prompt shape for a regular relay message, telling the model how to
/// respond to each kind.
pub fn build_inbox_prompt(message: &RelayMessage) -> String {
    match message.kind {
        RelayKind::AlignmentRequest | RelayKind::Alignment => format!(
            "[来自 {} 的对齐请求 🔄]\n内容: {}\n\n\
             **这是一个需要响应的请求！** 如果与你的分析相关，请使用以下格式响应：\n\n\
             [响应对齐: 针对XXX的回复]\n\
             这里写你的实际响应内容：相关发现、对请求问题的直接回答、重要的补充信息。\n\n\
             **注意**：响应内容要完整具体，不要只写称呼或空泛的确认。",
            message.source_worker_name, message.content
        ),
        RelayKind::Question => format!(
            "[来自 {} 的求助 ❓]\n内容: {}\n\n\
             **这是一个求助请求！** 如果你有相关知识或见解，请使用以下格式回复：\n\n\
             [回复: 针对XXX问题的解答]\n\
             这里写你的具体回答：直接的答案、相关的分析依据、必要的建议。\n\n\
             **注意**：回复内容要具体有帮助，不要只写“已收到”或空泛确认。",
            message.source_worker_name, message.content
        ),
        RelayKind::Suggestion => format!(
            "[来自 {} 的建议 💡]\n内容: {}\n\n\
             这是一个建议，你可以：\n\
             1. 如果认为有价值，整合到你的分析中\n\
             2. 使用 [确认: 原因] 表示采纳\n\
             3. 如果与你的任务无关，可以忽略",
            message.source_worker_name, message.content
        ),
        RelayKind::AlignmentResponse => format!(
            "[来自 {} 的对齐响应 ✅]\n内容: {}\n\n这是对之前对齐请求的响应，请参考整合。",
            message.source_worker_name, message.content
        ),
        RelayKind::Confirmation => format!(
            "[来自 {} 的确认 ✔️]\n内容: {}\n\n其他 Agent 确认了你的发现/建议。",
            message.source_worker_name, message.content
        ),
        RelayKind::Insight => format!(
            "[来自 {} 的核心洞察 🎯]\n内容: {}\n\n这是一个重要的洞察，请仔细考虑是否能整合到你的分析中。",
            message.source_worker_name, message.content
        ),
        _ => format!(
            "[来自 {} 的中继消息]\n类型: {}\n内容: {}\n\n\
             请考虑这个信息，如果它与你的分析相关，请进行整合和调整。",
            message.source_worker_name,
            serde_json::to_value(message.kind)
                .ok()
                .and_then(|v| v.as_str().map(String::from))
                .unwrap_or_default(),
            message.content
        ),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Integration
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub const INTEGRATION_SYSTEM_PROMPT: &str = r#"你是一个专业的内容整合专家。你的任务是将多个专业角色的分析结果整合成一份完整、连贯、深入的报告。

## 整合原则

1. **结构清晰**：使用清晰的章节结构组织内容
2. **内容融合**：不是简单堆砌，而是真正融合各角色的见解
3. **突出关键**：强调各角色发现的关键点和独特见解
4. **消除矛盾**：如果不同角色有矛盾的观点，进行分析和调和
5. **增值洞察**：基于综合信息，提供更高层次的洞察

## 引用与来源

如果各角色的分析结果中包含了搜索引用或参考链接，必须在报告末尾统一整理一个 **参考来源** 章节，汇总所有被引用的链接，去除重复。

## 输出风格

使用 Markdown 格式；专业但易读；逻辑严密；结论明确。"#;

/// Format the intervention history block for the integration prompt. The
/// final report must visibly respond to every operator directive.
pub fn format_intervention_history(history: &[Intervention]) -> String {
    if history.is_empty() {
        return String::new();
    }

    let mut parts = vec![
        "\n## ⚠️ 人工干预记录（重要）\n".to_string(),
        "以下是用户在任务执行过程中发出的所有干预指令，请在整合报告时充分考虑这些指令：\n".to_string(),
    ];

    for (idx, intervention) in history.iter().enumerate() {
        parts.push(format!("### 干预 #{}", idx + 1));
        parts.push(format!("- **类型**: {}", intervention.kind.as_str()));
        parts.push(format!("- **优先级**: {}/10", intervention.priority));
        if !intervention.reason.is_empty() {
            parts.push(format!("- **原因**: {}", intervention.reason));
        }
        match intervention.kind {
            InterventionKind::Inject => {
                if let Some(info) = intervention.information() {
                    parts.push(format!("- **注入内容**:\n  > {info}"));
                }
            }
            InterventionKind::Adjust => {
                if let Some(adjustments) = intervention.adjustments() {
                    parts.push("- **调整指令**:".into());
                    for (key, value) in adjustments {
                        parts.push(format!("  - {key}: {value}"));
                    }
                }
            }
            _ => {}
        }
        parts.push(String::new());
    }

    parts.push("**请务必在整合报告中体现对上述人工干预指令的响应和考虑。**\n".into());
    parts.join("\n")
}
