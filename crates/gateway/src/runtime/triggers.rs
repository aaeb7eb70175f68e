//! Self-triggered relay detection.
//!
//! After each iteration the worker scans its own output for relay tags
//! (`[关键发现]`, `[请求中继: …]`, …) and, from the second iteration on, a
//! small set of heuristic patterns. Candidates then pass validity filters
//! so empty salutations and markdown debris never reach the relay.

use regex::Regex;

use sg_domain::model::RelayKind;

/// A detected relay candidate.
#[derive(Debug, Clone, PartialEq)]
pub struct TriggerHit {
    pub kind: RelayKind,
    pub content: String,
    pub reason: String,
}

pub struct TriggerScanner {
    tag_alignment_response: Regex,
    tag_reply: Regex,
    tag_confirmation: Regex,
    tag_relay_request: Regex,
    tag_question: Regex,
    tag_suggestion: Regex,
    tag_discovery: Regex,
    tag_insight: Regex,
    heuristics: Vec<(Regex, &'static str, RelayKind)>,
    continuation_break: Regex,
    greeting_prefix: Regex,
    greeting_line: Regex,
    greeting_only: Vec<Regex>,
    punctuation_only: Regex,
    markdown_only: Regex,
    incomplete_indicators: Vec<Regex>,
}

impl TriggerScanner {
    pub fn new() -> Self {
        let heuristic = |p: &str| Regex::new(p).expect("heuristic pattern");
        Self {
            tag_alignment_response: heuristic(r"\[响应对齐:\s*([^\]]+)\]"),
            tag_reply: heuristic(r"\[回复:\s*([^\]]+)\]"),
            tag_confirmation: heuristic(r"\[确认:\s*([^\]]+)\]"),
            tag_relay_request: heuristic(r"\[请求中继:\s*([^\]]+)\]"),
            tag_question: heuristic(r"\[(求助|疑问):\s*([^\]]+)\]"),
            tag_suggestion: heuristic(r"\[建议:\s*([^\]]+)\]"),
            tag_discovery: heuristic(r"(?s)\[关键发现\]\s*(.+?)(?:\n\n|\n-|$)"),
            tag_insight: heuristic(r"(?s)\[(?:核心)?洞察\]\s*(.+?)(?:\n\n|\n-|$)"),
            heuristics: vec![
                (
                    heuristic(r"值得注意的是[：:]\s*(.{20,200})"),
                    "值得注意的发现",
                    RelayKind::Discovery,
                ),
                (
                    heuristic(r"重要发现[：:]\s*(.{20,200})"),
                    "重要发现",
                    RelayKind::Discovery,
                ),
                (
                    heuristic(r"关键点[：:]\s*(.{20,200})"),
                    "关键点",
                    RelayKind::Discovery,
                ),
                (
                    heuristic(r"核心洞察[：:]\s*(.{20,200})"),
                    "核心洞察",
                    RelayKind::Insight,
                ),
                (
                    heuristic(r"重大影响[：:]\s*(.{20,200})"),
                    "重大影响",
                    RelayKind::Discovery,
                ),
                (
                    heuristic(r"需要其他.{0,40}?(配合|协作|确认)"),
                    "跨域协作需求",
                    RelayKind::AlignmentRequest,
                ),
                (
                    heuristic(r"建议.{0,60}?(考虑|采用|使用)"),
                    "协作建议",
                    RelayKind::Suggestion,
                ),
            ],
            continuation_break: heuristic(r"\n\[|\n---|\n\*\*\[|\n##"),
            greeting_prefix: heuristic(r"^(致|向|针对)[^\s]{2,15}"),
            greeting_line: heuristic(r"^(致|向|@)[^\s\n]{2,15}[：:]?\s*$"),
            greeting_only: vec![
                heuristic(r"^致[^\s]{2,10}$"),
                heuristic(r"^向[^\s]{2,10}$"),
                heuristic(r"^请[^\s]{2,10}(确认|注意|查看)?$"),
                heuristic(r"^@[^\s]+$"),
            ],
            punctuation_only: heuristic(
                r#"^[\s\*\#\-\=\_\.\,。，、；：“”‘’（）【】《》！？]+$"#,
            ),
            markdown_only: heuristic(r"^[\*\#\->\s]+$"),
            incomplete_indicators: vec![
                heuristic(r"以下(问题|内容|分析|要点|建议)"),
                heuristic(r"如下(问题|内容|分析|要点|建议)"),
                heuristic(r"下列(问题|内容|分析|要点|建议)"),
                heuristic(r"以下是"),
                heuristic(r"如下："),
                heuristic(r"包括：$"),
                heuristic(r"分别是：$"),
            ],
        }
    }

    /// Scan a response for a relay candidate, in priority order: response
    /// tags, request tags, discovery/insight tags, then (from iteration 2)
    /// heuristic patterns. Returns the first valid candidate.
    pub fn scan(&self, response: &str, iterations: u32) -> Option<TriggerHit> {
        let candidate = self
            .scan_response_tags(response)
            .or_else(|| self.scan_request_tags(response))
            .or_else(|| self.scan_discovery_tags(response))
            .or_else(|| {
                if iterations >= 2 {
                    self.scan_heuristics(response)
                } else {
                    None
                }
            })?;

        self.validate(candidate)
    }

    // ── Tag extraction ────────────────────────────────────────────

    fn scan_response_tags(&self, response: &str) -> Option<TriggerHit> {
        for (pattern, reason) in [
            (&self.tag_alignment_response, "响应对齐请求"),
            (&self.tag_reply, "回复求助"),
        ] {
            let Some(caps) = pattern.captures(response) else {
                continue;
            };
            let tag_content = caps.get(1)?.as_str().trim();
            let following = self.following_content(response, caps.get(0)?.end());
            let is_greeting = self.greeting_prefix.is_match(tag_content);

            if char_len(&following) > 10 {
                return Some(TriggerHit {
                    kind: RelayKind::AlignmentResponse,
                    content: format!("{tag_content}\n\n{following}"),
                    reason: reason.into(),
                });
            }
            if !is_greeting && char_len(tag_content) > 20 {
                return Some(TriggerHit {
                    kind: RelayKind::AlignmentResponse,
                    content: tag_content.into(),
                    reason: reason.into(),
                });
            }
            tracing::debug!(tag = %tag_content, "response tag without substance, skipping");
            return None;
        }

        if let Some(caps) = self.tag_confirmation.captures(response) {
            let tag_content = caps.get(1)?.as_str().trim();
            let following = self.following_content(response, caps.get(0)?.end());
            let content = if char_len(&following) > 10 {
                format!("{tag_content}\n\n{following}")
            } else {
                tag_content.into()
            };
            return Some(TriggerHit {
                kind: RelayKind::Confirmation,
                content,
                reason: "确认/认可".into(),
            });
        }

        None
    }

    fn scan_request_tags(&self, response: &str) -> Option<TriggerHit> {
        if let Some(caps) = self.tag_relay_request.captures(response) {
            let tag_content = caps.get(1)?.as_str().trim();
            let following = self.following_content(response, caps.get(0)?.end());
            let content = if char_len(&following) > 10 {
                format!("请求对齐: {tag_content}\n\n{following}")
            } else {
                format!("请求对齐: {tag_content}")
            };
            return Some(TriggerHit {
                kind: RelayKind::AlignmentRequest,
                content,
                reason: tag_content.into(),
            });
        }

        if let Some(caps) = self.tag_question.captures(response) {
            let tag_type = caps.get(1)?.as_str();
            let tag_content = caps.get(2)?.as_str().trim();
            let following = self.following_content(response, caps.get(0)?.end());
            let content = if char_len(&following) > 10 {
                format!("{tag_type}: {tag_content}\n\n{following}")
            } else {
                format!("{tag_type}: {tag_content}")
            };
            return Some(TriggerHit {
                kind: RelayKind::Question,
                content,
                reason: tag_content.into(),
            });
        }

        if let Some(caps) = self.tag_suggestion.captures(response) {
            let tag_content = caps.get(1)?.as_str().trim();
            let following = self.following_content(response, caps.get(0)?.end());
            let content = if char_len(&following) > 10 {
                format!("建议: {tag_content}\n\n{following}")
            } else {
                format!("建议: {tag_content}")
            };
            return Some(TriggerHit {
                kind: RelayKind::Suggestion,
                content,
                reason: tag_content.into(),
            });
        }

        None
    }

    fn scan_discovery_tags(&self, response: &str) -> Option<TriggerHit> {
        if let Some(caps) = self.tag_discovery.captures(response) {
            let content = caps.get(1)?.as_str().trim();
            if char_len(content) >= 10 && !self.is_meaningless(content) {
                return Some(TriggerHit {
                    kind: RelayKind::Discovery,
                    content: content.into(),
                    reason: "发现关键信息".into(),
                });
            }
            return None;
        }

        if let Some(caps) = self.tag_insight.captures(response) {
            let content = caps.get(1)?.as_str().trim();
            if char_len(content) >= 10 && !self.is_meaningless(content) {
                return Some(TriggerHit {
                    kind: RelayKind::Insight,
                    content: content.into(),
                    reason: "核心洞察".into(),
                });
            }
            return None;
        }

        None
    }

    fn scan_heuristics(&self, response: &str) -> Option<TriggerHit> {
        for (pattern, reason, kind) in &self.heuristics {
            if let Some(caps) = pattern.captures(response) {
                let content = caps
                    .get(1)
                    .map(|m| m.as_str())
                    .unwrap_or_else(|| caps.get(0).map(|m| m.as_str()).unwrap_or_default());
                return Some(TriggerHit {
                    kind: *kind,
                    content: content.trim().into(),
                    reason: (*reason).into(),
                });
            }
        }
        None
    }

    /// Content following a tag, up to the next tag/divider/heading, capped
    /// at 800 chars.
    fn following_content(&self, response: &str, tag_end: usize) -> String {
        let remaining = response[tag_end..].trim();
        let end = self
            .continuation_break
            .find(remaining)
            .map(|m| m.start())
            .unwrap_or(remaining.len());
        let slice = &remaining[..end];
        sg_domain::model::truncate_chars(slice.trim(), 800)
    }

    // ── Validity filters ──────────────────────────────────────────

    /// Apply the validity filters, in order; the first failure drops the
    /// candidate.
    fn validate(&self, hit: TriggerHit) -> Option<TriggerHit> {
        let content = hit.content.trim().to_string();

        if char_len(&content) < 5 {
            tracing::debug!(content = %content, "relay candidate too short, dropped");
            return None;
        }
        if self.is_meaningless(&content) {
            tracing::debug!(content = %content, "relay candidate meaningless, dropped");
            return None;
        }
        if self.is_semantically_incomplete(&content, hit.kind.is_response()) {
            tracing::debug!(content = %content, "relay candidate incomplete, dropped");
            return None;
        }

        Some(TriggerHit { content, ..hit })
    }

    fn is_meaningless(&self, content: &str) -> bool {
        let cleaned = content.trim();
        if char_len(cleaned) < 5 {
            return true;
        }
        self.punctuation_only.is_match(cleaned) || self.markdown_only.is_match(cleaned)
    }

    /// Detect content that references a body it never includes ("以下问题"
    /// with nothing after) or is nothing but a salutation.
    fn is_semantically_incomplete(&self, content: &str, is_response_kind: bool) -> bool {
        let content = content.trim();
        if content.is_empty() {
            return true;
        }
        // Long content is assumed complete.
        if char_len(content) > 80 {
            return false;
        }

        if char_len(content) < 50 {
            for indicator in &self.incomplete_indicators {
                if indicator.is_match(content) {
                    return true;
                }
            }
        }

        if is_response_kind {
            // A salutation opener is fine as long as real content follows.
            let mut lines = content.lines();
            let first_line = lines.next().unwrap_or_default().trim();
            if self.greeting_line.is_match(first_line) {
                let remaining = lines.collect::<Vec<_>>().join("\n");
                let remaining = remaining.trim();
                return char_len(remaining) <= 10 || self.punctuation_only.is_match(remaining);
            }
            return false;
        }

        self.greeting_only.iter().any(|p| p.is_match(content))
    }
}

impl Default for TriggerScanner {
    fn default() -> Self {
        Self::new()
    }
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scanner() -> TriggerScanner {
        TriggerScanner::new()
    }

    #[test]
    fn discovery_tag_detected() {
        let hit = scanner()
            .scan("分析进行中。\n[关键发现]\n影片的长镜头占比远超同期作品，值得深究。\n\n继续。", 1)
            .unwrap();
        assert_eq!(hit.kind, RelayKind::Discovery);
        assert!(hit.content.contains("长镜头"));
    }

    #[test]
    fn discovery_tag_with_trivial_body_dropped() {
        assert!(scanner().scan("[关键发现]\n好。\n\n", 1).is_none());
    }

    #[test]
    fn insight_tag_detected() {
        let hit = scanner()
            .scan("[核心洞察] 导演用色彩对比承担了叙事功能，贯穿全片。", 1)
            .unwrap();
        assert_eq!(hit.kind, RelayKind::Insight);
    }

    #[test]
    fn relay_request_tag_detected() {
        let hit = scanner()
            .scan("[请求中继: 需要视觉设计角度确认色彩方案]\n我的初步结论是暖色主导。", 1)
            .unwrap();
        assert_eq!(hit.kind, RelayKind::AlignmentRequest);
        assert!(hit.content.starts_with("请求对齐"));
        assert!(hit.content.contains("暖色主导"));
    }

    #[test]
    fn question_tag_detected() {
        let hit = scanner()
            .scan("[求助: 这个数据口径如何统一]\n我手头有两套统计结果，差异明显。", 1)
            .unwrap();
        assert_eq!(hit.kind, RelayKind::Question);
    }

    #[test]
    fn suggestion_tag_detected() {
        let hit = scanner()
            .scan("[建议: 优先分析前三幕的节奏]\n这样可以更快定位问题。", 1)
            .unwrap();
        assert_eq!(hit.kind, RelayKind::Suggestion);
    }

    #[test]
    fn alignment_response_with_body_detected() {
        let text = "[响应对齐: 致视觉设计师]\n\n关于色彩方案：我的镜头统计显示暖色镜头占62%，支持你的判断。";
        let hit = scanner().scan(text, 1).unwrap();
        assert_eq!(hit.kind, RelayKind::AlignmentResponse);
        assert!(hit.content.contains("62%"));
    }

    #[test]
    fn alignment_response_greeting_only_dropped() {
        assert!(scanner().scan("[响应对齐: 致视觉设计师]\n\n", 1).is_none());
    }

    #[test]
    fn reply_tag_maps_to_alignment_response() {
        let text = "[回复: 针对数据口径问题的解答]\n两套口径的差异来自统计窗口，建议统一采用周窗口。";
        let hit = scanner().scan(text, 1).unwrap();
        assert_eq!(hit.kind, RelayKind::AlignmentResponse);
    }

    #[test]
    fn confirmation_tag_detected() {
        let hit = scanner()
            .scan("[确认: 采纳关于节奏分析的建议，将整合进报告]", 1)
            .unwrap();
        assert_eq!(hit.kind, RelayKind::Confirmation);
    }

    #[test]
    fn heuristics_only_from_second_iteration() {
        let text = "值得注意的是：影片在第三幕的剪辑频率骤增，与前两幕形成强烈反差。";
        assert!(scanner().scan(text, 1).is_none());
        let hit = scanner().scan(text, 2).unwrap();
        assert_eq!(hit.kind, RelayKind::Discovery);
        assert_eq!(hit.reason, "值得注意的发现");
    }

    #[test]
    fn response_tags_win_over_discovery() {
        let text = "[响应对齐: 针对口径问题]\n我的统计窗口是周级别，可以直接对齐。\n\n[关键发现]\n另外发现了新的剪辑模式。";
        let hit = scanner().scan(text, 2).unwrap();
        assert_eq!(hit.kind, RelayKind::AlignmentResponse);
    }

    #[test]
    fn punctuation_only_dropped() {
        assert!(scanner().scan("[关键发现]\n*** --- ***\n\n", 1).is_none());
    }

    #[test]
    fn incomplete_reference_dropped() {
        // "以下" promising content that never arrives.
        assert!(scanner().scan("[确认: 我确认以下是要点]", 1).is_none());
    }

    #[test]
    fn no_tags_no_hit() {
        assert!(scanner().scan("普通的分析文本，没有任何标记。", 1).is_none());
    }
}
