//! Prompt Builder
//!
//! Renders an [`AnalysisRequest`] into the system/user message pair sent to a
//! provider. The system message fixes the role, the JSON shape and the
//! writing rules for each analysis type. The user prompt carries the request
//! itself and is kept inside a character budget: context paragraphs are
//! trimmed first, then the date block, then the closing reminder. The subject
//! line is never cut.

use regex::Regex;
use std::sync::OnceLock;

use market_lens_core::{AnalysisType, PromptBundle};

use crate::models::analysis::AnalysisRequest;
use crate::models::settings::PromptSettings;

/// Context budgets below this are not worth sending.
const MIN_CONTEXT_CHARS: usize = 40;

const BLOCK_SEPARATOR: &str = "\n\n";

const CONTEXT_HEADER: &str = "Additional context from the requester:\n";

const REMINDER: &str = "Return exactly one JSON object that follows the schema in the \
system message. Do not wrap it in markdown fences and do not add commentary before or after it.";

const SHARED_RULES: &str = "Rules:
- Keep sections mutually exclusive and collectively exhaustive: every point belongs to exactly one section and no section repeats another.
- Every finding must carry its evidence: a figure, a trend direction, a named source type or a concrete observation.
- Recommendations use actionable language: start with a verb, name the channel or owner, and state the expected outcome.
- Write in the language of the target subject.
- Respond with a single JSON object and nothing else. No markdown, no code fences, no prose outside the object.";

const KEYWORD_ROLE: &str = "You are a senior market research analyst specialising in search demand, \
keyword trends and competitive positioning. You analyse a keyword and turn the signal into \
marketing decisions.";

const KEYWORD_SCHEMA: &str = r#"{
  "executive_summary": "3-4 sentence overview of the most important conclusions",
  "analysis_overview": {"scope": "", "methodology": "", "data_period": ""},
  "key_findings": {
    "findings": [{"title": "", "evidence": "", "impact": ""}],
    "primary_insights": ["one-line insight"]
  },
  "detailed_analysis": {
    "trend_analysis": {"direction": "", "seasonality": "", "drivers": []},
    "related_keywords": {"clusters": [], "rising": []},
    "sentiment_analysis": {"overall": "", "positive_drivers": [], "negative_drivers": []},
    "competition_analysis": {"main_competitors": [], "alternative_keywords": [], "positioning_gap": ""}
  },
  "strategic_recommendations": {
    "channel_operations": {"priority_channels": [], "actions": []},
    "content_strategy": {"themes": [], "formats": []},
    "kpi_measurement": {"kpis": [], "targets": []}
  },
  "execution_roadmap": {"phase_1": "", "phase_2": "", "phase_3": ""},
  "risk_response": {"risks": [], "mitigations": []},
  "appendix": {"assumptions": [], "data_notes": []}
}"#;

const AUDIENCE_ROLE: &str = "You are a senior consumer insight strategist. You profile the audience \
behind a market or product, segment it, map the customer journey and build personas that a \
marketing team can act on.";

const AUDIENCE_SCHEMA: &str = r#"{
  "executive_summary": "3-4 sentence overview of who the audience is and how to reach them",
  "analysis_overview": {"scope": "", "methodology": "", "data_period": ""},
  "key_insights": [{"title": "", "evidence": "", "implication": ""}],
  "detailed_analysis": {
    "segmentation": {"criteria": "", "segments": [{"name": "", "share": "", "traits": []}]},
    "customer_journey": {"awareness": "", "consideration": "", "decision": "", "retention": ""},
    "personas": [{"name": "", "profile": "", "needs": [], "pain_points": [], "channels": []}]
  },
  "strategic_recommendations": {
    "channel_strategy": {"per_persona": [], "priority_channels": []},
    "content_strategy": {"themes": [], "formats": []},
    "kpi_framework": {"kpis": [], "measurement": ""}
  },
  "execution_roadmap": {"phase_1": "", "phase_2": "", "phase_3": ""},
  "risk_governance": {"risks": [], "governance": []},
  "appendix": {"assumptions": [], "data_notes": []}
}"#;

const COMPREHENSIVE_ROLE: &str = "You are a chief strategy analyst. You combine keyword demand and \
audience understanding into one integrated market view and a prioritised action plan.";

const COMPREHENSIVE_SCHEMA: &str = r#"{
  "executive_summary": "3-4 sentence integrated conclusion",
  "key_findings": {
    "integrated_insights": [{"title": "", "evidence": "", "impact": ""}],
    "quantitative_metrics": {"market_signals": [], "audience_signals": []}
  },
  "detailed_analysis": {
    "keyword_audience_alignment": {"matches": [], "gaps": []},
    "keyword_insights": {"trend": "", "related_keywords": [], "competition": ""},
    "audience_insights": {"core_segments": [], "motivations": []},
    "trends_and_patterns": {"short_term": [], "long_term": []}
  },
  "strategic_recommendations": {
    "immediate_actions": ["verb-led action"],
    "content_strategy": {"themes": [], "formats": []},
    "marketing_strategy": {"channels": [], "positioning": ""},
    "short_term_goals": ["goal for the next 3 months"],
    "long_term_vision": ["goal for the next 12 months"],
    "success_metrics": {"kpis": [], "targets": []}
  }
}"#;

/// Builds prompts for every analysis type.
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    max_prompt_chars: usize,
    max_context_chars: usize,
}

impl Default for PromptBuilder {
    fn default() -> Self {
        Self::from_settings(&PromptSettings::default())
    }
}

impl PromptBuilder {
    pub fn new(max_prompt_chars: usize, max_context_chars: usize) -> Self {
        Self {
            max_prompt_chars,
            max_context_chars,
        }
    }

    pub fn from_settings(settings: &PromptSettings) -> Self {
        Self::new(settings.max_prompt_chars, settings.max_context_chars)
    }

    /// Render the prompt pair for a request. Pure and deterministic.
    pub fn build(&self, request: &AnalysisRequest) -> PromptBundle {
        let analysis_type = request.analysis_type();
        PromptBundle {
            system_message: system_message(analysis_type),
            user_prompt: self.user_prompt(request),
            analysis_type,
            target_subject: request.target_subject().to_string(),
        }
    }

    fn user_prompt(&self, request: &AnalysisRequest) -> String {
        let subject_block = format!(
            "Target subject: {}\nAnalysis type: {} ({})",
            request.target_subject(),
            request.analysis_type(),
            focus_line(request.analysis_type())
        );
        let mut date_block = request
            .date_range()
            .and_then(|range| range.describe())
            .map(|period| {
                format!(
                    "Analysis period: {}. Prefer evidence from this period and flag anything older.",
                    period
                )
            });
        let mut reminder = Some(REMINDER.to_string());

        // Fixed blocks first; context only gets what they leave over.
        while char_len(&join_blocks(&[Some(&subject_block), date_block.as_ref(), reminder.as_ref()]))
            > self.max_prompt_chars
        {
            if date_block.take().is_some() {
                continue;
            }
            if reminder.take().is_some() {
                continue;
            }
            break;
        }

        let fixed_len =
            char_len(&join_blocks(&[Some(&subject_block), date_block.as_ref(), reminder.as_ref()]));
        let context_block = request.additional_context().and_then(|context| {
            let room = self
                .max_prompt_chars
                .saturating_sub(fixed_len + BLOCK_SEPARATOR.len() + char_len(CONTEXT_HEADER));
            fit_context(split_paragraphs(context), self.max_context_chars.min(room))
                .map(|body| format!("{}{}", CONTEXT_HEADER, body))
        });

        join_blocks(&[
            Some(&subject_block),
            date_block.as_ref(),
            context_block.as_ref(),
            reminder.as_ref(),
        ])
    }
}

fn system_message(analysis_type: AnalysisType) -> String {
    let (role, schema) = match analysis_type {
        AnalysisType::Keyword => (KEYWORD_ROLE, KEYWORD_SCHEMA),
        AnalysisType::Audience => (AUDIENCE_ROLE, AUDIENCE_SCHEMA),
        AnalysisType::Comprehensive => (COMPREHENSIVE_ROLE, COMPREHENSIVE_SCHEMA),
    };
    format!(
        "{}\n\nOutput schema (use exactly these keys, fill every field):\n{}\n\n{}",
        role, schema, SHARED_RULES
    )
}

fn focus_line(analysis_type: AnalysisType) -> &'static str {
    match analysis_type {
        AnalysisType::Keyword => "search trend, related keywords, sentiment and competition",
        AnalysisType::Audience => "segments, customer journey and personas",
        AnalysisType::Comprehensive => "keyword demand combined with audience insight",
    }
}

fn join_blocks(blocks: &[Option<&String>]) -> String {
    blocks
        .iter()
        .flatten()
        .map(|s| s.as_str())
        .collect::<Vec<_>>()
        .join(BLOCK_SEPARATOR)
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}

fn paragraph_break() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\n\s*\n").ok()).as_ref()
}

/// Split on blank lines and collapse whitespace inside each paragraph.
fn split_paragraphs(text: &str) -> Vec<String> {
    let raw: Vec<&str> = match paragraph_break() {
        Some(re) => re.split(text).collect(),
        None => vec![text],
    };
    raw.into_iter()
        .map(|p| p.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|p| !p.is_empty())
        .collect()
}

/// Fit paragraphs into `budget` characters, keeping the most recent ones.
fn fit_context(mut paragraphs: Vec<String>, budget: usize) -> Option<String> {
    if budget < MIN_CONTEXT_CHARS || paragraphs.is_empty() {
        return None;
    }
    while paragraphs.len() > 1 && char_len(&paragraphs.join(BLOCK_SEPARATOR)) > budget {
        paragraphs.remove(0);
    }
    let joined = paragraphs.join(BLOCK_SEPARATOR);
    if char_len(&joined) <= budget {
        return Some(joined);
    }
    let cut = cut_at_boundary(&joined, budget);
    (!cut.is_empty()).then(|| cut.to_string())
}

/// Longest prefix within `max_chars` that ends on a sentence, else a word.
fn cut_at_boundary(text: &str, max_chars: usize) -> &str {
    let end = text
        .char_indices()
        .nth(max_chars)
        .map(|(i, _)| i)
        .unwrap_or(text.len());
    let prefix = &text[..end];

    let sentence_end = [". ", "! ", "? "]
        .iter()
        .filter_map(|pat| prefix.rfind(pat).map(|i| i + 1))
        .chain(prefix.rfind('。').map(|i| i + '。'.len_utf8()))
        .max();
    if let Some(i) = sentence_end {
        return prefix[..i].trim_end();
    }
    match prefix.rfind(char::is_whitespace) {
        Some(i) if i > 0 => prefix[..i].trim_end(),
        _ => prefix,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use market_lens_core::DateRange;

    fn request(t: AnalysisType) -> AnalysisRequest {
        AnalysisRequest::new("electric vehicles", t).unwrap()
    }

    #[test]
    fn test_system_message_carries_schema_keys() {
        let builder = PromptBuilder::default();
        let keyword = builder.build(&request(AnalysisType::Keyword));
        assert!(keyword.system_message.contains("\"competition_analysis\""));
        assert!(keyword.system_message.contains("mutually exclusive"));

        let audience = builder.build(&request(AnalysisType::Audience));
        assert!(audience.system_message.contains("\"personas\""));
        assert!(!audience.system_message.contains("\"competition_analysis\""));

        let comprehensive = builder.build(&request(AnalysisType::Comprehensive));
        assert!(comprehensive.system_message.contains("\"keyword_audience_alignment\""));
        assert_eq!(comprehensive.analysis_type, AnalysisType::Comprehensive);
    }

    #[test]
    fn test_user_prompt_blocks() {
        let range = DateRange::parse(Some("2024-01-01"), Some("2024-06-30")).unwrap();
        let req = request(AnalysisType::Keyword)
            .with_context("Focus on the Korean market.")
            .with_date_range(range);
        let prompt = PromptBuilder::default().build(&req);
        assert!(prompt.user_prompt.starts_with("Target subject: electric vehicles"));
        assert!(prompt.user_prompt.contains("2024-01-01 to 2024-06-30"));
        assert!(prompt.user_prompt.contains("Focus on the Korean market."));
        assert!(prompt.user_prompt.ends_with(REMINDER));
        assert_eq!(prompt.target_subject, "electric vehicles");
    }

    #[test]
    fn test_deterministic() {
        let req = request(AnalysisType::Audience).with_context("Gen Z buyers.");
        let builder = PromptBuilder::default();
        assert_eq!(builder.build(&req), builder.build(&req));
    }

    #[test]
    fn test_context_whitespace_collapsed() {
        let req = request(AnalysisType::Keyword).with_context("  lots   of\tspace \n here  ");
        let prompt = PromptBuilder::default().build(&req);
        assert!(prompt.user_prompt.contains("lots of space here"));
    }

    #[test]
    fn test_long_context_keeps_latest_paragraphs() {
        let old = "Old background paragraph. ".repeat(20);
        let recent = "Recent launch data matters most.";
        let req = request(AnalysisType::Keyword).with_context(format!("{}\n\n{}", old, recent));
        let builder = PromptBuilder::new(6_000, 100);
        let prompt = builder.build(&req);
        assert!(prompt.user_prompt.contains(recent));
        assert!(!prompt.user_prompt.contains("Old background"));
    }

    #[test]
    fn test_single_paragraph_cut_at_sentence() {
        let context = "First sentence is here. Second sentence is a little longer. Third one never fits.";
        let cut = fit_context(split_paragraphs(context), 62).unwrap();
        assert_eq!(cut, "First sentence is here. Second sentence is a little longer.");
    }

    #[test]
    fn test_cut_falls_back_to_word_boundary() {
        assert_eq!(cut_at_boundary("alpha beta gamma delta", 13), "alpha beta");
        assert_eq!(cut_at_boundary("abcdefghij", 4), "abcd");
    }

    #[test]
    fn test_prompt_respects_budget() {
        let req = request(AnalysisType::Comprehensive).with_context("word ".repeat(5_000));
        let builder = PromptBuilder::new(1_000, 2_000);
        let prompt = builder.build(&req);
        assert!(char_len(&prompt.user_prompt) <= 1_000);
        assert!(prompt.user_prompt.contains("electric vehicles"));
    }

    #[test]
    fn test_tight_budget_drops_optional_blocks_but_keeps_subject() {
        let range = DateRange::parse(Some("2024-01-01"), None).unwrap();
        let req = request(AnalysisType::Keyword)
            .with_context("Some context that will not fit.")
            .with_date_range(range);
        let builder = PromptBuilder::new(120, 2_000);
        let prompt = builder.build(&req);
        assert!(prompt.user_prompt.contains("Target subject: electric vehicles"));
        assert!(!prompt.user_prompt.contains("Additional context"));
        assert!(!prompt.user_prompt.contains("Analysis period"));
        assert!(char_len(&prompt.user_prompt) <= 120);
    }
}
