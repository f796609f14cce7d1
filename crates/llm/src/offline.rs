//! Offline Provider
//!
//! Deterministic, in-process provider used as the last link of the chain.
//! It never touches the network and never fails: it renders a fixed template
//! for the requested analysis type with the subject filled in, so callers
//! always get a well-formed result even without any API key.

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use crate::provider::LlmProvider;
use crate::types::{
    CompletionOptions, LlmResponse, LlmResult, ProviderConfig, ProviderType, StopReason,
    UsageStats,
};
use market_lens_core::analysis::{estimate_tokens, AnalysisType, PromptBundle};
use market_lens_core::streaming::UnifiedStreamEvent;

const SETUP_HINT: &str =
    "Configure GEMINI_API_KEY or OPENAI_API_KEY to replace this template with a live analysis.";

/// Template-based provider
pub struct OfflineProvider {
    config: ProviderConfig,
}

impl Default for OfflineProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl OfflineProvider {
    pub fn new() -> Self {
        Self {
            config: ProviderConfig::new(ProviderType::Offline),
        }
    }

    /// Render the template for a prompt.
    pub fn render(prompt: &PromptBundle) -> Value {
        let subject = prompt.target_subject.as_str();
        match prompt.analysis_type {
            AnalysisType::Keyword => keyword_template(subject),
            AnalysisType::Audience => audience_template(subject),
            AnalysisType::Comprehensive => comprehensive_template(subject),
        }
    }
}

#[async_trait]
impl LlmProvider for OfflineProvider {
    fn name(&self) -> &'static str {
        "offline"
    }

    fn provider_type(&self) -> ProviderType {
        ProviderType::Offline
    }

    fn model(&self) -> &str {
        &self.config.model
    }

    fn is_local(&self) -> bool {
        true
    }

    fn supports_structured_output(&self) -> bool {
        false
    }

    async fn complete(
        &self,
        prompt: &PromptBundle,
        _options: &CompletionOptions,
        tx: mpsc::Sender<UnifiedStreamEvent>,
    ) -> LlmResult<LlmResponse> {
        let value = Self::render(prompt);
        let text = value.to_string();
        let usage = UsageStats {
            input_tokens: prompt.estimated_tokens(),
            output_tokens: estimate_tokens(&text),
        };

        // Receiver may already be gone; the response still carries the value.
        let _ = tx
            .send(UnifiedStreamEvent::TextDelta { content: text })
            .await;

        Ok(LlmResponse {
            content: None,
            structured: Some(value),
            stop_reason: StopReason::EndTurn,
            usage,
            model: self.config.model.clone(),
        })
    }

    fn config(&self) -> &ProviderConfig {
        &self.config
    }
}

fn keyword_template(subject: &str) -> Value {
    json!({
        "executive_summary": format!(
            "This is a baseline outline for '{}' generated without a live model. \
It lists the questions a keyword analysis should answer. {}",
            subject, SETUP_HINT
        ),
        "analysis_overview": {
            "scope": format!("Search demand and market perception of '{}'", subject),
            "methodology": "Template outline, no live data collected",
            "data_period": "not available"
        },
        "key_findings": {
            "findings": [{
                "title": "Live data unavailable",
                "evidence": "No language model provider was reachable for this request.",
                "impact": "Findings below are prompts for investigation, not conclusions."
            }],
            "primary_insights": [
                format!("Measure monthly search volume for '{}' over the last 12 months.", subject),
                format!("Identify the top related queries around '{}'.", subject)
            ]
        },
        "detailed_analysis": {
            "trend_analysis": {"direction": "unknown", "drivers": ["seasonality", "news events", "product launches"]},
            "related_keywords": {"clusters": [subject]},
            "sentiment_analysis": {"overall": "unknown"},
            "competition_analysis": {"main_competitors": [], "alternative_keywords": []}
        },
        "strategic_recommendations": {
            "channel_operations": {"actions": ["Audit which channels already rank for the keyword."]},
            "content_strategy": {"themes": [format!("Explainer content on {}", subject)]},
            "kpi_measurement": {"kpis": ["search volume", "share of search", "click-through rate"]}
        },
        "execution_roadmap": {"phase_1": "Collect search and social data", "phase_2": "Rerun the analysis with a live provider"},
        "risk_response": {"risks": ["Decisions based on template output"], "mitigations": [SETUP_HINT]},
        "appendix": {"data_notes": ["Generated by the offline template provider."]}
    })
}

fn audience_template(subject: &str) -> Value {
    json!({
        "executive_summary": format!(
            "This is a baseline audience outline for '{}' generated without a live model. {}",
            subject, SETUP_HINT
        ),
        "analysis_overview": {
            "scope": format!("People who search for, buy or discuss '{}'", subject),
            "methodology": "Template outline, no live data collected"
        },
        "key_insights": [{
            "title": "Live data unavailable",
            "evidence": "No language model provider was reachable for this request.",
            "implication": "Validate every segment below with first-party data."
        }],
        "detailed_analysis": {
            "segmentation": {
                "criteria": "needs and purchase stage",
                "segments": [
                    {"name": "Explorers", "traits": ["early research", "price comparison"]},
                    {"name": "Committed buyers", "traits": ["brand shortlist", "ready to convert"]}
                ]
            },
            "customer_journey": {
                "awareness": format!("First exposure to {}", subject),
                "consideration": "Comparison of options and reviews",
                "decision": "Purchase or sign-up",
                "retention": "Repeat use and referral"
            },
            "personas": [{
                "name": "Baseline persona",
                "profile": format!("A prospective customer interested in {}", subject),
                "needs": ["clear information"],
                "pain_points": ["uncertainty"]
            }]
        },
        "strategic_recommendations": {
            "channel_strategy": {"priority_channels": ["search", "social"]},
            "content_strategy": {"themes": ["comparison guides", "customer stories"]},
            "kpi_framework": {"kpis": ["reach", "engagement rate", "conversion rate"]}
        },
        "execution_roadmap": {"phase_1": "Survey current customers", "phase_2": "Rerun the analysis with a live provider"},
        "risk_governance": {"risks": ["Personas not validated"], "governance": [SETUP_HINT]},
        "appendix": {"data_notes": ["Generated by the offline template provider."]}
    })
}

fn comprehensive_template(subject: &str) -> Value {
    json!({
        "executive_summary": format!(
            "This is a baseline integrated outline for '{}' generated without a live model. {}",
            subject, SETUP_HINT
        ),
        "key_findings": {
            "integrated_insights": [{
                "title": "Live data unavailable",
                "evidence": "No language model provider was reachable for this request.",
                "impact": "Use this outline to plan data collection."
            }],
            "quantitative_metrics": {"market_signals": [], "audience_signals": []}
        },
        "detailed_analysis": {
            "keyword_audience_alignment": {"matches": [], "gaps": ["keyword and audience data not collected"]},
            "keyword_insights": {"trend": "unknown", "related_keywords": [subject]},
            "audience_insights": {"core_segments": ["Explorers", "Committed buyers"]},
            "trends_and_patterns": {"short_term": [], "long_term": []}
        },
        "strategic_recommendations": {
            "immediate_actions": [SETUP_HINT],
            "content_strategy": {"themes": [format!("Introductory content on {}", subject)]},
            "marketing_strategy": {"channels": ["search", "social"]},
            "short_term_goals": ["Collect baseline search and audience data"],
            "long_term_vision": [format!("Build a recurring market view for {}", subject)],
            "success_metrics": {"kpis": ["share of search", "conversion rate"]}
        }
    })
}
