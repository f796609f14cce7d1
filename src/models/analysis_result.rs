//! Normalized Analysis Results
//!
//! The three canonical result shapes handed to callers and the cache. Every
//! field is always present; free-form sections are JSON objects, lists are
//! JSON arrays, and nothing is ever `null`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use market_lens_core::AnalysisType;

/// A free-form result section (always a JSON object).
pub type Section = Map<String, Value>;

/// Canonical result, tagged by `target_type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "target_type", rename_all = "lowercase")]
pub enum NormalizedResult {
    Keyword(KeywordAnalysis),
    Audience(AudienceAnalysis),
    Comprehensive(ComprehensiveAnalysis),
}

impl NormalizedResult {
    pub fn analysis_type(&self) -> AnalysisType {
        match self {
            NormalizedResult::Keyword(_) => AnalysisType::Keyword,
            NormalizedResult::Audience(_) => AnalysisType::Audience,
            NormalizedResult::Comprehensive(_) => AnalysisType::Comprehensive,
        }
    }

    pub fn target_keyword(&self) -> &str {
        match self {
            NormalizedResult::Keyword(r) => &r.target_keyword,
            NormalizedResult::Audience(r) => &r.target_keyword,
            NormalizedResult::Comprehensive(r) => &r.target_keyword,
        }
    }

    pub fn executive_summary(&self) -> &str {
        match self {
            NormalizedResult::Keyword(r) => &r.executive_summary,
            NormalizedResult::Audience(r) => &r.executive_summary,
            NormalizedResult::Comprehensive(r) => &r.executive_summary,
        }
    }
}

// ============================================================================
// Keyword
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeywordAnalysis {
    pub target_keyword: String,
    pub executive_summary: String,
    pub analysis_overview: Section,
    pub key_findings: KeywordFindings,
    pub detailed_analysis: KeywordDetail,
    pub strategic_recommendations: KeywordRecommendations,
    pub execution_roadmap: Section,
    pub risk_response: Section,
    pub appendix: Section,
    pub metadata: KeywordMetadata,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KeywordFindings {
    pub findings: Vec<Value>,
    pub primary_insights: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KeywordDetail {
    pub trend_analysis: Section,
    pub related_keywords: Section,
    pub sentiment_analysis: Section,
    pub competition_analysis: Section,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KeywordRecommendations {
    pub channel_operations: Section,
    pub content_strategy: Section,
    pub kpi_measurement: Section,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeywordMetadata {
    pub analysis_type: AnalysisType,
    pub has_trend_data: bool,
    pub has_sentiment_data: bool,
    pub has_competition_data: bool,
}

// ============================================================================
// Audience
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudienceAnalysis {
    pub target_keyword: String,
    pub executive_summary: String,
    pub analysis_overview: Section,
    pub key_insights: Vec<Value>,
    pub detailed_analysis: AudienceDetail,
    pub strategic_recommendations: AudienceRecommendations,
    pub execution_roadmap: Section,
    pub risk_governance: Section,
    pub appendix: Section,
    pub metadata: AudienceMetadata,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AudienceDetail {
    pub segmentation: Section,
    pub customer_journey: Section,
    pub personas: Vec<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AudienceRecommendations {
    pub channel_strategy: Section,
    pub content_strategy: Section,
    pub kpi_framework: Section,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudienceMetadata {
    pub analysis_type: AnalysisType,
    pub persona_count: usize,
    pub segment_count: usize,
    pub has_journey_data: bool,
}

// ============================================================================
// Comprehensive
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComprehensiveAnalysis {
    pub target_keyword: String,
    pub executive_summary: String,
    pub key_findings: ComprehensiveFindings,
    pub detailed_analysis: ComprehensiveDetail,
    pub strategic_recommendations: ComprehensiveRecommendations,
    pub metadata: ComprehensiveMetadata,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ComprehensiveFindings {
    pub integrated_insights: Vec<Value>,
    pub quantitative_metrics: Section,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ComprehensiveDetail {
    pub keyword_audience_alignment: Section,
    pub keyword_insights: Section,
    pub audience_insights: Section,
    pub trends_and_patterns: Section,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ComprehensiveRecommendations {
    pub immediate_actions: Vec<Value>,
    pub content_strategy: Section,
    pub marketing_strategy: Section,
    pub short_term_goals: Vec<Value>,
    pub long_term_vision: Vec<Value>,
    pub success_metrics: Section,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComprehensiveMetadata {
    pub analysis_type: AnalysisType,
    pub has_keyword_data: bool,
    pub has_audience_data: bool,
    pub has_alignment_data: bool,
}
