//! Result Normalizer
//!
//! Maps an arbitrarily shaped provider object onto one of the three canonical
//! result shapes. Canonical keys win; the legacy key names older prompts
//! produced are accepted as aliases. Normalization never fails:
//!
//! - missing fields become empty strings, lists or objects
//! - a string or object where a list is expected becomes a one-element list
//! - a string or list where an object is expected is wrapped (`summary` /
//!   `items`); any other scalar is dropped
//! - numbers and booleans where text is expected are rendered as text
//! - `null` is removed everywhere
//!
//! Metadata flags are computed from the normalized sections.

use serde_json::{Map, Value};

use crate::models::analysis_result::{
    AudienceAnalysis, AudienceDetail, AudienceMetadata, AudienceRecommendations,
    ComprehensiveAnalysis, ComprehensiveDetail, ComprehensiveFindings, ComprehensiveMetadata,
    ComprehensiveRecommendations, KeywordAnalysis, KeywordDetail, KeywordFindings,
    KeywordMetadata, KeywordRecommendations, NormalizedResult, Section,
};
use market_lens_core::AnalysisType;

/// Normalize a parsed provider object into the canonical shape for `analysis_type`.
pub fn normalize(raw: &Value, analysis_type: AnalysisType) -> NormalizedResult {
    let empty = Map::new();
    let root = raw.as_object().unwrap_or(&empty);
    match analysis_type {
        AnalysisType::Keyword => NormalizedResult::Keyword(normalize_keyword(root)),
        AnalysisType::Audience => NormalizedResult::Audience(normalize_audience(root)),
        AnalysisType::Comprehensive => {
            NormalizedResult::Comprehensive(normalize_comprehensive(root))
        }
    }
}

impl NormalizedResult {
    /// Replace the subject echoed in the result.
    pub fn with_target_keyword(mut self, keyword: impl Into<String>) -> Self {
        let keyword = keyword.into();
        match &mut self {
            NormalizedResult::Keyword(r) => r.target_keyword = keyword,
            NormalizedResult::Audience(r) => r.target_keyword = keyword,
            NormalizedResult::Comprehensive(r) => r.target_keyword = keyword,
        }
        self
    }
}

// ============================================================================
// Per-type mapping
// ============================================================================

fn normalize_keyword(root: &Map<String, Value>) -> KeywordAnalysis {
    let detail = object_at(root, &["detailed_analysis"]);
    let strategy = first_object(
        root,
        &[&["strategic_recommendations"], &["strategic_implications"]],
    );

    let (findings, primary_insights) = keyword_findings(root.get("key_findings"));

    let detailed_analysis = KeywordDetail {
        trend_analysis: to_section(
            first(&detail, &[&["trend_analysis"]]).or_else(|| root.get("trend_analysis")),
        ),
        related_keywords: to_section(first(
            &detail,
            &[&["related_keywords"], &["related_keywords_clusters"]],
        )),
        sentiment_analysis: to_section(first(&detail, &[&["sentiment_analysis"]])),
        competition_analysis: to_section(first(
            &detail,
            &[&["competition_analysis"], &["competition_alternative_keywords"]],
        )),
    };

    let metadata = KeywordMetadata {
        analysis_type: AnalysisType::Keyword,
        has_trend_data: !detailed_analysis.trend_analysis.is_empty(),
        has_sentiment_data: !detailed_analysis.sentiment_analysis.is_empty(),
        has_competition_data: !detailed_analysis.competition_analysis.is_empty(),
    };

    KeywordAnalysis {
        target_keyword: to_text(root.get("target_keyword")),
        executive_summary: executive_summary(root),
        analysis_overview: to_section(root.get("analysis_overview")),
        key_findings: KeywordFindings {
            findings,
            primary_insights,
        },
        detailed_analysis,
        strategic_recommendations: KeywordRecommendations {
            channel_operations: to_section(strategy.get("channel_operations")),
            content_strategy: to_section(strategy.get("content_strategy")),
            kpi_measurement: to_section(strategy.get("kpi_measurement")),
        },
        execution_roadmap: to_section(root.get("execution_roadmap")),
        risk_response: to_section(root.get("risk_response")),
        appendix: to_section(root.get("appendix")),
        metadata,
    }
}

fn keyword_findings(raw: Option<&Value>) -> (Vec<Value>, Vec<String>) {
    let (findings, mut insights) = match raw {
        Some(Value::Object(obj))
            if obj.contains_key("findings") || obj.contains_key("primary_insights") =>
        {
            (
                to_list(obj.get("findings")),
                to_text_list(obj.get("primary_insights")),
            )
        }
        other => (to_list(other), Vec::new()),
    };

    if insights.is_empty() {
        insights = findings.iter().filter_map(finding_headline).collect();
    }
    (findings, insights)
}

/// Short label for one finding entry.
fn finding_headline(finding: &Value) -> Option<String> {
    match finding {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Object(obj) => ["finding", "insight", "title", "summary"]
            .iter()
            .filter_map(|k| obj.get(*k))
            .map(|v| to_text(Some(v)))
            .find(|s| !s.is_empty()),
        _ => None,
    }
}

fn normalize_audience(root: &Map<String, Value>) -> AudienceAnalysis {
    let detail = first_object(
        root,
        &[&["detailed_analysis"], &["detailed_audience_analysis"]],
    );
    let strategy = object_at(root, &["strategic_recommendations"]);

    let segmentation = to_section(detail.get("segmentation"));
    let customer_journey = to_section(first(
        &detail,
        &[&["customer_journey"], &["customer_journey_decision"]],
    ));
    let personas = to_list(detail.get("personas").or_else(|| root.get("personas")));

    let segment_count = segmentation
        .get("segments")
        .and_then(Value::as_array)
        .map(Vec::len)
        .unwrap_or(0);

    let metadata = AudienceMetadata {
        analysis_type: AnalysisType::Audience,
        persona_count: personas.len(),
        segment_count,
        has_journey_data: !customer_journey.is_empty(),
    };

    AudienceAnalysis {
        target_keyword: to_text(root.get("target_keyword")),
        executive_summary: executive_summary(root),
        analysis_overview: to_section(root.get("analysis_overview")),
        key_insights: to_list(root.get("key_insights").or_else(|| root.get("key_findings"))),
        detailed_analysis: AudienceDetail {
            segmentation,
            customer_journey,
            personas,
        },
        strategic_recommendations: AudienceRecommendations {
            channel_strategy: to_section(first(
                &strategy,
                &[&["channel_strategy"], &["persona_based_channel_strategy"]],
            )),
            content_strategy: to_section(strategy.get("content_strategy")),
            kpi_framework: to_section(first(
                &strategy,
                &[&["kpi_framework"], &["kpi_measurement_framework"]],
            )),
        },
        execution_roadmap: to_section(root.get("execution_roadmap")),
        risk_governance: to_section(root.get("risk_governance")),
        appendix: to_section(root.get("appendix")),
        metadata,
    }
}

fn normalize_comprehensive(root: &Map<String, Value>) -> ComprehensiveAnalysis {
    let detail = first_object(root, &[&["detailed_analysis"], &["integrated_analysis"]]);
    let strategy = first_object(
        root,
        &[&["strategic_recommendations"], &["forward_looking_recommendations"]],
    );

    let key_findings = match root.get("key_findings") {
        Some(Value::Object(obj)) => ComprehensiveFindings {
            integrated_insights: to_list(obj.get("integrated_insights")),
            quantitative_metrics: to_section(obj.get("quantitative_metrics")),
        },
        other => ComprehensiveFindings {
            integrated_insights: to_list(other),
            quantitative_metrics: Section::new(),
        },
    };

    let detailed_analysis = ComprehensiveDetail {
        keyword_audience_alignment: to_section(detail.get("keyword_audience_alignment")),
        keyword_insights: to_section(first(
            &detail,
            &[&["keyword_insights"], &["core_keyword_insights"]],
        )),
        audience_insights: to_section(first(
            &detail,
            &[&["audience_insights"], &["core_audience_insights"]],
        )),
        trends_and_patterns: to_section(detail.get("trends_and_patterns")),
    };

    let metadata = ComprehensiveMetadata {
        analysis_type: AnalysisType::Comprehensive,
        has_keyword_data: !detailed_analysis.keyword_insights.is_empty(),
        has_audience_data: !detailed_analysis.audience_insights.is_empty(),
        has_alignment_data: !detailed_analysis.keyword_audience_alignment.is_empty(),
    };

    ComprehensiveAnalysis {
        target_keyword: to_text(root.get("target_keyword")),
        executive_summary: executive_summary(root),
        key_findings,
        detailed_analysis,
        strategic_recommendations: ComprehensiveRecommendations {
            immediate_actions: to_list(strategy.get("immediate_actions")),
            content_strategy: to_section(strategy.get("content_strategy")),
            marketing_strategy: to_section(strategy.get("marketing_strategy")),
            short_term_goals: to_list(strategy.get("short_term_goals")),
            long_term_vision: to_list(strategy.get("long_term_vision")),
            success_metrics: to_section(strategy.get("success_metrics")),
        },
        metadata,
    }
}

fn executive_summary(root: &Map<String, Value>) -> String {
    to_text(root.get("executive_summary").or_else(|| root.get("summary")))
}

// ============================================================================
// Lookup helpers
// ============================================================================

fn lookup<'a>(obj: &'a Map<String, Value>, path: &[&str]) -> Option<&'a Value> {
    let (head, rest) = path.split_first()?;
    let value = obj.get(*head).filter(|v| !v.is_null())?;
    if rest.is_empty() {
        Some(value)
    } else {
        lookup(value.as_object()?, rest)
    }
}

/// First non-null value among the candidate paths.
fn first<'a>(obj: &'a Map<String, Value>, paths: &[&[&str]]) -> Option<&'a Value> {
    paths.iter().find_map(|p| lookup(obj, p))
}

/// Object at a path, cloned with nulls stripped; empty when absent or not an object.
fn object_at(obj: &Map<String, Value>, path: &[&str]) -> Map<String, Value> {
    first_object(obj, &[path])
}

fn first_object(obj: &Map<String, Value>, paths: &[&[&str]]) -> Map<String, Value> {
    paths
        .iter()
        .filter_map(|p| lookup(obj, p))
        .find_map(|v| match v {
            Value::Object(map) => Some(strip_nulls_map(map)),
            _ => None,
        })
        .unwrap_or_default()
}

// ============================================================================
// Coercions
// ============================================================================

fn to_section(value: Option<&Value>) -> Section {
    match value {
        Some(Value::Object(map)) => strip_nulls_map(map),
        Some(Value::String(s)) if !s.trim().is_empty() => {
            let mut map = Map::new();
            map.insert("summary".to_string(), Value::String(s.trim().to_string()));
            map
        }
        Some(Value::Array(items)) => {
            let items = strip_nulls_vec(items);
            let mut map = Map::new();
            if !items.is_empty() {
                map.insert("items".to_string(), Value::Array(items));
            }
            map
        }
        _ => Map::new(),
    }
}

fn to_list(value: Option<&Value>) -> Vec<Value> {
    match value {
        Some(Value::Array(items)) => strip_nulls_vec(items),
        Some(Value::String(s)) if !s.trim().is_empty() => vec![Value::String(s.trim().to_string())],
        Some(Value::Object(map)) if !map.is_empty() => vec![Value::Object(strip_nulls_map(map))],
        Some(v @ (Value::Number(_) | Value::Bool(_))) => vec![Value::String(v.to_string())],
        _ => Vec::new(),
    }
}

fn to_text(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.trim().to_string(),
        Some(v @ (Value::Number(_) | Value::Bool(_))) => v.to_string(),
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|v| match v {
                Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
                Value::Number(_) | Value::Bool(_) => Some(v.to_string()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join(" "),
        _ => String::new(),
    }
}

fn to_text_list(value: Option<&Value>) -> Vec<String> {
    to_list(value)
        .iter()
        .map(|v| match v {
            Value::Object(_) => finding_headline(v).unwrap_or_default(),
            other => to_text(Some(other)),
        })
        .filter(|s| !s.is_empty())
        .collect()
}

fn strip_nulls(value: &Value) -> Option<Value> {
    match value {
        Value::Null => None,
        Value::Object(map) => Some(Value::Object(strip_nulls_map(map))),
        Value::Array(items) => Some(Value::Array(strip_nulls_vec(items))),
        other => Some(other.clone()),
    }
}

fn strip_nulls_map(map: &Map<String, Value>) -> Map<String, Value> {
    map.iter()
        .filter_map(|(k, v)| strip_nulls(v).map(|v| (k.clone(), v)))
        .collect()
}

fn strip_nulls_vec(items: &[Value]) -> Vec<Value> {
    items.iter().filter_map(strip_nulls).collect()
}
