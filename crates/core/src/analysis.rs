//! Analysis Domain Types
//!
//! Value types shared by the prompt builder, the provider crate and the
//! orchestrator: the analysis kind, the optional date window and the built
//! prompt bundle handed to every provider attempt.

use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

/// Date format accepted for analysis windows.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// The three supported analysis kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisType {
    Keyword,
    Audience,
    Comprehensive,
}

impl AnalysisType {
    pub const ALL: [AnalysisType; 3] = [
        AnalysisType::Keyword,
        AnalysisType::Audience,
        AnalysisType::Comprehensive,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisType::Keyword => "keyword",
            AnalysisType::Audience => "audience",
            AnalysisType::Comprehensive => "comprehensive",
        }
    }
}

impl fmt::Display for AnalysisType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AnalysisType {
    type Err = CoreError;

    fn from_str(s: &str) -> CoreResult<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "keyword" => Ok(AnalysisType::Keyword),
            "audience" => Ok(AnalysisType::Audience),
            "comprehensive" => Ok(AnalysisType::Comprehensive),
            other => Err(CoreError::validation(format!(
                "unsupported analysis type '{}', expected keyword, audience or comprehensive",
                other
            ))),
        }
    }
}

/// Optional analysis window. Either bound may be open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct DateRange {
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
}

impl DateRange {
    /// Build a range, rejecting `start > end`.
    pub fn new(start: Option<NaiveDate>, end: Option<NaiveDate>) -> CoreResult<Self> {
        if let (Some(s), Some(e)) = (start, end) {
            if s > e {
                return Err(CoreError::validation(format!(
                    "start_date {} is after end_date {}",
                    s, e
                )));
            }
        }
        Ok(Self { start, end })
    }

    /// Parse optional `YYYY-MM-DD` strings. Blank strings count as absent.
    pub fn parse(start: Option<&str>, end: Option<&str>) -> CoreResult<Self> {
        Self::new(parse_date(start)?, parse_date(end)?)
    }

    pub fn is_empty(&self) -> bool {
        self.start.is_none() && self.end.is_none()
    }

    /// Human-readable window used inside prompts.
    pub fn describe(&self) -> Option<String> {
        match (self.start, self.end) {
            (Some(s), Some(e)) => Some(format!(
                "{} to {}",
                s.format(DATE_FORMAT),
                e.format(DATE_FORMAT)
            )),
            (Some(s), None) => Some(format!("from {}", s.format(DATE_FORMAT))),
            (None, Some(e)) => Some(format!("until {}", e.format(DATE_FORMAT))),
            (None, None) => None,
        }
    }
}

fn parse_date(raw: Option<&str>) -> CoreResult<Option<NaiveDate>> {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        None => Ok(None),
        Some(s) => NaiveDate::parse_from_str(s, DATE_FORMAT)
            .map(Some)
            .map_err(|e| CoreError::parse(format!("invalid date '{}' (expected YYYY-MM-DD): {}", s, e))),
    }
}

/// Prompt pair sent to a provider, plus the request facts it was built from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptBundle {
    pub system_message: String,
    pub user_prompt: String,
    pub analysis_type: AnalysisType,
    pub target_subject: String,
}

impl PromptBundle {
    /// Rough token count of both messages.
    pub fn estimated_tokens(&self) -> u32 {
        estimate_tokens(&self.system_message) + estimate_tokens(&self.user_prompt)
    }
}

/// Estimate the token count of a text.
///
/// Hangul syllables average ~1.5 characters per token, everything else ~4.
pub fn estimate_tokens(text: &str) -> u32 {
    let hangul = text
        .chars()
        .filter(|c| ('\u{AC00}'..='\u{D7A3}').contains(c))
        .count();
    let other = text.chars().count() - hangul;
    ((hangul as f64 / 1.5) + (other as f64 / 4.0)) as u32
}
