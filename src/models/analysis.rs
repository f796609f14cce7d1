//! Analysis Request Model
//!
//! The immutable request value created at ingress. Construction validates
//! every field so downstream components can rely on it.

use serde::Serialize;

use market_lens_core::{AnalysisType, CoreError, CoreResult, DateRange};
use market_lens_llm::ProviderType;

/// Longest accepted subject, in characters.
pub const MAX_SUBJECT_CHARS: usize = 200;

/// One analysis request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AnalysisRequest {
    target_subject: String,
    analysis_type: AnalysisType,
    additional_context: Option<String>,
    date_range: Option<DateRange>,
    provider_preference: Option<ProviderType>,
}

impl AnalysisRequest {
    /// Create a request, trimming and validating the subject.
    pub fn new(target_subject: impl AsRef<str>, analysis_type: AnalysisType) -> CoreResult<Self> {
        let subject = target_subject.as_ref().trim();
        if subject.is_empty() {
            return Err(CoreError::validation("target_keyword must not be empty"));
        }
        if subject.chars().count() > MAX_SUBJECT_CHARS {
            return Err(CoreError::validation(format!(
                "target_keyword exceeds {} characters",
                MAX_SUBJECT_CHARS
            )));
        }
        Ok(Self {
            target_subject: subject.to_string(),
            analysis_type,
            additional_context: None,
            date_range: None,
            provider_preference: None,
        })
    }

    /// Attach free-form context. Blank context is ignored.
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        let context = context.into();
        self.additional_context = if context.trim().is_empty() {
            None
        } else {
            Some(context)
        };
        self
    }

    /// Attach an analysis window. Empty windows are ignored.
    pub fn with_date_range(mut self, range: DateRange) -> Self {
        self.date_range = if range.is_empty() { None } else { Some(range) };
        self
    }

    pub fn with_provider_preference(mut self, provider: ProviderType) -> Self {
        self.provider_preference = Some(provider);
        self
    }

    pub fn target_subject(&self) -> &str {
        &self.target_subject
    }

    pub fn analysis_type(&self) -> AnalysisType {
        self.analysis_type
    }

    pub fn additional_context(&self) -> Option<&str> {
        self.additional_context.as_deref()
    }

    pub fn date_range(&self) -> Option<&DateRange> {
        self.date_range.as_ref()
    }

    pub fn provider_preference(&self) -> Option<ProviderType> {
        self.provider_preference
    }
}
