//! Per-image inputs and the material records parsed from vision replies.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::csi;

/// An image ready for transport to the completion API.
///
/// The raw bytes are dropped once encoded; only the base64 form is kept.
#[derive(Debug, Clone)]
pub struct ImageInput {
    /// File name, used as the attribution key throughout the run.
    pub name: String,
    /// Location on disk, absent for uploaded images.
    pub path: Option<PathBuf>,
    /// Media type inferred from the original file contents.
    pub source_media_type: String,
    /// Media type of `encoded` (always JPEG after normalisation).
    pub media_type: String,
    /// Base64-encoded image data.
    pub encoded: String,
    /// Size of the original file in bytes.
    pub original_len: usize,
}

/// Approximate coverage of a material in an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Prominence {
    Low,
    Medium,
    High,
}

impl Prominence {
    /// Find the first prominence level named in free text.
    ///
    /// "Medium-high" reads as `Medium`; "moderate" counts as `Medium`.
    pub fn parse(text: &str) -> Option<Self> {
        text.split(|c: char| !c.is_ascii_alphabetic())
            .find_map(|word| match word.to_ascii_lowercase().as_str() {
                "high" => Some(Self::High),
                "medium" | "moderate" => Some(Self::Medium),
                "low" => Some(Self::Low),
                _ => None,
            })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }
}

impl fmt::Display for Prominence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One material identified in one image.
///
/// Every descriptive field is optional: the vision reply is free text and a
/// field that cannot be extracted is left empty rather than failing the record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaterialRecord {
    pub source_image: String,
    /// 1-based position of the item in the vision reply.
    pub position: usize,
    pub material_type: Option<String>,
    pub characteristics: Option<String>,
    pub prominence: Option<Prominence>,
    pub observations: Option<String>,
}

impl MaterialRecord {
    pub fn new(source_image: impl Into<String>, position: usize) -> Self {
        Self {
            source_image: source_image.into(),
            position,
            material_type: None,
            characteristics: None,
            prominence: None,
            observations: None,
        }
    }

    /// True when nothing at all was extracted.
    pub fn is_empty(&self) -> bool {
        self.material_type.is_none()
            && self.characteristics.is_none()
            && self.prominence.is_none()
            && self.observations.is_none()
    }

    /// Short label for tables: the material type, or a placeholder.
    pub fn label(&self) -> &str {
        self.material_type.as_deref().unwrap_or("(unnamed material)")
    }

    /// CSI MasterFormat division code inferred from the material type and
    /// characteristics.
    pub fn division(&self) -> Option<&'static str> {
        self.material_type
            .as_deref()
            .and_then(csi::division_for)
            .or_else(|| self.characteristics.as_deref().and_then(csi::division_for))
    }
}

/// Pipeline stage at which an item failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureStage {
    Analysis,
    Generation,
}

impl FailureStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Analysis => "analysis",
            Self::Generation => "generation",
        }
    }
}

/// Classification of a per-item failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The input itself could not be used.
    InvalidInput,
    /// Network error, server error or malformed reply that survived the retry.
    Transient,
    /// Rate limit still in force after the backoff ceiling.
    RateLimited,
    /// The API refused the request (4xx other than auth and rate limiting).
    Rejected,
    /// Credential missing or refused.
    Auth,
}

impl FailureKind {
    /// Concrete next step to show alongside the failure message.
    pub fn hint(&self) -> &'static str {
        match self {
            Self::InvalidInput => {
                "Check that the file is a readable PNG or JPEG image, then run again."
            }
            Self::Transient => {
                "Check your network connection and run again; the API may be temporarily unavailable."
            }
            Self::RateLimited => {
                "Wait a minute before running again, or lower `pipeline.concurrency` in the config file."
            }
            Self::Rejected => {
                "Review the API message; a low credit balance or an oversized image are the usual causes."
            }
            Self::Auth => "Check ANTHROPIC_API_KEY (or `api.api_key` in the config file).",
        }
    }
}

/// Why one image or section could not be produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageFailure {
    pub kind: FailureKind,
    pub message: String,
    /// Requests made before giving up.
    pub attempts: u32,
}

impl StageFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>, attempts: u32) -> Self {
        Self {
            kind,
            message: message.into(),
            attempts,
        }
    }

    /// Message plus next step, for user-facing output.
    pub fn explain(&self) -> String {
        format!("{} {}", self.message, self.kind.hint())
    }
}

impl fmt::Display for StageFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// Result of the vision stage for one image.
#[derive(Debug, Clone, PartialEq)]
pub enum AnalysisOutcome {
    /// The API replied. `materials` may be empty when nothing could be parsed.
    Analyzed {
        materials: Vec<MaterialRecord>,
        raw_reply: String,
    },
    Failed(StageFailure),
}

/// Vision stage output for one image, tagged with its input position.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageAnalysis {
    /// Position of the image in the input ordering.
    pub index: usize,
    pub image: String,
    pub outcome: AnalysisOutcome,
}

impl ImageAnalysis {
    pub fn is_analyzed(&self) -> bool {
        matches!(self.outcome, AnalysisOutcome::Analyzed { .. })
    }

    /// Parsed materials; empty for failed analyses.
    pub fn materials(&self) -> &[MaterialRecord] {
        match &self.outcome {
            AnalysisOutcome::Analyzed { materials, .. } => materials,
            AnalysisOutcome::Failed(_) => &[],
        }
    }

    pub fn raw_reply(&self) -> Option<&str> {
        match &self.outcome {
            AnalysisOutcome::Analyzed { raw_reply, .. } => Some(raw_reply),
            AnalysisOutcome::Failed(_) => None,
        }
    }

    pub fn failure(&self) -> Option<&StageFailure> {
        match &self.outcome {
            AnalysisOutcome::Failed(f) => Some(f),
            AnalysisOutcome::Analyzed { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prominence_parses_first_level_word() {
        assert_eq!(Prominence::parse("High"), Some(Prominence::High));
        assert_eq!(Prominence::parse("medium-high coverage"), Some(Prominence::Medium));
        assert_eq!(Prominence::parse("Moderate (30%)"), Some(Prominence::Medium));
        assert_eq!(Prominence::parse("LOW - accent only"), Some(Prominence::Low));
        assert_eq!(Prominence::parse("highlighted edges"), None);
        assert_eq!(Prominence::parse(""), None);
    }

    #[test]
    fn prominence_orders_high_above_low() {
        assert!(Prominence::High > Prominence::Medium);
        assert!(Prominence::Medium > Prominence::Low);
    }

    #[test]
    fn record_division_falls_back_to_characteristics() {
        let mut rec = MaterialRecord::new("a.png", 1);
        assert!(rec.is_empty());
        assert_eq!(rec.division(), None);

        rec.characteristics = Some("board-formed concrete finish".into());
        assert_eq!(rec.division(), Some("03"));

        rec.material_type = Some("Timber cladding".into());
        assert_eq!(rec.division(), Some("06"));
        assert_eq!(rec.label(), "Timber cladding");
    }

    #[test]
    fn failure_explain_includes_next_step() {
        let f = StageFailure::new(FailureKind::RateLimited, "API rate limit reached.", 4);
        let text = f.explain();
        assert!(text.starts_with("API rate limit reached."));
        assert!(text.contains("Wait a minute"));
    }

    #[test]
    fn analysis_accessors() {
        let ok = ImageAnalysis {
            index: 0,
            image: "a.png".into(),
            outcome: AnalysisOutcome::Analyzed {
                materials: vec![MaterialRecord::new("a.png", 1)],
                raw_reply: "1. Glass".into(),
            },
        };
        assert!(ok.is_analyzed());
        assert_eq!(ok.materials().len(), 1);
        assert_eq!(ok.raw_reply(), Some("1. Glass"));
        assert!(ok.failure().is_none());

        let failed = ImageAnalysis {
            index: 1,
            image: "b.png".into(),
            outcome: AnalysisOutcome::Failed(StageFailure::new(
                FailureKind::Transient,
                "timeout",
                2,
            )),
        };
        assert!(!failed.is_analyzed());
        assert!(failed.materials().is_empty());
        assert_eq!(failed.failure().map(|f| f.attempts), Some(2));
    }
}
