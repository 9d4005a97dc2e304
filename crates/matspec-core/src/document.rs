//! Specification sections and the final markdown document.

use chrono::NaiveDateTime;
use serde::Serialize;

use crate::consolidate::MergedMaterial;
use crate::csi;
use crate::markdown;
use crate::material::{FailureStage, StageFailure};

/// Shallowest heading level allowed inside a section body.
const BODY_HEADING_LEVEL: usize = 3;

const INTRO: &str = "*This document contains material specifications for each analyzed image. \
Each section begins with the image filename as a prominent header.*";

const FOOTER: &str = "*Note: These specifications are preliminary and based on design intent visualizations. \
Verify all material selections with manufacturers and project requirements.*";

/// What a section was generated from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "images", rename_all = "lowercase")]
pub enum SectionSource {
    Image(String),
    /// Consolidated mode: one section for every analysed image.
    Merged(Vec<String>),
}

impl SectionSource {
    pub fn header(&self) -> String {
        match self {
            Self::Image(name) => format!("Image: {name}"),
            Self::Merged(names) => format!("Consolidated: {}", names.join(", ")),
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Self::Image(name) => name.clone(),
            Self::Merged(names) => format!("{} images", names.len()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum SectionOutcome {
    Generated {
        body: String,
        sustainability: Option<String>,
        alternatives: Option<String>,
        /// Titles of required sections the model did not provide.
        missing: Vec<String>,
    },
    Failed {
        stage: FailureStage,
        failure: StageFailure,
    },
}

/// One per-image (or merged) part of the document.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpecificationSection {
    /// Input position of the source image, used for document order.
    pub index: usize,
    pub source: SectionSource,
    pub outcome: SectionOutcome,
}

impl SpecificationSection {
    pub fn failed(
        index: usize,
        source: SectionSource,
        stage: FailureStage,
        failure: StageFailure,
    ) -> Self {
        Self {
            index,
            source,
            outcome: SectionOutcome::Failed { stage, failure },
        }
    }

    pub fn is_generated(&self) -> bool {
        matches!(self.outcome, SectionOutcome::Generated { .. })
    }

    /// Markdown for this section, starting with its level-2 header.
    pub fn render(&self) -> String {
        let mut out = format!("## {}\n\n", self.source.header());
        match &self.outcome {
            SectionOutcome::Generated {
                body,
                sustainability,
                alternatives,
                missing,
            } => {
                let mut parts = vec![markdown::demote_headings(body, BODY_HEADING_LEVEL)];
                for block in [sustainability, alternatives].into_iter().flatten() {
                    parts.push(markdown::demote_headings(block, BODY_HEADING_LEVEL));
                }
                for title in missing {
                    parts.push(format!(
                        "### {title}\n\n_Not provided by the model for this image. \
                         Run the generator again to regenerate this section._"
                    ));
                }
                out.push_str(
                    &parts
                        .iter()
                        .map(|p| p.trim())
                        .filter(|p| !p.is_empty())
                        .collect::<Vec<_>>()
                        .join("\n\n"),
                );
            }
            SectionOutcome::Failed { stage, failure } => {
                let what = match stage {
                    FailureStage::Analysis => "Image analysis",
                    FailureStage::Generation => "Specification generation",
                };
                let attempts = match failure.attempts {
                    0 => String::new(),
                    1 => " after 1 attempt".to_string(),
                    n => format!(" after {n} attempts"),
                };
                out.push_str(&format!(
                    "> **Specification unavailable.** {what} failed{attempts}: {}\n>\n> Next step: {}",
                    failure.message,
                    failure.kind.hint()
                ));
            }
        }
        out
    }
}

/// The final artifact of a run.
#[derive(Debug, Clone)]
pub struct SpecificationDocument {
    pub generated_at: NaiveDateTime,
    /// Number of images submitted to the run.
    pub images_total: usize,
    pub sections: Vec<SpecificationSection>,
    /// Cross-image material aggregation shown as an overview table.
    pub palette: Vec<MergedMaterial>,
}

impl SpecificationDocument {
    /// Assemble a document; sections are put into input order.
    pub fn new(
        generated_at: NaiveDateTime,
        images_total: usize,
        mut sections: Vec<SpecificationSection>,
        palette: Vec<MergedMaterial>,
    ) -> Self {
        sections.sort_by_key(|s| s.index);
        Self {
            generated_at,
            images_total,
            sections,
            palette,
        }
    }

    pub fn generated_count(&self) -> usize {
        self.sections.iter().filter(|s| s.is_generated()).count()
    }

    pub fn failed_count(&self) -> usize {
        self.sections.len() - self.generated_count()
    }

    /// Timestamped file name, e.g. `material_specifications_20261018_143000.md`.
    pub fn file_name(&self) -> String {
        format!(
            "material_specifications_{}.md",
            self.generated_at.format("%Y%m%d_%H%M%S")
        )
    }

    /// Render the whole document as markdown.
    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str("# Material Specifications\n");
        out.push_str(&format!(
            "*Generated from design visualizations - {}*\n\n",
            self.generated_at.format("%B %d, %Y at %I:%M %p")
        ));
        out.push_str(INTRO);
        out.push_str("\n\n");
        out.push_str(&format!(
            "**Images:** {} submitted, {} specified, {} unavailable\n\n",
            self.images_total,
            self.generated_count(),
            self.failed_count()
        ));

        if !self.palette.is_empty() {
            out.push_str(&self.render_palette());
            out.push('\n');
        }

        out.push_str("---\n\n");
        let sections: Vec<String> = self.sections.iter().map(|s| s.render()).collect();
        out.push_str(&sections.join("\n\n---\n\n"));
        out.push_str("\n\n---\n");
        out.push_str(FOOTER);
        out.push('\n');
        out
    }

    fn render_palette(&self) -> String {
        let mut rows: Vec<&MergedMaterial> = self.palette.iter().collect();
        // Unclassified materials sort last.
        rows.sort_by_key(|m| m.division.clone().unwrap_or_else(|| "99".to_string()));

        let mut out = String::from("## Material Palette Overview\n\n");
        out.push_str("| Material | CSI Division | Prominence | Seen in |\n");
        out.push_str("|---|---|---|---|\n");
        for m in rows {
            let division = m
                .division
                .as_deref()
                .map(csi::division_label)
                .unwrap_or_else(|| "Unclassified".to_string());
            let prominence = m.prominence.map(|p| p.as_str()).unwrap_or("-");
            out.push_str(&format!(
                "| {} | {} | {} | {} |\n",
                table_cell(&m.label),
                division,
                prominence,
                table_cell(&m.images().join(", "))
            ));
        }
        out
    }
}

fn table_cell(text: &str) -> String {
    text.replace('|', "\\|").replace('\n', " ")
}
