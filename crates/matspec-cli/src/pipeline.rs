//! Run orchestration: analyse every image, consolidate, generate sections,
//! assemble the document.
//!
//! Work runs through a bounded pool (`buffer_unordered`); every result
//! carries its input index so the document keeps input order whatever order
//! the requests complete in. Nothing is written here; the caller persists the
//! document only after the whole run succeeded.

use chrono::Local;
use futures::stream::{self, StreamExt};
use matspec_ai::prompts::brief_excerpt;
use matspec_ai::{
    AuthFailure, CompletionProvider, GenerationRequest, RetryPolicy, SectionOptions,
    analyze_image, generate_section,
};
use matspec_core::config::{PromptSettings, Settings};
use matspec_core::{
    ConsolidatedContext, FailureStage, ImageAnalysis, ImageInput, SectionOutcome, SectionSource,
    SpecificationDocument, SpecificationSection, StageFailure, consolidate,
};
use thiserror::Error;
use tracing::info;

/// Stand-in when no brief text was given.
pub const EMPTY_BRIEF: &str = "No project brief provided.";

/// Per-run options.
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub sections: SectionOptions,
    /// One section for all images instead of one per image.
    pub consolidated: bool,
    /// Requests in flight at once.
    pub concurrency: usize,
    pub brief_excerpt_chars: usize,
    pub prompts: PromptSettings,
}

impl PipelineOptions {
    pub fn from_settings(settings: &Settings, sections: SectionOptions, consolidated: bool) -> Self {
        Self {
            sections,
            consolidated,
            concurrency: settings.pipeline.concurrency,
            brief_excerpt_chars: settings.pipeline.brief_excerpt_chars,
            prompts: settings.prompts.clone(),
        }
    }
}

/// Callbacks as work completes, in completion order.
pub trait Progress: Send + Sync {
    fn image_analyzed(&self, _done: usize, _total: usize, _analysis: &ImageAnalysis) {}
    fn section_generated(&self, _done: usize, _total: usize, _section: &SpecificationSection) {}
}

/// Progress sink that ignores everything.
pub struct NoProgress;

impl Progress for NoProgress {}

/// One image or section that could not be produced.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemFailure {
    pub item: String,
    pub stage: FailureStage,
    pub failure: StageFailure,
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("no images to analyse")]
    NoImages,
    #[error("none of the {} images could be analysed", .failures.len())]
    NothingAnalyzed { failures: Vec<ItemFailure> },
    #[error("no specification section could be generated")]
    NothingGenerated { failures: Vec<ItemFailure> },
    #[error("the API refused the credential: {0}")]
    Auth(#[from] AuthFailure),
}

impl PipelineError {
    pub fn failures(&self) -> &[ItemFailure] {
        match self {
            Self::NothingAnalyzed { failures } | Self::NothingGenerated { failures } => failures,
            Self::NoImages | Self::Auth(_) => &[],
        }
    }
}

/// Everything a run produced.
#[derive(Debug)]
pub struct RunReport {
    /// Vision results in input order.
    pub analyses: Vec<ImageAnalysis>,
    pub context: ConsolidatedContext,
    pub document: SpecificationDocument,
}

impl RunReport {
    /// Failed images and sections, in document order.
    pub fn failures(&self) -> Vec<ItemFailure> {
        section_failures(&self.document.sections)
    }
}

fn section_failures(sections: &[SpecificationSection]) -> Vec<ItemFailure> {
    sections
        .iter()
        .filter_map(|s| match &s.outcome {
            SectionOutcome::Failed { stage, failure } => Some(ItemFailure {
                item: s.source.describe(),
                stage: *stage,
                failure: failure.clone(),
            }),
            SectionOutcome::Generated { .. } => None,
        })
        .collect()
}

/// Run the whole pipeline over `images`.
pub async fn run_pipeline(
    provider: &dyn CompletionProvider,
    images: &[ImageInput],
    brief: &str,
    options: &PipelineOptions,
    policy: &RetryPolicy,
    progress: &dyn Progress,
) -> Result<RunReport, PipelineError> {
    if images.is_empty() {
        return Err(PipelineError::NoImages);
    }
    let total = images.len();
    let workers = options.concurrency.max(1);
    info!(images = total, workers, consolidated = options.consolidated, "starting run");

    // ── Vision analysis ──

    let excerpt = brief_excerpt(brief, options.brief_excerpt_chars);
    let mut analyses: Vec<ImageAnalysis> = Vec::with_capacity(total);
    let analysis_futures: Vec<_> = images
        .iter()
        .enumerate()
        .map(|(index, image)| {
            analyze_image(provider, index, image, &excerpt, policy, &options.prompts)
        })
        .collect();
    let mut pending = stream::iter(analysis_futures).buffer_unordered(workers);
    while let Some(result) = pending.next().await {
        let analysis = result?;
        progress.image_analyzed(analyses.len() + 1, total, &analysis);
        analyses.push(analysis);
    }
    drop(pending);
    analyses.sort_by_key(|a| a.index);

    let analysis_failures: Vec<SpecificationSection> = analyses
        .iter()
        .filter_map(|a| {
            a.failure().map(|f| {
                SpecificationSection::failed(
                    a.index,
                    SectionSource::Image(a.image.clone()),
                    FailureStage::Analysis,
                    f.clone(),
                )
            })
        })
        .collect();
    if analysis_failures.len() == total {
        return Err(PipelineError::NothingAnalyzed {
            failures: section_failures(&analysis_failures),
        });
    }

    // ── Consolidation ──

    let context = consolidate(brief, &analyses);

    // ── Generation ──

    let requests: Vec<GenerationRequest<'_>> = if options.consolidated {
        vec![GenerationRequest::consolidated(&context, options.sections)]
    } else {
        context
            .groups
            .iter()
            .map(|g| GenerationRequest::for_image(g, brief, options.sections))
            .collect()
    };

    let request_total = requests.len();
    let mut sections: Vec<SpecificationSection> = Vec::with_capacity(total);
    let generation_futures: Vec<_> = requests
        .iter()
        .map(|request| generate_section(provider, request, policy))
        .collect();
    let mut pending = stream::iter(generation_futures).buffer_unordered(workers);
    while let Some(result) = pending.next().await {
        let section = result?;
        progress.section_generated(sections.len() + 1, request_total, &section);
        sections.push(section);
    }
    drop(pending);

    if !sections.iter().any(|s| s.is_generated()) {
        let mut failed = analysis_failures;
        failed.extend(sections);
        failed.sort_by_key(|s| s.index);
        return Err(PipelineError::NothingGenerated {
            failures: section_failures(&failed),
        });
    }
    sections.extend(analysis_failures);

    let document = SpecificationDocument::new(
        Local::now().naive_local(),
        total,
        sections,
        context.merged.clone(),
    );
    info!(
        generated = document.generated_count(),
        failed = document.failed_count(),
        "run complete"
    );
    Ok(RunReport {
        analyses,
        context,
        document,
    })
}
