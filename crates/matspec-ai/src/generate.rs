//! Specification generation stage.

use matspec_core::markdown;
use matspec_core::{
    ConsolidatedContext, FailureStage, ImageMaterials, SectionOutcome, SectionSource,
    SpecificationSection, StageFailure,
};
use tracing::{debug, info, warn};

use crate::prompts::{
    SectionOptions, consolidated_analysis_text, image_analysis_text, specification_prompt,
};
use crate::provider::{AuthFailure, Completion, CompletionError, CompletionProvider, require_text};
use crate::retry::{RetryPolicy, with_retry};

/// Title prefix of a top-level section and the title used when it is missing.
const EXECUTIVE_SUMMARY: (&str, &str) = ("executive summary", "Executive Summary");
const SUSTAINABILITY: (&str, &str) = ("sustainability", "Sustainability Considerations");
const ALTERNATIVES: (&str, &str) = ("alternative material", "Alternative Materials");

/// Input for one generation call.
#[derive(Debug, Clone)]
pub struct GenerationRequest<'a> {
    /// Input position used to order the section in the document.
    pub index: usize,
    pub source: SectionSource,
    pub brief: &'a str,
    pub material_analysis: String,
    pub options: SectionOptions,
}

impl<'a> GenerationRequest<'a> {
    /// One section for one analysed image.
    pub fn for_image(group: &ImageMaterials, brief: &'a str, options: SectionOptions) -> Self {
        Self {
            index: group.index,
            source: SectionSource::Image(group.image.clone()),
            brief,
            material_analysis: image_analysis_text(group),
            options,
        }
    }

    /// One section covering every analysed image.
    pub fn consolidated(context: &'a ConsolidatedContext, options: SectionOptions) -> Self {
        Self {
            index: context.groups.first().map(|g| g.index).unwrap_or_default(),
            source: SectionSource::Merged(context.image_names()),
            brief: &context.brief,
            material_analysis: consolidated_analysis_text(context),
            options,
        }
    }
}

fn required(options: SectionOptions) -> Vec<(&'static str, &'static str)> {
    let mut out = vec![EXECUTIVE_SUMMARY];
    if options.sustainability {
        out.push(SUSTAINABILITY);
    }
    if options.alternatives {
        out.push(ALTERNATIVES);
    }
    out
}

/// Titles of required sections absent from `text`.
fn missing_sections(text: &str, options: SectionOptions) -> Vec<String> {
    required(options)
        .into_iter()
        .filter(|(keyword, _)| !markdown::has_section(text, keyword))
        .map(|(_, title)| title.to_string())
        .collect()
}

/// Split the optional blocks out of the body and drop any not requested.
fn split_sections(
    text: &str,
    options: SectionOptions,
) -> (String, Option<String>, Option<String>) {
    let text = markdown::strip_leading_title(text);
    let (rest, sustainability) = markdown::extract_section(&text, SUSTAINABILITY.0);
    let (mut body, alternatives) = markdown::extract_section(&rest, ALTERNATIVES.0);
    let sustainability = sustainability.filter(|_| options.sustainability);
    let alternatives = alternatives.filter(|_| options.alternatives);

    if !options.sustainability {
        body = markdown::strip_sections(&body, SUSTAINABILITY.0);
    }
    if !options.alternatives {
        body = markdown::strip_sections(&body, ALTERNATIVES.0);
    }
    (body, sustainability, alternatives)
}

/// One generation request under the retry policy.
async fn request_text(
    provider: &dyn CompletionProvider,
    prompt: &str,
    policy: &RetryPolicy,
    label: &str,
) -> Result<Result<Completion, StageFailure>, AuthFailure> {
    let result = with_retry(policy, label, || async move {
        provider.generate_text(prompt).await.and_then(require_text)
    })
    .await;
    match result {
        Ok((completion, attempts)) => {
            debug!(section = label, attempts, tokens = completion.tokens_used, "generated text");
            Ok(Ok(completion))
        }
        Err(failure) => match failure.error {
            CompletionError::Auth(message) => Err(AuthFailure { message }),
            error => Ok(Err(error.to_failure(failure.attempts))),
        },
    }
}

/// Generate the specification section for `request`.
///
/// A reply missing a required section is regenerated once; whatever is still
/// missing afterwards is listed in the outcome so the formatter can note it.
pub async fn generate_section(
    provider: &dyn CompletionProvider,
    request: &GenerationRequest<'_>,
    policy: &RetryPolicy,
) -> Result<SpecificationSection, AuthFailure> {
    let label = request.source.describe();
    let prompt = specification_prompt(request.brief, &request.material_analysis, request.options);

    let first = match request_text(provider, &prompt, policy, &label).await? {
        Ok(completion) => completion,
        Err(failure) => {
            warn!(section = %label, error = %failure, "specification generation failed");
            return Ok(SpecificationSection::failed(
                request.index,
                request.source.clone(),
                FailureStage::Generation,
                failure,
            ));
        }
    };

    let mut text = first.text;
    let mut missing = missing_sections(&text, request.options);
    if !missing.is_empty() {
        info!(section = %label, missing = ?missing, "required sections missing, regenerating");
        match request_text(provider, &prompt, policy, &label).await? {
            Ok(second) => {
                let second_missing = missing_sections(&second.text, request.options);
                if second_missing.len() < missing.len() {
                    text = second.text;
                    missing = second_missing;
                }
            }
            Err(failure) => {
                warn!(section = %label, error = %failure, "regeneration failed, keeping first reply");
            }
        }
        if !missing.is_empty() {
            warn!(section = %label, missing = ?missing, "sections still missing after regeneration");
        }
    }

    let (body, sustainability, alternatives) = split_sections(&text, request.options);
    info!(section = %label, "generated specification section");
    Ok(SpecificationSection {
        index: request.index,
        source: request.source.clone(),
        outcome: SectionOutcome::Generated {
            body,
            sustainability,
            alternatives,
            missing,
        },
    })
}
