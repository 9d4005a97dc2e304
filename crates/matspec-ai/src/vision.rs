//! Vision analysis stage: one image in, one `ImageAnalysis` out.

use matspec_core::config::PromptSettings;
use matspec_core::{AnalysisOutcome, ImageAnalysis, ImageInput};
use tracing::{info, warn};

use crate::parse::parse_materials;
use crate::prompts::vision_prompt;
use crate::provider::{AuthFailure, CompletionError, CompletionProvider, require_text};
use crate::retry::{RetryPolicy, with_retry};

/// Analyse one image.
///
/// Per-image failures become `AnalysisOutcome::Failed`; only an
/// authentication failure is returned as an error, since it affects every
/// remaining request.
pub async fn analyze_image(
    provider: &dyn CompletionProvider,
    index: usize,
    image: &ImageInput,
    brief_excerpt: &str,
    policy: &RetryPolicy,
    prompts: &PromptSettings,
) -> Result<ImageAnalysis, AuthFailure> {
    let instruction = vision_prompt(brief_excerpt, prompts);
    let instruction = instruction.as_str();

    let result = with_retry(policy, &image.name, || async move {
        provider
            .analyze_image(image, instruction)
            .await
            .and_then(require_text)
    })
    .await;

    let outcome = match result {
        Ok((completion, attempts)) => {
            let materials = parse_materials(&image.name, &completion.text);
            info!(
                image = %image.name,
                materials = materials.len(),
                attempts,
                tokens = completion.tokens_used,
                "analysed image"
            );
            AnalysisOutcome::Analyzed {
                materials,
                raw_reply: completion.text,
            }
        }
        Err(failure) => {
            if let CompletionError::Auth(message) = failure.error {
                return Err(AuthFailure { message });
            }
            warn!(
                image = %image.name,
                attempts = failure.attempts,
                error = %failure.error,
                "image analysis failed"
            );
            AnalysisOutcome::Failed(failure.error.to_failure(failure.attempts))
        }
    };

    Ok(ImageAnalysis {
        index,
        image: image.name.clone(),
        outcome,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stub::{StubProvider, test_image};
    use matspec_core::FailureKind;

    #[tokio::test]
    async fn parses_reply_into_records() {
        let stub = StubProvider::new().with_vision_reply(
            "a.png",
            "## Glass\n- Material type: Low-E glass\n- Prominence: high",
        );
        let analysis = analyze_image(
            &stub,
            0,
            &test_image("a.png"),
            "A library",
            &RetryPolicy::immediate(),
            &PromptSettings::default(),
        )
        .await
        .unwrap();
        assert!(analysis.is_analyzed());
        assert_eq!(analysis.materials().len(), 1);
        assert_eq!(analysis.materials()[0].source_image, "a.png");
        assert!(stub.vision_prompts()[0].contains("Project context: A library"));
    }

    #[tokio::test]
    async fn unparseable_reply_is_still_analysed() {
        let stub = StubProvider::new().with_vision_reply("a.png", "Mostly glass, honestly.");
        let analysis = analyze_image(
            &stub,
            0,
            &test_image("a.png"),
            "",
            &RetryPolicy::immediate(),
            &PromptSettings::default(),
        )
        .await
        .unwrap();
        assert!(analysis.is_analyzed());
        assert!(analysis.materials().is_empty());
        assert_eq!(analysis.raw_reply(), Some("Mostly glass, honestly."));
    }

    #[tokio::test]
    async fn empty_reply_is_retried() {
        let stub = StubProvider::new()
            .with_vision_replies("a.png", vec![Ok(String::new())])
            .with_vision_reply("a.png", "## Brick\n- Material type: Brick");
        let analysis = analyze_image(
            &stub,
            0,
            &test_image("a.png"),
            "",
            &RetryPolicy::immediate(),
            &PromptSettings::default(),
        )
        .await
        .unwrap();
        assert!(analysis.is_analyzed());
        assert_eq!(stub.vision_calls(), 2);
    }

    #[tokio::test]
    async fn persistent_transient_failure_marks_image_failed() {
        let stub = StubProvider::new().with_vision_replies(
            "a.png",
            vec![
                Err(CompletionError::Transient("timeout".into())),
                Err(CompletionError::Transient("timeout".into())),
            ],
        );
        let analysis = analyze_image(
            &stub,
            3,
            &test_image("a.png"),
            "",
            &RetryPolicy::immediate(),
            &PromptSettings::default(),
        )
        .await
        .unwrap();
        let failure = analysis.failure().unwrap();
        assert_eq!(failure.kind, FailureKind::Transient);
        assert_eq!(failure.attempts, 2);
        assert_eq!(analysis.index, 3);
    }

    #[tokio::test]
    async fn auth_failure_aborts() {
        let stub = StubProvider::new()
            .with_vision_replies("a.png", vec![Err(CompletionError::Auth("invalid x-api-key".into()))]);
        let err = analyze_image(
            &stub,
            0,
            &test_image("a.png"),
            "",
            &RetryPolicy::immediate(),
            &PromptSettings::default(),
        )
        .await
        .unwrap_err();
        assert_eq!(err.message, "invalid x-api-key");
        assert_eq!(stub.vision_calls(), 1);
    }
}
