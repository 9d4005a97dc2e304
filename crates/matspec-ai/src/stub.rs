//! Scripted completion provider for tests.
//!
//! Replies are scripted per image (vision) or queued (generation). When no
//! script remains the stub answers deterministically: a fixed two-material
//! vision reply, and a generated section that includes the optional
//! sustainability and alternatives parts exactly when the prompt asks for them.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use matspec_core::ImageInput;

use crate::provider::{Completion, CompletionError, CompletionProvider};

type Script = VecDeque<Result<String, CompletionError>>;

#[derive(Debug, Default)]
pub struct StubProvider {
    vision_scripts: Mutex<HashMap<String, Script>>,
    vision_replies: HashMap<String, String>,
    vision_delays: HashMap<String, Duration>,
    generation_script: Mutex<Script>,
    generation_failures: Mutex<HashMap<String, VecDeque<CompletionError>>>,
    vision_prompts: Mutex<Vec<String>>,
    generation_prompts: Mutex<Vec<String>>,
    vision_calls: AtomicUsize,
    generation_calls: AtomicUsize,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Minimal transport-ready image for driving the stages without files.
pub fn test_image(name: &str) -> ImageInput {
    ImageInput {
        name: name.to_string(),
        path: None,
        source_media_type: "image/png".into(),
        media_type: "image/jpeg".into(),
        encoded: "/9j/2wBDAA==".into(),
        original_len: 8,
    }
}

/// Fixed vision reply naming the image it came from.
pub fn default_vision_reply(image: &str) -> String {
    format!(
        "## 1. Glass curtain wall\n\
         - Material type: Glass curtain wall\n\
         - Visual characteristics: Clear low-e glazing, slim mullions\n\
         - Prominence: high\n\
         - Observations: Seen in {image}\n\
         \n\
         ## 2. Timber cladding\n\
         - Material type: Timber cladding\n\
         - Visual characteristics: Vertical cedar boards\n\
         - Prominence: medium"
    )
}

fn default_generation(prompt: &str) -> String {
    let subject = prompt
        .lines()
        .find_map(|l| l.strip_prefix("Image: "))
        .unwrap_or("the project");
    let mut out = format!(
        "### 1. Executive Summary\n\
         Preliminary material palette for {subject}.\n\
         \n\
         ### 2. Material Specifications\n\
         #### Division 08 - Openings\n\
         Glazing to match the visualization."
    );
    if prompt.contains("SUSTAINABILITY CONSIDERATIONS") {
        out.push_str("\n\n### 3. Sustainability Considerations\n- Embodied carbon of aluminium framing");
    }
    if prompt.contains("ALTERNATIVE MATERIALS") {
        out.push_str("\n\n### 4. Alternative Materials\n- Fibre cement boards in place of cedar");
    }
    out
}

fn completion(text: String) -> Completion {
    Completion {
        tokens_used: text.split_whitespace().count() as u32,
        text,
    }
}

impl StubProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reply used for `image` once its script is exhausted.
    pub fn with_vision_reply(mut self, image: &str, reply: &str) -> Self {
        self.vision_replies.insert(image.to_string(), reply.to_string());
        self
    }

    /// Results returned, in order, for the next vision calls on `image`.
    pub fn with_vision_replies(
        mut self,
        image: &str,
        script: Vec<Result<String, CompletionError>>,
    ) -> Self {
        self.vision_scripts
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(image.to_string())
            .or_default()
            .extend(script);
        self
    }

    /// Delay every vision call on `image`, to force completion order.
    pub fn with_vision_delay(mut self, image: &str, delay: Duration) -> Self {
        self.vision_delays.insert(image.to_string(), delay);
        self
    }

    /// Results returned, in order, for the next generation calls.
    pub fn with_generation_replies(mut self, script: Vec<Result<String, CompletionError>>) -> Self {
        self.generation_script
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(script);
        self
    }

    /// Errors returned for generation prompts that cover `image`.
    pub fn with_generation_failures_for(mut self, image: &str, errors: Vec<CompletionError>) -> Self {
        self.generation_failures
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(image.to_string())
            .or_default()
            .extend(errors);
        self
    }

    pub fn vision_calls(&self) -> usize {
        self.vision_calls.load(Ordering::SeqCst)
    }

    pub fn generation_calls(&self) -> usize {
        self.generation_calls.load(Ordering::SeqCst)
    }

    pub fn vision_prompts(&self) -> Vec<String> {
        lock(&self.vision_prompts).clone()
    }

    pub fn generation_prompts(&self) -> Vec<String> {
        lock(&self.generation_prompts).clone()
    }
}

#[async_trait]
impl CompletionProvider for StubProvider {
    async fn analyze_image(
        &self,
        image: &ImageInput,
        instruction: &str,
    ) -> Result<Completion, CompletionError> {
        self.vision_calls.fetch_add(1, Ordering::SeqCst);
        lock(&self.vision_prompts).push(instruction.to_string());

        if let Some(delay) = self.vision_delays.get(&image.name) {
            tokio::time::sleep(*delay).await;
        }

        let scripted = lock(&self.vision_scripts)
            .get_mut(&image.name)
            .and_then(VecDeque::pop_front);
        let text = match scripted {
            Some(result) => result?,
            None => self
                .vision_replies
                .get(&image.name)
                .cloned()
                .unwrap_or_else(|| default_vision_reply(&image.name)),
        };
        Ok(completion(text))
    }

    async fn generate_text(&self, prompt: &str) -> Result<Completion, CompletionError> {
        self.generation_calls.fetch_add(1, Ordering::SeqCst);
        lock(&self.generation_prompts).push(prompt.to_string());

        let failure = lock(&self.generation_failures)
            .iter_mut()
            .find(|(image, _)| prompt.contains(&format!("Image: {image}\n")))
            .and_then(|(_, errors)| errors.pop_front());
        if let Some(error) = failure {
            return Err(error);
        }

        let scripted = lock(&self.generation_script).pop_front();
        let text = match scripted {
            Some(result) => result?,
            None => default_generation(prompt),
        };
        Ok(completion(text))
    }
}
