//! AI layer: completion provider seam, vision analysis and specification
//! generation stages.
//!
//! The HTTP client for the Anthropic Messages API sits behind the `anthropic`
//! feature; the scripted [`StubProvider`] behind `testing`.

pub mod generate;
pub mod parse;
pub mod prompts;
pub mod provider;
pub mod retry;
pub mod vision;

#[cfg(feature = "anthropic")]
pub mod anthropic;

#[cfg(any(test, feature = "testing"))]
pub mod stub;

pub use generate::{GenerationRequest, generate_section};
pub use parse::parse_materials;
pub use prompts::SectionOptions;
pub use provider::{AuthFailure, Completion, CompletionError, CompletionProvider};
pub use retry::{RetryFailure, RetryPolicy, with_retry};
pub use vision::analyze_image;

#[cfg(feature = "anthropic")]
pub use anthropic::AnthropicClient;

#[cfg(any(test, feature = "testing"))]
pub use stub::StubProvider;
