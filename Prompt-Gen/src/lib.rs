//! # Prompt Gen
//!
//! Generates batches of image or video prompts from a context text using an
//! Ollama-compatible LLM.
//!
//! ## Features
//!
//! - Image and video prompt templates, with an "enhanced" detailed mode
//! - JSON mode requests with defensive parsing (objects, arrays, code
//!   blocks, numbered lists)
//! - De-duplicated, size-capped batches
//! - [`PromptGenerator`] trait so queues can swap in other backends
//!
//! ## Quick Start
//!
//! ```no_run
//! use prompt_gen::{GenerateRequest, GeneratorConfig, MediaKind, OllamaGenerator, PromptGenerator};
//!
//! # async fn run() -> prompt_gen::Result<()> {
//! let generator = OllamaGenerator::new(GeneratorConfig::default().with_model("llama3.1"))?;
//! let request = GenerateRequest::new("foggy mountain villages", 5).with_media_kind(MediaKind::Video);
//! let prompts = generator.generate(&request).await?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod error;
pub mod prompt;
pub mod types;

pub use client::{parse_prompts, GeneratorConfig, OllamaGenerator};
pub use error::{GenError, Result};
pub use types::{GenerateRequest, MediaKind, MAX_BATCH};

use async_trait::async_trait;

/// Source of fresh prompts.
#[async_trait]
pub trait PromptGenerator: Send + Sync {
    /// Produce up to `request.count` prompts. An empty batch is an error.
    async fn generate(&self, request: &GenerateRequest) -> Result<Vec<String>>;
}
