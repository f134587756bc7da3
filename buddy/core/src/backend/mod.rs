//! Generator Backends
//!
//! Access to the pre-built agents through the [`Generator`] trait.
//!
//! # Available Generators
//!
//! - **Ollama**: local model server, streaming or single-shot
//! - **Scripted**: deterministic replay for offline runs and tests
//!
//! # Usage
//!
//! ```ignore
//! use buddy_core::backend::{Generator, GenerationRequest, OllamaGenerator};
//! use buddy_core::ActionKind;
//!
//! let generator = OllamaGenerator::new("localhost", 11434)?;
//! let request = GenerationRequest::new(ActionKind::Chat, "Explain osmosis");
//! let rx = generator.generate(&request).await?;
//! ```

mod ollama;
mod scripted;
mod traits;

pub use ollama::OllamaGenerator;
pub use scripted::ScriptedGenerator;
pub use traits::{DeliveryMode, GenerationRequest, Generator, ProducerEvent, ProducerFault};
