//! Image captioning against a local Ollama endpoint.
//!
//! [`CaptionDispatcher`] sends one image per call in either buffered or
//! streaming mode and publishes the caption through a [`CaptionObserver`].
//! Streaming bodies are decoded by [`decode_stream`].

pub mod accumulator;
pub mod client;
pub mod decoder;
pub mod dispatcher;
pub mod error;
pub mod image;
pub mod request;

pub use accumulator::{CaptionAccumulator, CaptionObserver, NullObserver, RecordingObserver};
pub use client::{ByteStream, CaptionBackend, OllamaClient, DEFAULT_OLLAMA_ENDPOINT};
pub use decoder::{decode_stream, Framing, LineDecoder};
pub use dispatcher::{CaptionDispatcher, CaptionOutcome};
pub use error::{CaptionError, Result};
pub use image::{ImageInput, DEFAULT_MAX_IMAGE_BYTES};
pub use request::{
    GenerateRequest, GenerateResponse, GenerationFragment, RequestMode, DEFAULT_MODEL,
    DEFAULT_PROMPT, UNSURE_PHRASE,
};
