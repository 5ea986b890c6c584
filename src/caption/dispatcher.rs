//! Request dispatcher: one image, one request, caption published through an
//! observer as it becomes available.

use futures::StreamExt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::accumulator::{CaptionAccumulator, CaptionObserver};
use super::client::{CaptionBackend, OllamaClient};
use super::decoder::{decode_stream, Framing};
use super::error::{CaptionError, Result};
use super::image::ImageInput;
use super::request::{GenerateRequest, RequestMode, DEFAULT_MODEL, DEFAULT_PROMPT};
use crate::config::Config;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptionOutcome {
    pub caption: String,
    pub mode: RequestMode,
    pub publishes: usize,
    /// Whether the endpoint marked the generation finished.
    pub done: bool,
    pub latency_ms: u64,
}

pub struct CaptionDispatcher {
    backend: Arc<dyn CaptionBackend>,
    model: String,
    prompt: String,
    framing: Framing,
    timeout: Option<Duration>,
    in_flight: AtomicBool,
}

/// Clears the in-flight flag on every exit path, including a dropped future.
struct InFlightGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> InFlightGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Result<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| CaptionError::Busy)?;
        Ok(Self { flag })
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

impl CaptionDispatcher {
    pub fn new(backend: Arc<dyn CaptionBackend>) -> Self {
        Self {
            backend,
            model: DEFAULT_MODEL.to_string(),
            prompt: DEFAULT_PROMPT.to_string(),
            framing: Framing::default(),
            timeout: None,
            in_flight: AtomicBool::new(false),
        }
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        let timeout = config.caption.timeout();
        let client = OllamaClient::with_connect_timeout(&config.ollama.endpoint, timeout)?;

        Ok(Self::new(Arc::new(client))
            .with_model(&config.ollama.model)
            .with_prompt(config.caption.prompt())
            .with_framing(config.caption.framing)
            .with_timeout(timeout))
    }

    pub fn with_model(mut self, model: &str) -> Self {
        self.model = model.to_string();
        self
    }

    pub fn with_prompt(mut self, prompt: &str) -> Self {
        self.prompt = prompt.to_string();
        self
    }

    pub fn with_framing(mut self, framing: Framing) -> Self {
        self.framing = framing;
        self
    }

    /// Deadline for the whole request, streamed body included. `None` waits forever.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn endpoint(&self) -> String {
        self.backend.endpoint()
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    pub async fn generate_caption(
        &self,
        image: Option<&ImageInput>,
        mode: RequestMode,
        observer: &mut dyn CaptionObserver,
    ) -> Result<CaptionOutcome> {
        self.generate_caption_with_cancel(image, mode, observer, &CancellationToken::new())
            .await
    }

    pub async fn generate_caption_with_cancel(
        &self,
        image: Option<&ImageInput>,
        mode: RequestMode,
        observer: &mut dyn CaptionObserver,
        cancel: &CancellationToken,
    ) -> Result<CaptionOutcome> {
        let start = Instant::now();
        let (accumulator, result) = self.dispatch(image, mode, observer, cancel).await;
        let done = result?;

        Ok(CaptionOutcome {
            publishes: accumulator.publishes(),
            caption: accumulator.into_string(),
            mode,
            done,
            latency_ms: start.elapsed().as_millis() as u64,
        })
    }

    /// Never fails: errors are logged and whatever text was published before
    /// the failure is returned (empty for a failed buffered request).
    pub async fn generate_caption_or_empty(
        &self,
        image: Option<&ImageInput>,
        mode: RequestMode,
        observer: &mut dyn CaptionObserver,
    ) -> String {
        let (accumulator, _) = self
            .dispatch(image, mode, observer, &CancellationToken::new())
            .await;
        accumulator.into_string()
    }

    async fn dispatch(
        &self,
        image: Option<&ImageInput>,
        mode: RequestMode,
        observer: &mut dyn CaptionObserver,
        cancel: &CancellationToken,
    ) -> (CaptionAccumulator, Result<bool>) {
        let mut accumulator = CaptionAccumulator::new();

        let image = match image {
            Some(image) => image,
            None => {
                error!("No image selected");
                return (accumulator, Err(CaptionError::NoImageSelected));
            }
        };

        let _guard = match InFlightGuard::acquire(&self.in_flight) {
            Ok(guard) => guard,
            Err(e) => {
                error!("{}", e);
                return (accumulator, Err(e));
            }
        };

        info!(
            "Requesting {} caption for {} ({} bytes, {}) from {} using {}",
            mode,
            image.name(),
            image.len(),
            image.media_type(),
            self.backend.endpoint(),
            self.model
        );

        let request = GenerateRequest::new(&self.model, &self.prompt, image.to_base64(), mode);

        let result = {
            let work = self.run(&request, mode, &mut accumulator, observer);
            tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(CaptionError::Cancelled),
                result = with_deadline(self.timeout, work) => result,
            }
        };

        match &result {
            Ok(done) => info!(
                "Caption ready ({} chars, {} publish(es), done: {})",
                accumulator.as_str().len(),
                accumulator.publishes(),
                done
            ),
            Err(e) => error!("Error calling Ollama: {}", e),
        }

        (accumulator, result)
    }

    async fn run(
        &self,
        request: &GenerateRequest,
        mode: RequestMode,
        accumulator: &mut CaptionAccumulator,
        observer: &mut dyn CaptionObserver,
    ) -> Result<bool> {
        match mode {
            RequestMode::Buffered => {
                let response = self.backend.generate(request).await?;
                let done = response.done.unwrap_or(true);
                let caption = response.into_caption()?;
                accumulator.set(caption, observer);
                Ok(done)
            }
            RequestMode::Streaming => {
                let body = self.backend.generate_stream(request).await?;
                let mut fragments = std::pin::pin!(decode_stream(body, self.framing));
                let mut done = false;

                while let Some(fragment) = fragments.next().await {
                    let fragment = fragment?;
                    if let Some(token) = fragment.token() {
                        accumulator.append(token, observer);
                    }
                    if fragment.done {
                        done = true;
                        debug!(
                            "Generation done (reason: {}, tokens: {}, duration: {}ms)",
                            fragment.done_reason.as_deref().unwrap_or("unknown"),
                            fragment.eval_count.unwrap_or(0),
                            fragment.total_duration.unwrap_or(0) / 1_000_000
                        );
                    }
                }

                Ok(done)
            }
        }
    }
}

async fn with_deadline<F, T>(timeout: Option<Duration>, work: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match timeout {
        Some(limit) => tokio::time::timeout(limit, work)
            .await
            .map_err(|_| CaptionError::Timeout(limit))?,
        None => work.await,
    }
}
