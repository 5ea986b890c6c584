use tracing::debug;

use caption_gen::caption::RequestMode;
use caption_gen::config::Config;

/// Log what this run is about to talk to.
pub fn log_startup(config: &Config, mode: RequestMode) {
    let version = env!("CARGO_PKG_VERSION");

    let timeout = config
        .caption
        .timeout()
        .map(|t| format!("{}s", t.as_secs()))
        .unwrap_or_else(|| "none".to_string());

    let prompt = if config.caption.prompt.is_some() {
        "custom"
    } else {
        "built-in"
    };

    debug!(
        "caption-gen v{}\n\
         Endpoint: {}\n\
         Model: {}\n\
         Mode: {} (framing: {})\n\
         Timeout: {}\n\
         Prompt: {}",
        version,
        config.ollama.endpoint,
        config.ollama.model,
        mode,
        config.caption.framing,
        timeout,
        prompt
    );
}
