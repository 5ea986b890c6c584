use anyhow::Result;
use clap::Args;
use std::io::Write;
use tokio_util::sync::CancellationToken;

use caption_gen::caption::{
    CaptionDispatcher, CaptionOutcome, Framing, ImageInput, NullObserver, RequestMode,
};
use caption_gen::config::Config;

use crate::cli::common::TerminalPrinter;
use crate::cli::diagnostics::log_startup;

#[derive(Args)]
pub struct CaptionArgs {
    /// Image file to caption
    pub image: Option<String>,

    /// Print the caption as it is generated
    #[arg(short, long, conflicts_with = "mode")]
    pub stream: bool,

    /// Request mode: buffered or streaming (overrides config)
    #[arg(long)]
    pub mode: Option<RequestMode>,

    /// Model to use (overrides config)
    #[arg(short, long)]
    pub model: Option<String>,

    /// Ollama base URL (overrides config and environment)
    #[arg(short, long)]
    pub endpoint: Option<String>,

    /// Give up after this many seconds (0 = wait forever)
    #[arg(short, long)]
    pub timeout: Option<u64>,

    /// Custom instructions instead of the built-in caption prompt
    #[arg(short, long)]
    pub prompt: Option<String>,

    /// Stream line framing: line_buffered or per_chunk
    #[arg(long)]
    pub framing: Option<Framing>,

    /// Output format: text (default) or json
    #[arg(short, long, default_value = "text")]
    pub format: String,
}

impl CaptionArgs {
    fn apply(&self, config: &mut Config) -> RequestMode {
        if let Some(ref model) = self.model {
            config.ollama.model = model.clone();
        }
        if let Some(ref endpoint) = self.endpoint {
            config.ollama.endpoint = endpoint.clone();
        }
        if let Some(timeout) = self.timeout {
            config.caption.timeout_seconds = timeout;
        }
        if let Some(ref prompt) = self.prompt {
            config.caption.prompt = Some(prompt.clone());
        }
        if let Some(framing) = self.framing {
            config.caption.framing = framing;
        }

        if self.stream {
            RequestMode::Streaming
        } else {
            self.mode.unwrap_or(config.caption.mode)
        }
    }
}

pub async fn run(args: CaptionArgs, mut config: Config) -> Result<()> {
    let mode = args.apply(&mut config);
    config.validate()?;
    log_startup(&config, mode);

    let json = match args.format.as_str() {
        "json" => true,
        "text" => false,
        other => anyhow::bail!("Unknown output format '{}'. Expected 'text' or 'json'", other),
    };

    let image = match args.image.as_deref() {
        Some(path) => Some(ImageInput::from_path(path, config.caption.max_image_bytes).await?),
        None => None,
    };

    let dispatcher = CaptionDispatcher::from_config(&config)?;

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("Interrupted, cancelling caption request");
                cancel.cancel();
            }
        });
    }

    // Only stream to the terminal when the text is the output.
    let live = mode.is_streaming() && !json;
    let mut printer = TerminalPrinter::new(std::io::stdout());
    let mut silent = NullObserver;

    let result = if live {
        dispatcher
            .generate_caption_with_cancel(image.as_ref(), mode, &mut printer, &cancel)
            .await
    } else {
        dispatcher
            .generate_caption_with_cancel(image.as_ref(), mode, &mut silent, &cancel)
            .await
    };

    printer.finish();
    let outcome = match result {
        Ok(outcome) => outcome,
        Err(e) if e.status_code() == Some(404) => {
            anyhow::bail!("{} (try `ollama pull {}`)", e, dispatcher.model());
        }
        Err(e) => return Err(e.into()),
    };

    if json {
        print_json(&outcome, image.as_ref(), dispatcher.model())?;
    } else if !live {
        println!("{}", outcome.caption);
    } else if printer.printed() == 0 {
        tracing::warn!("Model returned an empty caption");
    }

    Ok(())
}

fn print_json(outcome: &CaptionOutcome, image: Option<&ImageInput>, model: &str) -> Result<()> {
    let output = serde_json::json!({
        "image": image.map(|i| i.name()),
        "model": model,
        "mode": outcome.mode,
        "caption": outcome.caption,
        "publishes": outcome.publishes,
        "done": outcome.done,
        "latency_ms": outcome.latency_ms,
    });
    let mut stdout = std::io::stdout();
    writeln!(stdout, "{}", serde_json::to_string_pretty(&output)?)?;
    Ok(())
}
