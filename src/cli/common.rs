use anyhow::Result;
use std::io::Write;
use std::path::PathBuf;

use caption_gen::caption::CaptionObserver;
use caption_gen::config::Config;

/// Load the config from `--config` when given, else from the default location.
pub fn load_config(path: Option<&str>) -> Result<Config> {
    match path {
        Some(p) => Config::load_from(&expand_path(p)),
        None => Config::load(),
    }
}

/// Where `config set` / `config init` should write.
pub fn config_target(path: Option<&str>) -> Result<PathBuf> {
    match path {
        Some(p) => Ok(expand_path(p)),
        None => Config::config_path(),
    }
}

fn expand_path(p: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(p).to_string())
}

/// Writes each newly published suffix to stdout, giving a typing effect.
pub struct TerminalPrinter<W: Write + Send> {
    out: W,
    shown: String,
}

impl<W: Write + Send> TerminalPrinter<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            shown: String::new(),
        }
    }

    /// Terminate the line if anything was printed.
    pub fn finish(&mut self) {
        if !self.shown.is_empty() {
            let _ = writeln!(self.out);
            let _ = self.out.flush();
        }
    }

    pub fn printed(&self) -> usize {
        self.shown.len()
    }
}

impl<W: Write + Send> CaptionObserver for TerminalPrinter<W> {
    fn publish(&mut self, caption: &str) {
        let delta = match caption.strip_prefix(self.shown.as_str()) {
            Some(delta) => delta,
            None => {
                // Not an extension of what is on screen; start over on a new line.
                let _ = writeln!(self.out);
                caption
            }
        };
        let _ = write!(self.out, "{}", delta);
        let _ = self.out.flush();
        self.shown = caption.to_string();
    }
}
