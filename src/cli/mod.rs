pub mod caption;
pub mod common;
pub mod config;
pub mod diagnostics;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "caption-gen")]
#[command(author, version, about = "Caption images with a local multimodal model")]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to config file
    #[arg(short, long, global = true, env = "CAPTION_GEN_CONFIG")]
    pub config: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Generate captions for an image
    Caption(caption::CaptionArgs),

    /// Configuration management
    Config(config::ConfigArgs),
}
