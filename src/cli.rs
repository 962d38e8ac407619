use clap::Parser;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
    Srt,
}

#[derive(Parser)]
#[command(
    name = "subgrab",
    about = "YouTube and Bilibili metadata and subtitle extractor",
    version = env!("GIT_DESCRIBE"),
)]
pub struct Cli {
    /// Video page URL or YouTube video ID (reads from stdin if omitted)
    pub url: Option<String>,

    /// Output format: text (default), json, srt
    #[arg(short, long, value_enum)]
    pub format: Option<OutputFormat>,

    /// Preferred caption language
    #[arg(short, long)]
    pub lang: Option<String>,

    /// Write output to file instead of stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Saved page HTML to read metadata from instead of fetching the watch page
    #[arg(long)]
    pub html: Option<PathBuf>,

    /// Caption request issued by the page before extraction
    #[arg(long)]
    pub player_request: Option<String>,

    /// Send the bundle to the configured backend
    #[arg(long)]
    pub submit: bool,

    /// Show platform, metadata and subtitle counts
    #[arg(short, long)]
    pub verbose: bool,
}
