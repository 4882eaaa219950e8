use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(author, version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// List a series' chapters in reading order (JSON lines on stdout).
    Chapters(ChaptersArgs),
    /// Download one chapter page and assemble it into a PDF.
    Chapter(ChapterArgs),
    /// Download every chapter of a series, in chapter order.
    All(AllArgs),
    /// Assemble a chapter from an explicit list of image URLs.
    Images(ImagesArgs),
}

#[derive(Debug, Clone, Args)]
pub struct SiteArgs {
    /// YAML site profile (selectors, referer, extra headers).
    #[arg(long)]
    pub site_config: Option<String>,

    /// Override the profile's `Referer` header.
    #[arg(long)]
    pub referer: Option<String>,
}

#[derive(Debug, Clone, Args)]
pub struct FetchArgs {
    /// Attempts per request before giving up.
    #[arg(long, default_value_t = 5)]
    pub retries: usize,

    /// First backoff delay; doubles after each failed attempt.
    #[arg(long, default_value_t = 1000)]
    pub retry_base_ms: u64,

    /// Timeout for a single HTTP attempt.
    #[arg(long, default_value_t = 30)]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Args)]
pub struct OutputArgs {
    /// Output directory for finished documents.
    #[arg(long, default_value = "manga")]
    pub out: String,

    /// Parent of per-chapter scratch directories (default: `<out>/.scratch`).
    #[arg(long)]
    pub scratch_dir: Option<String>,

    /// Maximum concurrent page downloads.
    #[arg(long, default_value_t = 8)]
    pub concurrency: usize,

    /// Delay before a chapter's scratch directory is removed.
    #[arg(long, default_value_t = 1000)]
    pub settle_ms: u64,

    /// Save the last error response of failed pages here.
    #[arg(long)]
    pub diagnostics_dir: Option<String>,

    /// Append one JSON line per chapter run to this file.
    #[arg(long)]
    pub report: Option<String>,
}

#[derive(Debug, Args)]
pub struct ChaptersArgs {
    /// Series listing URL (must be http/https).
    #[arg(long)]
    pub url: String,

    #[command(flatten)]
    pub site: SiteArgs,

    #[command(flatten)]
    pub fetch: FetchArgs,
}

#[derive(Debug, Args)]
pub struct ChapterArgs {
    /// Chapter reader URL.
    #[arg(long)]
    pub url: String,

    /// Chapter label, e.g. "Chapter 12" (used for numbering and file names).
    #[arg(long)]
    pub name: String,

    #[command(flatten)]
    pub site: SiteArgs,

    #[command(flatten)]
    pub fetch: FetchArgs,

    #[command(flatten)]
    pub output: OutputArgs,
}

#[derive(Debug, Args)]
pub struct AllArgs {
    /// Series listing URL (must be http/https).
    #[arg(long)]
    pub url: String,

    /// Only download chapters with these exact labels (repeatable).
    #[arg(long)]
    pub only: Vec<String>,

    #[command(flatten)]
    pub site: SiteArgs,

    #[command(flatten)]
    pub fetch: FetchArgs,

    #[command(flatten)]
    pub output: OutputArgs,
}

#[derive(Debug, Args)]
pub struct ImagesArgs {
    /// Chapter label, e.g. "Chapter 12".
    #[arg(long)]
    pub name: String,

    /// File with one image URL per line, in page order.
    #[arg(long)]
    pub urls_file: String,

    #[command(flatten)]
    pub site: SiteArgs,

    #[command(flatten)]
    pub fetch: FetchArgs,

    #[command(flatten)]
    pub output: OutputArgs,
}
