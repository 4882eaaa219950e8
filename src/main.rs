use std::process::ExitCode;

use anyhow::Context as _;
use clap::Parser as _;

#[tokio::main]
async fn main() -> ExitCode {
    if let Err(err) = try_main().await {
        eprintln!("{err:#}");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

async fn try_main() -> anyhow::Result<()> {
    chapterpdf::logging::init().context("init logging")?;

    let cli = chapterpdf::cli::Cli::parse();
    tracing::debug!(?cli, "parsed cli");

    match cli.command {
        chapterpdf::cli::Command::Chapters(args) => {
            chapterpdf::commands::chapters(args)
                .await
                .context("chapters")?;
        }
        chapterpdf::cli::Command::Chapter(args) => {
            chapterpdf::commands::chapter(args).await.context("chapter")?;
        }
        chapterpdf::cli::Command::All(args) => {
            chapterpdf::commands::all(args).await.context("all")?;
        }
        chapterpdf::cli::Command::Images(args) => {
            chapterpdf::commands::images(args).await.context("images")?;
        }
    }

    Ok(())
}
