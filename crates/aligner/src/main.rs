//! The `aligner` command: asks one question and prints every step the
//! agent takes to answer it.

#[macro_use]
extern crate tracing;

use std::io::{self, IsTerminal};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use aligner::App;
use aligner::config::Config;
use aligner::console::{self, ConsoleObserver};
use aligner::core::{SessionEvent, StepObserver};
use clap::Parser;
use futures_util::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use tokio::select;
use tokio::time::sleep;
use tracing_subscriber::EnvFilter;

const BANNER: &str = "Wikidata Aligner v0.1";

#[derive(Debug, Parser)]
#[command(name = "aligner", version)]
#[command(about = "Answers questions with Wikidata through MCP tool servers")]
struct Cli {
    /// The question to answer.
    #[arg(
        default_value = "What is the capital of Hungary according to Wikidata?"
    )]
    question: String,

    /// Path to the configuration file.
    #[arg(short, long, default_value = "aligner.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .init();

    if let Err(err) = dotenvy::dotenv() {
        debug!("no .env file loaded: {err}");
    }
    let cli = Cli::parse();

    let config = match Config::load(&cli.config, |key| std::env::var(key).ok())
    {
        Ok(config) => config,
        Err(errors) => {
            for err in errors {
                eprintln!("{err}");
            }
            return ExitCode::FAILURE;
        }
    };
    debug!("loaded configuration: {config:?}");

    let colored = io::stdout().is_terminal();
    print!("{}", console::format_banner(BANNER, colored));

    let app = match App::start(&config).await {
        Ok(app) => app,
        Err(err) => {
            eprintln!("{err}");
            return ExitCode::FAILURE;
        }
    };

    let observer = ConsoleObserver::new(colored);
    let progress_style = ProgressStyle::with_template("{spinner} {wide_msg}")
        .map(|style| style.tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏"))
        .unwrap_or_else(|_| ProgressStyle::default_spinner());

    let mut ask = app.agent().session().ask(cli.question);
    let mut progress_bar: Option<ProgressBar> = None;
    let mut answer = None;
    let outcome = loop {
        // Create a new progress bar if it has been finished.
        progress_bar
            .get_or_insert_with(|| {
                let progress_bar = ProgressBar::new_spinner();
                progress_bar.set_style(progress_style.clone());
                progress_bar.set_message("🤔 Thinking...");
                progress_bar
            })
            .inc(1);

        let event = select! {
            event = ask.next() => event,
            _ = sleep(Duration::from_millis(100)) => {
                continue;
            }
        };

        // Finish the progress bar before printing anything else.
        if let Some(progress_bar) = progress_bar.take() {
            progress_bar.finish_and_clear();
        }

        match event {
            Some(Ok(SessionEvent::Step { item, context })) => {
                observer.on_step(&item, &context);
            }
            Some(Ok(SessionEvent::Answer(message))) => answer = Some(message),
            Some(Err(err)) => break Err(err),
            None => break Ok(()),
        }
    };
    app.shutdown();

    match (outcome, answer) {
        (Ok(()), Some(message)) => {
            print!("{}", console::format_answer(&message.text(), colored));
            ExitCode::SUCCESS
        }
        (Ok(()), None) => {
            eprintln!("the agent stopped without answering");
            ExitCode::FAILURE
        }
        (Err(err), _) => {
            eprintln!("{err}");
            ExitCode::FAILURE
        }
    }
}
