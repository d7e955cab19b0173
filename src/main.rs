//! WebPilot CLI: interactive natural-language browser automation.

use std::io::Write as _;
use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

use webpilot_cli::app::App;
use webpilot_cli::config::Settings;
use webpilot_cli::executor::ProgressEvent;

#[derive(Parser, Debug)]
#[command(
    name = "webpilot",
    version,
    about = "LLM-driven browser automation",
    long_about = "Drives a real browser from natural-language commands: planning via an LLM, \
                  element resolution, overlay dismissal and health-based session recovery."
)]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Run the browser headless regardless of the configured value.
    #[arg(long)]
    headless: bool,

    /// Execute a single command and exit instead of starting the REPL.
    #[arg(short = 'e', long = "exec")]
    command: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();

    let mut settings = Settings::load(cli.config.as_deref())?;
    if cli.headless {
        settings.browser.headless = true;
    }

    let (app, mut progress_rx, mut fatal_rx) = App::start(settings).await?;

    // Status renderer: progress events are the only channel between
    // execution and presentation.
    let renderer = tokio::spawn(async move {
        while let Some(event) = progress_rx.recv().await {
            match event {
                ProgressEvent::PlanReceived { actions } => {
                    eprintln!("  plan: {actions} action(s)");
                }
                ProgressEvent::Navigating { url } => eprintln!("  -> {url}"),
                ProgressEvent::StepStarted { index, kind } => {
                    eprintln!("  step {}: {}", index + 1, kind.name());
                }
                ProgressEvent::StepFinished { .. } => {}
                ProgressEvent::Extracting => eprintln!("  extracting..."),
                ProgressEvent::Completed => eprintln!("  done"),
                ProgressEvent::Failed { reason } => eprintln!("  failed: {reason}"),
            }
        }
    });

    let exit_code = if let Some(command) = cli.command {
        run_single(&app, &command).await
    } else {
        run_repl(&app, &mut fatal_rx).await
    };

    app.shutdown().await;
    renderer.abort();
    if exit_code != 0 {
        std::process::exit(exit_code);
    }
    Ok(())
}

async fn run_single(app: &App, command: &str) -> i32 {
    match app.execute_command(command).await {
        Ok(outcome) => {
            println!("{outcome}");
            0
        }
        Err(err) => {
            eprintln!("Error: {err}");
            1
        }
    }
}

async fn run_repl(
    app: &App,
    fatal_rx: &mut tokio::sync::watch::Receiver<Option<String>>,
) -> i32 {
    println!("WebPilot ready. Enter commands in natural language, e.g.:");
    println!("  - go to youtube and find videos about Python programming");
    println!("  - visit ft.com and summarize the top articles");
    println!("Type 'exit' to quit.\n");

    let stdin = BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();

    loop {
        print!("> ");
        let _ = std::io::stdout().flush();

        let line = tokio::select! {
            changed = fatal_rx.changed() => {
                if changed.is_ok() {
                    if let Some(reason) = fatal_rx.borrow().clone() {
                        eprintln!("Fatal session error: {reason}");
                        return 1;
                    }
                }
                continue;
            }
            line = lines.next_line() => line,
        };

        let command = match line {
            Ok(Some(text)) => text.trim().to_string(),
            Ok(None) => return 0,
            Err(err) => {
                eprintln!("Input error: {err}");
                return 1;
            }
        };

        if command.is_empty() {
            continue;
        }
        if matches!(command.to_lowercase().as_str(), "exit" | "quit") {
            return 0;
        }

        // Every command yields either a result or a readable error; the
        // loop keeps accepting commands after both.
        match app.execute_command(&command).await {
            Ok(outcome) => println!("{outcome}"),
            Err(err) if err.is_fatal() => {
                eprintln!("Fatal: {err}");
                return 1;
            }
            Err(err) => eprintln!("Error: {err}"),
        }
    }
}
