//! Command-line host: one-shot `ask`, line-by-line `chat`, and an `auth` check.

use crate::bridge::Bridge;
use crate::config::Config;
use crate::conversation::{AskOutcome, FRAGMENT_BUFFER};
use crate::elicit::{Elicitation, Elicitor, Hooks, ProgressSink};
use anyhow::{Result, bail};
use async_trait::async_trait;
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader, Lines};
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Environment variable holding the log filter.
pub const LOG_ENV: &str = "AGENTFORCE_LOG";

/// Talk to a remote conversational agent from the terminal
#[derive(Parser, Debug)]
#[command(name = "agentforce-bridge", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file (defaults to the user config directory)
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Debug logging to stderr
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Ask one question and print the answer
    Ask(AskArgs),
    /// Ask one question per input line
    Chat(ChatArgs),
    /// Fetch an access token and show when it expires
    Auth,
}

#[derive(Parser, Debug)]
pub struct AskArgs {
    /// The question (use "-" to read from stdin)
    #[arg(required = true)]
    pub query: String,

    /// Output format
    #[arg(short = 'o', long, default_value = "text", value_enum)]
    pub output: OutputFormat,

    /// Quiet mode (answer only, no progress)
    #[arg(short, long)]
    pub quiet: bool,
}

#[derive(Parser, Debug)]
pub struct ChatArgs {
    /// Answers only, no prompt or progress
    #[arg(short, long)]
    pub quiet: bool,
}

#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
    StreamJson,
}

/// JSON output structure for json/stream-json modes
#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum JsonEvent {
    TextDelta { text: String },
    Progress { message: String },
    Done { response: String, outcome: String },
    Error { message: String },
}

fn print_json(event: &JsonEvent, pretty: bool) {
    let json = if pretty {
        serde_json::to_string_pretty(event)
    } else {
        serde_json::to_string(event)
    };
    match json {
        Ok(json) => println!("{json}"),
        Err(e) => warn!(error = %e, "Failed to encode output event"),
    }
}

/// Shared line reader. `chat` reads queries from it and the elicitor reads
/// answers from it, one at a time.
pub struct ConsoleInput<R> {
    lines: Mutex<Lines<BufReader<R>>>,
}

impl ConsoleInput<tokio::io::Stdin> {
    pub fn stdin() -> Self {
        Self::new(tokio::io::stdin())
    }
}

impl<R: AsyncRead + Unpin + Send> ConsoleInput<R> {
    pub fn new(reader: R) -> Self {
        Self {
            lines: Mutex::new(BufReader::new(reader).lines()),
        }
    }

    pub async fn next_line(&self) -> io::Result<Option<String>> {
        self.lines.lock().await.next_line().await
    }

    /// Everything left, lines joined with `\n`.
    pub async fn read_to_end(&self) -> io::Result<String> {
        let mut lines = self.lines.lock().await;
        let mut all = Vec::new();
        while let Some(line) = lines.next_line().await? {
            all.push(line);
        }
        Ok(all.join("\n"))
    }
}

/// Prompts on stderr, answers from the shared input.
pub struct ConsoleElicitor<'a, R> {
    input: &'a ConsoleInput<R>,
}

impl<'a, R> ConsoleElicitor<'a, R> {
    pub fn new(input: &'a ConsoleInput<R>) -> Self {
        Self { input }
    }
}

#[async_trait]
impl<R: AsyncRead + Unpin + Send> Elicitor for ConsoleElicitor<'_, R> {
    async fn ask(&self, question: &str) -> Elicitation {
        eprint!("\n? {question}\n(empty line declines) > ");
        let _ = io::stderr().flush();
        elicitation_from_input(self.input.next_line().await)
    }
}

/// Empty answer declines, end of input dismisses.
fn elicitation_from_input(line: io::Result<Option<String>>) -> Elicitation {
    match line {
        Ok(Some(line)) if line.trim().is_empty() => Elicitation::decline(),
        Ok(Some(line)) => Elicitation::accept(line.trim()),
        Ok(None) => Elicitation::cancel(),
        Err(e) => {
            warn!(error = %e, "Failed to read answer");
            Elicitation::cancel()
        }
    }
}

pub struct ConsoleProgress {
    format: OutputFormat,
}

impl ConsoleProgress {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }
}

impl ProgressSink for ConsoleProgress {
    fn notify(&self, text: &str) {
        match self.format {
            OutputFormat::StreamJson => print_json(
                &JsonEvent::Progress {
                    message: text.to_string(),
                },
                false,
            ),
            OutputFormat::Text | OutputFormat::Json => eprintln!("· {text}"),
        }
    }
}

/// Install the stderr subscriber. `verbose` wins over the environment.
pub fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("agentforce_bridge=debug")
    } else {
        EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();
}

/// Token cancelled by the first Ctrl-C.
fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received");
            token.cancel();
        }
    });
    cancel
}

fn outcome_label(outcome: &AskOutcome) -> &'static str {
    match outcome {
        AskOutcome::Completed => "completed",
        AskOutcome::Declined => "declined",
        AskOutcome::Dismissed => "dismissed",
        AskOutcome::Interrupted => "interrupted",
        AskOutcome::Failed(_) => "failed",
    }
}

fn exit_status(outcome: &AskOutcome) -> u8 {
    match outcome {
        AskOutcome::Completed | AskOutcome::Declined | AskOutcome::Dismissed => 0,
        AskOutcome::Failed(_) => 1,
        AskOutcome::Interrupted => 3,
    }
}

/// Print fragments as they arrive and return the assembled answer.
async fn relay(
    mut rx: mpsc::Receiver<String>,
    format: OutputFormat,
    quiet: bool,
) -> Result<String> {
    let mut response = String::new();
    while let Some(fragment) = rx.recv().await {
        match format {
            OutputFormat::Text if !quiet => {
                print!("{fragment}");
                io::stdout().flush()?;
            }
            OutputFormat::StreamJson => print_json(
                &JsonEvent::TextDelta {
                    text: fragment.clone(),
                },
                false,
            ),
            _ => {}
        }
        response.push_str(&fragment);
    }
    Ok(response)
}

async fn ask_once(
    bridge: &Bridge,
    query: &str,
    hooks: Hooks<'_>,
    format: OutputFormat,
    quiet: bool,
    cancel: &CancellationToken,
) -> Result<(String, AskOutcome)> {
    let (tx, rx) = mpsc::channel(FRAGMENT_BUFFER);
    let produce = async move {
        let outcome = bridge.conversation().ask(query, hooks, &tx, cancel).await;
        drop(tx);
        outcome
    };
    let (outcome, response) = tokio::join!(produce, relay(rx, format, quiet));
    Ok((response?, outcome))
}

/// Output final result based on format.
fn output_result(response: &str, format: OutputFormat, quiet: bool, outcome: &AskOutcome) -> u8 {
    let done = JsonEvent::Done {
        response: response.to_string(),
        outcome: outcome_label(outcome).to_string(),
    };
    match format {
        OutputFormat::Text => {
            if quiet {
                println!("{response}");
            } else if !response.ends_with('\n') {
                println!();
            }
        }
        OutputFormat::Json => print_json(&done, true),
        OutputFormat::StreamJson => print_json(&done, false),
    }

    match outcome {
        AskOutcome::Interrupted if format == OutputFormat::Text => eprintln!("Interrupted"),
        AskOutcome::Failed(message) if format != OutputFormat::Text => print_json(
            &JsonEvent::Error {
                message: message.clone(),
            },
            false,
        ),
        _ => {}
    }
    exit_status(outcome)
}

/// Run the parsed command line.
pub async fn run(cli: Cli) -> ExitCode {
    init_tracing(cli.verbose);
    match run_inner(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::from(1)
        }
    }
}

async fn run_inner(cli: Cli) -> Result<ExitCode> {
    let settings = Config::load(cli.config.as_deref())?.resolve()?;
    let bridge = Bridge::new(&settings);

    let token = match bridge.authenticate().await {
        Ok(token) => token,
        Err(e) => {
            error!(error = %e, "Initial authentication failed");
            eprintln!("FATAL: Initial authentication failed: {e}");
            return Ok(ExitCode::from(1));
        }
    };

    match cli.command {
        Commands::Auth => {
            println!(
                "Authenticated. Access token expires at {}",
                token.expires_at().to_rfc3339()
            );
            Ok(ExitCode::SUCCESS)
        }
        Commands::Ask(args) => ask(&bridge, args).await,
        Commands::Chat(args) => chat(&bridge, args).await,
    }
}

async fn ask(bridge: &Bridge, args: AskArgs) -> Result<ExitCode> {
    let input = ConsoleInput::stdin();
    let query = if args.query == "-" {
        input.read_to_end().await?
    } else {
        args.query
    };
    let query = query.trim();
    if query.is_empty() {
        bail!("Empty query");
    }

    let elicitor = ConsoleElicitor::new(&input);
    let progress = ConsoleProgress::new(args.output);
    let hooks = Hooks {
        elicitor: Some(&elicitor),
        progress: (!args.quiet).then_some(&progress as &dyn ProgressSink),
    };
    let cancel = cancel_on_ctrl_c();

    let (response, outcome) =
        ask_once(bridge, query, hooks, args.output, args.quiet, &cancel).await?;
    Ok(ExitCode::from(output_result(
        &response,
        args.output,
        args.quiet,
        &outcome,
    )))
}

async fn chat(bridge: &Bridge, args: ChatArgs) -> Result<ExitCode> {
    let input = ConsoleInput::stdin();
    let elicitor = ConsoleElicitor::new(&input);
    let progress = ConsoleProgress::new(OutputFormat::Text);
    let hooks = Hooks {
        elicitor: Some(&elicitor),
        progress: (!args.quiet).then_some(&progress as &dyn ProgressSink),
    };
    let cancel = cancel_on_ctrl_c();

    loop {
        if !args.quiet {
            eprint!("you> ");
            let _ = io::stderr().flush();
        }
        let line = tokio::select! {
            () = cancel.cancelled() => break,
            line = input.next_line() => line?,
        };
        let Some(line) = line else { break };
        let query = line.trim();
        if query.is_empty() {
            continue;
        }

        let (response, outcome) =
            ask_once(bridge, query, hooks, OutputFormat::Text, args.quiet, &cancel).await?;
        output_result(&response, OutputFormat::Text, args.quiet, &outcome);
        if outcome == AskOutcome::Interrupted {
            break;
        }
    }

    if cancel.is_cancelled() {
        Ok(ExitCode::from(3))
    } else {
        Ok(ExitCode::SUCCESS)
    }
}
