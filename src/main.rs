use std::io::Write;
use std::process::ExitCode;
use std::sync::Arc;

use chrono::Local;
use clap::{Args, Parser, Subcommand};
use futures_util::StreamExt;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use finaid_desk_lib::config::{AppConfig, ConfigError};
use finaid_desk_lib::coordinator::ExtractionCoordinator;
use finaid_desk_lib::foundry::{
    CatalogModel, ChatTransport, FoundryClient, FoundryError, MockFoundry, ModelProvider,
};
use finaid_desk_lib::inbox::sample_messages;
use finaid_desk_lib::model_manager::{
    load_catalog, prepare_session, release_session, ModelSession, ModelStatus,
};
use finaid_desk_lib::models::{StudentMessage, StudentProfile};
use finaid_desk_lib::pipeline::chat::{ChatError, ChatStreamEvent, EligibilityChat};
use finaid_desk_lib::pipeline::extraction::{extract, ExtractionError, ExtractionUpdate};

const MOCK_MODEL: &str = "mock-phi-4-mini";

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List the sample student inbox.
    Inbox,

    /// List catalog models and whether they are downloaded.
    Models {
        /// Use the built-in offline mock instead of the local service.
        /// FINAID_* settings are ignored.
        #[arg(long)]
        mock: bool,
    },

    /// Extract a student profile, streaming the raw model output.
    Extract {
        #[command(flatten)]
        source: MessageSource,

        #[command(flatten)]
        model: ModelArgs,
    },

    /// Ask eligibility questions about a student, one per line on stdin.
    Chat {
        /// Inbox message number (see `inbox`).
        #[arg(long)]
        message: usize,

        #[command(flatten)]
        model: ModelArgs,
    },
}

#[derive(Args)]
#[group(required = true, multiple = false)]
struct MessageSource {
    /// Inbox message number (see `inbox`).
    #[arg(long)]
    message: Option<usize>,

    /// Free text to extract from.
    #[arg(long)]
    text: Option<String>,
}

#[derive(Args)]
struct ModelArgs {
    /// Model id or alias. Defaults to FINAID_MODEL.
    #[arg(long)]
    model: Option<String>,

    /// Use the built-in offline mock instead of the local service.
    /// FINAID_* settings are ignored.
    #[arg(long)]
    mock: bool,
}

#[derive(Error, Debug)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Foundry(#[from] FoundryError),

    #[error(transparent)]
    Extraction(#[from] ExtractionError),

    #[error(transparent)]
    Chat(#[from] ChatError),

    #[error("No model selected. Pass --model or set FINAID_MODEL.")]
    NoModel,

    #[error("Message {0} does not exist; the inbox has {1} messages")]
    NoSuchMessage(usize, usize),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CliError {
    fn is_cancelled(&self) -> bool {
        match self {
            CliError::Extraction(e) => e.is_cancelled(),
            CliError::Chat(e) => matches!(e, ChatError::Cancelled),
            _ => false,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    finaid_desk_lib::init_tracing();
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) if e.is_cancelled() => {
            eprintln!("\nCancelled.");
            ExitCode::from(130)
        }
        Err(e) => {
            tracing::error!(error = %e, "Command failed");
            eprintln!("\nError: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let env = |var: &str| std::env::var(var).ok();
    let coordinator = Arc::new(ExtractionCoordinator::new());
    spawn_ctrl_c_handler(Arc::clone(&coordinator));

    match cli.command {
        Command::Inbox => {
            print_inbox();
            Ok(())
        }
        Command::Models { mock } => {
            if mock {
                list_models(&mock_backend()).await
            } else {
                let config = load_config(false, env)?;
                list_models(&FoundryClient::from_config(&config)?).await
            }
        }
        Command::Extract { source, model } => {
            // clap guarantees exactly one of the two is set.
            let text = match source.message {
                Some(number) => pick_message(number)?.message_text,
                None => source.text.unwrap_or_default(),
            };
            let config = load_config(model.mock, env)?;
            let model_id = resolve_model(&model, &config)?;
            if model.mock {
                let mock = mock_backend();
                mock.enqueue_reply(&mock_extraction_reply(&text));
                extract_command(&mock, &config, &model_id, &text, &coordinator).await
            } else {
                let client = FoundryClient::from_config(&config)?;
                extract_command(&client, &config, &model_id, &text, &coordinator).await
            }
        }
        Command::Chat { message, model } => {
            let message = pick_message(message)?;
            let config = load_config(model.mock, env)?;
            let model_id = resolve_model(&model, &config)?;
            if model.mock {
                let mock = mock_backend();
                mock.enqueue_reply(&mock_extraction_reply(&message.message_text));
                chat_command(&mock, Some(&mock), &config, &model_id, &message, &coordinator).await
            } else {
                let client = FoundryClient::from_config(&config)?;
                chat_command(&client, None, &config, &model_id, &message, &coordinator).await
            }
        }
    }
}

/// Ctrl-C cancels the active run instead of killing the process.
fn spawn_ctrl_c_handler(coordinator: Arc<ExtractionCoordinator>) {
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            if coordinator.is_active() {
                coordinator.cancel_current();
            } else {
                std::process::exit(130);
            }
        }
    });
}

/// The offline mock never reaches the service, so it skips the environment.
fn load_config<F>(mock: bool, lookup: F) -> Result<AppConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if mock {
        Ok(AppConfig::default())
    } else {
        AppConfig::from_lookup(lookup)
    }
}

/// Registers a run with the coordinator and clears it on drop, so an early
/// error return never leaves a stale token behind for Ctrl-C.
struct ActiveRun<'a> {
    coordinator: &'a ExtractionCoordinator,
    token: CancellationToken,
}

impl<'a> ActiveRun<'a> {
    fn begin(coordinator: &'a ExtractionCoordinator) -> Self {
        Self {
            coordinator,
            token: coordinator.begin(),
        }
    }

    fn token(&self) -> CancellationToken {
        self.token.clone()
    }
}

impl Drop for ActiveRun<'_> {
    fn drop(&mut self) {
        self.coordinator.cancel_current();
    }
}

fn resolve_model(args: &ModelArgs, config: &AppConfig) -> Result<String, CliError> {
    if let Some(model) = &args.model {
        return Ok(model.clone());
    }
    if args.mock {
        return Ok(MOCK_MODEL.to_string());
    }
    config.default_model.clone().ok_or(CliError::NoModel)
}

fn pick_message(number: usize) -> Result<StudentMessage, CliError> {
    let messages = sample_messages(Local::now());
    let total = messages.len();
    number
        .checked_sub(1)
        .and_then(|index| messages.into_iter().nth(index))
        .ok_or(CliError::NoSuchMessage(number, total))
}

fn print_inbox() {
    let now = Local::now();
    for (i, message) in sample_messages(now).iter().enumerate() {
        println!(
            "{:>2}. {} {:<10} {:<16} {}",
            i + 1,
            if message.is_urgent { "!" } else { " " },
            message.time_ago(now),
            message.student_name,
            message.subject
        );
    }
}

async fn list_models<P: ModelProvider>(provider: &P) -> Result<(), CliError> {
    let catalog = load_catalog(provider).await?;
    if catalog.is_empty() {
        println!("The model catalog is empty.");
        return Ok(());
    }
    for entry in catalog.all() {
        let size = entry
            .model
            .file_size_mb
            .map(|mb| format!("{mb} MB"))
            .unwrap_or_default();
        println!(
            "{:<16} {:<4} {:<24} {:>9}  {}",
            entry.status().label(),
            entry.model.device_type,
            entry.display_name(),
            size,
            entry.model.id
        );
    }
    Ok(())
}

/// Download (if needed) and load the model, showing download progress.
async fn open_session<P: ModelProvider>(
    provider: &P,
    config: &AppConfig,
    model_id: &str,
) -> Result<ModelSession, CliError> {
    let catalog = load_catalog(provider).await?;
    let (status_tx, mut status_rx) = mpsc::channel::<ModelStatus>(16);

    let progress = tokio::spawn(async move {
        let mut shown = false;
        while let Some(status) = status_rx.recv().await {
            eprint!("\r{:<24}", status.label());
            shown = true;
        }
        if shown {
            eprintln!();
        }
    });

    let session = prepare_session(provider, &catalog, model_id, status_tx).await;
    if let Err(e) = progress.await {
        tracing::warn!(error = %e, "Progress reporter stopped unexpectedly");
    }
    Ok(session?.with_options(config.generation_options()))
}

async fn close_session<P: ModelProvider>(provider: &P, session: &ModelSession) {
    if let Err(e) = release_session(provider, session).await {
        tracing::warn!(model = %session.model_id, error = %e, "Failed to unload model");
    }
}

async fn extract_command<P>(
    provider: &P,
    config: &AppConfig,
    model_id: &str,
    text: &str,
    coordinator: &ExtractionCoordinator,
) -> Result<(), CliError>
where
    P: ModelProvider + ChatTransport,
{
    let session = open_session(provider, config, model_id).await?;
    let result = stream_extraction(provider, &session, text, coordinator).await;
    close_session(provider, &session).await;

    print_profile(&result?);
    Ok(())
}

/// Run one extraction, echoing raw chunks to stdout as they arrive.
async fn stream_extraction<T: ChatTransport>(
    transport: &T,
    session: &ModelSession,
    text: &str,
    coordinator: &ExtractionCoordinator,
) -> Result<StudentProfile, CliError> {
    let run = ActiveRun::begin(coordinator);
    let updates = extract(transport, session, text, run.token());
    tokio::pin!(updates);

    let mut stdout = std::io::stdout();
    let mut profile = None;
    while let Some(update) = updates.next().await {
        match update? {
            ExtractionUpdate::Partial { text } => {
                write!(stdout, "{text}")?;
                stdout.flush()?;
            }
            ExtractionUpdate::Final { profile: p } => profile = Some(p),
        }
    }
    writeln!(stdout)?;

    // A run that ends without error always ends with Final.
    Ok(profile.unwrap_or_default())
}

fn print_profile(profile: &StudentProfile) {
    println!();
    println!("Student profile");
    for (label, value) in profile.summary_lines() {
        println!("  {label:<20} {value}");
    }
}

async fn chat_command<P>(
    provider: &P,
    mock: Option<&MockFoundry>,
    config: &AppConfig,
    model_id: &str,
    message: &StudentMessage,
    coordinator: &ExtractionCoordinator,
) -> Result<(), CliError>
where
    P: ModelProvider + ChatTransport,
{
    let session = open_session(provider, config, model_id).await?;
    let result = chat_loop(provider, mock, &session, message, coordinator).await;
    close_session(provider, &session).await;
    result
}

async fn chat_loop<T: ChatTransport>(
    transport: &T,
    mock: Option<&MockFoundry>,
    session: &ModelSession,
    message: &StudentMessage,
    coordinator: &ExtractionCoordinator,
) -> Result<(), CliError> {
    println!("{} ({}): {}", message.student_name, message.student_id, message.subject);
    let profile = stream_extraction(transport, session, &message.message_text, coordinator).await?;
    print_profile(&profile);
    println!();
    println!("Ask a question about this student (empty line or Ctrl-D to quit).");

    let mut chat = EligibilityChat::default();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = std::io::stdout();

    loop {
        write!(stdout, "> ")?;
        stdout.flush()?;
        let Some(question) = lines.next_line().await? else {
            break;
        };
        if question.trim().is_empty() {
            break;
        }
        if let Some(mock) = mock {
            mock.enqueue_reply(&mock_chat_reply());
        }

        let run = ActiveRun::begin(coordinator);
        let events = chat.respond(transport, session, &question, &profile, run.token());
        tokio::pin!(events);
        while let Some(event) = events.next().await {
            match event {
                Ok(ChatStreamEvent::Token { text }) => {
                    write!(stdout, "{text}")?;
                    stdout.flush()?;
                }
                Ok(ChatStreamEvent::Done { .. }) => writeln!(stdout)?,
                Err(ChatError::Cancelled) => writeln!(stdout, "\n(cancelled)")?,
                Err(e) => return Err(e.into()),
            }
        }
    }
    Ok(())
}

// ── Offline mock ────────────────────────────────────────────

fn mock_backend() -> MockFoundry {
    let model = CatalogModel {
        id: MOCK_MODEL.to_string(),
        alias: Some("mock".to_string()),
        device_type: "CPU".to_string(),
        file_size_mb: Some(0),
        uri: None,
        provider_type: None,
    };
    MockFoundry::new().with_catalog(vec![model], &[MOCK_MODEL])
}

/// A fenced reply naming the student, split into small fragments.
fn mock_extraction_reply(text: &str) -> Vec<String> {
    let first_name = text
        .split_whitespace()
        .skip_while(|w| !matches!(*w, "I'm" | "is"))
        .nth(1)
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()).to_string())
        .filter(|w| !w.is_empty());
    let profile = StudentProfile {
        first_name,
        ..Default::default()
    };
    let json = serde_json::to_string_pretty(&profile).unwrap_or_else(|_| "{}".to_string());
    fragments(&format!("```json\n{json}\n```"), 6)
}

fn mock_chat_reply() -> Vec<String> {
    "This is the offline demo. Start the local model service and drop --mock for real answers."
        .split_inclusive(' ')
        .map(str::to_string)
        .collect()
}

fn fragments(text: &str, size: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    chars.chunks(size).map(|c| c.iter().collect()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use finaid_desk_lib::pipeline::extraction::recovery::recover;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn extract_requires_exactly_one_source() {
        assert!(Cli::try_parse_from(["finaid-desk", "extract", "--mock"]).is_err());
        assert!(Cli::try_parse_from([
            "finaid-desk", "extract", "--message", "1", "--text", "hi"
        ])
        .is_err());
        assert!(Cli::try_parse_from(["finaid-desk", "extract", "--text", "hi", "--mock"]).is_ok());
    }

    #[test]
    fn pick_message_is_one_based() {
        assert_eq!(pick_message(1).unwrap().student_name, "Sarah Johnson");
        assert_eq!(pick_message(6).unwrap().student_name, "James Thompson");
        assert!(matches!(pick_message(0), Err(CliError::NoSuchMessage(0, 6))));
        assert!(matches!(pick_message(7), Err(CliError::NoSuchMessage(7, 6))));
    }

    #[test]
    fn fragments_split_on_char_boundaries() {
        assert_eq!(fragments("café au lait", 4), vec!["café", " au ", "lait"]);
        assert_eq!(fragments("abc", 6), vec!["abc"]);
        assert!(fragments("", 6).is_empty());
    }

    #[test]
    fn mock_reply_recovers_to_named_profile() {
        let message = pick_message(2).unwrap();
        let reply = mock_extraction_reply(&message.message_text);
        assert!(reply.len() > 1);

        let profile = recover(&reply.concat()).unwrap();
        assert_eq!(profile.first_name.as_deref(), Some("Mike"));
    }

    #[test]
    fn resolve_model_order() {
        let config = AppConfig {
            default_model: Some("phi-4-mini".into()),
            ..AppConfig::default()
        };
        let args = |model: Option<&str>, mock: bool| ModelArgs {
            model: model.map(str::to_string),
            mock,
        };

        assert_eq!(resolve_model(&args(Some("qwen"), true), &config).unwrap(), "qwen");
        assert_eq!(resolve_model(&args(None, true), &config).unwrap(), MOCK_MODEL);
        assert_eq!(resolve_model(&args(None, false), &config).unwrap(), "phi-4-mini");
        assert!(matches!(
            resolve_model(&args(None, false), &AppConfig::default()),
            Err(CliError::NoModel)
        ));
    }

    #[test]
    fn mock_mode_ignores_invalid_environment() {
        let lookup = |var: &str| {
            (var == "FINAID_SERVICE_URL").then(|| "http://models.example.com".to_string())
        };

        assert_eq!(load_config(true, lookup).unwrap(), AppConfig::default());
        assert!(matches!(
            load_config(false, lookup),
            Err(ConfigError::InvalidServiceUrl { .. })
        ));
    }

    #[test]
    fn active_run_clears_coordinator_on_drop() {
        let coordinator = ExtractionCoordinator::new();
        let token = {
            let run = ActiveRun::begin(&coordinator);
            assert!(coordinator.is_active());
            run.token()
        };
        assert!(!coordinator.is_active());
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn failed_extraction_leaves_no_active_run() {
        let mock = mock_backend();
        mock.enqueue_reply(&["not json at all"]);
        let session = open_session(&mock, &AppConfig::default(), MOCK_MODEL)
            .await
            .unwrap();
        let coordinator = ExtractionCoordinator::new();

        let result = stream_extraction(&mock, &session, "text", &coordinator).await;
        assert!(matches!(
            result,
            Err(CliError::Extraction(ExtractionError::Parse { .. }))
        ));
        assert!(!coordinator.is_active());
    }

    #[tokio::test]
    async fn open_session_loads_mock_model() {
        let mock = mock_backend();
        let session = open_session(&mock, &AppConfig::default(), "mock").await.unwrap();
        assert_eq!(session.model_id, MOCK_MODEL);
        assert_eq!(mock.loaded_models(), vec![MOCK_MODEL]);
    }
}
