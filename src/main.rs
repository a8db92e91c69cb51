use anyhow::{Context, Result, bail};
use clap::{CommandFactory, Parser};
use owo_colors::OwoColorize;
use pranimitra::audio::SystemAudioDevices;
use pranimitra::audio::capture::{list_devices, suppress_audio_warnings};
use pranimitra::call::{
    CallControl, CallController, CallOutcome, CallStatus, CallUpdate, KnowledgeBase, Speaker,
    build_system_instruction, greeting,
};
use pranimitra::cli::{CallArgs, ChatArgs, Cli, Commands, ConfigAction, QuestionsAction};
use pranimitra::config::Config;
use pranimitra::questions::QuestionLog;
use pranimitra::transport::websocket::WebSocketTransport;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    tracing::debug!(version = %pranimitra::version_string(), "Starting pranimitra");

    match cli.command {
        Commands::Call(args) => {
            let config = load_config(cli.config.as_deref())?;
            run_call(config, args, cli.quiet).await?;
        }
        Commands::Chat(args) => {
            let config = load_config(cli.config.as_deref())?;
            run_chat(config, args, cli.quiet).await?;
        }
        Commands::Devices => {
            list_audio_devices()?;
        }
        Commands::Questions { action } => {
            let config = load_config(cli.config.as_deref())?;
            handle_questions_command(action, &config)?;
        }
        Commands::Config { action } => {
            handle_config_command(action, cli.config.as_deref())?;
        }
        Commands::Completions { shell } => {
            clap_complete::generate(
                shell,
                &mut Cli::command(),
                "pranimitra",
                &mut std::io::stdout(),
            );
        }
    }

    Ok(())
}

/// `RUST_LOG` wins; otherwise `-v` raises the crate's level.
fn init_logging(verbose: u8) {
    let fallback = match verbose {
        0 => "warn",
        1 => "pranimitra=debug,info",
        _ => "pranimitra=trace,debug",
    };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| fallback.into()),
        )
        .init();
}

/// Load configuration from file or use defaults.
///
/// Priority order:
/// 1. Custom config path from CLI (--config)
/// 2. Default config path (~/.config/pranimitra/config.toml)
/// 3. Built-in defaults with environment variable overrides
fn load_config(custom_path: Option<&Path>) -> Result<Config> {
    let config = match custom_path {
        Some(path) => Config::load(path)?,
        None => match Config::default_path() {
            Some(path) => Config::load_or_default(&path)?,
            None => Config::default(),
        },
    };
    Ok(config.with_env_overrides())
}

fn apply_call_args(config: &mut Config, args: &CallArgs) {
    if let Some(language) = &args.language {
        config.session.language = language.clone();
    }
    if let Some(service) = args.service {
        config.session.service = service;
    }
    if let Some(device) = &args.device {
        config.audio.device = Some(device.clone());
    }
    if let Some(model) = &args.model {
        config.session.model = model.clone();
    }
    if let Some(path) = &args.knowledge_base {
        config.session.knowledge_base = Some(path.clone());
    }
    if let Some(dir) = &args.output_dir {
        config.recording.output_dir = Some(dir.clone());
    }
    if args.no_summary {
        config.summary.enabled = false;
    }
    if args.no_log {
        config.questions.enabled = false;
    }
}

async fn run_call(mut config: Config, args: CallArgs, quiet: bool) -> Result<()> {
    apply_call_args(&mut config, &args);
    config.validate()?;
    let api_key = config.api_key()?.to_string();

    let knowledge_base = load_knowledge_base(&config)?;
    let instruction = build_system_instruction(
        &config.session.language,
        config.session.service,
        &knowledge_base,
        &config.session.closing_message,
    );

    suppress_audio_warnings();

    let devices = SystemAudioDevices {
        input_device: config.audio.device.clone(),
        input_wav: args.input_wav.clone(),
    };
    let (updates_tx, updates_rx) = mpsc::unbounded_channel();
    let mut controller = CallController::new(
        Arc::new(WebSocketTransport::new()),
        Arc::new(devices),
        config.session_config(&api_key, instruction),
    )
    .with_options(config.call_options())
    .with_updates(updates_tx);

    if config.questions.enabled {
        match question_log_path(&config) {
            Some(path) => controller = controller.with_question_sink(Box::new(QuestionLog::new(path))),
            None => tracing::warn!("No data directory, questions will not be logged"),
        }
    }

    if !quiet {
        eprintln!(
            "{} {} in {}",
            "Calling".bold(),
            config.session.service.display_name(),
            config.session.language
        );
        eprintln!("{}", "Press Enter to end the call, type 'r' to retry.".dimmed());
    }

    let handle = controller.spawn();
    let printer = tokio::spawn(print_updates(updates_rx, quiet, config.session.service));
    read_commands(handle.control());
    tokio::spawn(watch_ctrl_c(handle.control()));

    let outcome = handle.wait().await;
    if let Err(e) = printer.await {
        tracing::debug!(error = %e, "Status printer stopped");
    }

    match outcome {
        CallOutcome::Ended(end) => {
            let dir = config
                .recording
                .output_dir
                .clone()
                .unwrap_or_else(|| PathBuf::from("."));
            match &end.recording {
                Some(artifact) => {
                    let path = artifact.save(&dir)?;
                    if !quiet {
                        eprintln!(
                            "{} {} ({:.1}s)",
                            "Recording saved:".green(),
                            path.display(),
                            artifact.duration
                        );
                    }
                }
                None => {
                    if !quiet {
                        eprintln!("{}", "No recording was made.".dimmed());
                    }
                }
            }

            if config.summary.enabled {
                print_summary(&config, &api_key, &end.transcript, quiet).await;
            }
            Ok(())
        }
        CallOutcome::Failed { reason, .. } => bail!("Call failed: {}", reason),
        CallOutcome::PermissionDenied { message } => bail!(
            "Microphone access was refused ({}). Grant access and run the call again.",
            message
        ),
        CallOutcome::Cancelled => {
            if !quiet {
                eprintln!("\nCall abandoned.");
            }
            Ok(())
        }
    }
}

fn load_knowledge_base(config: &Config) -> Result<KnowledgeBase> {
    match &config.session.knowledge_base {
        Some(path) => KnowledgeBase::load(path)
            .with_context(|| format!("Failed to load knowledge base {}", path.display())),
        None => Ok(KnowledgeBase::default()),
    }
}

/// Typed conversation on stdin; an empty line or EOF ends it.
#[cfg(feature = "summary")]
async fn run_chat(mut config: Config, args: ChatArgs, quiet: bool) -> Result<()> {
    use pranimitra::chat::{ChatSession, GeminiChatModel, welcome_message};
    use tokio::io::{AsyncBufReadExt, BufReader};

    if let Some(language) = &args.language {
        config.session.language = language.clone();
    }
    if let Some(service) = args.service {
        config.session.service = service;
    }
    if let Some(path) = &args.knowledge_base {
        config.session.knowledge_base = Some(path.clone());
    }
    if let Some(model) = &args.model {
        config.chat.model = model.clone();
    }
    if args.no_log {
        config.questions.enabled = false;
    }
    config.validate()?;
    let api_key = config.api_key()?.to_string();

    let instruction = build_system_instruction(
        &config.session.language,
        config.session.service,
        &load_knowledge_base(&config)?,
        &config.session.closing_message,
    );
    let model = GeminiChatModel::new(api_key)
        .with_base_url(config.chat.base_url.clone())
        .with_model(config.chat.model.clone());
    let mut chat = ChatSession::new(
        instruction,
        welcome_message(&config.session.language, config.session.service),
    );
    if config.questions.enabled {
        match question_log_path(&config) {
            Some(path) => chat = chat.with_question_sink(Box::new(QuestionLog::new(path))),
            None => tracing::warn!("No data directory, questions will not be logged"),
        }
    }

    if !quiet {
        eprintln!("{}", "Type a question, or an empty line to finish.".dimmed());
    }
    println!("{} {}", "Prani Mitra:".green().bold(), chat.welcome());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("Failed to read input")? {
        if line.trim().is_empty() {
            break;
        }
        if let Some(reply) = chat.send(&model, &line).await {
            println!("{} {}", "Prani Mitra:".green().bold(), reply);
        }
    }
    Ok(())
}

#[cfg(not(feature = "summary"))]
async fn run_chat(_config: Config, _args: ChatArgs, _quiet: bool) -> Result<()> {
    bail!("Built without chat support");
}

fn question_log_path(config: &Config) -> Option<PathBuf> {
    config
        .questions
        .log_path
        .clone()
        .or_else(QuestionLog::default_path)
}

#[cfg(feature = "summary")]
async fn print_summary(
    config: &Config,
    api_key: &str,
    transcript: &pranimitra::call::Transcript,
    quiet: bool,
) {
    let client = pranimitra::summary::SummaryClient::new(api_key)
        .with_base_url(config.summary.base_url.clone())
        .with_model(config.summary.model.clone());

    if !quiet && !transcript.is_empty() {
        eprintln!("{}", "Generating summary...".dimmed());
    }
    let summary = match client.summarize(transcript, &config.session.language).await {
        Ok(summary) => summary,
        Err(e) => {
            tracing::warn!(error = %e, "Summary request failed");
            pranimitra::summary::FALLBACK_SUMMARY.to_string()
        }
    };
    println!("{}", summary);
}

#[cfg(not(feature = "summary"))]
async fn print_summary(
    _config: &Config,
    _api_key: &str,
    _transcript: &pranimitra::call::Transcript,
    _quiet: bool,
) {
    tracing::debug!("Built without summary support");
}

async fn print_updates(
    mut updates: mpsc::UnboundedReceiver<CallUpdate>,
    quiet: bool,
    service: pranimitra::call::Service,
) {
    let mut pending_shown = false;
    while let Some(update) = updates.recv().await {
        if pending_shown && !matches!(update, CallUpdate::Pending(_)) {
            clear_line();
            pending_shown = false;
        }
        match update {
            CallUpdate::Pending(turn) => {
                if quiet {
                    continue;
                }
                let text = if turn.assistant_text.is_empty() {
                    turn.user_text
                } else {
                    turn.assistant_text
                };
                let text = text.trim();
                if !text.is_empty() {
                    eprint!("\r\x1b[2K{}", text.replace('\n', " ").dimmed());
                    pending_shown = true;
                }
            }
            CallUpdate::Status(status) => {
                if quiet {
                    continue;
                }
                match status {
                    CallStatus::Connecting => eprintln!("{}", "Connecting...".dimmed()),
                    CallStatus::Active => {
                        eprintln!("{}", "Connected.".green());
                        eprintln!("{}", greeting(service).dimmed());
                    }
                    CallStatus::Ending => eprintln!("{}", "Ending call...".dimmed()),
                    CallStatus::Idle => {
                        eprintln!("{}", "Call dropped. Type 'r' to retry or press Enter to quit.".yellow())
                    }
                    CallStatus::PermissionDenied => {
                        eprintln!("{}", "Microphone access denied. Type 'r' to retry.".red())
                    }
                }
            }
            CallUpdate::Entry(entry) => match entry.speaker {
                Speaker::User => println!("{} {}", "You:".cyan().bold(), entry.text),
                Speaker::Assistant => println!("{} {}", "Prani Mitra:".green().bold(), entry.text),
            },
            CallUpdate::Error(message) => {
                if !quiet {
                    eprintln!("{} {}", "Error:".red().bold(), message);
                }
            }
        }
    }
}

/// Erase the in-progress turn line.
fn clear_line() {
    eprint!("\r\x1b[2K");
}

/// Enter ends the call; `r` asks for a retry.
///
/// Runs on a plain thread: a blocking stdin read must not hold up runtime
/// shutdown.
fn read_commands(control: CallControl) {
    std::thread::spawn(move || {
        for line in std::io::stdin().lines() {
            let Ok(line) = line else {
                break;
            };
            let sent = match line.trim() {
                "r" | "retry" => control.retry(),
                _ => control.end(),
            };
            if !sent {
                break;
            }
        }
    });
}

/// First Ctrl+C ends the call gracefully, the second abandons it.
async fn watch_ctrl_c(control: CallControl) {
    if tokio::signal::ctrl_c().await.is_err() {
        return;
    }
    if !control.end() {
        return;
    }
    if tokio::signal::ctrl_c().await.is_ok() {
        control.dispose();
    }
}

/// List available audio input devices.
fn list_audio_devices() -> Result<()> {
    suppress_audio_warnings();
    let devices = list_devices()?;

    if devices.is_empty() {
        eprintln!("No audio input devices found");
        std::process::exit(1);
    }

    println!("Available audio input devices:");
    for (idx, device) in devices.iter().enumerate() {
        println!("  [{}] {}", idx, device);
    }

    Ok(())
}

fn handle_questions_command(action: QuestionsAction, config: &Config) -> Result<()> {
    let Some(path) = question_log_path(config) else {
        bail!("Could not determine the question log location; set questions.log_path");
    };
    let log = QuestionLog::new(path);

    match action {
        QuestionsAction::List => {
            let entries = log.entries()?;
            if entries.is_empty() {
                eprintln!("No questions recorded yet.");
            }
            for entry in entries {
                println!("{}", entry);
            }
        }
        QuestionsAction::Export { dir } => {
            let dir = dir.unwrap_or_else(|| PathBuf::from("."));
            let path = log.export(&dir)?;
            println!("Exported to {}", path.display());
        }
        QuestionsAction::Clear => {
            log.clear()?;
            println!("Question log cleared.");
        }
    }
    Ok(())
}

/// Handle configuration commands.
fn handle_config_command(action: ConfigAction, custom_path: Option<&Path>) -> Result<()> {
    match action {
        ConfigAction::Show => {
            let mut config = load_config(custom_path)?;
            if config.session.api_key.is_some() {
                config.session.api_key = Some("<redacted>".to_string());
            }
            print!("{}", toml::to_string_pretty(&config)?);
        }
        ConfigAction::Path => {
            let path = custom_path
                .map(Path::to_path_buf)
                .or_else(Config::default_path)
                .context("Could not determine config directory")?;
            println!("{}", path.display());
        }
        ConfigAction::Dump => {
            print!("{}", toml::to_string_pretty(&Config::default())?);
        }
    }
    Ok(())
}
