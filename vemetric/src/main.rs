//! vemetric - send page views, events and user updates from the command line
//!
//! Each invocation boots a tracker for the page given by `--url`, runs one
//! command and waits for outstanding beacons before exiting.
//!
//! Uses XDG Base Directory specification for file locations:
//! - Config: $XDG_CONFIG_HOME/vemetric/config.toml (~/.config/vemetric/config.toml)
//! - Session: $XDG_STATE_HOME/vemetric/session.json (~/.local/state/vemetric/session.json)
//! - Logs: $XDG_STATE_HOME/vemetric/vemetric.log unless `[logging] directory` is set

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use vemetric_core::{
    Command as TrackerCommand, CommandQueue, Config, EventProps, FileStorage, HttpTransport,
    IdentifyProps, IdentityStore, Loader, Options, PageSnapshot, ScriptAttributes, Tracker,
    UserData,
};

const SDK_NAME: &str = "cli";

#[derive(Parser)]
#[command(name = "vemetric")]
#[command(about = "Send page views, events and user updates to Vemetric")]
#[command(version)]
struct Args {
    /// Verbose output (writes a log file)
    #[arg(short, long)]
    verbose: bool,

    /// URL of the page the command is attributed to
    #[arg(long, global = true, default_value = "about:blank")]
    url: String,

    /// Referrer of the page
    #[arg(long, global = true)]
    referrer: Option<String>,

    /// Embedding attribute overriding the config, e.g. data-token=abc
    #[arg(long = "attr", global = true, value_parser = parse_key_val)]
    attrs: Vec<(String, String)>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show configuration and session state
    Status,

    /// Track a page view for --url
    PageView,

    /// Track leaving --url
    PageLeave,

    /// Track a custom event
    Track {
        /// Event name
        name: String,

        /// Event data; values are parsed as JSON when possible
        #[arg(long = "data", value_parser = parse_key_val)]
        data: Vec<(String, String)>,

        /// Fire and forget instead of waiting for the response
        #[arg(long)]
        beacon: bool,
    },

    /// Identify the current user
    Identify {
        /// User identifier
        id: String,

        #[arg(long)]
        display_name: Option<String>,

        /// User properties to set
        #[arg(long = "set", value_parser = parse_key_val)]
        set: Vec<(String, String)>,
    },

    /// Update the current user's properties
    UpdateUser {
        #[arg(long = "set", value_parser = parse_key_val)]
        set: Vec<(String, String)>,

        #[arg(long = "set-once", value_parser = parse_key_val)]
        set_once: Vec<(String, String)>,

        #[arg(long = "unset")]
        unset: Vec<String>,
    },

    /// Forget the current user
    Reset,

    /// Show the stored user
    Whoami,

    /// Delete the session file, starting a new context next time
    EndSession,
}

impl Command {
    /// Tracker command for the commands that talk to the endpoint
    fn to_tracker_command(&self) -> Option<TrackerCommand> {
        let command = match self {
            Command::PageView => TrackerCommand::TrackPageView,
            Command::PageLeave => TrackerCommand::TrackPageLeave,
            Command::Track { name, data, beacon } => {
                let mut props = EventProps::new();
                for (key, value) in data {
                    props = props.data(key.as_str(), parse_value(value));
                }
                if *beacon {
                    props = props.beacon();
                }
                TrackerCommand::TrackEvent {
                    name: name.clone(),
                    props,
                }
            }
            Command::Identify {
                id,
                display_name,
                set,
            } => {
                let mut props = IdentifyProps::new(id.as_str());
                if let Some(display_name) = display_name {
                    props = props.display_name(display_name.as_str());
                }
                if !set.is_empty() {
                    props = props.data(user_data(set, &[], &[]));
                }
                TrackerCommand::Identify(props)
            }
            Command::UpdateUser {
                set,
                set_once,
                unset,
            } => TrackerCommand::UpdateUser(user_data(set, set_once, unset)),
            Command::Reset => TrackerCommand::ResetUser,
            Command::Status | Command::Whoami | Command::EndSession => return None,
        };
        Some(command)
    }
}

fn parse_key_val(s: &str) -> std::result::Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got '{s}'")),
    }
}

fn parse_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

fn user_data(set: &[(String, String)], set_once: &[(String, String)], unset: &[String]) -> UserData {
    let mut data = UserData::new();
    for (key, value) in set {
        data = data.set(key.as_str(), parse_value(value));
    }
    for (key, value) in set_once {
        data = data.set_once(key.as_str(), parse_value(value));
    }
    for key in unset {
        data = data.unset(key.as_str());
    }
    data
}

fn main() -> Result<()> {
    let args = Args::parse();

    let config = Config::load().context("failed to load configuration")?;

    let _log_guard = if args.verbose {
        Some(vemetric_core::logging::init(&config.logging).context("failed to initialize logging")?)
    } else {
        None
    };

    match &args.command {
        Command::Status => cmd_status(&config),
        Command::Whoami => cmd_whoami(),
        Command::EndSession => cmd_end_session(),
        command => {
            let tracker_command = match command.to_tracker_command() {
                Some(tracker_command) => tracker_command,
                None => bail!("command does not send anything"),
            };
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .context("failed to create tokio runtime")?;
            runtime.block_on(cmd_send(config, &args, tracker_command))
        }
    }
}

fn cmd_status(config: &Config) -> Result<()> {
    println!("Vemetric Configuration");
    println!("======================");
    println!();

    let tracking = &config.tracking;
    println!("Config File:     {}", Config::config_path().display());
    println!(
        "Token:           {}",
        if tracking.token.is_empty() {
            "<not set>"
        } else {
            "<set>"
        }
    );
    println!(
        "Host:            {}",
        tracking.host.as_deref().unwrap_or(vemetric_core::config::DEFAULT_HOST)
    );
    println!(
        "Allow Cookies:   {}",
        tracking.allow_cookies.unwrap_or(false)
    );
    println!(
        "Mask Paths:      {}",
        tracking.mask_paths.as_ref().map_or(0, |paths| paths.len())
    );
    println!("Timeout:         {}s", config.transport.timeout_secs);

    println!();
    let session_path = Config::session_path();
    if session_path.exists() {
        println!("Session:         {}", session_path.display());
    } else {
        println!("Session:         <none>");
    }
    println!(
        "Log File:        {}",
        vemetric_core::logging::log_file_path(&config.logging).display()
    );

    Ok(())
}

fn cmd_whoami() -> Result<()> {
    let session_path = Config::session_path();
    if !session_path.exists() {
        println!("No active session");
        return Ok(());
    }

    let storage = FileStorage::open(&session_path).context("failed to open session file")?;
    let identity = IdentityStore::new(Arc::new(storage));
    match identity.user_identifier() {
        Some(identifier) => {
            println!("User:            {}", identifier);
            if let Some(display_name) = identity.user_display_name() {
                println!("Display Name:    {}", display_name);
            }
        }
        None => println!("User:            <anonymous>"),
    }

    Ok(())
}

fn cmd_end_session() -> Result<()> {
    let session_path = Config::session_path();
    if FileStorage::end_session(&session_path).context("failed to remove session file")? {
        println!("Session ended");
    } else {
        println!("No active session");
    }
    Ok(())
}

async fn cmd_send(config: Config, args: &Args, command: TrackerCommand) -> Result<()> {
    let storage = Arc::new(
        FileStorage::open(Config::session_path()).context("failed to open session file")?,
    );

    let mut page = PageSnapshot::new(args.url.as_str());
    if let Some(referrer) = &args.referrer {
        page = page.with_referrer(referrer.as_str());
    }

    let transport =
        HttpTransport::new(&config.transport).context("failed to create HTTP transport")?;
    let tracker = Tracker::new(
        Arc::new(page),
        storage.clone(),
        Arc::new(transport),
        config.suppression,
    );

    // No navigation or clicks happen here, so the listeners stay off
    let tracking = config.tracking;
    let preset = Options {
        track_page_views: Some(false),
        track_outbound_links: Some(false),
        track_data_attributes: Some(false),
        sdk: tracking.sdk.clone().or_else(|| Some(SDK_NAME.to_string())),
        sdk_version: tracking
            .sdk_version
            .clone()
            .or_else(|| Some(env!("CARGO_PKG_VERSION").to_string())),
        ..tracking
    };
    let attributes: ScriptAttributes = args.attrs.iter().cloned().collect();

    let name = command.name();
    let queue = CommandQueue::with_storage(storage);
    queue.dispatch(command).await?;

    let loader = Loader::new(queue);
    let outcome = loader
        .boot(tracker.clone(), Some(preset), Some(&attributes))
        .await
        .context("failed to initialize tracker")?;
    tracker.flush().await;

    if let Some((_, error)) = outcome.failures.into_iter().next() {
        tracing::warn!(command = name, error = %error, "Command failed");
        return Err(anyhow::Error::new(error).context(format!("{} failed", name)));
    }

    tracing::info!(
        command = name,
        user = loader.queue().user_identifier().as_deref().unwrap_or("<anonymous>"),
        "Command sent"
    );
    println!("{}: done", name);
    Ok(())
}
