//! cxlfw CLI - Command-line tool for CXL memory device firmware.
//!
//! ## Features
//!
//! - Transfer firmware and OS images to a device slot
//! - Activate a slot online or on the next reset
//! - Inspect slot revisions and background operation status
//! - Shell completion generation
//! - Environment variable support
//! - Internationalization (i18n) support

use anyhow::Result;
use clap::{Parser, Subcommand};
use clap_complete::Shell;
use console::style;
use cxlfw::firmware::ActivationAction;
use env_logger::Env;
use log::debug;
use rust_i18n::t;
use std::env;
use std::path::PathBuf;

/// Whether stderr is a terminal (set once at startup).
static STDERR_IS_TTY: std::sync::atomic::AtomicBool = std::sync::atomic::AtomicBool::new(true);

/// Check if emoji/animations should be used (TTY and colors enabled).
fn use_fancy_output() -> bool {
    STDERR_IS_TTY.load(std::sync::atomic::Ordering::Relaxed) && console::colors_enabled_stderr()
}

mod backend;
mod commands;
mod config;
mod help;

use backend::Backend;
use commands::activate::cmd_activate_fw;
use commands::completions::{cmd_completions, detect_shell_type};
use commands::info::{cmd_bg_status, cmd_fw_info};
use commands::update::cmd_update_fw;
use config::Config;
use help::{build_localized_command, detect_locale};

// Initialize i18n with locale files from the locales directory
rust_i18n::i18n!("locales", fallback = "en");

/// Default memory device when neither flag nor config names one.
const DEFAULT_DEVICE: &str = "mem0";

/// cxlfw - Firmware update and activation for CXL memory devices.
///
/// Environment variables:
///   CXLFW_DEVICE            - Memory device to operate on (default: mem0)
///   CXLFW_EMULATOR_STATE    - File holding the emulated device state
///   CXLFW_LANG              - Language/locale (en, zh-CN)
///   CXLFW_NON_INTERACTIVE   - Non-interactive mode (disable prompts)
#[derive(Parser)]
#[command(name = "cxlfw")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
#[command(after_help = "For more information, visit: https://github.com/cxlfw/cxlfw")]
struct Cli {
    /// Memory device to operate on (e.g., mem0).
    #[arg(short, long, global = true, env = "CXLFW_DEVICE")]
    device: Option<String>,

    /// File holding the emulated device state.
    #[arg(long, global = true, value_name = "PATH", env = "CXLFW_EMULATOR_STATE")]
    emulator_state: Option<PathBuf>,

    /// Path to a configuration file.
    #[arg(long = "config", global = true, value_name = "PATH")]
    config_path: Option<PathBuf>,

    /// Language/locale for messages (e.g., en, zh-CN).
    #[arg(long, global = true, env = "CXLFW_LANG")]
    lang: Option<String>,

    /// Verbose output level (-v, -vv for increasing detail).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (suppress non-essential output).
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Non-interactive mode (fail instead of prompting).
    #[arg(long, global = true, env = "CXLFW_NON_INTERACTIVE")]
    non_interactive: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// Transfer a firmware image to a slot.
    UpdateFw {
        /// Path to the firmware image.
        image: PathBuf,

        /// Target firmware slot.
        #[arg(short, long, required_unless_present = "os")]
        slot: Option<u8>,

        /// Use the vendor background transfer commands.
        #[arg(long, conflicts_with = "os")]
        hbo: bool,

        /// Transfer an OS image instead of device firmware.
        #[arg(long)]
        os: bool,

        /// Send the first block, then abort.
        #[arg(long)]
        mock: bool,
    },

    /// Activate a firmware slot.
    ActivateFw {
        /// Slot to activate.
        #[arg(short, long)]
        slot: u8,

        /// When the slot takes effect (online, on-reset).
        #[arg(short, long, default_value = "online", value_parser = parse_action)]
        action: ActivationAction,

        /// Use the vendor background activation command.
        #[arg(long)]
        hbo: bool,

        /// Skip the confirmation prompt.
        #[arg(short, long)]
        yes: bool,
    },

    /// Show firmware slot information.
    FwInfo {
        /// Output in JSON format.
        #[arg(long)]
        json: bool,
    },

    /// Show the status of the last background operation.
    BgStatus {
        /// Query the vendor background status.
        #[arg(long)]
        hbo: bool,

        /// Output in JSON format.
        #[arg(long)]
        json: bool,
    },

    /// Generate shell completion scripts.
    Completions {
        /// Shell type (detected from $SHELL if omitted).
        #[arg(value_enum)]
        shell: Option<Shell>,
    },
}

/// CLI failure categories with distinct exit codes.
#[derive(Debug, thiserror::Error)]
pub(crate) enum CliError {
    /// Invalid invocation not caught by argument parsing.
    #[error("{0}")]
    Usage(String),
    /// Unusable configuration or device state file.
    #[error("{0}")]
    Config(String),
    /// The user declined or interrupted a prompt.
    #[error("{0}")]
    Cancelled(String),
}

impl Cli {
    /// Device name from the flag, the config, or the default.
    fn device_name<'a>(&'a self, config: &'a Config) -> &'a str {
        self.device
            .as_deref()
            .or(config.device.name.as_deref())
            .unwrap_or(DEFAULT_DEVICE)
    }

    /// Open the selected device.
    fn open_backend(&self, config: &Config) -> Result<Backend> {
        let state = self
            .emulator_state
            .as_deref()
            .or(config.device.emulator_state.as_deref());
        Backend::open(self.device_name(config), state, config.emulator_config())
    }
}

/// Parse an activation action argument.
fn parse_action(s: &str) -> std::result::Result<ActivationAction, String> {
    s.parse::<ActivationAction>()
        .map_err(|e| e.to_string())
}

/// Map an error to the process exit code.
fn exit_code_for(err: &anyhow::Error) -> i32 {
    if let Some(cli_err) = err.downcast_ref::<CliError>() {
        return match cli_err {
            CliError::Usage(_) => 2,
            CliError::Config(_) => 3,
            CliError::Cancelled(_) => 130,
        };
    }
    match err
        .chain()
        .find_map(|e| e.downcast_ref::<cxlfw::Error>())
    {
        Some(cxlfw::Error::Config(_)) => 3,
        Some(cxlfw::Error::DeviceBusy { .. }) => 4,
        _ => 1,
    }
}

fn main() {
    if let Err(err) = run() {
        eprintln!("{} {err:#}", style("Error:").red().bold());
        std::process::exit(exit_code_for(&err));
    }
}

fn run() -> Result<()> {
    // Inspect raw args early to support localized --help handling and early --lang
    let raw_args: Vec<String> = env::args().collect();

    let mut early_lang: Option<String> = env::var("CXLFW_LANG").ok();
    for (i, arg) in raw_args.iter().enumerate() {
        if let Some(val) = arg.strip_prefix("--lang=") {
            early_lang = Some(val.to_string());
        } else if arg == "--lang" && i + 1 < raw_args.len() {
            early_lang = Some(raw_args[i + 1].clone());
        }
    }

    let locale = early_lang.unwrap_or_else(detect_locale);
    rust_i18n::set_locale(&locale);

    let stderr_is_tty = console::Term::stderr().is_term();
    STDERR_IS_TTY.store(stderr_is_tty, std::sync::atomic::Ordering::Relaxed);

    if env::var("NO_COLOR").is_ok() || !stderr_is_tty {
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }

    // Intercept help before clap so section headings come from the locale files.
    let wants_help = raw_args.iter().any(|a| a == "-h" || a == "--help");
    let no_args = raw_args.len() <= 1;

    if wants_help || no_args {
        let mut app = build_localized_command();

        let subcmd_names: Vec<String> = app
            .get_subcommands()
            .map(|s| s.get_name().to_string())
            .collect();
        let found = raw_args
            .iter()
            .skip(1)
            .find(|token| subcmd_names.iter().any(|n| n == token.as_str()));

        if let Some(cmd_name) = found {
            if let Some(sub) = app
                .get_subcommands()
                .find(|s| s.get_name() == cmd_name.as_str())
            {
                let _ = sub.clone().print_help();
            }
        } else {
            let _ = app.print_help();
        }
        std::process::exit(0);
    }

    let cli = Cli::parse();

    let log_level = if cli.quiet {
        "warn"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_target(cli.verbose >= 2)
        .format_timestamp(if cli.verbose >= 2 {
            Some(env_logger::TimestampPrecision::Millis)
        } else {
            None
        })
        .init();

    debug!(
        "cxlfw v{} (verbose level: {}, locale: {locale})",
        env!("CARGO_PKG_VERSION"),
        cli.verbose
    );

    let config = if let Some(ref path) = cli.config_path {
        Config::load_from_path(path)
    } else {
        Config::load()
    };

    match &cli.command {
        Commands::UpdateFw {
            image,
            slot,
            hbo,
            os,
            mock,
        } => {
            cmd_update_fw(&cli, &config, image, slot.unwrap_or(0), *hbo, *os, *mock)?;
        },
        Commands::ActivateFw {
            slot,
            action,
            hbo,
            yes,
        } => {
            cmd_activate_fw(&cli, &config, *slot, *action, *hbo, *yes)?;
        },
        Commands::FwInfo { json } => {
            cmd_fw_info(&cli, &config, *json)?;
        },
        Commands::BgStatus { hbo, json } => {
            cmd_bg_status(&cli, &config, *hbo, *json)?;
        },
        Commands::Completions { shell } => {
            let shell = shell
                .or_else(detect_shell_type)
                .ok_or_else(|| CliError::Usage(t!("completions.need_shell").to_string()))?;
            cmd_completions(shell);
        },
    }

    Ok(())
}
