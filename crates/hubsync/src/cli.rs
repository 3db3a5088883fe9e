//! Clap derive structures for the `hubsync` CLI.

use clap::{Args, Parser, Subcommand, ValueEnum};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// hubsync -- browse and drive the Things on an IoT hub
#[derive(Debug, Parser)]
#[command(
    name = "hubsync",
    version,
    about = "Browse and drive the Things on an IoT hub from the command line",
    long_about = "Connects to a hub account (auth service, Thing directory and MQTT \
        message bus), then lists Thing Descriptions, watches live property \
        values and events, invokes actions and writes properties.",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Account profile to use
    #[arg(long, short = 'a', env = "HUBSYNC_ACCOUNT", global = true)]
    pub account: Option<String>,

    /// Hub address (overrides profile)
    #[arg(long, env = "HUBSYNC_ADDRESS", global = true)]
    pub address: Option<String>,

    /// Login id (overrides profile)
    #[arg(long, short = 'u', env = "HUBSYNC_LOGIN", global = true)]
    pub login: Option<String>,

    /// Account password
    #[arg(long, env = "HUBSYNC_PASSWORD", global = true, hide_env_values = true)]
    pub password: Option<String>,

    /// Output format
    #[arg(
        long,
        short = 'o',
        env = "HUBSYNC_OUTPUT",
        default_value = "table",
        global = true
    )]
    pub output: OutputFormat,

    /// When to use color output
    #[arg(long, default_value = "auto", global = true)]
    pub color: ColorMode,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Log line format
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Suppress non-error output
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,

    /// Accept self-signed TLS certificates
    #[arg(long, short = 'k', env = "HUBSYNC_INSECURE", global = true)]
    pub insecure: bool,

    /// Request timeout in seconds (overrides profile)
    #[arg(long, env = "HUBSYNC_TIMEOUT", global = true)]
    pub timeout: Option<u64>,
}

// ── Output & Color Enums ─────────────────────────────────────────────

#[derive(Debug, Clone, ValueEnum)]
pub enum OutputFormat {
    /// Pretty table (default, interactive)
    Table,
    /// Pretty-printed JSON
    Json,
    /// Compact single-line JSON
    JsonCompact,
    /// YAML
    Yaml,
    /// Plain text, one value per line (scripting)
    Plain,
}

#[derive(Debug, Clone, ValueEnum)]
pub enum ColorMode {
    /// Auto-detect (color if terminal is interactive)
    Auto,
    /// Always emit color codes
    Always,
    /// Never emit color codes
    Never,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum LogFormat {
    /// Human-readable lines
    Text,
    /// One JSON object per line
    Json,
}

// ── Top-Level Command Enum ───────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Browse Thing Descriptions from the directory
    #[command(alias = "t")]
    Things(ThingsArgs),

    /// Stream property changes and events of a Thing
    #[command(alias = "w")]
    Watch(WatchArgs),

    /// Invoke an action on a Thing
    Invoke(InvokeArgs),

    /// Request a property change on a Thing
    Write(WriteArgs),

    /// Connect and report the connection status
    Status(StatusArgs),

    /// Manage CLI configuration and accounts
    Config(ConfigArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

// ── Things ───────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct ThingsArgs {
    #[command(subcommand)]
    pub command: ThingsCommand,
}

#[derive(Debug, Subcommand)]
pub enum ThingsCommand {
    /// List all Things in the directory
    #[command(alias = "ls")]
    List {
        /// Only Things whose publisher matches
        #[arg(long)]
        publisher: Option<String>,

        /// Only Things whose device type matches
        #[arg(long)]
        device_type: Option<String>,
    },

    /// Show a Thing with its current property values
    Show {
        /// Thing id
        id: String,

        /// Seconds to wait for the initial property read
        #[arg(long, default_value = "5")]
        wait: u64,
    },
}

// ── Interaction ──────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct WatchArgs {
    /// Thing id
    pub id: String,

    /// Stop after this many seconds (default: until Ctrl-C)
    #[arg(long = "for", value_name = "SECONDS")]
    pub duration: Option<u64>,
}

#[derive(Debug, Args)]
pub struct InvokeArgs {
    /// Thing id
    pub id: String,

    /// Action name
    pub action: String,

    /// Action input as JSON (a bare word is sent as a string)
    pub input: Option<String>,
}

#[derive(Debug, Args)]
pub struct WriteArgs {
    /// Thing id
    pub id: String,

    /// Property name
    pub property: String,

    /// New value as JSON (a bare word is sent as a string)
    pub value: String,
}

#[derive(Debug, Args)]
pub struct StatusArgs {
    /// Include the broker's $SYS diagnostics
    #[arg(long)]
    pub diagnostics: bool,
}

// ── Config ───────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Create or replace an account profile
    Init {
        /// Hub host name or IP address
        #[arg(long)]
        hub: String,

        /// Login id
        #[arg(long)]
        user: String,

        /// Profile name
        #[arg(long, default_value = "default")]
        name: String,

        /// Message bus transport (wss, ws, tls, tcp)
        #[arg(long)]
        bus_transport: Option<String>,

        /// Prompt for the password and store it in the system keyring
        #[arg(long)]
        store_password: bool,
    },

    /// Show the current configuration
    Show,

    /// Store an account password in the system keyring
    SetPassword {
        /// Profile name (default: active account)
        #[arg(long)]
        name: Option<String>,
    },

    /// Print the config file path
    Path,
}

// ── Completions ──────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: clap_complete::Shell,
}
