use clap::{Parser, Subcommand};
use clap_complete::Shell;

use std::path::PathBuf;

const HELP_TEMPLATE: &str = "\
{before-help}{name} {version}
{author-with-newline}{about-with-newline}
{usage-heading} {usage}

{all-args}{after-help}
";

#[derive(Clone, Debug, Parser)]
#[command(name = "vrprofile", author, version, about, long_about = None)]
#[command(
    propagate_version = true,
    infer_long_args = true,
    infer_subcommands = true,
    flatten_help = true
)]
#[command(help_template = HELP_TEMPLATE)]
pub struct Options {
    #[command(subcommand)]
    pub command: Commands,
    #[command(flatten)]
    pub common: CommonOptions,
}

#[derive(Clone, Debug, Parser)]
pub struct CommonOptions {
    /// Path to settings file
    #[arg(global = true, short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Increase log level (will be overridden by --log-level).
    #[arg(global = true, short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Log level of vrprofile itself
    #[arg(global = true, long, value_name = "LEVEL")]
    pub log_level: Option<log::LevelFilter>,

    /// Never prompt for confirmation.
    #[arg(global = true, short, long)]
    pub yes: bool,

    /// Do not output statistic data.
    #[arg(global = true, long)]
    pub no_statistic: bool,
}

#[derive(Clone, Debug, Subcommand)]
pub enum Commands {
    /// List profiles, most recently used first
    List,
    Create(CreateOptions),
    Save(SaveOptions),
    /// Apply a profile to the live application directories
    #[command(arg_required_else_help = true)]
    Switch {
        /// Profile name
        name: String,
    },
    /// Restore the state from before the last switch
    Undo,
    /// Move a profile into the deletion history
    #[command(arg_required_else_help = true)]
    Delete {
        /// Profile name
        name: String,
    },
    /// Show recently deleted profiles
    History,
    /// Bring back a deleted profile
    #[command(arg_required_else_help = true)]
    Restore {
        /// Position in `history`, 0 is the most recent
        index: usize,
    },
    Status(StatusOptions),
    /// Rename a profile
    #[command(arg_required_else_help = true)]
    Rename { old: String, new: String },
    /// Copy a profile under a new name
    #[command(arg_required_else_help = true)]
    Duplicate { source: String, new: String },
    /// Include a module in a profile
    #[command(arg_required_else_help = true)]
    Enable { name: String, module: String },
    /// Exclude a module from a profile
    #[command(arg_required_else_help = true)]
    Disable { name: String, module: String },
    #[command(name = "option")]
    SetOption(SetOptionOptions),
    /// Replace the notes of a profile
    #[command(arg_required_else_help = true)]
    Notes { name: String, text: String },
    Import(ImportOptions),
    /// List supported modules
    Modules,
    /// Validate and print the effective settings
    Validate,
    /// Print an example settings file
    ExampleConfig,
    /// Generate shell completions
    #[command(arg_required_else_help = true)]
    Completion {
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Clone, Debug, Parser)]
#[command(about = "Create an empty profile")]
#[command(arg_required_else_help = true)]
pub struct CreateOptions {
    /// Profile name
    pub name: String,

    /// Module to enable, may be repeated (defaults to `default_modules`)
    #[arg(short, long = "module", value_name = "ID")]
    pub modules: Vec<String>,

    /// Free-form notes
    #[arg(short, long, default_value = "")]
    pub notes: String,
}

#[derive(Clone, Debug, Parser)]
#[command(about = "Capture the live state into a profile")]
#[command(arg_required_else_help = true)]
pub struct SaveOptions {
    /// Profile name
    pub name: String,

    /// Only save these modules, may be repeated
    #[arg(short, long = "module", value_name = "ID")]
    pub modules: Vec<String>,
}

#[derive(Clone, Debug, Parser)]
#[command(about = "Show running applications and live state per module")]
pub struct StatusOptions {
    /// Also report which modules this profile has a snapshot of
    pub name: Option<String>,

    /// Only query these modules, may be repeated
    #[arg(short, long = "module", value_name = "ID")]
    pub modules: Vec<String>,
}

#[derive(Clone, Debug, Parser)]
#[command(about = "Set or clear a module option of a profile")]
#[command(arg_required_else_help = true)]
pub struct SetOptionOptions {
    pub name: String,
    pub module: String,
    /// One of root_dir, active_driver, save_dlls, include_vrcft, data_dir,
    /// cache_dir, launch_flags
    pub key: String,
    /// New value, the option is cleared when omitted
    pub value: Option<String>,
}

#[derive(Clone, Debug, Parser)]
#[command(about = "Copy profiles from another data directory")]
#[command(arg_required_else_help = true)]
pub struct ImportOptions {
    /// Data directory to import from
    #[arg(value_name = "DIR")]
    pub dir: PathBuf,

    /// Only import this profile; otherwise every profile whose name is free
    pub name: Option<String>,
}
