// ABOUTME: Command-line surface: clap options with XDS_* env bindings and
// the argument splitter separating wrapper flags from the forwarded make command

use clap::{ArgAction, Parser};

/// Executable name that switches the wrapper into transparent
/// pass-through: every argument is forwarded, no wrapper flags at all.
pub const PASSTHROUGH_ALIAS: &str = "make";

const ENV_HELP: &str = "ENVIRONMENT VARIABLES:
  XDS_PROJECT_ID      project ID you want to build (mandatory variable)
  XDS_LOGLEVEL        logging level (supported levels: error, warn, info, debug, trace)
  XDS_RPATH           relative path into project
  XDS_TIMESTAMP       prefix output with timestamp
  XDS_SERVER_URL      remote XDS server url (default http://localhost:8000)";

/// Wrapper options. Flags are hidden: in normal use they come in through
/// the environment, and the visible help documents the variables instead.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "xds-make",
    version,
    disable_version_flag = true,
    about = "wrapper on make for X(cross) Development System",
    after_help = ENV_HELP
)]
pub struct Opts {
    /// project ID you want to build
    #[arg(long = "id", env = "XDS_PROJECT_ID", default_value = "", hide = true)]
    pub project_id: String,

    /// logging level
    #[arg(long = "log", env = "XDS_LOGLEVEL", default_value = "error", hide = true)]
    pub log_level: String,

    /// relative path into project
    #[arg(long = "rpath", env = "XDS_RPATH", default_value = "", hide = true)]
    pub rpath: String,

    /// prefix output with timestamp
    #[arg(
        long = "timestamp",
        visible_alias = "ts",
        env = "XDS_TIMESTAMP",
        action = ArgAction::SetTrue,
        hide = true
    )]
    pub timestamp: bool,

    /// remote XDS server url
    #[arg(
        long = "url",
        env = "XDS_SERVER_URL",
        default_value = "localhost:8000",
        hide = true
    )]
    pub url: String,

    #[arg(short = 'v', long = "version", action = ArgAction::Version)]
    version: Option<bool>,
}

/// Splits the raw argument vector into wrapper arguments (fed to clap)
/// and forwarded arguments (passed through to the remote make untouched).
///
/// Under the `make` alias everything is forwarded. Otherwise a leading
/// `-h`/`--help`/`-v`/`--version` hands the whole vector to the wrapper,
/// and a standalone `--` splits wrapper flags from the forwarded command.
pub fn split_args(argv: &[String], exe_name: &str) -> (Vec<String>, Vec<String>) {
    if argv.is_empty() {
        return (Vec::new(), Vec::new());
    }
    if exe_name == PASSTHROUGH_ALIAS {
        return (argv[..1].to_vec(), argv[1..].to_vec());
    }

    for (idx, arg) in argv.iter().enumerate().skip(1) {
        match arg.as_str() {
            // Help and version of this utility, not of the remote make
            "-h" | "--help" | "-v" | "--version" => {
                return (argv.to_vec(), Vec::new());
            }
            "--" => {
                return (argv[..idx].to_vec(), argv[idx + 1..].to_vec());
            }
            _ => {}
        }
    }

    (argv[..1].to_vec(), argv[1..].to_vec())
}

/// Joins forwarded arguments into the single command-line string sent to
/// the server. Empty input is legal and means "make with no arguments".
pub fn join_forwarded(forwarded: &[String]) -> String {
    forwarded.join(" ").trim().to_string()
}
