use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum, ValueHint, builder::BoolishValueParser};

/// Command-line arguments for the medtrack binary.
#[derive(Debug, Parser)]
#[command(
    name = "medtrack",
    version,
    about = "Cached access and bulk export for equipment maintenance records"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "MEDTRACK_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(flatten)]
    pub overrides: GlobalOverrides,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Args, Default, Clone)]
pub struct GlobalOverrides {
    /// Override the backend base URL.
    #[arg(long = "api-base-url", value_name = "URL", global = true)]
    pub api_base_url: Option<String>,

    /// Override the file holding the bearer token.
    #[arg(
        long = "token-file",
        value_name = "PATH",
        value_hint = ValueHint::FilePath,
        global = true
    )]
    pub token_file: Option<PathBuf>,

    /// Override the request timeout.
    #[arg(long = "api-timeout-seconds", value_name = "SECONDS", global = true)]
    pub api_timeout_seconds: Option<u64>,

    /// Toggle the read cache.
    #[arg(
        long = "cache-enabled",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new(),
        global = true
    )]
    pub cache_enabled: Option<bool>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL", global = true)]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new(),
        global = true
    )]
    pub log_json: Option<bool>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Fetch records of one resource kind and print them as JSON.
    Get(GetArgs),
    /// Render records and bundle them into one zip archive.
    Export(ExportArgs),
    /// Sign many maintenance records at once.
    Sign(SignArgs),
}

#[derive(Debug, Args, Clone)]
pub struct GetArgs {
    /// Resource kind, e.g. `accessory` or `equipment-record`.
    pub tag: String,

    /// Fetch a single record by id.
    #[arg(long, conflicts_with_all = ["filter", "path"])]
    pub id: Option<String>,

    /// Filter as `key=value`; repeatable.
    #[arg(long, value_name = "KEY=VALUE", value_parser = parse_key_value)]
    pub filter: Vec<(String, String)>,

    /// Fetch a path-addressed resource (files and folders).
    #[arg(long, value_name = "PATH")]
    pub path: Option<String>,

    /// Page number for paginated listing.
    #[arg(long, requires = "per_page")]
    pub page: Option<u32>,

    /// Page size for paginated listing.
    #[arg(long = "per-page")]
    pub per_page: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ExportTarget {
    /// One folder per equipment with its accessories.
    Equipment,
    /// Maintenance logs grouped per equipment.
    Maintenance,
}

#[derive(Debug, Args, Clone)]
pub struct ExportArgs {
    #[arg(value_enum)]
    pub target: ExportTarget,

    /// Restrict the export to these ids; repeatable. Defaults to every record.
    #[arg(long = "id", value_name = "ID")]
    pub ids: Vec<String>,

    /// Directory the archive is written to.
    #[arg(long, value_name = "DIR", value_hint = ValueHint::DirPath)]
    pub out: PathBuf,

    /// Abort on the first render failure instead of omitting the entry.
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub strict: bool,

    /// Override the render concurrency.
    #[arg(long, value_name = "COUNT")]
    pub concurrency: Option<usize>,
}

#[derive(Debug, Args, Clone)]
pub struct SignArgs {
    /// Maintenance record ids to sign; repeatable.
    #[arg(long = "id", value_name = "ID", required = true)]
    pub ids: Vec<String>,

    /// Signature value.
    #[arg(long, conflicts_with = "signature_file")]
    pub signature: Option<String>,

    /// Read the signature value from a file.
    #[arg(long = "signature-file", value_name = "PATH", value_hint = ValueHint::FilePath)]
    pub signature_file: Option<PathBuf>,

    /// Abort on the first failed record.
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub strict: bool,

    /// Override the number of concurrent update calls.
    #[arg(long, value_name = "COUNT")]
    pub concurrency: Option<usize>,
}

fn parse_key_value(raw: &str) -> Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got `{raw}`"))?;
    if key.trim().is_empty() {
        return Err(format!("empty key in `{raw}`"));
    }
    Ok((key.trim().to_string(), value.to_string()))
}
