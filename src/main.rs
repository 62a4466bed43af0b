mod client;
mod config;
mod render;
mod table;

use crate::client::{FmgError, RpcMethod, Session, SessionOptions};
use crate::render::{OutputFormat, RenderOptions};
use anyhow::{Context, Result, bail};
use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::{fs, process};

const AFTER_HELP: &str = r#"Examples:
  fmgctl -i 10.0.0.100 -k <apikey> get /pm/config/adom/root/obj/firewall/address
  fmgctl get /dvmdb/adom/root/device -o table --columns name,ip,os_ver
  fmgctl get /pm/config/adom/root/obj/firewall/address -q 'filter=["name","==","all"]'
  fmgctl add /pm/config/adom/root/obj/firewall/address -d '{"name":"host1","subnet":"10.1.1.1/32"}'
  fmgctl exec /securityconsole/install/package -d '{"adom":"root","pkg":"default"}'

Config files are JSON ({"fortimanager": {"host": ..., "apikey": ...}}) or INI
(a [fortimanager] section with host/username/password/apikey keys)."#;

#[derive(Parser)]
#[command(
    name = "fmgctl",
    version,
    about = "CLI for the FortiManager JSON-RPC API",
    after_help = AFTER_HELP
)]
struct Cli {
    #[arg(
        short = 'c',
        long,
        global = true,
        value_name = "FILE",
        help = "Config file (INI or JSON) used instead of the discovered scopes"
    )]
    config: Option<PathBuf>,

    #[arg(
        short = 'i',
        long,
        alias = "ip",
        global = true,
        value_name = "HOST",
        help = "FortiManager address, host[:port] or full URL (overrides config)"
    )]
    host: Option<String>,

    #[arg(
        short = 'u',
        long,
        global = true,
        help = "Login username (defaults to admin)"
    )]
    username: Option<String>,

    #[arg(short = 'p', long, global = true, help = "Login password")]
    password: Option<String>,

    #[arg(
        short = 'k',
        long,
        global = true,
        help = "API key for token authentication (wins over --password)"
    )]
    apikey: Option<String>,

    #[arg(long, global = true, help = "Connect over http instead of https")]
    no_ssl: bool,

    #[arg(
        long,
        global = true,
        help = "Verify the appliance TLS certificate (off by default)"
    )]
    verify_ssl: bool,

    #[arg(
        long,
        global = true,
        value_name = "SECS",
        default_value_t = config::DEFAULT_TIMEOUT_SECS,
        help = "Request timeout in seconds"
    )]
    timeout: u64,

    #[arg(
        long,
        global = true,
        help = "Dump JSON-RPC request/response envelopes to stderr"
    )]
    debug: bool,

    #[arg(
        short = 'o',
        long,
        value_enum,
        default_value_t = OutputFormat::Json,
        global = true,
        help = "Output format"
    )]
    output: OutputFormat,

    #[arg(
        long,
        value_name = "COL1,COL2",
        global = true,
        help = "Explicit table columns, comma-separated (overrides auto-detection)"
    )]
    columns: Option<String>,

    #[arg(
        long,
        global = true,
        value_name = "N",
        default_value_t = table::DEFAULT_MAX_WIDTH,
        help = "Maximum table cell width; 0 disables truncation"
    )]
    table_max_width: usize,

    #[arg(
        long,
        global = true,
        value_name = "N",
        default_value_t = table::DEFAULT_MAX_FIELDS,
        help = "Maximum auto-detected table columns; 0 means unlimited"
    )]
    table_max_fields: usize,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Read an object or list from an endpoint
    Get {
        #[arg(value_name = "ENDPOINT")]
        endpoint: String,
        #[arg(
            short = 'q',
            long,
            value_name = "KEY=VALUE",
            help = "Extra request attribute, repeatable (value parsed as JSON when possible)"
        )]
        query: Vec<String>,
    },
    /// Create an object under an endpoint
    Add {
        #[arg(value_name = "ENDPOINT")]
        endpoint: String,
        #[arg(short = 'd', long, value_name = "JSON", help = "Request payload as inline JSON")]
        data: Option<String>,
        #[arg(long, value_name = "FILE", help = "Request payload read from a JSON file")]
        data_file: Option<PathBuf>,
        #[arg(short = 'q', long, value_name = "KEY=VALUE")]
        query: Vec<String>,
    },
    /// Replace the object at an endpoint
    Set {
        #[arg(value_name = "ENDPOINT")]
        endpoint: String,
        #[arg(short = 'd', long, value_name = "JSON", help = "Request payload as inline JSON")]
        data: Option<String>,
        #[arg(long, value_name = "FILE", help = "Request payload read from a JSON file")]
        data_file: Option<PathBuf>,
        #[arg(short = 'q', long, value_name = "KEY=VALUE")]
        query: Vec<String>,
    },
    /// Merge changes into the object at an endpoint
    Update {
        #[arg(value_name = "ENDPOINT")]
        endpoint: String,
        #[arg(short = 'd', long, value_name = "JSON", help = "Request payload as inline JSON")]
        data: Option<String>,
        #[arg(long, value_name = "FILE", help = "Request payload read from a JSON file")]
        data_file: Option<PathBuf>,
        #[arg(short = 'q', long, value_name = "KEY=VALUE")]
        query: Vec<String>,
    },
    /// Delete the object at an endpoint
    Delete {
        #[arg(value_name = "ENDPOINT")]
        endpoint: String,
        #[arg(short = 'q', long, value_name = "KEY=VALUE")]
        query: Vec<String>,
    },
    /// Invoke an executable endpoint (scripts, installs, proxied calls)
    Exec {
        #[arg(value_name = "ENDPOINT")]
        endpoint: String,
        #[arg(short = 'd', long, value_name = "JSON", help = "Request payload as inline JSON")]
        data: Option<String>,
        #[arg(long, value_name = "FILE", help = "Request payload read from a JSON file")]
        data_file: Option<PathBuf>,
        #[arg(short = 'q', long, value_name = "KEY=VALUE")]
        query: Vec<String>,
    },
    /// Check the configured credentials against the appliance
    Validate,
    /// Persist the connection flags (--host/--username/--password/--apikey) to a config scope
    Configure {
        #[arg(
            long,
            value_enum,
            default_value_t = ScopeArg::User,
            help = "Where to write the config (local project dir or user config dir)"
        )]
        scope: ScopeArg,
    },
    /// Show current configuration (secrets masked)
    ConfigShow,
    /// Generate shell completion scripts
    Completion {
        #[arg(value_enum)]
        shell: CompletionShell,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum, PartialEq, Eq)]
enum ScopeArg {
    Local,
    User,
}

impl From<ScopeArg> for config::Scope {
    fn from(value: ScopeArg) -> Self {
        match value {
            ScopeArg::Local => config::Scope::Local,
            ScopeArg::User => config::Scope::User,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum CompletionShell {
    Bash,
    Zsh,
    Fish,
    PowerShell,
}

fn main() {
    let code = match run() {
        Ok(()) => 0,
        Err(err) => {
            eprintln!("Error: {err:#}");
            exit_code(&err)
        }
    };
    process::exit(code);
}

/// Negative FortiManager codes (the appliance error range) and client-side
/// failures exit 1; HTTP-shaped codes >= 400 exit 2.
fn exit_code(err: &anyhow::Error) -> i32 {
    match err.downcast_ref::<FmgError>() {
        Some(FmgError::Api { code, .. }) if *code >= 400 => 2,
        _ => 1,
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    let cwd = std::env::current_dir().context("reading current directory")?;

    if let Commands::Configure { scope } = &cli.command {
        if cli.config.is_some() {
            bail!(
                "--config names a file to read; `configure` writes to a config scope, choose it with --scope local|user"
            );
        }
        return run_configure(&cwd, overrides_from(&cli), (*scope).into());
    }
    if let Commands::ConfigShow = &cli.command {
        return run_config_show(&cwd, cli.config.as_deref());
    }
    if let Commands::Completion { shell } = &cli.command {
        use clap_complete::{generate, shells};
        let mut cmd = Cli::command();
        let bin = cmd.get_name().to_string();
        match shell {
            CompletionShell::Bash => generate(shells::Bash, &mut cmd, bin, &mut std::io::stdout()),
            CompletionShell::Zsh => generate(shells::Zsh, &mut cmd, bin, &mut std::io::stdout()),
            CompletionShell::Fish => generate(shells::Fish, &mut cmd, bin, &mut std::io::stdout()),
            CompletionShell::PowerShell => {
                generate(shells::PowerShell, &mut cmd, bin, &mut std::io::stdout())
            }
        }
        return Ok(());
    }

    let effective = config::resolve(&cwd, cli.config.as_deref(), overrides_from(&cli))?;
    let options = SessionOptions {
        use_ssl: !cli.no_ssl,
        verify_ssl: cli.verify_ssl,
        timeout_secs: cli.timeout,
        debug: cli.debug,
    };
    let mut session = Session::new(&effective, &options)?;

    let render_opts = RenderOptions {
        format: cli.output,
        table: table::TableOptions {
            columns: parse_columns(cli.columns.as_deref()),
            max_width: cli.table_max_width,
            max_fields: cli.table_max_fields,
        },
    };

    let (method, endpoint, data, query) = match cli.command {
        Commands::Get { endpoint, query } => (RpcMethod::Get, endpoint, None, query),
        Commands::Add {
            endpoint,
            data,
            data_file,
            query,
        } => (RpcMethod::Add, endpoint, parse_data(&data, &data_file)?, query),
        Commands::Set {
            endpoint,
            data,
            data_file,
            query,
        } => (RpcMethod::Set, endpoint, parse_data(&data, &data_file)?, query),
        Commands::Update {
            endpoint,
            data,
            data_file,
            query,
        } => (
            RpcMethod::Update,
            endpoint,
            parse_data(&data, &data_file)?,
            query,
        ),
        Commands::Delete { endpoint, query } => (RpcMethod::Delete, endpoint, None, query),
        Commands::Exec {
            endpoint,
            data,
            data_file,
            query,
        } => (
            RpcMethod::Exec,
            endpoint,
            parse_data(&data, &data_file)?,
            query,
        ),
        Commands::Validate => return run_validate(&mut session),
        Commands::Configure { .. } | Commands::ConfigShow | Commands::Completion { .. } => {
            unreachable!("handled earlier")
        }
    };

    let attributes = query
        .iter()
        .map(|pair| client::parse_attribute(pair))
        .collect::<Result<Vec<_>>>()?;

    let outcome = session.request(method, &endpoint, data, &attributes);
    session.logout();
    let response = outcome?;
    render::render_response(&response.data, &render_opts)
}

fn overrides_from(cli: &Cli) -> config::Config {
    config::Config {
        host: cli.host.clone(),
        username: cli.username.clone(),
        password: cli.password.clone(),
        apikey: cli.apikey.clone(),
    }
}

fn run_configure(cwd: &Path, updates: config::Config, scope: config::Scope) -> Result<()> {
    if updates.is_empty() {
        bail!("nothing to save; pass at least one of --host, --username, --password, --apikey");
    }
    let mut current = config::load_scope(scope, cwd)?;
    if let Some(host) = updates.host {
        current.host = Some(host);
    }
    if let Some(username) = updates.username {
        current.username = Some(username);
    }
    if let Some(password) = updates.password {
        current.password = Some(password);
    }
    if let Some(apikey) = updates.apikey {
        current.apikey = Some(apikey);
    }
    let path = config::save(scope, &current, cwd)?;
    println!("Saved FortiManager settings to {}", path.display());
    Ok(())
}

fn run_config_show(cwd: &Path, config_file: Option<&Path>) -> Result<()> {
    let mut masked = match config_file {
        Some(path) => config::load_file(path)?,
        None => config::load(cwd)?,
    };
    if masked.password.is_some() {
        masked.password = Some("*****".into());
    }
    if masked.apikey.is_some() {
        masked.apikey = Some("*****".into());
    }
    println!("{}", serde_json::to_string_pretty(&masked)?);
    Ok(())
}

fn run_validate(session: &mut Session) -> Result<()> {
    let outcome = session.request(RpcMethod::Get, "/sys/status", None, &[]);
    session.logout();
    match outcome {
        Ok(response) => {
            match response.data.get("Version").and_then(Value::as_str) {
                Some(version) => println!("FortiManager: ok ({version})"),
                None => println!("FortiManager: ok"),
            }
            Ok(())
        }
        Err(err) => Err(err.context("validating credentials")),
    }
}

fn parse_columns(raw: Option<&str>) -> Option<Vec<String>> {
    let raw = raw?;
    let columns: Vec<String> = raw
        .split(',')
        .map(|column| column.trim().to_string())
        .filter(|column| !column.is_empty())
        .collect();
    if columns.is_empty() { None } else { Some(columns) }
}

fn parse_data(data: &Option<String>, data_file: &Option<PathBuf>) -> Result<Option<Value>> {
    match (data, data_file) {
        (Some(inline), None) => {
            let value = serde_json::from_str(inline).context("parsing --data as JSON")?;
            Ok(Some(value))
        }
        (None, Some(path)) => {
            let raw = fs::read_to_string(path).with_context(|| format!("reading {:?}", path))?;
            let value =
                serde_json::from_str(&raw).with_context(|| format!("parsing {:?} as JSON", path))?;
            Ok(Some(value))
        }
        (Some(_), Some(_)) => bail!("--data and --data-file are mutually exclusive"),
        (None, None) => Ok(None),
    }
}
