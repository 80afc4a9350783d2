//! zset-tally CLI
//!
//! Command-line interface for streaming tallies over sorted-set log records.

use clap::{Parser, Subcommand};
use memmap2::Mmap;
use std::fs::File;
use std::io::{self, BufWriter};
use std::path::{Path, PathBuf};
use std::process;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;
use zset_tally::{
    requests_scores, FilterConfig, ReportFormat, Schema, StoreClient, StreamStats, Tally,
    TallyConfig, TallyError, DEFAULT_CONNECT_TIMEOUT, DEFAULT_PORT,
};

const DEFAULT_HOST: &str = "127.0.0.1";

#[derive(Parser)]
#[command(name = "zset-tally")]
#[command(version = "1.0.0")]
#[command(about = "Count and group pipe-delimited log records streamed from a sorted-set store")]
#[command(long_about = r#"
zset-tally: one query, many filters, one pass

Each filter is seven arguments:
  MODE START FINISH LIMIT COLUMN INCLUDE EXCLUDE

  MODE      COUNT, GROUP, or anything else for no output
  START     lowest score accepted (negative: unbounded)
  FINISH    highest score accepted (negative: unbounded)
  LIMIT     group entries shown (negative: none are shown)
  COLUMN    column to group by
  INCLUDE   pipe-delimited substrings that must all occur, per column
  EXCLUDE   pipe-delimited substrings of which none may occur, per column

Filter sections are separated by [END] lines.

Options, -v included, go before the filter arguments; anything after the
first filter argument is read as part of a filter.
"#)]
struct Cli {
    /// Raise log verbosity (-v info, -vv debug); RUST_LOG overrides
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a query against the store and tally its reply
    Query {
        /// Store host (default: 127.0.0.1)
        #[arg(long)]
        host: Option<String>,

        /// Store port (default: 6379)
        #[arg(short, long)]
        port: Option<u16>,

        /// Store command, e.g. "ZRANGEBYSCORE log 0 100 WITHSCORES"
        #[arg(short, long)]
        command: Option<String>,

        /// Connect timeout in milliseconds (default: 1500)
        #[arg(long)]
        timeout_ms: Option<u64>,

        /// JSON configuration file
        #[arg(long)]
        config: Option<PathBuf>,

        /// Output format: plain, json
        #[arg(short, long, default_value = "plain")]
        format: String,

        /// Filter arguments, seven per filter
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        filters: Vec<String>,
    },

    /// Tally a captured raw reply (use - for stdin)
    Replay {
        /// Captured reply file
        input: PathBuf,

        /// The reply interleaves scores with members
        #[arg(long)]
        with_scores: bool,

        /// JSON configuration file
        #[arg(long)]
        config: Option<PathBuf>,

        /// Output format: plain, json
        #[arg(short, long, default_value = "plain")]
        format: String,

        /// Filter arguments, seven per filter
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        filters: Vec<String>,
    },

    /// List schema columns
    Columns {
        /// JSON configuration file
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let outcome = match cli.command {
        Commands::Query {
            host,
            port,
            command,
            timeout_ms,
            config,
            format,
            filters,
        } => run_query(host, port, command, timeout_ms, config, &format, &filters),
        Commands::Replay {
            input,
            with_scores,
            config,
            format,
            filters,
        } => replay(&input, with_scores, config, &format, &filters),
        Commands::Columns { config } => show_columns(config),
    };

    if let Err(e) = outcome {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

fn load_config(path: Option<PathBuf>) -> Result<TallyConfig, TallyError> {
    match path {
        Some(path) => TallyConfig::load(path),
        None => Ok(TallyConfig::default()),
    }
}

/// Filters from the file first, then from the command line
fn collect_filters(config: &TallyConfig, args: &[String]) -> Result<Vec<FilterConfig>, TallyError> {
    let mut filters = config.filters.clone();
    filters.extend(FilterConfig::parse_all(args)?);
    if filters.is_empty() {
        log::warn!("no filters configured; nothing will be reported");
    }
    Ok(filters)
}

/// Where to reach the store and what to ask it
#[derive(Debug, Clone, PartialEq, Eq)]
struct QuerySettings {
    host: String,
    port: u16,
    command: String,
    timeout: Duration,
}

impl QuerySettings {
    /// Command-line values win over the file; built-in defaults fill the rest.
    /// There is no default command.
    fn resolve(
        host: Option<String>,
        port: Option<u16>,
        command: Option<String>,
        timeout_ms: Option<u64>,
        config: &TallyConfig,
    ) -> Result<Self, TallyError> {
        let command = command
            .or_else(|| config.command.clone())
            .ok_or_else(|| TallyError::Config("no store command given".to_string()))?;
        Ok(Self {
            host: host
                .or_else(|| config.host.clone())
                .unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port: port.or(config.port).unwrap_or(DEFAULT_PORT),
            command,
            timeout: timeout_ms
                .or(config.timeout_ms)
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_CONNECT_TIMEOUT),
        })
    }
}

fn run_query(
    host: Option<String>,
    port: Option<u16>,
    command: Option<String>,
    timeout_ms: Option<u64>,
    config_path: Option<PathBuf>,
    format: &str,
    filter_args: &[String],
) -> Result<(), TallyError> {
    let format: ReportFormat = format.parse()?;
    let config = load_config(config_path)?;
    let schema = config.schema()?;
    let filters = collect_filters(&config, filter_args)?;
    let settings = QuerySettings::resolve(host, port, command, timeout_ms, &config)?;

    let mut client = StoreClient::connect(&settings.host, settings.port, settings.timeout)?;
    let mut tally = Tally::new(schema, &filters, requests_scores(&settings.command));

    let start = Instant::now();
    tally.run(&mut client, &settings.command)?;
    log::info!("query finished in {:.2}ms", start.elapsed().as_secs_f64() * 1000.0);

    let stdout = io::stdout();
    let mut out = BufWriter::new(stdout.lock());
    tally.write_report(&mut out, format)
}

fn replay(
    input: &Path,
    with_scores: bool,
    config_path: Option<PathBuf>,
    format: &str,
    filter_args: &[String],
) -> Result<(), TallyError> {
    let format: ReportFormat = format.parse()?;
    let config = load_config(config_path)?;
    let schema = config.schema()?;
    let filters = collect_filters(&config, filter_args)?;
    let mut tally = Tally::new(schema, &filters, with_scores);
    ReplayInput::from_path(input).feed(&mut tally)?;

    let stdout = io::stdout();
    let mut out = BufWriter::new(stdout.lock());
    tally.write_report(&mut out, format)
}

/// Source of a captured reply
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReplayInput<'a> {
    Stdin,
    File(&'a Path),
}

impl<'a> ReplayInput<'a> {
    fn from_path(path: &'a Path) -> Self {
        if path.as_os_str() == "-" {
            Self::Stdin
        } else {
            Self::File(path)
        }
    }

    fn feed(self, tally: &mut Tally) -> Result<StreamStats, TallyError> {
        match self {
            Self::Stdin => tally.consume(io::stdin().lock()),
            Self::File(path) => {
                let file = File::open(path)?;
                if file.metadata()?.len() == 0 {
                    // Zero-length maps are rejected; an empty capture is a truncated reply
                    return tally.consume(io::empty());
                }
                // The capture is read-only for the lifetime of the map
                let mmap = unsafe { Mmap::map(&file)? };
                tally.consume(&mmap[..])
            }
        }
    }
}

fn show_columns(config_path: Option<PathBuf>) -> Result<(), TallyError> {
    let config = load_config(config_path)?;
    let schema: Schema = config.schema()?;

    println!("Columns (delimiter '{}'):", schema.delimiter());
    for (i, name) in schema.columns().iter().enumerate() {
        if schema.is_multi_value(i) {
            println!(
                "  {:2} {} (multi-value, '{}'-separated)",
                i,
                name,
                schema.multi_value_separator()
            );
        } else {
            println!("  {:2} {}", i, name);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;
    use zset_tally::{FilterMode, FilterReport};

    fn file_config() -> TallyConfig {
        TallyConfig::from_json(
            r#"{
                "host": "db.internal",
                "port": 7000,
                "command": "ZRANGE articles 0 -1",
                "filters": [{ "mode": "count" }]
            }"#,
        )
        .unwrap()
    }

    fn capture(bytes: &[u8]) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(bytes).unwrap();
        file.flush().unwrap();
        file
    }

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|a| a.to_string()).collect()
    }

    #[test]
    fn test_file_filters_come_first() {
        let extra = args(&["GROUP", "-1", "-1", "5", "tags", "", ""]);
        let filters = collect_filters(&file_config(), &extra).unwrap();
        assert_eq!(filters.len(), 2);
        assert_eq!(filters[0].mode, FilterMode::Count);
        assert_eq!(filters[1].mode, FilterMode::Group);
        assert_eq!(filters[1].limit, 5);
    }

    #[test]
    fn test_filter_arity_error() {
        let extra = args(&["COUNT", "-1", "-1", "-1", "", "", "", "-v"]);
        let err = collect_filters(&TallyConfig::default(), &extra).unwrap_err();
        assert!(matches!(err, TallyError::Config(_)));
    }

    #[test]
    fn test_file_settings_used_when_flags_absent() {
        let settings = QuerySettings::resolve(None, None, None, None, &file_config()).unwrap();
        assert_eq!(settings.host, "db.internal");
        assert_eq!(settings.port, 7000);
        assert_eq!(settings.command, "ZRANGE articles 0 -1");
        assert_eq!(settings.timeout, DEFAULT_CONNECT_TIMEOUT);
    }

    #[test]
    fn test_flags_override_file() {
        let settings = QuerySettings::resolve(
            Some("cache.local".to_string()),
            Some(6380),
            Some("ZRANGE other 0 -1 WITHSCORES".to_string()),
            Some(250),
            &file_config(),
        )
        .unwrap();
        assert_eq!(settings.host, "cache.local");
        assert_eq!(settings.port, 6380);
        assert_eq!(settings.command, "ZRANGE other 0 -1 WITHSCORES");
        assert_eq!(settings.timeout, Duration::from_millis(250));
    }

    #[test]
    fn test_builtin_defaults_apply_last() {
        let settings = QuerySettings::resolve(
            None,
            None,
            Some("ZRANGE k 0 -1".to_string()),
            None,
            &TallyConfig::default(),
        )
        .unwrap();
        assert_eq!(settings.host, DEFAULT_HOST);
        assert_eq!(settings.port, DEFAULT_PORT);
        assert_eq!(settings.timeout, DEFAULT_CONNECT_TIMEOUT);
    }

    #[test]
    fn test_missing_command_is_config_error() {
        let err = QuerySettings::resolve(None, Some(6379), None, None, &TallyConfig::default())
            .unwrap_err();
        assert!(matches!(err, TallyError::Config(_)));
    }

    #[test]
    fn test_replay_input_selection() {
        assert_eq!(ReplayInput::from_path(Path::new("-")), ReplayInput::Stdin);
        let path = Path::new("capture.resp");
        assert_eq!(ReplayInput::from_path(path), ReplayInput::File(path));
    }

    #[test]
    fn test_replay_scored_capture() {
        let file = capture(b"*4\r\n$8\r\ngoogle|1\r\n$1\r\n5\r\n$6\r\nbing|2\r\n$2\r\n50\r\n");
        let configs = FilterConfig::parse_all(&["COUNT", "0", "10", "-1", "", "", ""]).unwrap();
        let mut tally = Tally::new(Schema::default(), &configs, true);

        let stats = ReplayInput::from_path(file.path()).feed(&mut tally).unwrap();
        assert_eq!(stats.scalars, 4);
        assert_eq!(stats.records, 2);
        assert_eq!(tally.reports(), vec![FilterReport::Count { count: 1 }]);
    }

    #[test]
    fn test_replay_empty_capture_is_truncated_reply() {
        let file = capture(b"");
        let configs = FilterConfig::parse_all(&["COUNT", "-1", "-1", "-1", "", "", ""]).unwrap();
        let mut tally = Tally::new(Schema::default(), &configs, false);

        let err = ReplayInput::from_path(file.path()).feed(&mut tally).unwrap_err();
        assert!(matches!(err, TallyError::Protocol(_)));
        assert_eq!(tally.reports(), vec![FilterReport::Count { count: 0 }]);
    }

    #[test]
    fn test_replay_missing_file() {
        let configs: Vec<FilterConfig> = Vec::new();
        let mut tally = Tally::new(Schema::default(), &configs, false);
        let err = ReplayInput::from_path(Path::new("/nonexistent/capture.resp"))
            .feed(&mut tally)
            .unwrap_err();
        assert!(matches!(err, TallyError::Io(_)));
    }
}
