//! # zset-tally
//!
//! Streaming filter-and-tally engine for pipe-delimited log records held in
//! a sorted-set store.
//!
//! One store query yields a stream of records. Each record is split into a
//! fixed schema and evaluated, in one pass, against any number of filters.
//! A filter either counts its matches or tallies the values of one column.
//! Nothing but the current record is buffered.
//!
//! ## Pipeline
//!
//! ```text
//! socket bytes
//!     ↓
//! RespReader          one callback per decoded scalar
//!     ↓
//! RecordStream        pairs (record, score) when scores are requested
//!     ↓
//! Record::split       fixed-width field slices
//!     ↓
//! FilterSet           score / exclude / include gates, count or group
//!     ↓
//! FilterReport        sorted, limited, rendered after the reply ends
//! ```
//!
//! ## Example
//!
//! ```rust
//! use zset_tally::{FilterConfig, FilterMode, FilterReport, Schema, Tally, Terms};
//!
//! let group_tags = FilterConfig {
//!     mode: FilterMode::Group,
//!     column: Some("tags".to_string()),
//!     include: Terms::Row("google".to_string()),
//!     ..Default::default()
//! };
//! let mut tally = Tally::new(Schema::default(), &[group_tags], false);
//!
//! let reply = b"*2\r\n$16\r\ngoogle|1|news,tv\r\n$13\r\nbing|2|sports\r\n";
//! tally.consume(&reply[..]).unwrap();
//!
//! let reports = tally.reports();
//! assert!(matches!(&reports[0], FilterReport::Group { entries } if entries.len() == 2));
//! ```

// --- Global Allocator: mimalloc (Microsoft's high-performance allocator) ---
#[cfg(not(target_env = "msvc"))]
use mimalloc::MiMalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

pub mod client;
pub mod config;
pub mod fields;
pub mod filter;
pub mod grouping;
pub mod report;
pub mod resp;
pub mod schema;
pub mod source;

pub use client::{requests_scores, StoreClient, DEFAULT_CONNECT_TIMEOUT, DEFAULT_PORT};
pub use config::TallyConfig;
pub use fields::{FieldCursor, Record};
pub use filter::{
    Filter, FilterConfig, FilterMode, FilterSet, ScoreRange, TermSet, Terms, FILTER_ARITY,
};
pub use grouping::{GroupEntry, GroupLimit, GroupingTable};
pub use report::{write_reports, FilterReport, ReportFormat, SECTION_SEPARATOR};
pub use resp::{encode_command, RespReader};
pub use schema::{Schema, SchemaConfig};
pub use source::{PairState, RecordStream, ScalarVisitor, StreamStats};

use log::info;
use std::io::{BufRead, Write};
use thiserror::Error;

/// Error types for zset-tally operations
#[derive(Error, Debug)]
pub enum TallyError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Connection error ({addr}): {source}")]
    Connection {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Server error: {0}")]
    Server(String),

    #[error("Out of memory while allocating {0}")]
    OutOfMemory(&'static str),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, TallyError>;

/// One query's worth of filters, fed by a single streamed reply
pub struct Tally {
    filters: FilterSet,
    with_scores: bool,
    stats: StreamStats,
}

impl Tally {
    /// Build the filter set. `with_scores` makes the stream pair every
    /// record with the scalar that follows it.
    pub fn new(schema: Schema, configs: &[FilterConfig], with_scores: bool) -> Self {
        filter::check_row_widths(configs, &schema);
        Self {
            filters: FilterSet::new(schema, configs),
            with_scores,
            stats: StreamStats::default(),
        }
    }

    /// Like [`Tally::new`], with score mode taken from the command text
    pub fn for_command(schema: Schema, configs: &[FilterConfig], command: &str) -> Self {
        Self::new(schema, configs, requests_scores(command))
    }

    /// Stream one reply from `reader` through the filters
    pub fn consume<R: BufRead>(&mut self, reader: R) -> Result<StreamStats> {
        let mut resp = RespReader::new(reader);
        let mut stream = RecordStream::new(&mut self.filters, self.with_scores);
        resp.read_reply(&mut stream)?;
        let stats = stream.finish();
        self.absorb(stats);
        Ok(stats)
    }

    /// Issue `command` on `client` and stream its reply through the filters
    pub fn run(&mut self, client: &mut StoreClient, command: &str) -> Result<StreamStats> {
        let mut stream = RecordStream::new(&mut self.filters, self.with_scores);
        client.execute(command, &mut stream)?;
        let stats = stream.finish();
        self.absorb(stats);
        Ok(stats)
    }

    fn absorb(&mut self, stats: StreamStats) {
        self.stats.scalars += stats.scalars;
        self.stats.records += stats.records;
        self.stats.bad_scores += stats.bad_scores;
        info!(
            "streamed {} scalars, {} records through {} filters",
            stats.scalars,
            stats.records,
            self.filters.len()
        );
    }

    /// Per-filter outcome, in configuration order
    pub fn reports(&self) -> Vec<FilterReport> {
        self.filters
            .filters()
            .iter()
            .map(FilterReport::from_filter)
            .collect()
    }

    pub fn write_report<W: Write>(&self, out: &mut W, format: ReportFormat) -> Result<()> {
        write_reports(out, &self.reports(), format)
    }

    pub fn filters(&self) -> &FilterSet {
        &self.filters
    }

    pub fn with_scores(&self) -> bool {
        self.with_scores
    }

    /// Totals over everything consumed so far
    pub fn stats(&self) -> StreamStats {
        self.stats
    }
}

/// Convenience function: tally one raw reply with the built-in schema
pub fn tally_reply(
    reply: &[u8],
    configs: &[FilterConfig],
    with_scores: bool,
) -> Result<Vec<FilterReport>> {
    let mut tally = Tally::new(Schema::default(), configs, with_scores);
    tally.consume(reply)?;
    Ok(tally.reports())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Encode members (and optional scores) as an array reply
    fn reply(items: &[&str]) -> Vec<u8> {
        let mut out = format!("*{}\r\n", items.len()).into_bytes();
        for item in items {
            out.extend_from_slice(format!("${}\r\n{}\r\n", item.len(), item).as_bytes());
        }
        out
    }

    fn positional(args: &[&str]) -> Vec<FilterConfig> {
        FilterConfig::parse_all(args).unwrap()
    }

    fn render(tally: &Tally) -> String {
        let mut out = Vec::new();
        tally.write_report(&mut out, ReportFormat::Plain).unwrap();
        String::from_utf8(out).unwrap()
    }

    const RECORDS: &[&str] = &[
        "google|100|news,sports|1|rust|article|a",
        "google|200|news|2|go|article|b",
        "bing|300|sports|3|rust|video|c",
        "google|400|weather|4|zig|article|d",
        "duck|500|news,weather|5|rust|article|e",
    ];

    #[test]
    fn test_count_and_group_in_one_pass() {
        let configs = positional(&[
            "COUNT", "-1", "-1", "-1", "", "google", "",
            "GROUP", "-1", "-1", "10", "tags", "", "|||||video",
        ]);
        let mut tally = Tally::new(Schema::default(), &configs, false);
        let stats = tally.consume(&reply(RECORDS)[..]).unwrap();
        assert_eq!(stats.records, 5);

        let reports = tally.reports();
        assert_eq!(reports[0], FilterReport::Count { count: 3 });
        let FilterReport::Group { entries } = &reports[1] else {
            panic!("expected group report");
        };
        let pairs: Vec<_> = entries.iter().map(|e| (e.value.as_slice(), e.count)).collect();
        assert_eq!(
            pairs,
            vec![(&b"news"[..], 3), (&b"weather"[..], 2), (&b"sports"[..], 1)]
        );
        assert_eq!(tally.filters().filters()[1].table().total(), 6);
    }

    #[test]
    fn test_plain_output_matches_line_format() {
        let configs = positional(&[
            "COUNT", "-1", "-1", "-1", "", "", "",
            "GROUP", "-1", "-1", "2", "referrer", "", "",
        ]);
        let mut tally = Tally::new(Schema::default(), &configs, false);
        tally.consume(&reply(RECORDS)[..]).unwrap();
        assert_eq!(render(&tally), "5\n[END]\ngoogle|3\nbing|1\n");
    }

    #[test]
    fn test_scored_reply() {
        let items = [
            RECORDS[0], "5",
            RECORDS[1], "15",
            RECORDS[2], "7",
        ];
        let configs = positional(&["COUNT", "0", "10", "-1", "", "", ""]);
        let mut tally = Tally::for_command(Schema::default(), &configs, "ZRANGE k 0 -1 WITHSCORES");
        assert!(tally.with_scores());
        let stats = tally.consume(&reply(&items)[..]).unwrap();
        assert_eq!(stats.scalars, 6);
        assert_eq!(stats.records, 3);
        assert_eq!(tally.reports()[0], FilterReport::Count { count: 2 });
    }

    #[test]
    fn test_suppressed_limit_reports_nothing() {
        let configs = positional(&["GROUP", "-1", "-1", "-1", "referrer", "", ""]);
        let reports = tally_reply(&reply(RECORDS), &configs, false).unwrap();
        assert_eq!(reports[0], FilterReport::Group { entries: vec![] });
    }

    #[test]
    fn test_limit_truncation_exact() {
        let mut items = Vec::new();
        for (value, n) in [("a", 5), ("b", 4), ("c", 3), ("d", 2), ("e", 1)] {
            for _ in 0..n {
                items.push(format!("{}|t", value));
            }
        }
        let refs: Vec<&str> = items.iter().map(String::as_str).collect();
        let configs = positional(&["GROUP", "-1", "-1", "2", "referrer", "", ""]);
        let mut tally = Tally::new(Schema::default(), &configs, false);
        tally.consume(&reply(&refs)[..]).unwrap();
        assert_eq!(render(&tally), "a|5\nb|4\n");
    }

    #[test]
    fn test_output_is_reproducible() {
        let configs = positional(&["GROUP", "-1", "-1", "10", "keywords", "", ""]);
        let run = || {
            let mut tally = Tally::new(Schema::default(), &configs, false);
            tally.consume(&reply(RECORDS)[..]).unwrap();
            render(&tally)
        };
        let first = run();
        for _ in 0..5 {
            assert_eq!(run(), first);
        }
        assert_eq!(first, "rust|3\ngo|1\nzig|1\n");
    }

    #[test]
    fn test_mode_none_still_separated() {
        let configs = positional(&[
            "NONE", "-1", "-1", "-1", "", "", "",
            "COUNT", "-1", "-1", "-1", "", "", "",
        ]);
        let mut tally = Tally::new(Schema::default(), &configs, false);
        tally.consume(&reply(RECORDS)[..]).unwrap();
        assert_eq!(render(&tally), "[END]\n5\n");
    }

    #[test]
    fn test_invalid_utf8_values_grouped_and_printed_verbatim() {
        let configs = positional(&["GROUP", "-1", "-1", "10", "referrer", "", ""]);
        let raw = b"*3\r\n$6\r\ncaf\xe9|1\r\n$6\r\ncaf\xe8|2\r\n$6\r\ncaf\xe9|3\r\n";
        let mut tally = Tally::new(Schema::default(), &configs, false);
        tally.consume(&raw[..]).unwrap();

        let reports = tally.reports();
        let FilterReport::Group { entries } = &reports[0] else {
            panic!("expected group report");
        };
        assert_eq!(
            entries,
            &vec![
                GroupEntry { value: b"caf\xe9".to_vec(), count: 2 },
                GroupEntry { value: b"caf\xe8".to_vec(), count: 1 },
            ]
        );

        let mut out = Vec::new();
        tally.write_report(&mut out, ReportFormat::Plain).unwrap();
        assert_eq!(out, b"caf\xe9|2\ncaf\xe8|1\n".to_vec());
    }

    #[test]
    fn test_server_error_aborts() {
        let configs = positional(&["COUNT", "-1", "-1", "-1", "", "", ""]);
        let err = tally_reply(b"-WRONGTYPE not a sorted set\r\n", &configs, false).unwrap_err();
        assert!(matches!(err, TallyError::Server(_)));
    }

    #[test]
    fn test_stats_accumulate() {
        let configs = positional(&["COUNT", "-1", "-1", "-1", "", "", ""]);
        let mut tally = Tally::new(Schema::default(), &configs, false);
        tally.consume(&reply(&RECORDS[..2])[..]).unwrap();
        tally.consume(&reply(&RECORDS[2..])[..]).unwrap();
        assert_eq!(tally.stats().records, 5);
        assert_eq!(tally.reports()[0], FilterReport::Count { count: 5 });
    }

    #[test]
    fn test_error_display() {
        let err = TallyError::OutOfMemory("grouping key");
        assert_eq!(err.to_string(), "Out of memory while allocating grouping key");
        let err = TallyError::Config("bad".into());
        assert_eq!(err.to_string(), "Configuration error: bad");
    }
}
