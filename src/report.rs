//! Result Reporter
//!
//! Renders every filter's outcome once the stream has completed, in
//! configuration order.
//!
//! Plain format:
//!
//! ```text
//! 42              count filter
//! [END]
//! news|17         group filter, descending count
//! sports|9
//! ```

use crate::filter::{Filter, FilterMode};
use crate::grouping::GroupEntry;
use crate::{Result, TallyError};
use serde::Serialize;
use std::io::Write;
use std::str::FromStr;

/// Line written between consecutive filters' sections
pub const SECTION_SEPARATOR: &str = "[END]";

/// Output rendering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReportFormat {
    #[default]
    Plain,
    Json,
}

impl FromStr for ReportFormat {
    type Err = TallyError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "plain" | "text" => Ok(Self::Plain),
            "json" => Ok(Self::Json),
            _ => Err(TallyError::Config(format!(
                "unknown output format '{}'; use plain or json",
                s
            ))),
        }
    }
}

/// Final outcome of one filter
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum FilterReport {
    None,
    Count { count: u64 },
    Group { entries: Vec<GroupEntry> },
}

impl FilterReport {
    pub fn from_filter(filter: &Filter) -> Self {
        match filter.mode() {
            FilterMode::None => Self::None,
            FilterMode::Count => Self::Count {
                count: filter.match_count(),
            },
            FilterMode::Group => Self::Group {
                entries: filter.table().top(filter.limit()),
            },
        }
    }
}

/// Write `reports` in `format` to `out`
pub fn write_reports<W: Write>(
    out: &mut W,
    reports: &[FilterReport],
    format: ReportFormat,
) -> Result<()> {
    match format {
        ReportFormat::Plain => write_plain(out, reports),
        ReportFormat::Json => {
            serde_json::to_writer_pretty(&mut *out, reports)?;
            writeln!(out)?;
            Ok(())
        }
    }
}

fn write_plain<W: Write>(out: &mut W, reports: &[FilterReport]) -> Result<()> {
    for (i, report) in reports.iter().enumerate() {
        match report {
            FilterReport::None => {}
            FilterReport::Count { count } => writeln!(out, "{}", count)?,
            FilterReport::Group { entries } => {
                for entry in entries {
                    out.write_all(&entry.value)?;
                    writeln!(out, "|{}", entry.count)?;
                }
            }
        }
        if i + 1 < reports.len() {
            writeln!(out, "{}", SECTION_SEPARATOR)?;
        }
    }
    out.flush()?;
    Ok(())
}
