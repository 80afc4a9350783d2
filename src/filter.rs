//! Filters and the Filter Set
//!
//! A [`Filter`] is a fixed-shape predicate (score range, per-column exclude
//! and include substrings) plus its aggregation state. The [`FilterSet`]
//! evaluates every filter independently against each record.
//!
//! Evaluation order per record:
//! 1. score gate (only when a score is present)
//! 2. exclude gate, first hit rejects
//! 3. include gate, all non-empty terms must occur
//! 4. aggregation (count or group)

use crate::fields::{contains, multi_values, FieldCursor, Record};
use crate::grouping::{GroupLimit, GroupingTable};
use crate::schema::Schema;
use crate::{Result, TallyError};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Number of positional arguments describing one filter
pub const FILTER_ARITY: usize = 7;

/// What a filter reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterMode {
    #[default]
    None,
    #[serde(alias = "COUNT")]
    Count,
    #[serde(alias = "GROUP")]
    Group,
}

impl FilterMode {
    /// `COUNT` and `GROUP` select a mode; anything else is none
    pub fn parse_mode(s: &str) -> Self {
        match s {
            "COUNT" => Self::Count,
            "GROUP" => Self::Group,
            _ => Self::None,
        }
    }
}

/// Inclusive score bounds; `None` is unbounded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ScoreRange {
    pub start: Option<i64>,
    pub finish: Option<i64>,
}

impl ScoreRange {
    /// Negative raw bounds mean unbounded
    pub fn from_raw(start: i64, finish: i64) -> Self {
        Self {
            start: (start >= 0).then_some(start),
            finish: (finish >= 0).then_some(finish),
        }
    }

    #[inline]
    pub fn contains(&self, score: i64) -> bool {
        if matches!(self.finish, Some(finish) if score > finish) {
            return false;
        }
        !matches!(self.start, Some(start) if score < start)
    }
}

/// Per-column substring terms with the "all slots empty" flag cached
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TermSet {
    terms: Vec<String>,
    all_empty: bool,
}

impl TermSet {
    pub fn new(terms: Vec<String>) -> Self {
        let all_empty = terms.iter().all(|t| t.is_empty());
        Self { terms, all_empty }
    }

    /// A term set with no constraint on any of `width` columns
    pub fn empty(width: usize) -> Self {
        Self::new(vec![String::new(); width])
    }

    pub fn is_all_empty(&self) -> bool {
        self.all_empty
    }

    pub fn terms(&self) -> &[String] {
        &self.terms
    }

    /// Columns carrying a term
    fn active(&self) -> impl Iterator<Item = (usize, &str)> {
        self.terms
            .iter()
            .enumerate()
            .filter(|(_, t)| !t.is_empty())
            .map(|(i, t)| (i, t.as_str()))
    }

    /// True when any active term occurs in its column
    #[inline]
    fn any_occurs(&self, record: &Record<'_>) -> bool {
        !self.all_empty
            && self
                .active()
                .any(|(i, term)| record.get(i).is_some_and(|f| contains(f, term.as_bytes())))
    }

    /// True when every active term occurs in its column
    #[inline]
    fn all_occur(&self, record: &Record<'_>) -> bool {
        self.all_empty
            || self
                .active()
                .all(|(i, term)| record.get(i).is_some_and(|f| contains(f, term.as_bytes())))
    }
}

/// Include/exclude terms as written in configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Terms {
    /// A delimited row, one slot per column
    Row(String),
    /// Column name to term
    ByColumn(BTreeMap<String, String>),
}

impl Default for Terms {
    fn default() -> Self {
        Self::Row(String::new())
    }
}

impl Terms {
    /// Resolve into one slot per schema column. Unknown column names are
    /// logged and ignored.
    pub fn resolve(&self, schema: &Schema) -> TermSet {
        match self {
            Self::Row(row) => {
                let record = Record::split(row.as_bytes(), schema);
                TermSet::new(
                    record
                        .iter()
                        .map(|slot| String::from_utf8_lossy(slot).into_owned())
                        .collect(),
                )
            }
            Self::ByColumn(map) => {
                let mut terms = vec![String::new(); schema.len()];
                for (column, term) in map {
                    match schema.column_index(column) {
                        Some(i) => terms[i] = term.clone(),
                        None => warn!("ignoring term for unknown column '{}'", column),
                    }
                }
                TermSet::new(terms)
            }
        }
    }
}

fn default_bound() -> i64 {
    -1
}

fn default_limit() -> i64 {
    10
}

/// External description of one filter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterConfig {
    #[serde(default)]
    pub mode: FilterMode,
    /// Lower score bound, negative for unbounded
    #[serde(default = "default_bound")]
    pub start: i64,
    /// Upper score bound, negative for unbounded
    #[serde(default = "default_bound")]
    pub finish: i64,
    /// Group entries to report; negative suppresses all entries
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub column: Option<String>,
    #[serde(default)]
    pub include: Terms,
    #[serde(default)]
    pub exclude: Terms,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            mode: FilterMode::None,
            start: default_bound(),
            finish: default_bound(),
            limit: default_limit(),
            column: None,
            include: Terms::default(),
            exclude: Terms::default(),
        }
    }
}

impl FilterConfig {
    /// Parse one positional tuple: `MODE START FINISH LIMIT COLUMN INCLUDE EXCLUDE`
    pub fn from_positional<S: AsRef<str>>(args: &[S]) -> Result<Self> {
        if args.len() != FILTER_ARITY {
            return Err(TallyError::Config(format!(
                "a filter takes {} arguments, got {}",
                FILTER_ARITY,
                args.len()
            )));
        }
        let arg = |i: usize| args[i].as_ref();
        let int = |i: usize, what: &str| -> Result<i64> {
            arg(i).trim().parse::<i64>().map_err(|_| {
                TallyError::Config(format!("invalid {} '{}': expected an integer", what, arg(i)))
            })
        };

        Ok(Self {
            mode: FilterMode::parse_mode(arg(0)),
            start: int(1, "start")?,
            finish: int(2, "finish")?,
            limit: int(3, "limit")?,
            column: Some(arg(4).to_string()).filter(|c| !c.is_empty()),
            include: Terms::Row(arg(5).to_string()),
            exclude: Terms::Row(arg(6).to_string()),
        })
    }

    /// Parse consecutive positional tuples
    pub fn parse_all<S: AsRef<str>>(args: &[S]) -> Result<Vec<Self>> {
        if args.len() % FILTER_ARITY != 0 {
            return Err(TallyError::Config(format!(
                "filter arguments come in groups of {}; {} left over",
                FILTER_ARITY,
                args.len() % FILTER_ARITY
            )));
        }
        args.chunks(FILTER_ARITY).map(Self::from_positional).collect()
    }
}

/// Grouping target resolved against the schema
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct GroupColumn {
    index: usize,
    /// Separator when the column is the multi-value column
    split_on: Option<char>,
}

/// A configured predicate and its aggregation state
#[derive(Debug, Clone)]
pub struct Filter {
    mode: FilterMode,
    range: ScoreRange,
    include: TermSet,
    exclude: TermSet,
    group_column: Option<GroupColumn>,
    limit: GroupLimit,
    match_count: u64,
    table: GroupingTable,
}

impl Filter {
    pub fn new(config: &FilterConfig, schema: &Schema) -> Self {
        let group_column = config.column.as_deref().and_then(|name| {
            let index = schema.column_index(name);
            if index.is_none() && config.mode == FilterMode::Group {
                warn!("unknown group column '{}'; filter will not group", name);
            }
            index.map(|index| GroupColumn {
                index,
                split_on: schema
                    .is_multi_value(index)
                    .then(|| schema.multi_value_separator()),
            })
        });

        Self {
            mode: config.mode,
            range: ScoreRange::from_raw(config.start, config.finish),
            include: config.include.resolve(schema),
            exclude: config.exclude.resolve(schema),
            group_column,
            limit: GroupLimit::from_raw(config.limit),
            match_count: 0,
            table: GroupingTable::new(),
        }
    }

    /// Score, exclude and include gates
    pub fn matches(&self, record: &Record<'_>, score: Option<i64>) -> bool {
        if let Some(score) = score {
            if !self.range.contains(score) {
                return false;
            }
        }
        if self.exclude.any_occurs(record) {
            return false;
        }
        self.include.all_occur(record)
    }

    /// Run the gates and update aggregation state. Returns whether the
    /// record matched.
    pub fn evaluate(&mut self, record: &Record<'_>, score: Option<i64>) -> Result<bool> {
        if !self.matches(record, score) {
            return Ok(false);
        }

        match self.mode {
            FilterMode::Count => self.match_count += 1,
            FilterMode::Group => {
                if let Some(column) = self.group_column {
                    let value = record.get(column.index).unwrap_or_default();
                    match column.split_on {
                        Some(separator) => {
                            for token in multi_values(value, separator) {
                                self.table.record(token)?;
                            }
                        }
                        None => self.table.record(value)?,
                    }
                }
            }
            FilterMode::None => {}
        }
        Ok(true)
    }

    pub fn mode(&self) -> FilterMode {
        self.mode
    }

    pub fn range(&self) -> ScoreRange {
        self.range
    }

    pub fn limit(&self) -> GroupLimit {
        self.limit
    }

    pub fn group_column(&self) -> Option<usize> {
        self.group_column.map(|c| c.index)
    }

    pub fn include(&self) -> &TermSet {
        &self.include
    }

    pub fn exclude(&self) -> &TermSet {
        &self.exclude
    }

    /// Matches counted in count mode
    pub fn match_count(&self) -> u64 {
        self.match_count
    }

    pub fn table(&self) -> &GroupingTable {
        &self.table
    }
}

/// Ordered, independently evaluated filters over one schema
#[derive(Debug, Clone)]
pub struct FilterSet {
    schema: Schema,
    filters: Vec<Filter>,
}

impl FilterSet {
    pub fn new(schema: Schema, configs: &[FilterConfig]) -> Self {
        let filters = configs.iter().map(|c| Filter::new(c, &schema)).collect();
        Self { schema, filters }
    }

    /// Split `raw` once and evaluate every filter against it
    pub fn process(&mut self, raw: &[u8], score: Option<i64>) -> Result<()> {
        let record = Record::split(raw, &self.schema);
        for filter in &mut self.filters {
            filter.evaluate(&record, score)?;
        }
        Ok(())
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn filters(&self) -> &[Filter] {
        &self.filters
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }
}

/// Count tokens of a delimited row; used to warn about over-long term rows
pub(crate) fn row_width(row: &str, delimiter: char) -> usize {
    FieldCursor::new(row.as_bytes(), delimiter).count()
}

/// Log term rows that carry more slots than the schema has columns
pub(crate) fn check_row_widths(configs: &[FilterConfig], schema: &Schema) {
    for (i, config) in configs.iter().enumerate() {
        for (side, terms) in [("include", &config.include), ("exclude", &config.exclude)] {
            if let Terms::Row(row) = terms {
                let width = row_width(row, schema.delimiter());
                if width > schema.len() {
                    debug!(
                        "filter {} {} row has {} slots, schema has {}; extra slots ignored",
                        i,
                        side,
                        width,
                        schema.len()
                    );
                }
            }
        }
    }
}
