//! Record schema
//!
//! A fixed, ordered set of named columns. Every record is split into exactly
//! `len()` fields. At most one column is a multi-value column whose field
//! holds separator-joined sub-values (tag lists).

use crate::{Result, TallyError};
use serde::{Deserialize, Serialize};

/// Built-in column layout of the article log records
pub const DEFAULT_COLUMNS: &[&str] = &[
    "referrer",
    "time",
    "tags",
    "article_id",
    "keywords",
    "type",
    "tnt",
];

/// Built-in multi-value column
pub const DEFAULT_MULTI_VALUE_COLUMN: &str = "tags";

/// Field delimiter of raw records
pub const DEFAULT_DELIMITER: char = '|';

/// Separator inside the multi-value column
pub const DEFAULT_MULTI_VALUE_SEPARATOR: char = ',';

/// Column layout shared by every filter of a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    columns: Vec<String>,
    multi_value: Option<usize>,
    delimiter: char,
    multi_value_separator: char,
}

impl Schema {
    /// Create a schema with the default delimiters and no multi-value column
    pub fn new<S: AsRef<str>>(columns: &[S]) -> Result<Self> {
        if columns.is_empty() {
            return Err(TallyError::Config("schema needs at least one column".to_string()));
        }
        Ok(Self {
            columns: columns.iter().map(|c| c.as_ref().to_string()).collect(),
            multi_value: None,
            delimiter: DEFAULT_DELIMITER,
            multi_value_separator: DEFAULT_MULTI_VALUE_SEPARATOR,
        })
    }

    /// Mark `name` as the multi-value column
    pub fn with_multi_value_column(mut self, name: &str) -> Result<Self> {
        let index = self
            .column_index(name)
            .ok_or_else(|| TallyError::Config(format!("unknown multi-value column: {}", name)))?;
        self.multi_value = Some(index);
        Ok(self)
    }

    pub fn with_delimiter(mut self, delimiter: char) -> Self {
        self.delimiter = delimiter;
        self
    }

    pub fn with_multi_value_separator(mut self, separator: char) -> Self {
        self.multi_value_separator = separator;
        self
    }

    /// Resolve a column name to its index. `None` means "no such column".
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn column_name(&self, index: usize) -> Option<&str> {
        self.columns.get(index).map(|c| c.as_str())
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Number of fields in every record
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn is_multi_value(&self, index: usize) -> bool {
        self.multi_value == Some(index)
    }

    pub fn multi_value_column(&self) -> Option<usize> {
        self.multi_value
    }

    pub fn delimiter(&self) -> char {
        self.delimiter
    }

    pub fn multi_value_separator(&self) -> char {
        self.multi_value_separator
    }
}

impl Default for Schema {
    fn default() -> Self {
        let columns: Vec<String> = DEFAULT_COLUMNS.iter().map(|c| c.to_string()).collect();
        let multi_value = columns.iter().position(|c| c == DEFAULT_MULTI_VALUE_COLUMN);
        Self {
            columns,
            multi_value,
            delimiter: DEFAULT_DELIMITER,
            multi_value_separator: DEFAULT_MULTI_VALUE_SEPARATOR,
        }
    }
}

/// Schema section of the configuration file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchemaConfig {
    #[serde(default)]
    pub columns: Option<Vec<String>>,
    #[serde(default)]
    pub multi_value_column: Option<String>,
    #[serde(default)]
    pub delimiter: Option<char>,
    #[serde(default)]
    pub multi_value_separator: Option<char>,
}

impl SchemaConfig {
    /// Build a schema, falling back to the built-in layout for missing parts
    pub fn build(&self) -> Result<Schema> {
        let mut schema = match &self.columns {
            Some(columns) => {
                let schema = Schema::new(columns)?;
                match &self.multi_value_column {
                    Some(name) => schema.with_multi_value_column(name)?,
                    None => schema,
                }
            }
            None => match &self.multi_value_column {
                Some(name) => {
                    let mut schema = Schema::default();
                    schema.multi_value = None;
                    schema.with_multi_value_column(name)?
                }
                None => Schema::default(),
            },
        };
        if let Some(delimiter) = self.delimiter {
            schema = schema.with_delimiter(delimiter);
        }
        if let Some(separator) = self.multi_value_separator {
            schema = schema.with_multi_value_separator(separator);
        }
        Ok(schema)
    }
}
