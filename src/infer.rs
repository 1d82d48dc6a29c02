//! Column-type inference and header detection for untyped grids.
//!
//! Input is a ragged grid of string cells, as read from a spreadsheet or a
//! CSV file. Inference answers three questions:
//!
//! | Question | Rule |
//! |----------|------|
//! | Is row 0 a header? | Yes iff it has a non-empty cell and none of its non-empty cells parses as a float |
//! | Which columns survive? | Non-empty header cell, or a non-empty value in the first 20 data rows |
//! | What type is a column? | Scan the first 10 data rows: INTEGER → REAL → TEXT (TEXT is terminal) |
//!
//! When a grid has no header, names are generic (`field_<n>_<type>`) unless a
//! [`HeaderSuggester`] proposes exactly one name per column.

use anyhow::Result;
use async_trait::async_trait;
use tracing::debug;

use crate::sanitize::{sanitize_name, UniqueNames, UNKNOWN};

/// Data rows inspected when deciding whether a column carries any data.
pub const VALID_COLUMN_SCAN_ROWS: usize = 20;
/// Data rows sampled for type inference.
pub const TYPE_SAMPLE_ROWS: usize = 10;
/// Rows shown to a header suggester.
pub const SUGGESTION_SAMPLE_ROWS: usize = 5;

const SUGGESTION_PROMPT: &str = "Based on the following lines of data, suggest field names for each column, output only meaningful English field names separated by commas:\n";

/// Declared storage type of a local column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ColumnType {
    Integer,
    Real,
    Text,
}

impl ColumnType {
    pub fn as_sql(&self) -> &'static str {
        match self {
            ColumnType::Integer => "INTEGER",
            ColumnType::Real => "REAL",
            ColumnType::Text => "TEXT",
        }
    }

    pub fn suffix(&self) -> &'static str {
        match self {
            ColumnType::Integer => "integer",
            ColumnType::Real => "real",
            ColumnType::Text => "text",
        }
    }

    /// Parse a declared SQL type; anything unrecognised is TEXT.
    pub fn from_sql(decl: &str) -> Self {
        match decl.trim().to_ascii_uppercase().as_str() {
            "INTEGER" | "INT" | "BIGINT" => ColumnType::Integer,
            "REAL" | "FLOAT" | "DOUBLE" | "NUMERIC" => ColumnType::Real,
            _ => ColumnType::Text,
        }
    }
}

/// Optional collaborator that proposes column names for headerless data.
///
/// Receives a prompt followed by a few sample lines and returns a
/// comma-separated list of names. Failures are never fatal to an import.
#[async_trait]
pub trait HeaderSuggester: Send + Sync {
    async fn suggest(&self, sample_text: &str) -> Result<String>;
}

/// Classify a single cell. Empty cells are TEXT here; callers skip them.
pub fn infer_cell_type(value: &str) -> ColumnType {
    if value.is_empty() {
        ColumnType::Text
    } else if value.parse::<i64>().is_ok() {
        ColumnType::Integer
    } else if value.parse::<f64>().is_ok() {
        ColumnType::Real
    } else {
        ColumnType::Text
    }
}

/// Whether `row` looks like a header row.
pub fn is_header_row(row: &[String]) -> bool {
    let mut any_value = false;
    for cell in row {
        if cell.trim().is_empty() {
            continue;
        }
        any_value = true;
        if cell.parse::<f64>().is_ok() {
            return false;
        }
    }
    any_value
}

/// Result of analysing a grid.
#[derive(Debug, Clone, PartialEq)]
pub struct GridSchema {
    pub has_header: bool,
    /// Original indices of the retained columns.
    pub kept_columns: Vec<usize>,
    /// The grid restricted to `kept_columns`, header row included.
    pub rows: Vec<Vec<String>>,
    pub types: Vec<ColumnType>,
}

impl GridSchema {
    pub fn num_columns(&self) -> usize {
        self.types.len()
    }

    /// Rows after the header.
    pub fn data_rows(&self) -> &[Vec<String>] {
        if self.has_header {
            &self.rows[1.min(self.rows.len())..]
        } else {
            &self.rows
        }
    }
}

/// Run header detection, column filtering, and type inference.
///
/// Returns `None` when no column survives filtering.
pub fn analyse_grid(rows: &[Vec<String>]) -> Option<GridSchema> {
    let first = rows.first()?;
    let has_header = is_header_row(first);
    let max_cols = rows.iter().map(Vec::len).max().unwrap_or(0);
    let data_start = usize::from(has_header);

    let kept_columns: Vec<usize> = (0..max_cols)
        .filter(|&col| {
            let header_named = has_header
                && first
                    .get(col)
                    .map(|h| !h.trim().is_empty())
                    .unwrap_or(false);
            header_named
                || rows
                    .iter()
                    .skip(data_start)
                    .take(VALID_COLUMN_SCAN_ROWS)
                    .any(|r| r.get(col).map(|v| !v.trim().is_empty()).unwrap_or(false))
        })
        .collect();

    if kept_columns.is_empty() {
        return None;
    }

    let filtered: Vec<Vec<String>> = rows
        .iter()
        .map(|r| {
            kept_columns
                .iter()
                .filter_map(|&c| r.get(c).cloned())
                .collect()
        })
        .collect();

    let types = (0..kept_columns.len())
        .map(|col| infer_column_type(filtered.iter().skip(data_start), col))
        .collect();

    Some(GridSchema {
        has_header,
        kept_columns,
        rows: filtered,
        types,
    })
}

fn infer_column_type<'a>(data: impl Iterator<Item = &'a Vec<String>>, col: usize) -> ColumnType {
    let mut current = ColumnType::Integer;
    for row in data.take(TYPE_SAMPLE_ROWS) {
        let Some(cell) = row.get(col) else { continue };
        if cell.trim().is_empty() {
            continue;
        }
        match infer_cell_type(cell) {
            ColumnType::Text => return ColumnType::Text,
            ColumnType::Real => current = ColumnType::Real,
            ColumnType::Integer => {}
        }
    }
    current
}

/// Derive sanitized, unique column names for an analysed grid.
pub async fn derive_headers(
    schema: &GridSchema,
    suggester: Option<&dyn HeaderSuggester>,
) -> Vec<String> {
    let n = schema.num_columns();

    if schema.has_header {
        let header = schema.rows.first().cloned().unwrap_or_default();
        let mut unique = UniqueNames::new();
        return (0..n)
            .map(|i| {
                let raw = header.get(i).map(String::as_str).unwrap_or("");
                let mut name = sanitize_name(raw);
                if name == UNKNOWN {
                    name = format!("col_{}_{}", i, schema.types[i].suffix());
                }
                unique.claim(&name)
            })
            .collect();
    }

    if let Some(suggester) = suggester {
        let prompt = suggestion_prompt(&schema.rows);
        match suggester.suggest(&prompt).await {
            Ok(reply) if !reply.trim().is_empty() => {
                let proposed: Vec<&str> = reply.split(',').collect();
                if proposed.len() == n {
                    let mut unique = UniqueNames::new();
                    return proposed
                        .iter()
                        .enumerate()
                        .map(|(i, raw)| {
                            let mut name = sanitize_name(raw);
                            if name == UNKNOWN {
                                name = generic_name(i, schema.types[i]);
                            }
                            unique.claim(&name)
                        })
                        .collect();
                }
                debug!(
                    expected = n,
                    got = proposed.len(),
                    "header suggestion count mismatch, using generic names"
                );
            }
            Ok(_) => debug!("empty header suggestion, using generic names"),
            Err(e) => debug!(error = %e, "header suggestion failed, using generic names"),
        }
    }

    (0..n).map(|i| generic_name(i, schema.types[i])).collect()
}

fn generic_name(index: usize, ty: ColumnType) -> String {
    format!("field_{}_{}", index + 1, ty.suffix())
}

/// Build the text handed to a [`HeaderSuggester`].
///
/// Cells are joined with `,`, or with `|` when a cell in that line already
/// contains a comma.
pub fn suggestion_prompt(rows: &[Vec<String>]) -> String {
    let mut out = String::from(SUGGESTION_PROMPT);
    for row in rows.iter().take(SUGGESTION_SAMPLE_ROWS) {
        let sep = if row.iter().any(|c| c.contains(',')) {
            "|"
        } else {
            ","
        };
        out.push_str(&row.join(sep));
        out.push('\n');
    }
    out
}
