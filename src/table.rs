// fmgctl - CLI for the FortiManager JSON-RPC API
// Copyright (C) 2025 fmgctl authors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

//! Ad-hoc table rendering for decoded FortiManager responses.
//!
//! Responses are typically arrays of flat-ish objects whose exact fields vary
//! per endpoint, so there is no schema: columns come from an explicit field
//! list or from first-seen key discovery over the leading rows. Rendering
//! never fails for well-formed JSON; shapes that cannot become a table
//! produce a short notice instead.

use serde_json::Value;
use std::collections::HashSet;
use unicode_width::UnicodeWidthStr;

pub const DEFAULT_MAX_WIDTH: usize = 50;
pub const DEFAULT_MAX_FIELDS: usize = 6;

/// Rows scanned during column auto-detection. Keys first seen on later rows
/// never become columns; the rows themselves still render.
const DETECT_ROW_LIMIT: usize = 10;

const TRUNCATION_MARKER: char = '…';
const SCALAR_COLUMN: &str = "value";
const NO_DATA_NOTICE: &str = "No data to display in table format";
const NO_FIELDS_NOTICE: &str = "No suitable fields found for table display";

#[derive(Debug, Clone)]
pub struct TableOptions {
    /// Explicit column set, used verbatim in caller order when present.
    pub columns: Option<Vec<String>>,
    /// Maximum cell width in characters; 0 disables truncation.
    pub max_width: usize,
    /// Maximum auto-detected column count; 0 means unlimited.
    pub max_fields: usize,
}

impl Default for TableOptions {
    fn default() -> Self {
        Self {
            columns: None,
            max_width: DEFAULT_MAX_WIDTH,
            max_fields: DEFAULT_MAX_FIELDS,
        }
    }
}

/// Render `value` as a table. Returns the complete output including the
/// summary line, or a one-line notice for shapes that have no tabular form.
pub fn format_table(value: &Value, options: &TableOptions) -> String {
    let Some(rows) = extract_rows(value) else {
        return format!(
            "Table format not supported for response type: {}\n",
            json_kind(value)
        );
    };
    if rows.is_empty() {
        return format!("{NO_DATA_NOTICE}\n");
    }

    if !rows[0].is_object() {
        let cells: Vec<Vec<String>> = rows
            .iter()
            .map(|row| vec![clip(cell_text(row), options.max_width)])
            .collect();
        return render_grid(&[SCALAR_COLUMN.to_string()], &cells, rows.len());
    }

    let columns = match &options.columns {
        Some(explicit) => explicit.clone(),
        None => detect_columns(&rows, options.max_fields),
    };
    if columns.is_empty() {
        return format!("{NO_FIELDS_NOTICE}\n");
    }

    let cells: Vec<Vec<String>> = rows
        .iter()
        .filter_map(|row| row.as_object())
        .map(|row| {
            columns
                .iter()
                .map(|column| {
                    let text = row.get(column).map(cell_text).unwrap_or_default();
                    clip(text, options.max_width)
                })
                .collect()
        })
        .collect();
    render_grid(&columns, &cells, rows.len())
}

/// Pull the row list out of a response. `None` means the value is a bare
/// scalar with no tabular form; an empty vec means "no data".
fn extract_rows(value: &Value) -> Option<Vec<Value>> {
    match value {
        Value::Null => Some(Vec::new()),
        Value::Array(items) => Some(items.clone()),
        Value::Object(map) => {
            if map.is_empty() {
                return Some(Vec::new());
            }
            // List responses sometimes arrive wrapped; the first present key
            // holding an array (or single object) supplies the rows.
            for key in ["results", "data", "items"] {
                match map.get(key) {
                    Some(Value::Array(items)) => return Some(items.clone()),
                    Some(inner @ Value::Object(_)) => return Some(vec![inner.clone()]),
                    _ => {}
                }
            }
            Some(vec![value.clone()])
        }
        _ => None,
    }
}

/// First-seen key discovery: scan the leading rows in order, appending keys
/// not seen before, until the window is exhausted or the cap is reached.
fn detect_columns(rows: &[Value], max_fields: usize) -> Vec<String> {
    let mut columns = Vec::new();
    let mut seen = HashSet::new();
    for row in rows.iter().take(DETECT_ROW_LIMIT) {
        let Value::Object(map) = row else { continue };
        for key in map.keys() {
            if !seen.insert(key.clone()) {
                continue;
            }
            columns.push(key.clone());
            if max_fields != 0 && columns.len() == max_fields {
                return columns;
            }
        }
    }
    columns
}

/// Scalars keep their natural string form; nested values become compact
/// inline JSON; null renders empty.
fn cell_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        other => serde_json::to_string(other).unwrap_or_default(),
    }
}

/// Cut to `max_width` characters including the marker, so a truncated cell is
/// a prefix of the original plus `…` and exactly `max_width` long.
fn clip(text: String, max_width: usize) -> String {
    if max_width == 0 || text.chars().count() <= max_width {
        return text;
    }
    let mut clipped: String = text.chars().take(max_width - 1).collect();
    clipped.push(TRUNCATION_MARKER);
    clipped
}

fn render_grid(columns: &[String], rows: &[Vec<String>], total: usize) -> String {
    let mut widths: Vec<usize> = columns.iter().map(|column| column.width()).collect();
    for row in rows {
        for (i, cell) in row.iter().enumerate() {
            widths[i] = widths[i].max(cell.width());
        }
    }

    let mut out = format!("{total} result(s) found\n");
    push_line(&mut out, columns.iter().map(String::as_str), &widths);
    let separators: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
    push_line(&mut out, separators.iter().map(String::as_str), &widths);
    for row in rows {
        push_line(&mut out, row.iter().map(String::as_str), &widths);
    }
    out
}

fn push_line<'a>(out: &mut String, cells: impl Iterator<Item = &'a str>, widths: &[usize]) {
    let mut line = String::new();
    for (i, cell) in cells.enumerate() {
        if i > 0 {
            line.push_str("  ");
        }
        line.push_str(cell);
        let padding = widths[i].saturating_sub(cell.width());
        line.push_str(&" ".repeat(padding));
    }
    out.push_str(line.trim_end());
    out.push('\n');
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
