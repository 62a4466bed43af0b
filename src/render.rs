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

use anyhow::Result;
use clap::ValueEnum;
use serde_json::Value;
use std::env;
use std::io::IsTerminal;

use crate::table::{self, TableOptions};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Compact single-line JSON
    Json,
    /// Indented JSON, colorized on a terminal
    Pretty,
    /// Ad-hoc table
    Table,
}

#[derive(Debug, Clone)]
pub struct RenderOptions {
    pub format: OutputFormat,
    pub table: TableOptions,
}

/// Write the decoded response value to stdout in the selected format.
pub fn render_response(value: &Value, options: &RenderOptions) -> Result<()> {
    match options.format {
        OutputFormat::Json => println!("{}", serde_json::to_string(value)?),
        OutputFormat::Pretty => println!("{}", pretty_json(value, &Style::detect())),
        OutputFormat::Table => print!("{}", table::format_table(value, &options.table)),
    }
    Ok(())
}

mod colors {
    pub const RESET: &str = "\x1b[0m";
    pub const DIM: &str = "\x1b[2m";
    pub const GREEN: &str = "\x1b[32m";
    pub const YELLOW: &str = "\x1b[33m";
    pub const MAGENTA: &str = "\x1b[35m";
    pub const CYAN: &str = "\x1b[36m";
}

/// ANSI styling that collapses to plain text when disabled, so the pretty
/// printer stays byte-identical to serde's layout for pipes and files.
pub struct Style {
    enabled: bool,
}

impl Style {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    /// Color only when stdout is a terminal and NO_COLOR is unset.
    pub fn detect() -> Self {
        Self::new(std::io::stdout().is_terminal() && env::var_os("NO_COLOR").is_none())
    }

    fn apply(&self, code: &str, text: &str) -> String {
        if self.enabled {
            format!("{code}{text}{}", colors::RESET)
        } else {
            text.to_string()
        }
    }

    pub fn green(&self, text: &str) -> String {
        self.apply(colors::GREEN, text)
    }

    pub fn yellow(&self, text: &str) -> String {
        self.apply(colors::YELLOW, text)
    }

    pub fn magenta(&self, text: &str) -> String {
        self.apply(colors::MAGENTA, text)
    }

    pub fn cyan(&self, text: &str) -> String {
        self.apply(colors::CYAN, text)
    }

    pub fn dim(&self, text: &str) -> String {
        self.apply(colors::DIM, text)
    }
}

/// Two-space indented JSON with the same layout as `serde_json`'s pretty
/// printer; object keys and scalars are colorized per token kind.
pub fn pretty_json(value: &Value, style: &Style) -> String {
    let mut out = String::new();
    write_value(&mut out, value, 0, style);
    out
}

fn write_value(out: &mut String, value: &Value, depth: usize, style: &Style) {
    match value {
        Value::Object(map) if map.is_empty() => out.push_str("{}"),
        Value::Object(map) => {
            out.push_str("{\n");
            for (i, (key, item)) in map.iter().enumerate() {
                if i > 0 {
                    out.push_str(",\n");
                }
                indent(out, depth + 1);
                let quoted = serde_json::to_string(key).unwrap_or_default();
                out.push_str(&style.cyan(&quoted));
                out.push_str(": ");
                write_value(out, item, depth + 1, style);
            }
            out.push('\n');
            indent(out, depth);
            out.push('}');
        }
        Value::Array(items) if items.is_empty() => out.push_str("[]"),
        Value::Array(items) => {
            out.push_str("[\n");
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push_str(",\n");
                }
                indent(out, depth + 1);
                write_value(out, item, depth + 1, style);
            }
            out.push('\n');
            indent(out, depth);
            out.push(']');
        }
        Value::String(_) => {
            let quoted = serde_json::to_string(value).unwrap_or_default();
            out.push_str(&style.green(&quoted));
        }
        Value::Number(n) => out.push_str(&style.yellow(&n.to_string())),
        Value::Bool(b) => out.push_str(&style.magenta(&b.to_string())),
        Value::Null => out.push_str(&style.dim("null")),
    }
}

fn indent(out: &mut String, depth: usize) {
    for _ in 0..depth {
        out.push_str("  ");
    }
}
