use std::io::{IsTerminal, Write};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;

const SCHEMA_BASE: &str = "https://schemas.3leaps.dev/gattbus/cli/v1";

#[derive(Clone, Debug, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    Raw,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

/// Schema identifier stamped into JSON output of `command`.
pub fn schema_id(command: &str) -> String {
    format!("{SCHEMA_BASE}/{command}.schema.json")
}

pub fn print_json<T: Serialize>(value: &T) {
    println!(
        "{}",
        serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
    );
}

/// A table with the CLI's standard look.
pub fn table(header: Vec<&str>) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(header);
    table
}

/// Two-column key/value table.
pub fn print_fields(fields: &[(&str, String)]) {
    let mut table = table(vec!["FIELD", "VALUE"]);
    for (name, value) in fields {
        table.add_row(vec![name.to_string(), value.clone()]);
    }
    println!("{table}");
}

pub fn print_pretty_fields(fields: &[(&str, String)]) {
    let width = fields.iter().map(|(name, _)| name.len()).max().unwrap_or(0);
    for (name, value) in fields {
        println!("{name:<width$}  {value}");
    }
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.flush();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_ids_are_per_command() {
        assert_eq!(
            schema_id("plan"),
            "https://schemas.3leaps.dev/gattbus/cli/v1/plan.schema.json"
        );
    }

    #[test]
    fn tables_render_rows() {
        let mut table = table(vec!["GROUP", "FC"]);
        table.add_row(vec!["status", "0x04"]);
        let rendered = table.to_string();
        assert!(rendered.contains("GROUP"));
        assert!(rendered.contains("status"));
    }
}
