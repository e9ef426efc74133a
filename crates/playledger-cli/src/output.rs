use clap::ValueEnum;
use comfy_table::{modifiers, presets, Attribute, Cell, Color, Table};
use owo_colors::OwoColorize;
use playledger_core::CommitSummary;
use serde_json::json;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Human,
    Json,
    #[value(name = "json-pretty")]
    JsonPretty,
}

pub struct Output {
    format: OutputFormat,
    quiet: bool,
}

impl Output {
    pub fn new(format: OutputFormat, quiet: bool) -> Self {
        Self { format, quiet }
    }

    pub fn is_human(&self) -> bool {
        self.format == OutputFormat::Human
    }

    pub fn success(&self, msg: impl AsRef<str>) {
        if self.quiet {
            return;
        }

        match self.format {
            OutputFormat::Human => println!("{} {}", "✓".green(), msg.as_ref()),
            OutputFormat::Json | OutputFormat::JsonPretty => {
                self.print_json(&json!({ "type": "success", "message": msg.as_ref() }));
            }
        }
    }

    pub fn error(&self, msg: impl AsRef<str>) {
        // shown even in quiet mode
        match self.format {
            OutputFormat::Human => eprintln!("{} {}", "✗".red(), msg.as_ref()),
            OutputFormat::Json | OutputFormat::JsonPretty => {
                self.print_json(&json!({ "type": "error", "message": msg.as_ref() }));
            }
        }
    }

    pub fn info(&self, msg: impl AsRef<str>) {
        if self.quiet {
            return;
        }

        match self.format {
            OutputFormat::Human => println!("{}", msg.as_ref()),
            OutputFormat::Json | OutputFormat::JsonPretty => {
                self.print_json(&json!({ "type": "info", "message": msg.as_ref() }));
            }
        }
    }

    pub fn warn(&self, msg: impl AsRef<str>) {
        if self.quiet {
            return;
        }

        match self.format {
            OutputFormat::Human => println!("{} {}", "⚠".yellow(), msg.as_ref()),
            OutputFormat::Json | OutputFormat::JsonPretty => {
                self.print_json(&json!({ "type": "warning", "message": msg.as_ref() }));
            }
        }
    }

    /// Structured result of a command. Ignored in human mode.
    pub fn json(&self, data: &serde_json::Value) {
        if self.is_human() || self.quiet {
            return;
        }
        self.print_json(data);
    }

    pub fn table(&self, table: &Table) {
        if self.quiet || !self.is_human() {
            return;
        }
        println!("{}", table);
    }

    fn print_json(&self, data: &serde_json::Value) {
        match self.format {
            OutputFormat::Json => println!("{}", serde_json::to_string(data).unwrap_or_default()),
            OutputFormat::JsonPretty => println!("{}", serde_json::to_string_pretty(data).unwrap_or_default()),
            OutputFormat::Human => println!("{}", data),
        }
    }
}

pub fn styled_table(header: &[&str]) -> Table {
    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL);
    table.apply_modifier(modifiers::UTF8_ROUND_CORNERS);
    table.set_header(
        header
            .iter()
            .map(|h| Cell::new(h).fg(Color::Cyan).add_attribute(Attribute::Bold)),
    );
    table
}

/// Per-type added/updated/failed rows plus a total.
pub fn summary_table(summary: &CommitSummary) -> Table {
    let mut table = styled_table(&["Type", "Added", "Updated", "Failed"]);
    for (entity_type, counts) in summary.iter() {
        table.add_row(vec![
            Cell::new(entity_type.as_str()),
            Cell::new(counts.added),
            Cell::new(counts.updated),
            failed_cell(counts.failed),
        ]);
    }

    let total = summary.total();
    table.add_row(vec![
        Cell::new("total").add_attribute(Attribute::Bold),
        Cell::new(total.added).add_attribute(Attribute::Bold),
        Cell::new(total.updated).add_attribute(Attribute::Bold),
        failed_cell(total.failed).add_attribute(Attribute::Bold),
    ]);
    table
}

pub fn counters_table(counters: &BTreeMap<String, u64>) -> Table {
    let mut table = styled_table(&["Counter", "Count"]);
    for (name, count) in counters {
        table.add_row(vec![Cell::new(name), Cell::new(count)]);
    }
    table
}

fn failed_cell(failed: u64) -> Cell {
    if failed > 0 {
        Cell::new(failed).fg(Color::Red)
    } else {
        Cell::new(failed)
    }
}
