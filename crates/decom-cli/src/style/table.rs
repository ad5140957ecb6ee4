//! Table formatting using comfy-table.

use comfy_table::modifiers::UTF8_ROUND_CORNERS;
use comfy_table::presets::UTF8_FULL;
use comfy_table::{Attribute, Cell, Color, ContentArrangement, Table};
use decom_harness::ScenarioOutcome;

fn base_table() -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table
}

/// Creates a key-value info table (two columns: key and value).
pub fn info_table(entries: &[(&str, &str)]) -> Table {
    let mut table = base_table();

    for (key, value) in entries {
        let key_cell = if super::no_color() {
            Cell::new(key)
        } else {
            Cell::new(key).fg(Color::DarkGrey)
        };
        table.add_row(vec![key_cell, Cell::new(value)]);
    }

    table
}

/// Prints a key-value info table.
pub fn print_info_table(entries: &[(&str, &str)]) {
    println!("{}", info_table(entries));
}

/// One row per scenario: result, name, duration, detail.
pub fn outcome_table(outcomes: &[ScenarioOutcome]) -> Table {
    let mut table = base_table();

    let header: Vec<Cell> = ["Result", "Scenario", "Duration", "Detail"]
        .into_iter()
        .map(|col| {
            if super::no_color() {
                Cell::new(col)
            } else {
                Cell::new(col).add_attribute(Attribute::Bold).fg(Color::Cyan)
            }
        })
        .collect();
    table.set_header(header);

    for outcome in outcomes {
        let (label, color) = if outcome.passed {
            ("PASS", Color::Green)
        } else {
            ("FAIL", Color::Red)
        };
        let result = if super::no_color() {
            Cell::new(label)
        } else {
            Cell::new(label).fg(color).add_attribute(Attribute::Bold)
        };
        table.add_row(vec![
            result,
            Cell::new(&outcome.name),
            Cell::new(format!("{} ms", outcome.duration_ms)),
            Cell::new(&outcome.detail),
        ]);
    }

    table
}

/// Prints the outcome table followed by a pass/fail summary.
pub fn print_outcome_table(outcomes: &[ScenarioOutcome]) {
    println!("{}", outcome_table(outcomes));

    let failed = outcomes.iter().filter(|o| !o.passed).count();
    if failed == 0 {
        super::print_success(&format!("{} scenario(s) passed", outcomes.len()));
    } else {
        super::print_error(&format!("{failed} of {} scenario(s) failed", outcomes.len()));
    }
}
