//! Scenario listing.

use decom_harness::BuiltinScenario;

use crate::style;

pub fn run() {
    let rows: Vec<(&str, &str)> = BuiltinScenario::ALL
        .iter()
        .map(|b| (b.name(), b.description()))
        .collect();
    style::print_info_table(&rows);
    style::print_hint("Run one with 'decom run <name>', or all of them with 'decom run all'");
}
