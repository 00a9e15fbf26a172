//! Terminal output for operators.
//!
//! Logs carry the detail; these are the banners and verdicts a person
//! watching the run looks for.

use colored::Colorize;
use stakeprobe_core::{RunReport, ScenarioResult};

/// Print success message.
pub fn print_success(msg: &str) {
    println!("{}", format!("✓ {}", msg).green());
}

/// Print error message.
pub fn print_error(msg: &str) {
    eprintln!("{}", format!("✗ {}", msg).red());
}

/// Print warning message.
pub fn print_warning(msg: &str) {
    println!("{}", format!("⚠ {}", msg).yellow());
}

/// Print info message.
pub fn print_info(msg: &str) {
    println!("{}", format!("ℹ {}", msg).blue());
}

/// Announce a scenario before it runs.
pub fn print_scenario_start(name: &str) {
    println!();
    println!("{}", format!("== START {} ==", name).bright_cyan().bold());
}

/// Verdict of one scenario.
pub fn print_scenario_result(result: &ScenarioResult) {
    if result.passed {
        print_success(&format!("{} passed", result.name));
    } else {
        match &result.error {
            Some(error) => print_error(&format!("{} failed: {}", result.name, error)),
            None => print_error(&format!("{} failed", result.name)),
        }
    }
}

/// Summary table of the staking scenarios.
pub fn print_report(report: &RunReport) {
    println!();
    println!("{}", "Staking Scenarios".bold());
    println!("{}", "=".repeat(50));
    for result in report.results() {
        let verdict = if result.passed {
            "PASS".green()
        } else {
            "FAIL".red()
        };
        println!("{:<40} {}", result.name, verdict);
    }
    println!("{}", "=".repeat(50));
    println!(
        "{} of {} passed",
        report.passed().to_string().bright_green(),
        report.results().len()
    );
}
