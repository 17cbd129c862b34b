//! UI helpers for the installer CLI.
//!
//! Consistent formatting for console output during a run. Diagnostics go
//! through `tracing`; these lines are for the operator.

use colored::Colorize;

/// Print the installer banner.
pub fn print_banner() {
    println!();
    println!(
        "{}",
        r"
   ___           _               _             _
  / _ \ _ __ ___| |__   ___  ___| |_ _ __ __ _| |_ ___  _ __
 | | | | '__/ __| '_ \ / _ \/ __| __| '__/ _` | __/ _ \| '__|
 | |_| | | | (__| | | |  __/\__ \ |_| | | (_| | || (_) | |
  \___/|_|  \___|_| |_|\___||___/\__|_|  \__,_|\__\___/|_|
"
        .cyan()
    );
    println!("  {}", "On-Premise Edge Orchestrator Installer".bright_black());
    println!();
}

/// Print a section header.
pub fn print_section(title: &str) {
    println!();
    println!("{}", "═".repeat(70).bright_black());
    println!("{}", title.cyan().bold());
    println!("{}", "═".repeat(70).bright_black());
    println!();
}

/// Print a step indicator with message.
pub fn print_step(message: &str) {
    println!("{} {}", "▶".cyan(), message.bold());
}

/// Print a progress step with step number.
pub fn print_progress_step(current: u8, total: u8, message: &str) {
    println!(
        "{} {} {}",
        format!("[{current}/{total}]").bright_black(),
        "▶".cyan(),
        message.bold()
    );
}

/// Print a success message.
pub fn print_success(message: &str) {
    println!("{} {}", "✓".green().bold(), message.green());
}

/// Print a warning message.
pub fn print_warning(message: &str) {
    println!("{} {}", "⚠".yellow().bold(), message.yellow());
}

/// Print an error message.
pub fn print_error(message: &str) {
    println!("{} {}", "✗".red().bold(), message.red());
}

/// Print an info message.
pub fn print_info(message: &str) {
    println!("{} {}", "ℹ".blue().bold(), message);
}

/// Print a single check with an optional detail.
pub fn print_check_result(name: &str, passed: bool, message: Option<&str>) {
    let status = if passed { "✓".green() } else { "✗".red() };

    let text = if let Some(msg) = message {
        format!("{name} - {msg}")
    } else {
        name.to_string()
    };

    println!("  {status} {text}");
}
