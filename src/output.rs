//! src/output.rs
//! Severity-tagged status lines and progress indicators.

use std::time::Duration;

use colored::*;
use indicatif::{ProgressBar, ProgressStyle};

pub fn info(message: &str) {
    println!("{} {}", "[INFO]".blue().bold(), message);
}

pub fn success(message: &str) {
    println!("{} {}", "[ OK ]".green().bold(), message.green());
}

pub fn warn(message: &str) {
    eprintln!("{} {}", "[WARN]".yellow().bold(), message.yellow());
}

pub fn error(message: &str) {
    eprintln!("{} {}", "[ERROR]".red().bold(), message.red());
}

/// Prints a stage banner, e.g. `==> [3/5] Building R 4.4.2`.
pub fn stage(index: usize, total: usize, title: &str) {
    println!("\n{} {}", format!("==> [{}/{}]", index, total).cyan().bold(), title.bold());
}

pub fn spinner(message: impl Into<String>) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.enable_steady_tick(Duration::from_millis(120));
    if let Ok(style) = ProgressStyle::with_template("{spinner:.blue} {elapsed_precise} {msg}") {
        pb.set_style(style);
    }
    pb.set_message(message.into());
    pb
}

pub fn download_bar(total_size: u64) -> ProgressBar {
    let pb = ProgressBar::new(total_size);
    if let Ok(style) = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec})")
    {
        pb.set_style(style.progress_chars("#>-"));
    }
    pb
}
