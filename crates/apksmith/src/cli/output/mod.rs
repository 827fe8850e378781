//! Terminal rendering of signing results

use console::{style, Style};

use apksmith_core::ArtifactKind;
use apksmith_signing::SchemeReport;

pub fn success(message: &str) {
    println!("{} {}", style("✓").green().bold(), message);
}

/// Errors go to stderr so JSON on stdout stays parseable
pub fn error(message: &str) {
    eprintln!("{} {}", style("✗").red().bold(), message);
}

pub fn info(message: &str) {
    println!("{} {}", style("→").blue(), message);
}

/// Bold section title
pub fn header(text: &str) -> String {
    style(text).bold().to_string()
}

/// Indented `key: value` line with a dimmed key
pub fn key_value(key: &str, value: &str) -> String {
    format!("  {}: {}", style(key).dim(), value)
}

/// Style for workspace paths and artifact names
pub fn path_style() -> Style {
    Style::new().cyan()
}

/// Title line of one signing step
pub fn step_header(step: usize, key_store_id: &str, patterns: &str) {
    println!(
        "{} {} ({})",
        header(&format!("Step {step}")),
        key_store_id,
        style(patterns).dim()
    );
}

/// A step that never ran because the build had already failed
pub fn step_skipped() {
    println!(
        "{} {}",
        style("!").yellow().bold(),
        style("skipped, the build has already failed").yellow()
    );
}

/// One produced APK and whether it went to the archive
pub fn artifact(kind: ArtifactKind, name: &str, archived: bool) {
    let kind = match kind {
        ArtifactKind::Signed => style("signed  ").green(),
        ArtifactKind::Unsigned => style("unsigned").dim(),
    };
    let marker = if archived {
        style("archived").green()
    } else {
        style("kept").dim()
    };
    println!(
        "{} {} {} [{}]",
        style("✓").green().bold(),
        kind,
        path_style().apply_to(name),
        marker
    );
}

/// The signer of one signature scheme, or a dimmed line when it is absent
pub fn scheme(name: &str, report: Option<&SchemeReport>) {
    println!();
    match report {
        Some(report) => {
            println!("  {} {}", style("✓").green(), name);
            println!("{}", key_value("  Signer", &report.subject));
            println!("{}", key_value("  SHA-256", &report.fingerprint));
            println!("{}", key_value("  Serial", &report.serial_number));
        }
        None => println!("  {} {}", style("-").dim(), style(name).dim()),
    }
}
