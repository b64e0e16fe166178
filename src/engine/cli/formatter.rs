//! CLI Output Formatting Module
//! Provides consistent, colorized output for terminal UX

use colored::Colorize;

use crate::engine::updater::{DeferredUpdate, Release, UpdateState};

pub struct CliFormatter;

impl CliFormatter {
    /// Print a success message
    pub fn success(message: &str) {
        println!("{} {}", "✓".green().bold(), message);
    }

    /// Print an error message
    pub fn error(message: &str) {
        eprintln!("{} {}", "✗".red().bold(), message);
    }

    /// Print a warning message
    pub fn warning(message: &str) {
        println!("{} {}", "⚠".yellow().bold(), message);
    }

    /// Print an info message
    pub fn info(message: &str) {
        println!("{} {}", "ℹ".blue().bold(), message);
    }

    /// Print a section header
    pub fn header(title: &str) {
        println!("\n{}", title.bright_cyan().bold());
        println!("{}", "─".repeat(title.len()).bright_black());
    }

    /// Print a key-value pair
    pub fn kv(key: &str, value: &str) {
        println!("  {}: {}", key.bright_white().bold(), value);
    }

    /// Print a list item
    pub fn item(text: &str) {
        println!("  {} {}", "•".bright_black(), text);
    }

    /// Print a download progress bar
    pub fn progress(fraction: f64, message: &str) {
        println!("  {} {} {}", "▶".bright_blue(), progress_bar(fraction), message);
    }

    /// Print one state transition
    pub fn state(state: &UpdateState) {
        match state {
            UpdateState::None => Self::item("idle"),
            UpdateState::NewVersionDetected { release, asset } => {
                Self::info(&format!("New version {} ({})", release.tag, asset.name))
            }
            UpdateState::Downloading { fraction, .. } => Self::progress(*fraction, "downloading"),
            UpdateState::Downloaded { release, bundle, .. } => Self::success(&format!(
                "Downloaded {} to {}",
                release.tag,
                bundle.path().display()
            )),
        }
    }

    /// Print a release list
    pub fn releases(releases: &[Release]) {
        for release in releases {
            let mut line = format!("{} {}", release.tag, release.display_name.bright_black());
            if release.is_prerelease {
                line.push_str(&format!(" {}", "prerelease".yellow()));
            }
            Self::item(&line);
            for asset in &release.assets {
                println!("      {}", asset.name.bright_black());
            }
        }
    }

    /// Print a parked update
    pub fn deferred(record: &DeferredUpdate) {
        Self::kv("Version", &record.release_version);
        Self::kv("Release", &record.release_name);
        Self::kv("Asset", &record.asset_name);
        Self::kv("Bundle", &record.bundle_path.display().to_string());
        Self::kv("Downloaded", &record.download_date.to_rfc3339());
    }
}

/// Twenty-cell bar with percentage
pub fn progress_bar(fraction: f64) -> String {
    let percentage = (fraction.clamp(0.0, 1.0) * 100.0).round() as u32;
    let filled = percentage / 5;
    let mut bar = String::from("[");
    for i in 0..20 {
        if i < filled {
            bar.push_str(&"█".bright_green().to_string());
        } else {
            bar.push_str(&"░".bright_black().to_string());
        }
    }
    bar.push_str(&format!("] {}%", percentage));
    bar
}

/// Format duration in human-readable format
pub fn format_duration(seconds: u64) -> String {
    if seconds < 60 {
        format!("{}s", seconds)
    } else if seconds < 3600 {
        format!("{}m {}s", seconds / 60, seconds % 60)
    } else {
        format!("{}h {}m", seconds / 3600, (seconds % 3600) / 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_bar() {
        colored::control::set_override(false);
        assert_eq!(progress_bar(0.5), format!("[{}{}] 50%", "█".repeat(10), "░".repeat(10)));
        assert!(progress_bar(1.7).ends_with("] 100%"));
        assert!(progress_bar(-1.0).ends_with("] 0%"));
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(30), "30s");
        assert_eq!(format_duration(90), "1m 30s");
        assert_eq!(format_duration(86400), "24h 0m");
    }
}
