//! Output formatting for CLI

use adsync_core::ads::ScriptLogEntry;
use adsync_core::{ExternalEvent, PlayerSnapshot};
use console::style;
use serde::Serialize;
use tabled::{Table, Tabled};

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
}

impl From<&str> for OutputFormat {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "json" => OutputFormat::Json,
            _ => OutputFormat::Text,
        }
    }
}

/// Format output based on selected format
pub fn format_output<T: Serialize>(data: &T, format: &str) -> String {
    match OutputFormat::from(format) {
        OutputFormat::Json => {
            serde_json::to_string_pretty(data).unwrap_or_else(|_| "{}".to_string())
        }
        OutputFormat::Text => {
            let value = serde_json::to_value(data).unwrap_or_default();
            match value.as_object() {
                Some(fields) => {
                    let rows: Vec<FieldRow> = fields
                        .iter()
                        .map(|(field, value)| FieldRow {
                            field: field.clone(),
                            value: value.to_string(),
                        })
                        .collect();
                    Table::new(rows).to_string()
                }
                None => value.to_string(),
            }
        }
    }
}

#[derive(Tabled)]
struct FieldRow {
    field: String,
    value: String,
}

#[derive(Tabled)]
struct LogRow {
    #[tabled(rename = "#")]
    index: usize,
    #[tabled(rename = "ad service")]
    entry: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Summary<'a> {
    elapsed_ms: u64,
    ad_service_log: Vec<String>,
    player: &'a PlayerSnapshot,
}

/// Streams sink records to stdout
#[derive(Debug)]
pub struct EventPrinter {
    format: OutputFormat,
    printed: usize,
}

impl EventPrinter {
    pub fn new(format: OutputFormat) -> Self {
        Self { format, printed: 0 }
    }

    pub fn print(&mut self, elapsed_ms: u64, event: &ExternalEvent) {
        self.printed += 1;
        match self.format {
            OutputFormat::Json => {
                if let Ok(line) = serde_json::to_string(event) {
                    println!("{line}");
                }
            }
            OutputFormat::Text => {
                let clock = format!("[{:>8.3}s]", elapsed_ms as f64 / 1000.0);
                println!(
                    "{} {:>4} {:<22} {}",
                    style(clock).dim(),
                    event.sequence,
                    style(&event.name).cyan().bold(),
                    event.payload
                );
            }
        }
    }

    pub fn summary(&self, elapsed_ms: u64, log: &[ScriptLogEntry], snapshot: &PlayerSnapshot) {
        let entries: Vec<String> = log.iter().map(|entry| format!("{entry:?}")).collect();
        match self.format {
            OutputFormat::Json => {
                let summary = Summary {
                    elapsed_ms,
                    ad_service_log: entries,
                    player: snapshot,
                };
                if let Ok(line) = serde_json::to_string(&summary) {
                    println!("{line}");
                }
            }
            OutputFormat::Text => {
                println!();
                println!(
                    "{} {} events over {:.3}s of simulated playback",
                    style("Session complete:").green().bold(),
                    self.printed,
                    elapsed_ms as f64 / 1000.0
                );
                let rows: Vec<LogRow> = entries
                    .into_iter()
                    .enumerate()
                    .map(|(i, entry)| LogRow { index: i + 1, entry })
                    .collect();
                println!("{}", Table::new(rows));
                println!("{}", format_output(snapshot, "text"));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use adsync_core::PlayerConfig;

    #[test]
    fn test_format_parsing() {
        assert_eq!(OutputFormat::from("JSON"), OutputFormat::Json);
        assert_eq!(OutputFormat::from("table"), OutputFormat::Text);
    }

    #[test]
    fn test_json_config_output() {
        let rendered = format_output(&PlayerConfig::default(), "json");
        let value: serde_json::Value = serde_json::from_str(&rendered).unwrap();
        assert_eq!(value["ad_progress_interval_ms"], 250);
    }

    #[test]
    fn test_text_output_lists_fields() {
        let rendered = format_output(&PlayerConfig::default(), "text");
        assert!(rendered.contains("play_when_ready"));
        assert!(rendered.contains("initial_volume"));
    }
}
