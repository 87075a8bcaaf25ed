//! Console formatters for run results
//!
//! Table, JSON, CSV and one-line summary renderings of verdicts, run
//! summaries, the unit list and the selection history.

use crate::models::{RunSummary, TestStatus, TestUnit, UnitVerdict};
use crate::selection::SelectionHistory;

/// Output format options
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    Table,
    Json,
    JsonPretty,
    Csv,
    Summary,
}

impl OutputFormat {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "table" => Some(OutputFormat::Table),
            "json" => Some(OutputFormat::Json),
            "json-pretty" | "jsonpretty" => Some(OutputFormat::JsonPretty),
            "csv" => Some(OutputFormat::Csv),
            "summary" => Some(OutputFormat::Summary),
            _ => None,
        }
    }
}

/// Result formatter
pub struct ResultFormatter {
    format: OutputFormat,
    colorize: bool,
}

impl ResultFormatter {
    pub fn new(format: OutputFormat) -> Self {
        Self {
            format,
            colorize: true,
        }
    }

    pub fn no_color(mut self) -> Self {
        self.colorize = false;
        self
    }

    fn json<T: serde::Serialize>(&self, value: &T) -> String {
        let rendered = if self.format == OutputFormat::JsonPretty {
            serde_json::to_string_pretty(value)
        } else {
            serde_json::to_string(value)
        };
        rendered.unwrap_or_default()
    }

    fn status_label(&self, status: TestStatus) -> String {
        let label = format!("{} {}", status.symbol(), status);
        if !self.colorize {
            return label;
        }
        let color = match status {
            TestStatus::Pass => "32",
            TestStatus::Skip => "33",
            TestStatus::Fail | TestStatus::Error => "31",
        };
        format!("\x1b[{color}m{label}\x1b[0m")
    }

    fn format_verdict_row(&self, verdict: &UnitVerdict) -> String {
        let flaky = if verdict.is_flaky() { " flaky" } else { "" };
        format!(
            "{:<44} {} [{:>7}ms] attempts={}{}",
            verdict.unit_id,
            self.status_label(verdict.status),
            verdict.total_duration_ms(),
            verdict.attempts.len(),
            flaky
        )
    }

    /// Format the run summary
    pub fn format_summary(&self, summary: &RunSummary) -> String {
        match self.format {
            OutputFormat::Table => self.format_summary_table(summary),
            OutputFormat::Json | OutputFormat::JsonPretty => self.json(summary),
            OutputFormat::Csv => {
                let mut output = String::from("unit_id,status,attempts,duration_ms,flaky,message\n");
                for verdict in &summary.verdicts {
                    output.push_str(&format_verdict_csv(verdict));
                    output.push('\n');
                }
                output
            }
            OutputFormat::Summary => format!(
                "{}/{} passed ({:.1}%), {} flaky, {} retried in {}ms",
                summary.passed,
                summary.total,
                summary.pass_rate(),
                summary.flaky,
                summary.retried,
                summary.total_duration_ms
            ),
        }
    }

    fn format_summary_table(&self, summary: &RunSummary) -> String {
        let mut output = String::new();

        output.push_str("\n╔══════════════════════════════════════════════════════════════════════╗\n");
        output.push_str(&format!("║  {:<68}║\n", "Test Run"));
        output.push_str("╠══════════════════════════════════════════════════════════════════════╣\n");

        for verdict in &summary.verdicts {
            output.push_str(&format!("  {}\n", self.format_verdict_row(verdict)));
            if verdict.status.is_failure() {
                if let Some(message) = verdict.last_message() {
                    let first_line = message.lines().next().unwrap_or_default();
                    output.push_str(&format!("      {first_line}\n"));
                }
            }
        }

        output.push_str("╠══════════════════════════════════════════════════════════════════════╣\n");

        let failed = summary.failed + summary.errors;
        let fail_str = if self.colorize && failed > 0 {
            format!("\x1b[31m{failed}\x1b[0m")
        } else {
            failed.to_string()
        };
        output.push_str(&format!(
            "  Total: {} | Pass: {} | Fail: {} | Skip: {} | Flaky: {} | Retried: {}\n",
            summary.total, summary.passed, fail_str, summary.skipped, summary.flaky, summary.retried
        ));
        output.push_str(&format!(
            "  Pass Rate: {:5.1}% | Duration: {}ms\n",
            summary.pass_rate(),
            summary.total_duration_ms
        ));
        output.push_str("╚══════════════════════════════════════════════════════════════════════╝\n");

        output
    }

    /// Format discovered units
    pub fn format_units(&self, units: &[TestUnit], detailed: bool) -> String {
        match self.format {
            OutputFormat::Json | OutputFormat::JsonPretty => self.json(&units),
            OutputFormat::Csv => {
                let mut output = String::from("id,class_name,method,disabled,command\n");
                for unit in units {
                    output.push_str(&format!(
                        "{},{},{},{},\"{}\"\n",
                        unit.id,
                        unit.class_name,
                        unit.method.as_deref().unwrap_or(""),
                        unit.disabled,
                        unit.command.join(" ").replace('"', "\"\"")
                    ));
                }
                output
            }
            OutputFormat::Summary => format!("{} units", units.len()),
            OutputFormat::Table => {
                let mut output = format!("\n{} test units:\n\n", units.len());
                for unit in units {
                    let disabled = if unit.disabled { " (disabled)" } else { "" };
                    output.push_str(&format!("  {}{}\n", unit.id, disabled));
                    if detailed {
                        output.push_str(&format!("      command: {}\n", unit.command.join(" ")));
                        if !unit.tags.is_empty() {
                            output.push_str(&format!("      tags:    {}\n", unit.tags.join(", ")));
                        }
                        if !unit.sources.is_empty() {
                            output.push_str(&format!("      sources: {}\n", unit.sources.join(", ")));
                        }
                    }
                }
                output
            }
        }
    }

    /// Format the selection history
    pub fn format_history(&self, history: &SelectionHistory) -> String {
        match self.format {
            OutputFormat::Json | OutputFormat::JsonPretty => self.json(history),
            OutputFormat::Summary => format!(
                "{} units tracked, {} flaky, last run {}",
                history.units.len(),
                history.flaky_units().len(),
                history.last_run_id.as_deref().unwrap_or("none")
            ),
            OutputFormat::Csv => {
                let mut output = String::from("unit_id,runs,failures,flaky,last_status\n");
                for (id, unit) in &history.units {
                    output.push_str(&format!(
                        "{},{},{},{},{}\n",
                        id, unit.runs, unit.failures, unit.flaky, unit.last_status
                    ));
                }
                output
            }
            OutputFormat::Table => {
                let mut output = format!(
                    "\n{:<44} {:>5} {:>8} {:>6} {:>9}  {}\n",
                    "Unit", "Runs", "Failures", "Flaky", "Fail rate", "Last"
                );
                output.push_str(&format!("{}\n", "-".repeat(86)));
                for (id, unit) in &history.units {
                    output.push_str(&format!(
                        "{:<44} {:>5} {:>8} {:>6} {:>8.1}%  {}\n",
                        id,
                        unit.runs,
                        unit.failures,
                        unit.flaky,
                        unit.failure_rate() * 100.0,
                        self.status_label(unit.last_status)
                    ));
                }
                if let Some(selection) = &history.last_selection {
                    output.push_str(&format!("\nLast predictive selection: {} units\n", selection.len()));
                }
                output
            }
        }
    }
}

fn format_verdict_csv(verdict: &UnitVerdict) -> String {
    format!(
        "{},{},{},{},{},\"{}\"",
        verdict.unit_id,
        verdict.status,
        verdict.attempts.len(),
        verdict.total_duration_ms(),
        verdict.is_flaky(),
        verdict.last_message().unwrap_or("").replace('"', "\"\"")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AttemptResult;

    fn summary() -> RunSummary {
        RunSummary::new(vec![
            UnitVerdict::from_attempts("a.ATest", vec![AttemptResult::pass("a.ATest", 10)]),
            UnitVerdict::from_attempts(
                "a.BTest",
                vec![
                    AttemptResult::fail("a.BTest", 5, "said \"no\""),
                    AttemptResult::pass("a.BTest", 6).with_attempt(2),
                ],
            ),
        ])
    }

    #[test]
    fn test_output_format_from_str() {
        assert_eq!(OutputFormat::from_str("table"), Some(OutputFormat::Table));
        assert_eq!(OutputFormat::from_str("JSON-PRETTY"), Some(OutputFormat::JsonPretty));
        assert_eq!(OutputFormat::from_str("xml"), None);
    }

    #[test]
    fn test_table_summary() {
        let output = ResultFormatter::new(OutputFormat::Table)
            .no_color()
            .format_summary(&summary());
        assert!(output.contains("Total: 2 | Pass: 2 | Fail: 0"));
        assert!(output.contains("Flaky: 1"));
        assert!(!output.contains("\x1b["));
    }

    #[test]
    fn test_csv_escapes_messages() {
        let output = ResultFormatter::new(OutputFormat::Csv).format_summary(&summary());
        let lines: Vec<_> = output.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "unit_id,status,attempts,duration_ms,flaky,message");
        assert!(lines[2].starts_with("a.BTest,PASS,2,11,true,"));
    }

    #[test]
    fn test_json_summary() {
        let output = ResultFormatter::new(OutputFormat::Json).format_summary(&summary());
        let value: serde_json::Value = serde_json::from_str(&output).unwrap();
        assert_eq!(value["passed"], 2);
        assert_eq!(value["flaky"], 1);
    }

    #[test]
    fn test_format_units() {
        let units = vec![
            TestUnit::new("a.ATest", vec!["true".into()]),
            TestUnit::new("a.BTest", vec!["false".into()]).disabled(),
        ];
        let output = ResultFormatter::new(OutputFormat::Table).format_units(&units, true);
        assert!(output.contains("2 test units"));
        assert!(output.contains("a.BTest (disabled)"));
        assert!(output.contains("command: false"));
    }
}
