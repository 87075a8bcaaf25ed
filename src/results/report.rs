//! Report rendering
//!
//! Renders an aggregated report as HTML, plain text or Markdown. Output
//! depends only on the aggregated inputs.

use super::aggregate::{AggregatedReport, UnitOutcome};
use super::event_report::ReportEvent;
use crate::models::TestStatus;

/// Report format
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReportFormat {
    Text,
    Markdown,
    Html,
}

impl ReportFormat {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "text" | "txt" => Some(ReportFormat::Text),
            "markdown" | "md" => Some(ReportFormat::Markdown),
            "html" => Some(ReportFormat::Html),
            _ => None,
        }
    }
}

/// Render the report in the given format
pub fn render(report: &AggregatedReport, format: ReportFormat) -> String {
    let outcomes = report.unit_outcomes();
    match format {
        ReportFormat::Text => format_text_report(report, &outcomes),
        ReportFormat::Markdown => format_markdown_report(report, &outcomes),
        ReportFormat::Html => format_html_report(report, &outcomes),
    }
}

fn pass_rate(report: &AggregatedReport) -> f64 {
    let (passed, failed, skipped, errors) = report.counts();
    let total = passed + failed + skipped + errors;
    if total == 0 {
        0.0
    } else {
        passed as f64 / total as f64 * 100.0
    }
}

fn format_text_report(report: &AggregatedReport, outcomes: &[UnitOutcome]) -> String {
    let (passed, failed, skipped, errors) = report.counts();
    let mut output = String::new();

    output.push_str(&format!("\n{:=^70}\n\n", " Test Report "));
    output.push_str(&format!("Runs: {}\n", report.runs.len()));
    output.push_str(&format!("Events: {}\n", report.event_count()));
    output.push_str(&format!(
        "Passed: {passed} | Failed: {failed} | Skipped: {skipped} | Errors: {errors}\n"
    ));
    output.push_str(&format!("Pass Rate: {:.1}%\n\n", pass_rate(report)));

    output.push_str(&format!("{:-^70}\n", " Units "));
    output.push_str(&format!(
        "{:<40} {:>6} {:>8} {:>10}\n",
        "Unit", "Status", "Attempts", "Duration"
    ));
    for outcome in outcomes {
        let flaky = if outcome.is_flaky() { " (flaky)" } else { "" };
        output.push_str(&format!(
            "{:<40} {:>6} {:>8} {:>8}ms{}\n",
            truncate(&outcome.unit_id, 40),
            outcome.status.to_string(),
            outcome.attempts,
            outcome.total_duration_ms,
            flaky
        ));
    }

    let failures: Vec<_> = outcomes.iter().filter(|o| o.status.is_failure()).collect();
    if !failures.is_empty() {
        output.push_str(&format!("\n{:-^70}\n", " Failures "));
        for outcome in failures {
            output.push_str(&format!(
                "{}: {}\n",
                outcome.unit_id,
                outcome.message.as_deref().unwrap_or("no message")
            ));
        }
    }

    if !report.skipped.is_empty() {
        output.push_str(&format!(
            "\nRun directories without report: {}\n",
            report.skipped.join(", ")
        ));
    }

    output
}

fn format_markdown_report(report: &AggregatedReport, outcomes: &[UnitOutcome]) -> String {
    let (passed, failed, skipped, errors) = report.counts();
    let mut output = String::from("# Test Report\n\n## Summary\n\n");

    output.push_str("| Metric | Value |\n|--------|-------|\n");
    output.push_str(&format!("| Runs | {} |\n", report.runs.len()));
    output.push_str(&format!("| Passed | {passed} |\n"));
    output.push_str(&format!("| Failed | {failed} |\n"));
    output.push_str(&format!("| Skipped | {skipped} |\n"));
    output.push_str(&format!("| Errors | {errors} |\n"));
    output.push_str(&format!("| Pass Rate | {:.1}% |\n\n", pass_rate(report)));

    output.push_str("## Units\n\n");
    output.push_str("| Unit | Status | Attempts | Duration | Executor |\n");
    output.push_str("|------|--------|----------|----------|----------|\n");
    for outcome in outcomes {
        output.push_str(&format!(
            "| `{}` | {} {} | {} | {}ms | {} |\n",
            outcome.unit_id,
            outcome.status.symbol(),
            outcome.status,
            outcome.attempts,
            outcome.total_duration_ms,
            outcome.executor
        ));
    }

    output
}

fn format_html_report(report: &AggregatedReport, outcomes: &[UnitOutcome]) -> String {
    let (passed, failed, skipped, errors) = report.counts();
    let mut output = String::new();

    output.push_str(&format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>Test Report</title>
    <style>
        body {{ font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif; margin: 40px; background: #f5f5f5; }}
        .container {{ max-width: 1200px; margin: 0 auto; background: white; padding: 40px; border-radius: 8px; box-shadow: 0 2px 4px rgba(0,0,0,0.1); }}
        h1 {{ color: #333; border-bottom: 2px solid #007bff; padding-bottom: 10px; }}
        h2 {{ color: #555; margin-top: 30px; }}
        table {{ width: 100%; border-collapse: collapse; margin: 20px 0; }}
        th, td {{ padding: 12px; text-align: left; border-bottom: 1px solid #ddd; vertical-align: top; }}
        th {{ background: #007bff; color: white; }}
        tr:hover {{ background: #f8f9fa; }}
        pre {{ margin: 0; white-space: pre-wrap; font-size: 12px; }}
        .pass {{ color: #28a745; font-weight: bold; }}
        .fail {{ color: #dc3545; font-weight: bold; }}
        .skip {{ color: #856404; font-weight: bold; }}
        .stat-card {{ display: inline-block; background: #f8f9fa; padding: 20px; margin: 10px; border-radius: 8px; min-width: 150px; text-align: center; }}
        .stat-value {{ font-size: 24px; font-weight: bold; color: #007bff; }}
        .stat-label {{ color: #666; font-size: 14px; }}
    </style>
</head>
<body>
    <div class="container">
        <h1>Test Report</h1>

        <h2>Summary</h2>
        <div class="stat-card">
            <div class="stat-value">{:.1}%</div>
            <div class="stat-label">Pass Rate</div>
        </div>
        <div class="stat-card">
            <div class="stat-value">{}</div>
            <div class="stat-label">Passed</div>
        </div>
        <div class="stat-card">
            <div class="stat-value">{}</div>
            <div class="stat-label">Failed</div>
        </div>
        <div class="stat-card">
            <div class="stat-value">{}</div>
            <div class="stat-label">Skipped</div>
        </div>
        <div class="stat-card">
            <div class="stat-value">{}</div>
            <div class="stat-label">Runs</div>
        </div>
"#,
        pass_rate(report),
        passed,
        failed + errors,
        skipped,
        report.runs.len()
    ));

    output.push_str(
        r#"
        <h2>Units</h2>
        <table>
            <tr>
                <th>Unit</th>
                <th>Status</th>
                <th>Attempts</th>
                <th>Duration</th>
                <th>Executor</th>
                <th>Message</th>
            </tr>
"#,
    );
    for outcome in outcomes {
        output.push_str(&format!(
            r#"            <tr>
                <td title="{}">{}</td>
                <td class="{}">{}{}</td>
                <td>{}</td>
                <td>{}ms</td>
                <td>{}</td>
                <td><pre>{}</pre></td>
            </tr>
"#,
            escape_html(&outcome.unit_id),
            escape_html(&outcome.name),
            status_class(outcome.status),
            outcome.status,
            if outcome.is_flaky() { " (flaky)" } else { "" },
            outcome.attempts,
            outcome.total_duration_ms,
            escape_html(&outcome.executor),
            escape_html(outcome.message.as_deref().unwrap_or(""))
        ));
    }
    output.push_str("        </table>\n");

    output.push_str(
        r#"
        <h2>Runs</h2>
        <table>
            <tr>
                <th>Run</th>
                <th>Unit</th>
                <th>Attempt</th>
                <th>Status</th>
                <th>Duration</th>
            </tr>
"#,
    );
    for run in &report.runs {
        for event in &run.events {
            if let ReportEvent::Finished {
                unit_id,
                attempt,
                status,
                duration_ms,
                ..
            } = event
            {
                output.push_str(&format!(
                    "            <tr><td>{}</td><td>{}</td><td>{}</td><td class=\"{}\">{}</td><td>{}ms</td></tr>\n",
                    escape_html(&run.run),
                    escape_html(unit_id),
                    attempt,
                    status_class(*status),
                    status,
                    duration_ms
                ));
            }
        }
    }
    output.push_str("        </table>\n");

    if !report.skipped.is_empty() {
        output.push_str(&format!(
            "        <p>Run directories without report: {}</p>\n",
            escape_html(&report.skipped.join(", "))
        ));
    }

    output.push_str("    </div>\n</body>\n</html>\n");
    output
}

fn status_class(status: TestStatus) -> &'static str {
    match status {
        TestStatus::Pass => "pass",
        TestStatus::Fail | TestStatus::Error => "fail",
        TestStatus::Skip => "skip",
    }
}

fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len - 3).collect();
        format!("{kept}...")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AttemptResult, TestUnit};
    use crate::results::EventReport;

    fn report() -> AggregatedReport {
        let units = vec![TestUnit::new("a.ATest", vec![]), TestUnit::new("a.BTest", vec![])];
        AggregatedReport {
            runs: vec![
                EventReport::from_results(
                    "junit-1",
                    &units,
                    &[
                        AttemptResult::pass("a.ATest", 3),
                        AttemptResult::fail("a.BTest", 4, "expected <true>"),
                    ],
                ),
                EventReport::from_results("junit-2", &units, &[AttemptResult::fail("a.BTest", 4, "again").with_attempt(2)]),
            ],
            skipped: vec!["junit-3".to_string()],
        }
    }

    #[test]
    fn test_report_format() {
        assert_eq!(ReportFormat::from_str("text"), Some(ReportFormat::Text));
        assert_eq!(ReportFormat::from_str("md"), Some(ReportFormat::Markdown));
        assert_eq!(ReportFormat::from_str("HTML"), Some(ReportFormat::Html));
        assert!(ReportFormat::from_str("unknown").is_none());
    }

    #[test]
    fn test_html_report() {
        let html = render(&report(), ReportFormat::Html);
        assert!(html.starts_with("<!DOCTYPE html>"));
        assert!(html.contains("expected &lt;true&gt;"));
        assert!(html.contains("<td>junit-2</td>"));
        assert!(html.contains("junit-3"));
        assert!(html.trim_end().ends_with("</html>"));
    }

    #[test]
    fn test_text_and_markdown_reports() {
        let text = render(&report(), ReportFormat::Text);
        assert!(text.contains("Passed: 1 | Failed: 1"));
        assert!(text.contains("a.BTest: again"));

        let markdown = render(&report(), ReportFormat::Markdown);
        assert!(markdown.starts_with("# Test Report"));
        assert!(markdown.contains("| `a.ATest` |"));
    }

    #[test]
    fn test_empty_report() {
        let html = render(&AggregatedReport::default(), ReportFormat::Html);
        assert!(html.contains("0.0%"));
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("a-very-long-unit-name", 10), "a-very-...");
    }
}
