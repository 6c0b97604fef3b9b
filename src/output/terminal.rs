//! Terminal output formatting with colors.

use colored::Colorize;

use crate::report::RunReport;

/// Format a RunReport for human-readable terminal output.
///
/// The histogram block keeps the classic `ns < N = count` lines, one per
/// bucket, so existing scripts that scrape it keep working.
pub fn format_report(report: &RunReport) -> String {
    let mut output = String::new();
    let sep = "\u{2500}".repeat(62);

    output.push_str("ipistorm\n");
    output.push_str(&sep);
    output.push('\n');
    output.push('\n');

    output.push_str(&format!(
        "  CPU{} -> CPU{} ({}, {} invoker, {} clock)\n",
        report.source,
        report.target,
        report.completion,
        report.metadata.invoker,
        report.metadata.clock
    ));
    output.push_str(&format!(
        "  {} IPIs completed in {:.2} s\n",
        report.iterations, report.metadata.elapsed_secs
    ));
    if report.metadata.delay_us > 0 {
        output.push_str(&format!("  Delay: {} us between calls\n", report.metadata.delay_us));
    }
    output.push('\n');

    match &report.latency {
        Some(latency) => {
            output.push_str(&format!(
                "  {}\n",
                format!(
                    "min={}ns max={}ns avg={}ns",
                    latency.min_ns, latency.max_ns, latency.avg_ns
                )
                .bold()
            ));
        }
        None => {
            output.push_str(&format!("  {}\n", "no samples".yellow().bold()));
        }
    }

    if report.is_posted() {
        output.push('\n');
        output.push_str(&format!(
            "  {}\n",
            "\u{26A0} Posted mode: latencies time the send only and may be stale"
                .yellow()
                .bold()
        ));
    }

    if report.metadata.undelivered > 0 {
        output.push('\n');
        output.push_str(&format!(
            "  {}\n",
            format!(
                "\u{26A0} {} calls found no receiver; their samples time nothing",
                report.metadata.undelivered
            )
            .red()
            .bold()
        ));
    }

    output.push('\n');
    output.push_str("  Histogram:\n");
    for (label, count) in report.histogram.iter() {
        output.push_str(&format!("    ns < {} = {}\n", label, count));
    }

    if !report.warnings.is_empty() {
        output.push('\n');
        output.push_str(&format!("  {}\n", "System warnings:".yellow()));
        for warning in &report.warnings {
            output.push_str(&format!("    - {}\n", warning.description()));
        }
    }

    output.push('\n');
    output.push_str(&sep);
    output.push('\n');

    output
}
