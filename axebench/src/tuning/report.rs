//! Console formatting of benchmark events and summaries
//!
//! **Purpose:** Render the event stream for the `axebench-run` binary: one
//! line per sample, a block per completed iteration, status and log lines,
//! and the end-of-run summary with the quick-mode refine suggestion.

use axebench_common::events::{
    BenchEvent, BenchmarkSummary, IterationResult, LogLevel, RefineRange, SampleData,
};

const GREEN: &str = "\x1b[92m";
const YELLOW: &str = "\x1b[93m";
const RED: &str = "\x1b[91m";
const RESET: &str = "\x1b[0m";

/// CLI formatter for benchmark output
pub struct CliFormatter;

impl CliFormatter {
    fn paint(color: &str, text: &str) -> String {
        format!("{}{}{}", color, text, RESET)
    }

    /// Render any event as console text, `None` for events with no output
    pub fn format_event(event: &BenchEvent) -> Option<String> {
        match event {
            BenchEvent::SampleProgress {
                sample_number,
                total_samples,
                progress_percent,
                core_voltage,
                frequency,
                sample,
                running_stddev,
                ..
            } => Some(Self::format_sample(
                *sample_number,
                *total_samples,
                *progress_percent,
                *core_voltage,
                *frequency,
                sample,
                *running_stddev,
            )),
            BenchEvent::IterationComplete {
                result,
                iteration_number,
                ..
            } => Some(Self::format_iteration(*iteration_number, result)),
            BenchEvent::StatusChanged { message, .. } => message
                .as_deref()
                .map(|m| Self::paint(YELLOW, m)),
            BenchEvent::BenchmarkComplete(summary) => Some(Self::format_completion(summary)),
            BenchEvent::Error { error, details, .. } => {
                let mut out = Self::paint(RED, &format!("Error: {}", error));
                if let Some(details) = details {
                    out.push('\n');
                    out.push_str(&Self::paint(RED, &format!("  {}", details)));
                }
                Some(out)
            }
            BenchEvent::Log { level, message, .. } => {
                let color = match level {
                    LogLevel::Error => RED,
                    LogLevel::Warning => YELLOW,
                    LogLevel::Info => GREEN,
                };
                Some(Self::paint(color, message))
            }
        }
    }

    /// One sample line
    ///
    /// Example: `[ 3/40]   7.5% | CV: 1150mV | F:  500MHz | H:  500 GH/s | SD:   2 GH/s | IV: 5000mV | T: 55°C`
    pub fn format_sample(
        sample_number: u32,
        total_samples: u32,
        progress_percent: f64,
        core_voltage: u32,
        frequency: u32,
        sample: &SampleData,
        running_stddev: f64,
    ) -> String {
        let mut line = format!(
            "[{:2}/{:2}] {:5.1}% | CV: {:4}mV | F: {:4}MHz | H: {:4} GH/s | SD: {:3.0} GH/s | IV: {:4}mV | T: {:2}°C",
            sample_number,
            total_samples,
            progress_percent,
            core_voltage,
            frequency,
            sample.hashrate as i64,
            running_stddev,
            sample.input_voltage as i64,
            sample.temperature as i64
        );
        if let Some(vr) = sample.vr_temperature.filter(|t| *t > 0.0) {
            line.push_str(&format!(" | VR: {:2}°C", vr as i64));
        }
        line.push_str(&format!(" | P: {:2} W", sample.power as i64));
        if let Some(fan) = sample.fan_speed {
            line.push_str(&format!(" | FAN: {:2}%", fan as i64));
        }
        line
    }

    /// Block printed after each successful iteration
    pub fn format_iteration(iteration_number: u32, result: &IterationResult) -> String {
        let mut lines = vec![
            format!("\nIteration {} complete:", iteration_number),
            format!("  Average Hashrate: {:.2} GH/s", result.average_hashrate),
            format!("  Hashrate Std Dev: {:.2} GH/s", result.hashrate_stddev),
            format!("  Average Temperature: {:.2}°C", result.average_temperature),
        ];
        if let Some(vr) = result.average_vr_temperature {
            lines.push(format!("  Average VR Temp: {:.2}°C", vr));
        }
        lines.push(format!("  Efficiency: {:.2} J/TH", result.efficiency_jth));

        let mut out: String = lines
            .iter()
            .map(|l| Self::paint(GREEN, l))
            .collect::<Vec<_>>()
            .join("\n");
        out.push('\n');
        out
    }

    /// Best and most efficient results as announced on completion
    pub fn format_completion(summary: &BenchmarkSummary) -> String {
        let mut lines = Vec::new();
        if let Some(best) = &summary.best_hashrate {
            lines.push("\n--- Best Hashrate ---".to_string());
            lines.push(Self::operating_point(best));
        }
        if let Some(efficient) = &summary.most_efficient {
            lines.push("\n--- Most Efficient ---".to_string());
            lines.push(Self::operating_point(efficient));
        }
        lines.push(format!(
            "\nTotal duration: {:.1}s",
            summary.total_duration_seconds
        ));

        lines
            .iter()
            .map(|l| Self::paint(GREEN, l))
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn operating_point(result: &IterationResult) -> String {
        format!(
            "  {}mV / {}MHz\n  {:.2} GH/s @ {:.2} J/TH",
            result.core_voltage,
            result.frequency,
            result.average_hashrate,
            result.efficiency_jth
        )
    }

    /// Final summary printed after the results file is written
    pub fn format_summary(summary: &BenchmarkSummary, address: &str) -> String {
        if summary.all_results.is_empty() {
            return Self::paint(YELLOW, "No benchmark results collected");
        }

        let mut out = vec![
            Self::paint(GREEN, "\n--- Summary ---"),
            Self::paint(
                GREEN,
                &format!("Completed {} iterations", summary.all_results.len()),
            ),
        ];

        if let Some(best) = &summary.best_hashrate {
            out.push(Self::paint(
                GREEN,
                &format!(
                    "\nBest Hashrate: {}mV / {}MHz\n  {:.2} GH/s",
                    best.core_voltage, best.frequency, best.average_hashrate
                ),
            ));
        }
        if let Some(efficient) = &summary.most_efficient {
            out.push(Self::paint(
                GREEN,
                &format!(
                    "\nMost Efficient: {}mV / {}MHz\n  {:.2} J/TH",
                    efficient.core_voltage, efficient.frequency, efficient.efficiency_jth
                ),
            ));
        }
        if let Some(range) = &summary.refine_range {
            out.push(Self::paint(YELLOW, &Self::format_refine_suggestion(range, address)));
        }

        out.join("\n")
    }

    /// Quick-mode follow-up, including the command line for a fine sweep
    pub fn format_refine_suggestion(range: &RefineRange, address: &str) -> String {
        format!(
            "\n--- Quick Mode: Refine Suggestion ---\n  Voltage range: {} - {} mV\n  Frequency range: {} - {} MHz\n\nTo refine, run:\n  {}",
            range.voltage_min,
            range.voltage_max,
            range.frequency_min,
            range.frequency_max,
            Self::refine_command(range, address)
        )
    }

    /// `axebench-run` invocation sweeping exactly the refine range
    pub fn refine_command(range: &RefineRange, address: &str) -> String {
        format!(
            "axebench-run {} -v {} -f {} --max-voltage {} --max-frequency {}",
            address, range.voltage_min, range.frequency_min, range.voltage_max, range.frequency_max
        )
    }

    /// Risk notice printed before a sweep
    pub fn disclaimer() -> String {
        format!(
            "{}\n\
             This tool will stress test your Bitaxe by running it at various voltages and frequencies.\n\
             While safeguards are in place, running hardware outside of standard parameters carries inherent risks.\n\
             Use this tool at your own risk. The author(s) are not responsible for any damage to your hardware.\n\
             \nNOTE: Ambient temperature significantly affects these results.\n",
            Self::paint(RED, "\nDISCLAIMER:")
        )
    }
}
