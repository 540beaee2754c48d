//! Sweep planning and trial decisions
//!
//! **Purpose:** The pure parts of the two-level search: step sizes, the
//! voltage ladder, the next-trial decision after each result, result ranking,
//! the quick-mode refine range and the settings left on the device at the end.
//!
//! **Algorithm:** Voltage is the outer axis, frequency the inner one:
//! - Each voltage level restarts at the initial frequency
//! - A good, in-tolerance trial raises frequency by one step
//! - A good trial below tolerance ends the level
//! - Overheating at the initial frequency ends the whole sweep
//! - Any other failure ends the level

use crate::device::DeviceCapabilities;
use axebench_common::config::{IncrementsConfig, SafetyConfig};
use axebench_common::events::{
    AppliedSettings, IterationResult, RefineRange, SweepMode, TrialError,
};

/// Run-scoped sweep geometry, derived once before the first trial
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SweepPlan {
    pub initial_voltage: u32,
    pub initial_frequency: u32,
    /// Effective voltage step (mode multiplier applied)
    pub voltage_step: u32,
    /// Effective frequency step (mode multiplier applied)
    pub frequency_step: u32,
    /// Inclusive voltage ceiling for this run
    pub max_voltage: u32,
    /// Inclusive frequency ceiling for this run
    pub max_frequency: u32,
    /// Voltage levels in ascending order, never empty
    pub voltage_ladder: Vec<u32>,
}

impl SweepPlan {
    /// Build the plan for one run
    ///
    /// Requested ceilings are clamped to the global bounds. The starting
    /// point must already be validated against the bounds.
    ///
    /// # Arguments
    /// - `safety`, `increments`: Configuration snapshot for the run
    /// - `mode`: Full (configured steps) or quick (4× steps)
    /// - `initial_voltage`, `initial_frequency`: Starting operating point
    /// - `max_voltage`, `max_frequency`: Optional per-run ceilings
    pub fn new(
        safety: &SafetyConfig,
        increments: &IncrementsConfig,
        mode: SweepMode,
        initial_voltage: u32,
        initial_frequency: u32,
        max_voltage: Option<u32>,
        max_frequency: Option<u32>,
    ) -> Self {
        let (voltage_step, frequency_step) = effective_increments(increments, mode);
        let max_voltage = sweep_ceiling(max_voltage, safety.max_allowed_voltage);
        let max_frequency = sweep_ceiling(max_frequency, safety.max_allowed_frequency);

        Self {
            initial_voltage,
            initial_frequency,
            voltage_step,
            frequency_step,
            max_voltage,
            max_frequency,
            voltage_ladder: voltage_ladder(initial_voltage, max_voltage, voltage_step),
        }
    }

    pub fn total_voltage_steps(&self) -> usize {
        self.voltage_ladder.len()
    }
}

/// Configured increments scaled by the mode multiplier
pub fn effective_increments(increments: &IncrementsConfig, mode: SweepMode) -> (u32, u32) {
    let m = mode.step_multiplier();
    (
        increments.voltage_increment * m,
        increments.frequency_increment * m,
    )
}

/// `min(requested or global, global)`
pub fn sweep_ceiling(requested: Option<u32>, global: u32) -> u32 {
    requested.unwrap_or(global).min(global)
}

/// Every level from `start` to `ceiling` inclusive, stepped by `step`
///
/// Returns `[start]` when no level fits (ceiling below start).
pub fn voltage_ladder(start: u32, ceiling: u32, step: u32) -> Vec<u32> {
    let step = step.max(1) as usize;
    let ladder: Vec<u32> = (start..=ceiling).step_by(step).collect();
    if ladder.is_empty() {
        vec![start]
    } else {
        ladder
    }
}

/// What the sweep does after a trial
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextStep {
    /// Stay at this voltage, try the next frequency
    RaiseFrequency,
    /// End this voltage level
    NextVoltage,
    /// Thermal wall at the baseline: stop the whole sweep
    AbortSweep,
}

/// Decide the next trial from the last result
///
/// # Arguments
/// - `result`: Outcome of the trial just run
/// - `initial_frequency`: The run's starting frequency
pub fn decide(result: &IterationResult, initial_frequency: u32) -> NextStep {
    match result.error_reason {
        None if result.hashrate_within_tolerance => NextStep::RaiseFrequency,
        None => NextStep::NextVoltage,
        Some(TrialError::ChipTempExceeded) if result.frequency == initial_frequency => {
            NextStep::AbortSweep
        }
        Some(
            TrialError::ChipTempExceeded
            | TrialError::SystemInfoFailure
            | TrialError::TemperatureDataFailure
            | TrialError::TemperatureBelow5
            | TrialError::VrTempExceeded
            | TrialError::InputVoltageBelowMin
            | TrialError::InputVoltageAboveMax
            | TrialError::HashratePowerDataFailure
            | TrialError::PowerConsumptionExceeded
            | TrialError::NoDataCollected
            | TrialError::ZeroHashrate,
        ) => NextStep::NextVoltage,
    }
}

/// Highest average hashrate among successful results (first wins ties)
pub fn best_by_hashrate(results: &[IterationResult]) -> Option<&IterationResult> {
    results
        .iter()
        .filter(|r| r.is_success())
        .reduce(|best, r| {
            if r.average_hashrate > best.average_hashrate {
                r
            } else {
                best
            }
        })
}

/// Lowest J/TH among successful results (first wins ties)
pub fn most_efficient(results: &[IterationResult]) -> Option<&IterationResult> {
    results
        .iter()
        .filter(|r| r.is_success())
        .reduce(|best, r| {
            if r.efficiency_jth < best.efficiency_jth {
                r
            } else {
                best
            }
        })
}

/// Successful results ranked by hashrate, highest first
pub fn top_by_hashrate(results: &[IterationResult], n: usize) -> Vec<IterationResult> {
    let mut ranked: Vec<IterationResult> =
        results.iter().filter(|r| r.is_success()).cloned().collect();
    ranked.sort_by(|a, b| b.average_hashrate.total_cmp(&a.average_hashrate));
    ranked.truncate(n);
    ranked
}

/// Successful results ranked by efficiency, lowest J/TH first
pub fn top_by_efficiency(results: &[IterationResult], n: usize) -> Vec<IterationResult> {
    let mut ranked: Vec<IterationResult> =
        results.iter().filter(|r| r.is_success()).cloned().collect();
    ranked.sort_by(|a, b| a.efficiency_jth.total_cmp(&b.efficiency_jth));
    ranked.truncate(n);
    ranked
}

/// Window of one step around `best`, clamped to the global bounds
pub fn refine_range(
    best: &IterationResult,
    voltage_step: u32,
    frequency_step: u32,
    safety: &SafetyConfig,
) -> RefineRange {
    RefineRange {
        voltage_min: best
            .core_voltage
            .saturating_sub(voltage_step)
            .max(safety.min_allowed_voltage),
        voltage_max: (best.core_voltage + voltage_step).min(safety.max_allowed_voltage),
        frequency_min: best
            .frequency
            .saturating_sub(frequency_step)
            .max(safety.min_allowed_frequency),
        frequency_max: (best.frequency + frequency_step).min(safety.max_allowed_frequency),
    }
}

/// Settings written to the device when a run ends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalSettings {
    /// Best-by-hashrate result
    ApplyBest(AppliedSettings),
    /// No successful result: back to the device's own defaults
    RestoreDefaults { voltage: u32, frequency: u32 },
}

impl FinalSettings {
    pub fn choose(results: &[IterationResult], capabilities: &DeviceCapabilities) -> Self {
        match best_by_hashrate(results) {
            Some(best) => FinalSettings::ApplyBest(AppliedSettings {
                voltage: best.core_voltage,
                frequency: best.frequency,
            }),
            None => FinalSettings::RestoreDefaults {
                voltage: capabilities.default_voltage,
                frequency: capabilities.default_frequency,
            },
        }
    }

    pub fn point(&self) -> (u32, u32) {
        match self {
            FinalSettings::ApplyBest(s) => (s.voltage, s.frequency),
            FinalSettings::RestoreDefaults { voltage, frequency } => (*voltage, *frequency),
        }
    }

    /// Settings reported in the summary (only when the best result was applied)
    pub fn applied(&self) -> Option<AppliedSettings> {
        match self {
            FinalSettings::ApplyBest(s) => Some(*s),
            FinalSettings::RestoreDefaults { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok(voltage: u32, frequency: u32, hashrate: f64, efficiency: f64) -> IterationResult {
        IterationResult {
            core_voltage: voltage,
            frequency,
            average_hashrate: hashrate,
            hashrate_stddev: 1.0,
            average_temperature: 55.0,
            average_vr_temperature: None,
            average_power: 15.0,
            average_fan_speed: None,
            efficiency_jth: efficiency,
            hashrate_within_tolerance: true,
            error_reason: None,
        }
    }

    #[test]
    fn test_voltage_ladder() {
        assert_eq!(voltage_ladder(1150, 1180, 15), vec![1150, 1165, 1180]);
        // Ceiling not on a step boundary
        assert_eq!(voltage_ladder(1150, 1190, 15), vec![1150, 1165, 1180]);
        // Empty range collapses to the start voltage
        assert_eq!(voltage_ladder(1200, 1100, 15), vec![1200]);
        assert_eq!(voltage_ladder(1200, 1200, 60), vec![1200]);
    }

    #[test]
    fn test_effective_increments_and_ceiling() {
        let inc = IncrementsConfig::default();
        assert_eq!(effective_increments(&inc, SweepMode::FullSweep), (15, 20));
        assert_eq!(effective_increments(&inc, SweepMode::Quick), (60, 80));

        assert_eq!(sweep_ceiling(None, 1400), 1400);
        assert_eq!(sweep_ceiling(Some(1250), 1400), 1250);
        assert_eq!(sweep_ceiling(Some(1500), 1400), 1400);
    }

    #[test]
    fn test_plan_quick_mode() {
        let plan = SweepPlan::new(
            &SafetyConfig::default(),
            &IncrementsConfig::default(),
            SweepMode::Quick,
            1150,
            500,
            Some(1300),
            None,
        );
        assert_eq!(plan.voltage_ladder, vec![1150, 1210, 1270]);
        assert_eq!(plan.frequency_step, 80);
        assert_eq!(plan.max_frequency, 1200);
        assert_eq!(plan.total_voltage_steps(), 3);
    }

    #[test]
    fn test_decide_branches() {
        let good = ok(1150, 500, 500.0, 20.0);
        assert_eq!(decide(&good, 500), NextStep::RaiseFrequency);

        let mut slow = good.clone();
        slow.hashrate_within_tolerance = false;
        assert_eq!(decide(&slow, 500), NextStep::NextVoltage);

        // Thermal wall at baseline frequency aborts everything
        let hot = IterationResult::failed(1150, 500, TrialError::ChipTempExceeded);
        assert_eq!(decide(&hot, 500), NextStep::AbortSweep);

        // Overheating above baseline only ends the level
        let hot_high = IterationResult::failed(1150, 520, TrialError::ChipTempExceeded);
        assert_eq!(decide(&hot_high, 500), NextStep::NextVoltage);

        let power = IterationResult::failed(1150, 500, TrialError::PowerConsumptionExceeded);
        assert_eq!(decide(&power, 500), NextStep::NextVoltage);
    }

    #[test]
    fn test_best_and_most_efficient_are_independent() {
        let results = vec![
            ok(1150, 500, 500.0, 18.0),
            ok(1200, 600, 610.0, 21.0),
            ok(1165, 520, 530.0, 17.5),
        ];

        let best = best_by_hashrate(&results).unwrap();
        assert_eq!((best.core_voltage, best.frequency), (1200, 600));

        let efficient = most_efficient(&results).unwrap();
        assert_eq!((efficient.core_voltage, efficient.frequency), (1165, 520));

        let top = top_by_hashrate(&results, 2);
        assert_eq!(top.len(), 2);
        assert_eq!(top[0].average_hashrate, 610.0);
        assert_eq!(top[1].average_hashrate, 530.0);

        let eff = top_by_efficiency(&results, 5);
        assert_eq!(eff.len(), 3);
        assert_eq!(eff[0].efficiency_jth, 17.5);
    }

    #[test]
    fn test_best_ignores_failed_results_and_prefers_first_on_tie() {
        let results = vec![
            IterationResult::failed(1150, 500, TrialError::NoDataCollected),
            ok(1150, 520, 520.0, 20.0),
            ok(1165, 520, 520.0, 19.0),
        ];
        let best = best_by_hashrate(&results).unwrap();
        assert_eq!(best.core_voltage, 1150);
        assert_eq!(best_by_hashrate(&results[..1]), None);
    }

    #[test]
    fn test_refine_range() {
        let best = ok(1200, 600, 650.0, 19.0);
        let range = refine_range(&best, 60, 80, &SafetyConfig::default());
        assert_eq!(
            range,
            RefineRange {
                voltage_min: 1140,
                voltage_max: 1260,
                frequency_min: 520,
                frequency_max: 680,
            }
        );

        // Clamped at the global bounds
        let edge = ok(1380, 1180, 900.0, 19.0);
        let range = refine_range(&edge, 60, 80, &SafetyConfig::default());
        assert_eq!(range.voltage_max, 1400);
        assert_eq!(range.frequency_max, 1200);

        let low = ok(1020, 420, 300.0, 19.0);
        let range = refine_range(&low, 60, 80, &SafetyConfig::default());
        assert_eq!(range.voltage_min, 1000);
        assert_eq!(range.frequency_min, 400);
    }

    #[test]
    fn test_final_settings() {
        let caps = crate::device::mock::default_capabilities();

        assert_eq!(
            FinalSettings::choose(&[], &caps),
            FinalSettings::RestoreDefaults {
                voltage: 1150,
                frequency: 500
            }
        );
        assert_eq!(FinalSettings::choose(&[], &caps).applied(), None);

        let results = vec![ok(1150, 500, 500.0, 18.0), ok(1165, 540, 540.0, 19.0)];
        let chosen = FinalSettings::choose(&results, &caps);
        assert_eq!(chosen.point(), (1165, 540));
        assert_eq!(
            chosen.applied(),
            Some(AppliedSettings {
                voltage: 1165,
                frequency: 540
            })
        );
    }
}
