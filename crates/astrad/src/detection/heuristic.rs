//! Rule-based fallback detector over power, thermal and attitude readings

use super::ports::HeuristicFallback;
use astra_common::{Features, HeuristicConfig};

const NOMINAL_VOLTAGE: f64 = 8.0;
const NOMINAL_TEMPERATURE: f64 = 25.0;

const VOLTAGE_WEIGHT: f64 = 0.4;
const TEMPERATURE_WEIGHT: f64 = 0.3;
const GYRO_WEIGHT: f64 = 0.3;
const INVALID_READING_WEIGHT: f64 = 0.5;

/// Conservative threshold rules; a missing reading is treated as nominal
#[derive(Debug, Clone, Default)]
pub struct ThresholdHeuristic {
    limits: HeuristicConfig,
}

impl ThresholdHeuristic {
    pub fn new(limits: HeuristicConfig) -> Self {
        Self { limits }
    }

    /// Summed rule score in [0, 1]
    pub fn score(&self, features: &Features) -> f64 {
        let voltage = features.get("voltage").unwrap_or(NOMINAL_VOLTAGE);
        let temperature = features.get("temperature").unwrap_or(NOMINAL_TEMPERATURE);
        let gyro = features.get("gyro").unwrap_or(0.0).abs();

        let mut score = 0.0;
        let mut invalid = false;

        if voltage.is_finite() {
            if voltage < self.limits.voltage_min || voltage > self.limits.voltage_max {
                score += VOLTAGE_WEIGHT;
            }
        } else {
            invalid = true;
        }

        if temperature.is_finite() {
            if temperature > self.limits.temperature_max {
                score += TEMPERATURE_WEIGHT;
            }
        } else {
            invalid = true;
        }

        if gyro.is_finite() {
            if gyro > self.limits.gyro_max {
                score += GYRO_WEIGHT;
            }
        } else {
            invalid = true;
        }

        if invalid {
            score += INVALID_READING_WEIGHT;
        }

        score.min(1.0)
    }

    /// Name of the subsystem whose reading breaks its limit by the widest
    /// relative margin, if any does
    pub fn dominant_violation(&self, features: &Features) -> Option<&'static str> {
        let l = &self.limits;
        let mut candidates = Vec::with_capacity(3);

        if let Some(v) = features.get("voltage").filter(|v| v.is_finite()) {
            let span = (l.voltage_max - l.voltage_min).abs().max(f64::EPSILON);
            if v < l.voltage_min {
                candidates.push(("power_fault", (l.voltage_min - v) / span));
            } else if v > l.voltage_max {
                candidates.push(("power_fault", (v - l.voltage_max) / span));
            }
        }
        if let Some(t) = features.get("temperature").filter(|t| t.is_finite()) {
            if t > l.temperature_max {
                candidates.push(("thermal_fault", (t - l.temperature_max) / l.temperature_max.abs().max(1.0)));
            }
        }
        if let Some(g) = features.get("gyro").map(f64::abs).filter(|g| g.is_finite()) {
            if g > l.gyro_max {
                candidates.push(("attitude_fault", (g - l.gyro_max) / l.gyro_max.abs().max(f64::EPSILON)));
            }
        }

        candidates
            .into_iter()
            .max_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(name, _)| name)
    }
}

impl HeuristicFallback for ThresholdHeuristic {
    fn evaluate(&self, features: &Features) -> (bool, f64) {
        let score = self.score(features);
        (score > self.limits.anomaly_threshold, score)
    }
}
