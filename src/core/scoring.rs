//! Wellness score computation.
//!
//! All functions here are pure. Every score is clamped into `[0, 100]`;
//! out-of-range or non-finite intermediate values never surface as errors.

use crate::bias::BiasTerms;
use crate::core::aggregators::MotionSnapshot;
use serde::{Deserialize, Serialize};

/// Resting gravity magnitude (m/s²) subtracted from accelerometer RMS.
pub const GRAVITY: f64 = 9.8;

/// Accelerometer RMS jump that counts as a shock.
pub const ACC_SHOCK_THRESHOLD: f64 = 3.0;

/// Gyroscope RMS jump that counts as a shock.
pub const GYRO_SHOCK_THRESHOLD: f64 = 1.2;

/// Shocks within one window needed to trigger the tension bonus.
pub const SHOCK_COUNT_TRIGGER: usize = 5;

/// Tension added when either shock window is saturated.
pub const SHOCK_BONUS: f64 = 40.0;

const SCORE_MIN: f64 = 0.0;
const SCORE_MAX: f64 = 100.0;

const STRESS_HR_BASELINE: f64 = 65.0;
const STRESS_HR_WEIGHT: f64 = 0.7;
const STRESS_STILLNESS_BONUS: f64 = 3.0;
const STRESS_DARKNESS_BONUS: f64 = 2.0;
const DARKNESS_LUX: f64 = 100.0;

const TENSION_HR_BASELINE: f64 = 70.0;
const TENSION_HR_WEIGHT: f64 = 0.2;
const TENSION_ACC_WEIGHT: f64 = 1.2;
const TENSION_GYRO_WEIGHT: f64 = 0.9;

const ACTIVITY_STEP_WEIGHT: f64 = 8.0;
const ACTIVITY_MOVEMENT_WEIGHT: f64 = 10.0;
const ACTIVITY_STEP_DETECTED_BONUS: f64 = 30.0;

const TOTAL_HR_WEIGHT: f64 = 0.3;
const TOTAL_STRESS_WEIGHT: f64 = 0.3;
const TOTAL_TENSION_WEIGHT: f64 = 0.4;

const HR_FLOOR: f64 = 30.0;
const HR_CEIL: f64 = 180.0;

/// Everything the scoring functions read for one tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoreInputs {
    /// Latest heart rate, 0 when the sensor never reported
    pub heart_rate: f64,
    /// Latest ambient light, 0 when the sensor never reported
    pub light: f64,
    /// Whether a step was detected within the hold window
    pub step_detected: bool,
    /// Non-negative step counter delta
    pub step_delta: u64,
    pub motion: MotionSnapshot,
}

/// The four derived scores.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scores {
    pub stress: u8,
    pub tension: u8,
    pub activity: u8,
    pub total: u8,
}

/// Compute all four scores for one tick.
pub fn compute_scores(inputs: &ScoreInputs, bias: &BiasTerms) -> Scores {
    let stress = calc_stress(
        inputs.heart_rate,
        inputs.step_detected,
        inputs.light,
        bias.stress,
    );
    let tension = calc_tension(
        inputs.heart_rate,
        inputs.motion.delta_acc,
        inputs.motion.delta_gyro,
        inputs.motion.shock_bonus,
        bias.tension,
    );
    let activity = calc_activity(
        inputs.step_delta,
        inputs.motion.avg_acc_rms.unwrap_or(GRAVITY),
        inputs.step_detected,
        bias.activity,
    );
    let total = calc_total(
        inputs.heart_rate + f64::from(bias.heart_rate),
        stress,
        tension,
    );

    Scores {
        stress,
        tension,
        activity,
        total,
    }
}

pub fn calc_stress(heart_rate: f64, step_detected: bool, light: f64, bias: i32) -> u8 {
    let mut score = ((heart_rate - STRESS_HR_BASELINE) * STRESS_HR_WEIGHT).max(0.0);
    if !step_detected {
        score += STRESS_STILLNESS_BONUS;
    }
    if light < DARKNESS_LUX {
        score += STRESS_DARKNESS_BONUS;
    }
    score += f64::from(bias);
    to_score(score)
}

pub fn calc_tension(
    heart_rate: f64,
    delta_acc: f64,
    delta_gyro: f64,
    shock_bonus: bool,
    bias: i32,
) -> u8 {
    let hr_factor = ((heart_rate - TENSION_HR_BASELINE) * TENSION_HR_WEIGHT).max(0.0);
    let change_factor = delta_acc * TENSION_ACC_WEIGHT + delta_gyro * TENSION_GYRO_WEIGHT;
    let mut score = hr_factor + change_factor + f64::from(bias);
    if shock_bonus {
        score += SHOCK_BONUS;
    }
    to_score(score)
}

pub fn calc_activity(step_delta: u64, avg_acc_rms: f64, step_detected: bool, bias: i32) -> u8 {
    let movement = (avg_acc_rms - GRAVITY).max(0.0) * ACTIVITY_MOVEMENT_WEIGHT;
    let mut score = step_delta as f64 * ACTIVITY_STEP_WEIGHT + movement + f64::from(bias);
    if step_detected {
        score += ACTIVITY_STEP_DETECTED_BONUS;
    }
    to_score(score)
}

/// Weighted blend of normalized heart rate, stress and tension, rounded.
pub fn calc_total(heart_rate: f64, stress: u8, tension: u8) -> u8 {
    let total = TOTAL_HR_WEIGHT * normalize_heart_rate(heart_rate)
        + TOTAL_STRESS_WEIGHT * f64::from(stress)
        + TOTAL_TENSION_WEIGHT * f64::from(tension);
    to_score(total.round())
}

/// Map a heart rate onto `[0, 100]` linearly between 30 and 180 bpm.
pub fn normalize_heart_rate(heart_rate: f64) -> f64 {
    if heart_rate.is_nan() {
        return SCORE_MIN;
    }
    let clipped = heart_rate.clamp(HR_FLOOR, HR_CEIL);
    (clipped - HR_FLOOR) / (HR_CEIL - HR_FLOOR) * SCORE_MAX
}

/// Root-mean-square of a sample vector. Empty vectors have RMS 0.
pub fn rms(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mean_square = values.iter().map(|v| v * v).sum::<f64>() / values.len() as f64;
    mean_square.sqrt()
}

/// Clamp into the score range and truncate toward zero.
fn to_score(value: f64) -> u8 {
    if value.is_nan() {
        return 0;
    }
    value.clamp(SCORE_MIN, SCORE_MAX) as u8
}
