//! Spaced-repetition state machine.
//!
//! Pure functions of `(state, grade, config, now)` — no hidden shared state,
//! fully deterministic. Stages move New → Learning → Review, with failed
//! reviews dropping into Relearning. Suspension freezes a state verbatim and
//! unsuspension restores it exactly; elapsed suspended time is deliberately
//! neither penalized nor credited.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::cards::{CardState, Grade, Stage};

/// Interval growth factors per passing grade.
const HARD_FACTOR: f64 = 1.2;
const GOOD_FACTOR: f64 = 2.5;
const EASY_FACTOR: f64 = 3.25;

/// Retention the growth factors are calibrated for.
const BASE_RETENTION: f64 = 0.9;

/// Scheduling configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SchedulerConfig {
    /// Learning step ladder in minutes; empty means new cards graduate
    /// straight to review.
    pub learning_steps_minutes: Vec<u32>,
    /// Relearning step ladder in minutes after a lapse.
    pub relearning_steps_minutes: Vec<u32>,
    /// First review interval after graduating the learning steps.
    pub graduating_interval_days: u32,
    /// First review interval when graduating with an Easy grade.
    pub easy_interval_days: u32,
    /// Target recall probability; lower targets stretch intervals.
    pub desired_retention: f64,
    pub maximum_interval_days: u32,
    /// Review interval a card restarts with after a lapse.
    pub lapse_interval_days: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            learning_steps_minutes: vec![1, 10],
            relearning_steps_minutes: vec![10],
            graduating_interval_days: 1,
            easy_interval_days: 4,
            desired_retention: 0.9,
            maximum_interval_days: 36500,
            lapse_interval_days: 1,
        }
    }
}

/// Apply one grade to a card's state, returning the next state.
pub fn apply_grade(
    state: &CardState,
    grade: Grade,
    config: &SchedulerConfig,
    now: DateTime<Utc>,
) -> CardState {
    let mut next = state.clone();

    match state.stage {
        // Grading a suspended card is a no-op; callers unsuspend first.
        Stage::Suspended => next,
        Stage::New => {
            if grade.is_pass() {
                advance_learning(&mut next, 1, grade, config, now);
            } else {
                enter_learning(&mut next, &config.learning_steps_minutes, now);
            }
            next
        }
        Stage::Learning => {
            if grade.is_pass() {
                let step = state.learning_step_index + 1;
                advance_learning(&mut next, step, grade, config, now);
            } else {
                enter_learning(&mut next, &config.learning_steps_minutes, now);
            }
            next
        }
        Stage::Review => {
            if grade.is_pass() {
                next.scheduled_days = next_review_interval(state.scheduled_days, grade, config);
                next.due = now + Duration::days(next.scheduled_days as i64);
                next.reps += 1;
            } else {
                next.lapses += 1;
                next.scheduled_days = config.lapse_interval_days;
                next.stage = Stage::Relearning;
                next.learning_step_index = 0;
                next.due = now + step_duration(&config.relearning_steps_minutes, 0);
            }
            next
        }
        Stage::Relearning => {
            if grade.is_pass() {
                let step = state.learning_step_index + 1;
                if step as usize >= config.relearning_steps_minutes.len() {
                    // All relearn steps passed; resume spaced scheduling.
                    next.stage = Stage::Review;
                    next.learning_step_index = 0;
                    next.scheduled_days = state.scheduled_days.max(1);
                    next.due = now + Duration::days(next.scheduled_days as i64);
                } else {
                    next.learning_step_index = step;
                    next.due = now + step_duration(&config.relearning_steps_minutes, step);
                }
            } else {
                next.learning_step_index = 0;
                next.due = now + step_duration(&config.relearning_steps_minutes, 0);
            }
            next
        }
    }
}

/// Move to learning step `step`, graduating to review past the last step.
fn advance_learning(
    next: &mut CardState,
    step: u32,
    grade: Grade,
    config: &SchedulerConfig,
    now: DateTime<Utc>,
) {
    if step as usize >= config.learning_steps_minutes.len() {
        next.stage = Stage::Review;
        next.learning_step_index = 0;
        next.scheduled_days = if grade == Grade::Easy {
            config.easy_interval_days
        } else {
            config.graduating_interval_days
        }
        .max(1);
        next.due = now + Duration::days(next.scheduled_days as i64);
        next.reps += 1;
    } else {
        next.stage = Stage::Learning;
        next.learning_step_index = step;
        next.due = now + step_duration(&config.learning_steps_minutes, step);
    }
}

/// (Re)enter learning at step 0 after a failing grade.
fn enter_learning(next: &mut CardState, steps: &[u32], now: DateTime<Utc>) {
    next.stage = Stage::Learning;
    next.learning_step_index = 0;
    next.due = now + step_duration(steps, 0);
}

fn step_duration(steps: &[u32], index: u32) -> Duration {
    let minutes = steps.get(index as usize).copied().unwrap_or(1);
    Duration::minutes(minutes as i64)
}

/// Next review interval after a pass. Never shrinks: growth is at least one
/// day over the prior interval, capped at the configured maximum. A maximum
/// lowered below the current interval holds the interval where it is rather
/// than shrinking it.
fn next_review_interval(prior_days: u32, grade: Grade, config: &SchedulerConfig) -> u32 {
    let factor = match grade {
        Grade::Again => return prior_days, // not reached; passes only
        Grade::Hard => HARD_FACTOR,
        Grade::Good => GOOD_FACTOR,
        Grade::Easy => EASY_FACTOR,
    };
    let retention = config.desired_retention.clamp(0.5, 0.99);
    let grown = (prior_days.max(1) as f64 * factor * (BASE_RETENTION / retention)).round() as u32;
    grown
        .max(prior_days + 1)
        .min(config.maximum_interval_days.max(prior_days))
}

/// Freeze a state; all scheduling fields are preserved for restoration.
pub fn suspend(state: &CardState) -> CardState {
    if state.stage == Stage::Suspended {
        return state.clone();
    }
    let mut next = state.clone();
    next.suspended_from = Some(state.stage);
    next.stage = Stage::Suspended;
    next
}

/// Restore a suspended state exactly as it was before suspension.
pub fn unsuspend(state: &CardState) -> CardState {
    match state.suspended_from {
        Some(stage) if state.stage == Stage::Suspended => {
            let mut next = state.clone();
            next.stage = stage;
            next.suspended_from = None;
            next
        }
        _ => state.clone(),
    }
}

/// Force-reset to new-card defaults, preserving only the id.
pub fn reset_scheduling(state: &CardState, now: DateTime<Utc>) -> CardState {
    CardState::new(state.id.clone(), now)
}
