//! Overall completion, derived purely from step statuses.

use serde::Serialize;

use payrun_types::StepStatus;

use crate::run::StepState;

/// Percentage of steps that are `done`, rounded half-up.
///
/// Clamped to 99 until the run is complete, so that a run paused on its
/// final step (for review or an external confirmation) never reports 100.
pub fn overall_progress(steps: &[StepState], is_complete: bool) -> u8 {
    if is_complete {
        return 100;
    }
    let total = steps.len();
    if total == 0 {
        return 0;
    }
    let done = steps.iter().filter(|s| s.status == StepStatus::Done).count();
    let percent = (200 * done + total) / (2 * total);
    percent.min(99) as u8
}

/// Per-status step counts for rendering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ProgressSummary {
    pub pending: usize,
    pub in_progress: usize,
    pub done: usize,
    pub flagged: usize,
    pub total: usize,
    pub percent: u8,
}

impl ProgressSummary {
    pub fn of(steps: &[StepState], is_complete: bool) -> Self {
        let mut summary = ProgressSummary {
            total: steps.len(),
            percent: overall_progress(steps, is_complete),
            ..Default::default()
        };
        for step in steps {
            match step.status {
                StepStatus::Pending => summary.pending += 1,
                StepStatus::InProgress => summary.in_progress += 1,
                StepStatus::Done => summary.done += 1,
                StepStatus::Flagged => summary.flagged += 1,
            }
        }
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::StepDefinition;

    fn steps_with(statuses: &[StepStatus]) -> Vec<StepState> {
        statuses
            .iter()
            .enumerate()
            .map(|(i, status)| {
                let mut s = StepState::from_definition(&StepDefinition::new(
                    format!("s{i}"),
                    format!("Step {i}"),
                ));
                s.status = *status;
                s
            })
            .collect()
    }

    #[test]
    fn empty_run_is_zero() {
        assert_eq!(overall_progress(&[], false), 0);
    }

    #[test]
    fn one_of_nine_rounds_to_eleven() {
        let mut statuses = vec![StepStatus::Pending; 9];
        statuses[0] = StepStatus::Done;
        assert_eq!(overall_progress(&steps_with(&statuses), false), 11);
    }

    #[test]
    fn rounds_half_up() {
        // 1 of 8 = 12.5
        let mut statuses = vec![StepStatus::Pending; 8];
        statuses[0] = StepStatus::Done;
        assert_eq!(overall_progress(&steps_with(&statuses), false), 13);
    }

    #[test]
    fn flagged_and_in_progress_do_not_count() {
        let statuses = [
            StepStatus::Done,
            StepStatus::Flagged,
            StepStatus::Pending,
            StepStatus::Pending,
        ];
        assert_eq!(overall_progress(&steps_with(&statuses), false), 25);
    }

    #[test]
    fn all_done_but_incomplete_is_capped() {
        let steps = steps_with(&[StepStatus::Done; 9]);
        assert_eq!(overall_progress(&steps, false), 99);
        assert_eq!(overall_progress(&steps, true), 100);
    }

    #[test]
    fn summary_counts_each_status() {
        let steps = steps_with(&[
            StepStatus::Done,
            StepStatus::Done,
            StepStatus::Flagged,
            StepStatus::Pending,
        ]);
        let summary = ProgressSummary::of(&steps, false);
        assert_eq!(summary.done, 2);
        assert_eq!(summary.flagged, 1);
        assert_eq!(summary.pending, 1);
        assert_eq!(summary.in_progress, 0);
        assert_eq!(summary.total, 4);
        assert_eq!(summary.percent, 50);
    }
}
