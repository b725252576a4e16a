//! Step catalogue validation: lint rules and diagnostics.
//!
//! Call [`validate`] for advisory diagnostics or [`validate_or_raise`] to fail
//! on the first `Error`-level issue. Catalogue lint is separate from the
//! per-employee data-quality flags raised while a run is processing.

use std::collections::HashSet;

use payrun_types::{PayrunError, Result};

use crate::registry::StepDefinition;

// ---------------------------------------------------------------------------
// Diagnostic types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub rule: String,
    pub level: DiagnosticLevel,
    pub message: String,
    pub step_id: Option<String>,
    pub fix: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticLevel {
    Error,
    Warning,
}

// ---------------------------------------------------------------------------
// LintRule trait
// ---------------------------------------------------------------------------

pub trait LintRule: Send + Sync {
    fn name(&self) -> &str;
    fn apply(&self, steps: &[StepDefinition]) -> Vec<Diagnostic>;
}

fn diagnostic(
    rule: &dyn LintRule,
    level: DiagnosticLevel,
    step: Option<&StepDefinition>,
    message: String,
    fix: &str,
) -> Diagnostic {
    Diagnostic {
        rule: rule.name().into(),
        level,
        message,
        step_id: step.map(|s| s.id.clone()),
        fix: Some(fix.into()),
    }
}

// ---------------------------------------------------------------------------
// Rules
// ---------------------------------------------------------------------------

struct NonEmptyRule;
impl LintRule for NonEmptyRule {
    fn name(&self) -> &str { "non_empty" }
    fn apply(&self, steps: &[StepDefinition]) -> Vec<Diagnostic> {
        if steps.is_empty() {
            vec![diagnostic(
                self,
                DiagnosticLevel::Error,
                None,
                "Catalogue has no steps".into(),
                "Define at least one step",
            )]
        } else {
            vec![]
        }
    }
}

struct UniqueIdsRule;
impl LintRule for UniqueIdsRule {
    fn name(&self) -> &str { "unique_ids" }
    fn apply(&self, steps: &[StepDefinition]) -> Vec<Diagnostic> {
        let mut seen = HashSet::new();
        steps
            .iter()
            .filter(|s| !seen.insert(s.id.as_str()))
            .map(|s| {
                diagnostic(
                    self,
                    DiagnosticLevel::Error,
                    Some(s),
                    format!("Step id '{}' is used more than once", s.id),
                    "Give every step a distinct id",
                )
            })
            .collect()
    }
}

struct NamedStepsRule;
impl LintRule for NamedStepsRule {
    fn name(&self) -> &str { "named_steps" }
    fn apply(&self, steps: &[StepDefinition]) -> Vec<Diagnostic> {
        steps
            .iter()
            .filter(|s| s.id.trim().is_empty() || s.name.trim().is_empty())
            .map(|s| {
                diagnostic(
                    self,
                    DiagnosticLevel::Error,
                    Some(s),
                    format!("Step '{}' has an empty id or name", s.id),
                    "Set both `id` and `name`",
                )
            })
            .collect()
    }
}

struct ReportTitleRule;
impl LintRule for ReportTitleRule {
    fn name(&self) -> &str { "report_title" }
    fn apply(&self, steps: &[StepDefinition]) -> Vec<Diagnostic> {
        steps
            .iter()
            .filter(|s| s.downloadable && s.report_title.is_none())
            .map(|s| {
                diagnostic(
                    self,
                    DiagnosticLevel::Error,
                    Some(s),
                    format!("Step '{}' is downloadable but has no report title", s.id),
                    "Add `report_title` or clear `downloadable`",
                )
            })
            .collect()
    }
}

struct ConfirmationCheckpointRule;
impl LintRule for ConfirmationCheckpointRule {
    fn name(&self) -> &str { "confirmation_checkpoint" }
    fn apply(&self, steps: &[StepDefinition]) -> Vec<Diagnostic> {
        steps
            .iter()
            .filter(|s| s.requires_confirmation && !s.checkpoint)
            .map(|s| {
                diagnostic(
                    self,
                    DiagnosticLevel::Error,
                    Some(s),
                    format!(
                        "Step '{}' requires confirmation but is not a checkpoint",
                        s.id
                    ),
                    "Set `checkpoint: true` on confirmation steps",
                )
            })
            .collect()
    }
}

struct ConfirmationLastRule;
impl LintRule for ConfirmationLastRule {
    fn name(&self) -> &str { "confirmation_last" }
    fn apply(&self, steps: &[StepDefinition]) -> Vec<Diagnostic> {
        let last = steps.len().saturating_sub(1);
        steps
            .iter()
            .enumerate()
            .filter(|(i, s)| s.requires_confirmation && *i != last)
            .map(|(_, s)| {
                diagnostic(
                    self,
                    DiagnosticLevel::Warning,
                    Some(s),
                    format!(
                        "Step '{}' requires confirmation; later steps only run once the approval hub re-enters the run",
                        s.id
                    ),
                    "Move the confirmation step to the end of the catalogue",
                )
            })
            .collect()
    }
}

struct ValidationTargetRule;
impl LintRule for ValidationTargetRule {
    fn name(&self) -> &str { "validation_target" }
    fn apply(&self, steps: &[StepDefinition]) -> Vec<Diagnostic> {
        steps
            .iter()
            .filter(|s| s.validation.is_some() && s.target_page.is_none())
            .map(|s| {
                diagnostic(
                    self,
                    DiagnosticLevel::Warning,
                    Some(s),
                    format!(
                        "Step '{}' can be flagged but has no remediation target page",
                        s.id
                    ),
                    "Set `target_page` so flagged issues offer a remediation shortcut",
                )
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

fn built_in_rules() -> Vec<Box<dyn LintRule>> {
    vec![
        Box::new(NonEmptyRule),
        Box::new(UniqueIdsRule),
        Box::new(NamedStepsRule),
        Box::new(ReportTitleRule),
        Box::new(ConfirmationCheckpointRule),
        Box::new(ConfirmationLastRule),
        Box::new(ValidationTargetRule),
    ]
}

/// Run all built-in lint rules against a step catalogue.
pub fn validate(steps: &[StepDefinition]) -> Vec<Diagnostic> {
    built_in_rules()
        .iter()
        .flat_map(|rule| rule.apply(steps))
        .collect()
}

/// Validate and return `Err` if any `Error`-level diagnostic is found.
/// Warnings are returned in the `Ok` variant.
pub fn validate_or_raise(steps: &[StepDefinition]) -> Result<Vec<Diagnostic>> {
    let diagnostics = validate(steps);
    let errors: Vec<_> = diagnostics
        .iter()
        .filter(|d| d.level == DiagnosticLevel::Error)
        .collect();
    if !errors.is_empty() {
        let messages: Vec<_> = errors.iter().map(|d| d.message.as_str()).collect();
        return Err(PayrunError::Catalogue(messages.join("; ")));
    }
    for warning in &diagnostics {
        tracing::warn!(rule = %warning.rule, "{}", warning.message);
    }
    Ok(diagnostics)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{StepRegistry, ValidationKind};
    use payrun_types::TargetPage;

    fn rules_hit(steps: &[StepDefinition]) -> Vec<String> {
        validate(steps).into_iter().map(|d| d.rule).collect()
    }

    #[test]
    fn default_catalogue_is_clean() {
        let steps: Vec<_> = StepRegistry::payroll_default().iter().cloned().collect();
        assert!(validate(&steps).is_empty());
    }

    #[test]
    fn empty_catalogue_is_an_error() {
        let diags = validate(&[]);
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].rule, "non_empty");
        assert_eq!(diags[0].level, DiagnosticLevel::Error);
    }

    #[test]
    fn duplicate_ids_are_reported_once_per_repeat() {
        let steps = vec![
            StepDefinition::new("a", "A"),
            StepDefinition::new("a", "A again"),
            StepDefinition::new("a", "A thrice"),
        ];
        let hits: Vec<_> = rules_hit(&steps)
            .into_iter()
            .filter(|r| r == "unique_ids")
            .collect();
        assert_eq!(hits.len(), 2);
    }

    #[test]
    fn blank_name_is_an_error() {
        let steps = vec![StepDefinition::new("a", "  ")];
        assert_eq!(rules_hit(&steps), vec!["named_steps"]);
    }

    #[test]
    fn downloadable_without_title_is_an_error() {
        let mut step = StepDefinition::new("a", "A");
        step.downloadable = true;
        let diags = validate(&[step]);
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].rule, "report_title");
        assert_eq!(diags[0].step_id.as_deref(), Some("a"));
    }

    #[test]
    fn confirmation_without_checkpoint_is_an_error() {
        let steps = vec![StepDefinition::new("bank", "Bank").requires_confirmation()];
        assert_eq!(rules_hit(&steps), vec!["confirmation_checkpoint"]);
    }

    #[test]
    fn confirmation_not_last_is_a_warning() {
        let steps = vec![
            StepDefinition::new("bank", "Bank")
                .checkpoint()
                .requires_confirmation(),
            StepDefinition::new("journal", "Journal"),
        ];
        let diags = validate(&steps);
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].rule, "confirmation_last");
        assert_eq!(diags[0].level, DiagnosticLevel::Warning);
        assert!(validate_or_raise(&steps).is_ok());
    }

    #[test]
    fn validated_step_without_target_is_a_warning() {
        let steps = vec![StepDefinition::new("check", "Check")
            .validated_by(ValidationKind::PreProcessing)];
        let diags = validate(&steps);
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].rule, "validation_target");

        let fixed = vec![StepDefinition::new("check", "Check")
            .validated_by(ValidationKind::PreProcessing)
            .target(TargetPage::Employees)];
        assert!(validate(&fixed).is_empty());
    }

    #[test]
    fn validate_or_raise_joins_error_messages() {
        let steps = vec![
            StepDefinition::new("a", "A"),
            StepDefinition::new("a", ""),
        ];
        match validate_or_raise(&steps) {
            Err(PayrunError::Catalogue(msg)) => {
                assert!(msg.contains("more than once"), "got: {msg}");
                assert!(msg.contains("empty id or name"), "got: {msg}");
            }
            other => panic!("expected Catalogue error, got {other:?}"),
        }
    }
}
