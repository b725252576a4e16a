//! Step definitions and the immutable, ordered step catalogue.

use std::path::Path;

use serde::{Deserialize, Serialize};

use payrun_types::{PayrunError, Result, TargetPage};

use crate::validation::validate_or_raise;

/// Which validation policy is permitted to flag a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationKind {
    PreProcessing,
    VariablePay,
    VoluntaryDeductions,
}

/// Static metadata for one pipeline step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepDefinition {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub checkpoint: bool,
    #[serde(default)]
    pub downloadable: bool,
    #[serde(default)]
    pub report_title: Option<String>,
    #[serde(default)]
    pub requires_confirmation: bool,
    #[serde(default)]
    pub target_page: Option<TargetPage>,
    #[serde(default)]
    pub validation: Option<ValidationKind>,
}

impl StepDefinition {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            checkpoint: false,
            downloadable: false,
            report_title: None,
            requires_confirmation: false,
            target_page: None,
            validation: None,
        }
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn checkpoint(mut self) -> Self {
        self.checkpoint = true;
        self
    }

    /// Mark the step downloadable with the given report title.
    pub fn report(mut self, title: impl Into<String>) -> Self {
        self.downloadable = true;
        self.report_title = Some(title.into());
        self
    }

    pub fn requires_confirmation(mut self) -> Self {
        self.requires_confirmation = true;
        self
    }

    pub fn target(mut self, page: TargetPage) -> Self {
        self.target_page = Some(page);
        self
    }

    pub fn validated_by(mut self, kind: ValidationKind) -> Self {
        self.validation = Some(kind);
        self
    }
}

/// Fixed-length, ordered catalogue of pipeline steps. Never mutated after
/// construction.
#[derive(Debug, Clone)]
pub struct StepRegistry {
    steps: Vec<StepDefinition>,
}

impl StepRegistry {
    /// Build a registry, rejecting catalogues with lint errors.
    pub fn from_definitions(steps: Vec<StepDefinition>) -> Result<Self> {
        validate_or_raise(&steps)?;
        Ok(Self { steps })
    }

    /// Load a catalogue from a JSON array of step definitions.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        let steps: Vec<StepDefinition> = serde_json::from_str(&data)?;
        tracing::debug!(path = %path.display(), steps = steps.len(), "Loaded step catalogue");
        Self::from_definitions(steps)
    }

    /// The standard nine-step UK payroll run.
    pub fn payroll_default() -> Self {
        use TargetPage::*;
        use ValidationKind::*;

        let steps = vec![
            StepDefinition::new("pre_processing", "Pre-processing validation")
                .describe("Check employee records for missing statutory and banking details")
                .target(Employees)
                .validated_by(PreProcessing),
            StepDefinition::new("timesheet_import", "Import timesheets")
                .describe("Pull approved hours for the pay period")
                .target(Timesheets),
            StepDefinition::new("variable_pay", "Variable pay import")
                .describe("Import overtime, bonuses and commission")
                .target(Timesheets)
                .validated_by(VariablePay),
            StepDefinition::new("statutory_payments", "Statutory payments")
                .describe("Calculate SSP, SMP and other statutory pay")
                .target(Payroll),
            StepDefinition::new("voluntary_deductions", "Voluntary deductions")
                .describe("Apply salary sacrifice, union fees and other voluntary deductions")
                .target(Employees)
                .validated_by(VoluntaryDeductions),
            StepDefinition::new("gross_to_net", "Gross to net calculation")
                .describe("Calculate tax, NI and net pay for every employee")
                .checkpoint()
                .report("Payroll Summary Report")
                .target(Payroll),
            StepDefinition::new("pensions", "Pension contributions")
                .describe("Calculate auto-enrolment contributions")
                .report("Pension Contribution Schedule")
                .target(Settings),
            StepDefinition::new("rti_submission", "RTI submission preparation")
                .describe("Prepare the Full Payment Submission for HMRC")
                .report("FPS Summary")
                .target(Settings),
            StepDefinition::new("banking_integration", "Banking and accounting integration")
                .describe("Hand the payment schedule to the bank and post journals")
                .checkpoint()
                .requires_confirmation()
                .report("BACS Payment Schedule")
                .target(Dashboard),
        ];
        Self { steps }
    }

    pub fn get_step(&self, index: usize) -> Result<&StepDefinition> {
        self.steps
            .get(index)
            .ok_or(PayrunError::StepOutOfRange { index })
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &StepDefinition> {
        self.steps.iter()
    }

    /// Index of the step with the given id.
    pub fn position(&self, id: &str) -> Option<usize> {
        self.steps.iter().position(|s| s.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_catalogue_has_nine_steps() {
        let reg = StepRegistry::payroll_default();
        assert_eq!(reg.len(), 9);
        assert!(!reg.is_empty());
        assert_eq!(reg.get_step(0).unwrap().id, "pre_processing");
        assert_eq!(reg.get_step(8).unwrap().id, "banking_integration");
    }

    #[test]
    fn default_catalogue_checkpoints_are_six_and_nine() {
        let reg = StepRegistry::payroll_default();
        let checkpoints: Vec<usize> = reg
            .iter()
            .enumerate()
            .filter(|(_, s)| s.checkpoint)
            .map(|(i, _)| i)
            .collect();
        assert_eq!(checkpoints, vec![5, 8]);
        assert!(reg.get_step(8).unwrap().requires_confirmation);
    }

    #[test]
    fn default_catalogue_passes_lint() {
        let reg = StepRegistry::payroll_default();
        let steps: Vec<_> = reg.iter().cloned().collect();
        assert!(StepRegistry::from_definitions(steps).is_ok());
    }

    #[test]
    fn only_three_steps_are_validated() {
        let reg = StepRegistry::payroll_default();
        let validated: Vec<&str> = reg
            .iter()
            .filter(|s| s.validation.is_some())
            .map(|s| s.id.as_str())
            .collect();
        assert_eq!(
            validated,
            vec!["pre_processing", "variable_pay", "voluntary_deductions"]
        );
    }

    #[test]
    fn get_step_out_of_range() {
        let reg = StepRegistry::payroll_default();
        match reg.get_step(42) {
            Err(PayrunError::StepOutOfRange { index }) => assert_eq!(index, 42),
            other => panic!("expected StepOutOfRange, got {other:?}"),
        }
    }

    #[test]
    fn position_finds_step_by_id() {
        let reg = StepRegistry::payroll_default();
        assert_eq!(reg.position("gross_to_net"), Some(5));
        assert_eq!(reg.position("nope"), None);
    }

    #[test]
    fn from_definitions_rejects_empty_catalogue() {
        let err = StepRegistry::from_definitions(vec![]).unwrap_err();
        assert!(matches!(err, PayrunError::Catalogue(_)));
    }

    #[test]
    fn from_json_file_loads_catalogue() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("steps.json");
        std::fs::write(
            &path,
            r#"[
                {"id": "check", "name": "Check", "validation": "pre_processing", "target_page": "employees"},
                {"id": "pay", "name": "Pay", "checkpoint": true, "requires_confirmation": true,
                 "downloadable": true, "report_title": "Payments"}
            ]"#,
        )
        .unwrap();

        let reg = StepRegistry::from_json_file(&path).unwrap();
        assert_eq!(reg.len(), 2);
        let check = reg.get_step(0).unwrap();
        assert_eq!(check.validation, Some(ValidationKind::PreProcessing));
        assert_eq!(check.target_page, Some(TargetPage::Employees));
        assert!(!check.checkpoint);
        let pay = reg.get_step(1).unwrap();
        assert_eq!(pay.report_title.as_deref(), Some("Payments"));
    }

    #[test]
    fn from_json_file_rejects_duplicate_ids() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("steps.json");
        std::fs::write(
            &path,
            r#"[{"id": "a", "name": "A"}, {"id": "a", "name": "Again"}]"#,
        )
        .unwrap();

        let err = StepRegistry::from_json_file(&path).unwrap_err();
        match err {
            PayrunError::Catalogue(msg) => assert!(msg.contains("'a'"), "got: {msg}"),
            other => panic!("expected Catalogue error, got {other:?}"),
        }
    }
}
