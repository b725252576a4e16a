//! Read-only employee and timesheet summaries consumed by validation.

use std::collections::HashSet;
use std::path::Path;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use payrun_types::{PayrunError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimesheetSummary {
    pub hours: u32,
    pub approved: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariablePayItem {
    pub description: String,
    pub approved: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoluntaryDeduction {
    pub description: String,
    #[serde(default)]
    pub provider_reference: Option<String>,
    #[serde(default)]
    pub end_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmployeeSummary {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub tax_code: Option<String>,
    #[serde(default)]
    pub ni_number: Option<String>,
    #[serde(default)]
    pub has_bank_details: bool,
    #[serde(default)]
    pub timesheet: Option<TimesheetSummary>,
    #[serde(default)]
    pub variable_pay: Vec<VariablePayItem>,
    #[serde(default)]
    pub deductions: Vec<VoluntaryDeduction>,
}

/// Source of employee summaries for the pay period being run.
#[async_trait]
pub trait RosterSource: Send + Sync {
    async fn employees(&self) -> Result<Vec<EmployeeSummary>>;

    /// The pay date the run is for. Deductions ending before it are stale.
    fn pay_date(&self) -> NaiveDate;
}

/// A roster held in memory, loaded from JSON or built in code.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InMemoryRoster {
    pub pay_date: NaiveDate,
    pub employees: Vec<EmployeeSummary>,
}

impl InMemoryRoster {
    pub fn new(pay_date: NaiveDate, employees: Vec<EmployeeSummary>) -> Self {
        Self {
            pay_date,
            employees,
        }
    }

    pub fn from_json_file(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        let roster: Self = serde_json::from_str(&data)?;
        let mut seen = HashSet::new();
        if let Some(dup) = roster.employees.iter().find(|e| !seen.insert(e.id.as_str())) {
            return Err(PayrunError::Roster(format!(
                "duplicate employee id '{}' in {}",
                dup.id,
                path.display()
            )));
        }
        tracing::debug!(
            path = %path.display(),
            employees = roster.employees.len(),
            "Loaded roster"
        );
        Ok(roster)
    }

    /// A small roster with one issue of every kind the flagger checks for.
    pub fn sample() -> Self {
        let pay_date = NaiveDate::from_ymd_opt(2026, 10, 30).unwrap_or_default();
        let complete = |id: &str, name: &str| EmployeeSummary {
            id: id.into(),
            name: name.into(),
            tax_code: Some("1257L".into()),
            ni_number: Some("QQ123456C".into()),
            has_bank_details: true,
            timesheet: Some(TimesheetSummary {
                hours: 150,
                approved: true,
            }),
            variable_pay: Vec::new(),
            deductions: Vec::new(),
        };

        let mut employees = vec![
            complete("E001", "Sarah Johnson"),
            complete("E002", "Michael Chen"),
            complete("E003", "Emma Williams"),
            complete("E004", "James Brown"),
        ];
        employees[1].tax_code = None;
        employees[2].has_bank_details = false;
        employees[3].timesheet = Some(TimesheetSummary {
            hours: 172,
            approved: false,
        });
        employees[3].variable_pay.push(VariablePayItem {
            description: "Overtime (12h)".into(),
            approved: false,
        });
        employees[0].deductions.push(VoluntaryDeduction {
            description: "Cycle to work scheme".into(),
            provider_reference: Some("CTW-8812".into()),
            end_date: NaiveDate::from_ymd_opt(2026, 9, 30),
        });
        Self::new(pay_date, employees)
    }
}

#[async_trait]
impl RosterSource for InMemoryRoster {
    async fn employees(&self) -> Result<Vec<EmployeeSummary>> {
        Ok(self.employees.clone())
    }

    fn pay_date(&self) -> NaiveDate {
        self.pay_date
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sample_roster_has_four_employees() {
        let roster = InMemoryRoster::sample();
        let employees = roster.employees().await.unwrap();
        assert_eq!(employees.len(), 4);
        assert!(employees[1].tax_code.is_none());
        assert!(!employees[2].has_bank_details);
    }

    #[test]
    fn roster_loads_from_json_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("roster.json");
        std::fs::write(
            &path,
            r#"{
                "pay_date": "2026-10-30",
                "employees": [
                    {"id": "E9", "name": "Ada Lovelace", "tax_code": "1257L"}
                ]
            }"#,
        )
        .unwrap();

        let roster = InMemoryRoster::from_json_file(&path).unwrap();
        assert_eq!(roster.pay_date(), NaiveDate::from_ymd_opt(2026, 10, 30).unwrap());
        let e = &roster.employees[0];
        assert_eq!(e.tax_code.as_deref(), Some("1257L"));
        assert!(e.ni_number.is_none());
        assert!(!e.has_bank_details);
        assert!(e.deductions.is_empty());
    }

    #[test]
    fn roster_rejects_duplicate_ids() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("roster.json");
        std::fs::write(
            &path,
            r#"{
                "pay_date": "2026-10-30",
                "employees": [
                    {"id": "E1", "name": "Ada Lovelace"},
                    {"id": "E1", "name": "Grace Hopper"}
                ]
            }"#,
        )
        .unwrap();

        match InMemoryRoster::from_json_file(&path) {
            Err(PayrunError::Roster(msg)) => assert!(msg.contains("'E1'")),
            other => panic!("expected roster error, got {other:?}"),
        }
    }
}
