use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use std::fmt;

use crate::mapping::SObjectType;
use crate::transform::SObjectRecord;

static EMAIL_PATTERN: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").ok());

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "issue", rename_all = "snake_case")]
pub enum ValidationIssue {
    MissingRequiredField { field: String },
    MalformedEmail { field: String, value: Value },
    MalformedDate { field: String, value: Value },
    MalformedNumber { field: String, value: Value },
}

impl ValidationIssue {
    pub fn field(&self) -> &str {
        match self {
            ValidationIssue::MissingRequiredField { field }
            | ValidationIssue::MalformedEmail { field, .. }
            | ValidationIssue::MalformedDate { field, .. }
            | ValidationIssue::MalformedNumber { field, .. } => field,
        }
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationIssue::MissingRequiredField { field } => {
                write!(f, "Required field {} is missing", field)
            }
            ValidationIssue::MalformedEmail { field, value } => {
                write!(f, "Invalid email format in {}: {}", field, value)
            }
            ValidationIssue::MalformedDate { field, value } => {
                write!(f, "Invalid date in {} (expected YYYY-MM-DD): {}", field, value)
            }
            ValidationIssue::MalformedNumber { field, value } => {
                write!(f, "Invalid number in {}: {}", field, value)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidRecord {
    pub index: usize,
    pub record: SObjectRecord,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InvalidRecord {
    /// Position in the validated batch
    pub index: usize,
    pub record: SObjectRecord,
    pub issues: Vec<ValidationIssue>,
}

impl InvalidRecord {
    pub fn message(&self) -> String {
        self.issues
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ")
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ValidationReport {
    pub valid: Vec<ValidRecord>,
    pub invalid: Vec<InvalidRecord>,
}

impl ValidationReport {
    pub fn total(&self) -> usize {
        self.valid.len() + self.invalid.len()
    }

    pub fn is_clean(&self) -> bool {
        self.invalid.is_empty()
    }

    pub fn valid_records(&self) -> Vec<SObjectRecord> {
        self.valid.iter().map(|v| v.record.clone()).collect()
    }
}

fn is_missing(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.trim().is_empty(),
        Some(_) => false,
    }
}

fn is_email(value: &Value) -> bool {
    match (value.as_str(), EMAIL_PATTERN.as_ref()) {
        (Some(s), Some(pattern)) => pattern.is_match(s),
        _ => false,
    }
}

fn is_iso_date(value: &Value) -> bool {
    value
        .as_str()
        .map(|s| s.len() == 10 && NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok())
        .unwrap_or(false)
}

/// Every issue found in one transformed record
pub fn validate_record(object: SObjectType, record: &SObjectRecord) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();

    for field in object.required_fields() {
        if is_missing(record.get(*field)) {
            issues.push(ValidationIssue::MissingRequiredField {
                field: field.to_string(),
            });
        }
    }

    for field in object.email_fields() {
        if let Some(value) = record.get(*field).filter(|v| !is_missing(Some(*v))) {
            if !is_email(value) {
                issues.push(ValidationIssue::MalformedEmail {
                    field: field.to_string(),
                    value: value.clone(),
                });
            }
        }
    }

    for field in object.date_fields() {
        if let Some(value) = record.get(*field).filter(|v| !is_missing(Some(*v))) {
            if !is_iso_date(value) {
                issues.push(ValidationIssue::MalformedDate {
                    field: field.to_string(),
                    value: value.clone(),
                });
            }
        }
    }

    for field in object.numeric_fields() {
        if let Some(value) = record.get(field).filter(|v| !is_missing(Some(*v))) {
            if !value.is_number() {
                issues.push(ValidationIssue::MalformedNumber {
                    field: field.to_string(),
                    value: value.clone(),
                });
            }
        }
    }

    issues
}

/// Partition a batch; every index lands in exactly one list
pub fn validate_batch(object: SObjectType, records: Vec<SObjectRecord>) -> ValidationReport {
    let mut report = ValidationReport::default();

    for (index, record) in records.into_iter().enumerate() {
        let issues = validate_record(object, &record);
        if issues.is_empty() {
            report.valid.push(ValidRecord { index, record });
        } else {
            report.invalid.push(InvalidRecord {
                index,
                record,
                issues,
            });
        }
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> SObjectRecord {
        match value {
            Value::Object(map) => map,
            _ => panic!("test records must be objects"),
        }
    }

    #[test]
    fn test_missing_required_fields() {
        let issues = validate_record(
            SObjectType::Opportunity,
            &record(json!({"StageName": "Prospecting", "Name": "  "})),
        );
        let fields: Vec<_> = issues.iter().map(|i| i.field()).collect();
        assert_eq!(fields, vec!["Name", "CloseDate"]);
    }

    #[test]
    fn test_malformed_values() {
        let issues = validate_record(
            SObjectType::Contact,
            &record(json!({"LastName": "Doe", "Email": "doe@nowhere", "Birthdate": "tomorrow"})),
        );
        assert_eq!(issues.len(), 2);
        assert!(matches!(issues[0], ValidationIssue::MalformedEmail { .. }));
        assert!(matches!(issues[1], ValidationIssue::MalformedDate { .. }));

        let issues = validate_record(
            SObjectType::Account,
            &record(json!({"Name": "Acme", "AnnualRevenue": "lots"})),
        );
        assert_eq!(
            issues,
            vec![ValidationIssue::MalformedNumber {
                field: "AnnualRevenue".into(),
                value: json!("lots")
            }]
        );
    }

    #[test]
    fn test_impossible_calendar_date() {
        let issues = validate_record(
            SObjectType::Opportunity,
            &record(json!({"Name": "Deal", "StageName": "Prospecting", "CloseDate": "2024-02-30"})),
        );
        assert_eq!(issues.len(), 1);
        assert!(issues[0].to_string().contains("CloseDate"));
    }

    #[test]
    fn test_batch_partition_keeps_indices() {
        let report = validate_batch(
            SObjectType::Account,
            vec![
                record(json!({"Name": "A"})),
                record(json!({})),
                record(json!({"Name": "C", "NumberOfEmployees": 12})),
            ],
        );

        assert_eq!(report.total(), 3);
        assert_eq!(report.valid.iter().map(|v| v.index).collect::<Vec<_>>(), vec![0, 2]);
        assert_eq!(report.invalid[0].index, 1);
        assert_eq!(report.invalid[0].message(), "Required field Name is missing");
        assert!(!report.is_clean());
    }
}
