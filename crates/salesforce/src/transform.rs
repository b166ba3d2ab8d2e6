//! Generic source record -> Salesforce record
//!
//! The transformer is pure: it never drops or rejects data. Values a transform
//! cannot interpret are passed through unchanged and left for
//! [`crate::validate`] to report.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde_json::{Map, Number, Value};
use tracing::debug;

use crate::mapping::{FieldTransform, SObjectType};

/// A destination record keyed by Salesforce field API name
pub type SObjectRecord = Map<String, Value>;

const CUSTOM_FIELDS_KEY: &str = "customFields";
const CUSTOM_SUFFIX: &str = "__c";
const MAX_CUSTOM_NAME_LEN: usize = 40;

#[derive(Debug, Clone)]
pub struct SalesforceDataTransformer {
    include_custom_fields: bool,
}

impl Default for SalesforceDataTransformer {
    fn default() -> Self {
        Self {
            include_custom_fields: true,
        }
    }
}

impl SalesforceDataTransformer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_custom_fields(mut self, include: bool) -> Self {
        self.include_custom_fields = include;
        self
    }

    pub fn transform(&self, object: SObjectType, source: &Value) -> SObjectRecord {
        let mut record = SObjectRecord::new();

        for mapping in object.field_mappings() {
            let Some(value) = lookup(source, mapping.source) else {
                continue;
            };
            if is_blank(value) {
                continue;
            }
            let value = match mapping.transform {
                Some(transform) => transform_value(transform, value),
                None => value.clone(),
            };
            record.insert(mapping.target.to_string(), value);
        }

        if self.include_custom_fields {
            if let Some(Value::Object(custom)) = source.get(CUSTOM_FIELDS_KEY) {
                for (name, value) in custom {
                    if is_blank(value) {
                        continue;
                    }
                    let Some(field) = custom_field_name(name) else {
                        debug!("Skipping custom field with unusable name {:?}", name);
                        continue;
                    };
                    record.entry(field).or_insert_with(|| value.clone());
                }
            }
        }

        for (field, default) in object.default_values() {
            record
                .entry(field.to_string())
                .or_insert_with(|| Value::String(default.to_string()));
        }

        record
    }

    pub fn transform_batch(&self, object: SObjectType, sources: &[Value]) -> Vec<SObjectRecord> {
        let records: Vec<SObjectRecord> = sources
            .iter()
            .map(|source| self.transform(object, source))
            .collect();
        debug!("Transformed {} {} records", records.len(), object);
        records
    }
}

/// Exact key first, then dot-path traversal
pub fn lookup<'a>(source: &'a Value, path: &str) -> Option<&'a Value> {
    if let Some(value) = source.get(path) {
        return Some(value);
    }
    if !path.contains('.') {
        return None;
    }
    path.split('.')
        .try_fold(source, |current, segment| current.get(segment))
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        _ => false,
    }
}

pub fn transform_value(transform: FieldTransform, value: &Value) -> Value {
    let converted = match transform {
        FieldTransform::Email => value.as_str().map(|s| Value::String(s.trim().to_lowercase())),
        FieldTransform::Phone => format_phone(value).map(Value::String),
        FieldTransform::Date => value.as_str().and_then(normalize_date).map(Value::String),
        FieldTransform::Number => parse_number(value).and_then(number_value),
        FieldTransform::Integer => parse_number(value)
            .filter(|n| n.is_finite())
            .map(|n| Value::from(n.round() as i64)),
        FieldTransform::Percent => parse_percent(value).and_then(number_value),
        FieldTransform::Stage => value.as_str().and_then(map_stage).map(Value::from),
        FieldTransform::Url => value.as_str().map(|s| Value::String(normalize_url(s))),
    };
    converted.unwrap_or_else(|| value.clone())
}

fn format_phone(value: &Value) -> Option<String> {
    let raw = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    let international = raw.starts_with('+');
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return None;
    }

    if international {
        Some(format!("+{}", digits))
    } else if digits.len() == 10 {
        Some(format!("({}) {}-{}", &digits[..3], &digits[3..6], &digits[6..]))
    } else {
        Some(digits)
    }
}

/// RFC 3339, `YYYY-MM-DD` or `MM/DD/YYYY` -> `YYYY-MM-DD`
pub fn normalize_date(raw: &str) -> Option<String> {
    let raw = raw.trim();
    let date = DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.date_naive())
        .or_else(|_| NaiveDate::parse_from_str(raw, "%Y-%m-%d"))
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S").map(|dt| dt.date()))
        .or_else(|_| NaiveDate::parse_from_str(raw, "%m/%d/%Y"))
        .ok()?;
    Some(date.format("%Y-%m-%d").to_string())
}

fn parse_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => {
            let cleaned: String = s
                .trim()
                .chars()
                .filter(|c| !matches!(c, '$' | ',' | ' '))
                .collect();
            cleaned.parse::<f64>().ok()
        }
        _ => None,
    }
}

fn parse_percent(value: &Value) -> Option<f64> {
    match value {
        Value::String(s) => parse_number(&Value::String(s.trim().trim_end_matches('%').to_string())),
        other => parse_number(other),
    }
}

fn number_value(n: f64) -> Option<Value> {
    if n.fract() == 0.0 && n.abs() < i64::MAX as f64 {
        return Some(Value::from(n as i64));
    }
    Number::from_f64(n).map(Value::Number)
}

/// Generic pipeline names onto the standard `StageName` picklist
pub fn map_stage(raw: &str) -> Option<&'static str> {
    let key = raw.trim().to_ascii_lowercase().replace(['-', '_'], " ");
    let stage = match key.as_str() {
        "lead" | "new" | "prospect" | "prospecting" => "Prospecting",
        "qualified" | "qualification" => "Qualification",
        "needs analysis" | "discovery" => "Needs Analysis",
        "value proposition" => "Value Proposition",
        "decision makers" | "id decision makers" => "Id. Decision Makers",
        "perception analysis" => "Perception Analysis",
        "proposal" | "quote" | "proposal/price quote" => "Proposal/Price Quote",
        "negotiation" | "negotiation/review" | "review" => "Negotiation/Review",
        "won" | "closed won" | "closedwon" => "Closed Won",
        "lost" | "closed lost" | "closedlost" => "Closed Lost",
        _ => return None,
    };
    Some(stage)
}

fn normalize_url(raw: &str) -> String {
    let trimmed = raw.trim();
    let lower = trimmed.to_ascii_lowercase();
    if lower.starts_with("http://") || lower.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("https://{}", trimmed)
    }
}

/// `Preferred Language` -> `Preferred_Language__c`
pub fn custom_field_name(raw: &str) -> Option<String> {
    let base = raw.trim();
    let base = if base.len() > CUSTOM_SUFFIX.len()
        && base.to_ascii_lowercase().ends_with(CUSTOM_SUFFIX)
    {
        &base[..base.len() - CUSTOM_SUFFIX.len()]
    } else {
        base
    };

    let mut name = String::with_capacity(base.len());
    for c in base.chars() {
        let c = if c.is_ascii_alphanumeric() { c } else { '_' };
        if c == '_' && name.ends_with('_') {
            continue;
        }
        name.push(c);
    }
    let mut name = name.trim_matches('_').to_string();
    if name.is_empty() {
        return None;
    }
    if name.starts_with(|c: char| c.is_ascii_digit()) {
        name.insert(0, 'X');
    }
    name.truncate(MAX_CUSTOM_NAME_LEN);
    let name = name.trim_end_matches('_');

    Some(format!("{}{}", name, CUSTOM_SUFFIX))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_contact_transform() {
        let source = json!({
            "firstName": "Ada",
            "lastName": "Lovelace",
            "email": "  Ada@Example.COM ",
            "phone": "555.867.5309",
            "birthdate": "12/10/1815",
            "address": {"city": "London", "postalCode": "W1"},
            "jobTitle": "",
            "department": null
        });

        let record = SalesforceDataTransformer::new().transform(SObjectType::Contact, &source);
        assert_eq!(record["FirstName"], "Ada");
        assert_eq!(record["Email"], "ada@example.com");
        assert_eq!(record["Phone"], "(555) 867-5309");
        assert_eq!(record["Birthdate"], "1815-12-10");
        assert_eq!(record["MailingCity"], "London");
        assert_eq!(record["MailingPostalCode"], "W1");
        assert!(!record.contains_key("Title"));
        assert!(!record.contains_key("Department"));
    }

    #[test]
    fn test_opportunity_defaults_and_dates() {
        let source = json!({"lastName": "Doe", "closeDate": "2024-03-01T00:00:00Z"});
        let record = SalesforceDataTransformer::new().transform(SObjectType::Opportunity, &source);

        assert_eq!(record["StageName"], "Prospecting");
        assert_eq!(record["CloseDate"], "2024-03-01");
        assert!(!record.contains_key("Name"));
    }

    #[test]
    fn test_account_numbers_and_url() {
        let source = json!({
            "name": "Acme",
            "website": "acme.io",
            "employees": "1,200",
            "annualRevenue": "$2,500,000.50"
        });
        let record = SalesforceDataTransformer::new().transform(SObjectType::Account, &source);
        assert_eq!(record["Website"], "https://acme.io");
        assert_eq!(record["NumberOfEmployees"], 1200);
        assert_eq!(record["AnnualRevenue"], 2500000.5);
    }

    #[test]
    fn test_uninterpretable_values_pass_through() {
        assert_eq!(
            transform_value(FieldTransform::Date, &json!("next tuesday")),
            json!("next tuesday")
        );
        assert_eq!(
            transform_value(FieldTransform::Number, &json!("lots")),
            json!("lots")
        );
        assert_eq!(
            transform_value(FieldTransform::Stage, &json!("Custom Stage")),
            json!("Custom Stage")
        );
        assert_eq!(transform_value(FieldTransform::Phone, &json!("n/a")), json!("n/a"));
    }

    #[test]
    fn test_percent_and_stage() {
        assert_eq!(transform_value(FieldTransform::Percent, &json!("45%")), json!(45));
        assert_eq!(transform_value(FieldTransform::Percent, &json!(12.5)), json!(12.5));
        assert_eq!(transform_value(FieldTransform::Stage, &json!("won")), json!("Closed Won"));
        assert_eq!(
            transform_value(FieldTransform::Stage, &json!("Needs_Analysis")),
            json!("Needs Analysis")
        );
    }

    #[test]
    fn test_international_phone_keeps_plus() {
        assert_eq!(
            transform_value(FieldTransform::Phone, &json!("+44 20 7946 0958")),
            json!("+442079460958")
        );
    }

    #[test]
    fn test_custom_field_names() {
        assert_eq!(custom_field_name("Preferred Language").as_deref(), Some("Preferred_Language__c"));
        assert_eq!(custom_field_name("  --tier--  ").as_deref(), Some("tier__c"));
        assert_eq!(custom_field_name("2024 score").as_deref(), Some("X2024_score__c"));
        assert_eq!(custom_field_name("Region__c").as_deref(), Some("Region__c"));
        assert_eq!(custom_field_name("!!!"), None);

        let long = custom_field_name(&"a".repeat(60)).unwrap();
        assert_eq!(long.len(), MAX_CUSTOM_NAME_LEN + CUSTOM_SUFFIX.len());
    }

    #[test]
    fn test_custom_fields_do_not_override_mapped_fields() {
        let source = json!({
            "lastName": "Doe",
            "customFields": {"LastName__c": "custom", "Loyalty Tier": "Gold", "Empty": " "}
        });
        let record = SalesforceDataTransformer::new().transform(SObjectType::Contact, &source);
        assert_eq!(record["LastName"], "Doe");
        assert_eq!(record["LastName__c"], "custom");
        assert_eq!(record["Loyalty_Tier__c"], "Gold");
        assert!(!record.contains_key("Empty__c"));

        let without = SalesforceDataTransformer::new()
            .with_custom_fields(false)
            .transform(SObjectType::Contact, &source);
        assert!(!without.contains_key("Loyalty_Tier__c"));
    }

    #[test]
    fn test_lookup_prefers_exact_key() {
        let source = json!({"address.city": "Flat", "address": {"city": "Nested"}});
        assert_eq!(lookup(&source, "address.city"), Some(&json!("Flat")));

        let nested = json!({"address": {"city": "Nested"}});
        assert_eq!(lookup(&nested, "address.city"), Some(&json!("Nested")));
        assert_eq!(lookup(&nested, "address.zip"), None);
    }
}
