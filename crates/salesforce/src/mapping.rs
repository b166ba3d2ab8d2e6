//! Field-mapping tables from the generic source-record shape to Salesforce objects

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SObjectType {
    Contact,
    Account,
    Opportunity,
}

/// Value conversion applied to a mapped field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldTransform {
    Email,
    Phone,
    Date,
    Number,
    Integer,
    Percent,
    Stage,
    Url,
}

impl FieldTransform {
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            FieldTransform::Number | FieldTransform::Integer | FieldTransform::Percent
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldMapping {
    /// Dot path into the source record
    pub source: &'static str,
    pub target: &'static str,
    pub transform: Option<FieldTransform>,
}

const fn plain(source: &'static str, target: &'static str) -> FieldMapping {
    FieldMapping {
        source,
        target,
        transform: None,
    }
}

const fn with(
    source: &'static str,
    target: &'static str,
    transform: FieldTransform,
) -> FieldMapping {
    FieldMapping {
        source,
        target,
        transform: Some(transform),
    }
}

static CONTACT_FIELDS: [FieldMapping; 15] = [
    plain("firstName", "FirstName"),
    plain("lastName", "LastName"),
    with("email", "Email", FieldTransform::Email),
    with("phone", "Phone", FieldTransform::Phone),
    with("mobilePhone", "MobilePhone", FieldTransform::Phone),
    plain("jobTitle", "Title"),
    plain("department", "Department"),
    with("birthdate", "Birthdate", FieldTransform::Date),
    plain("leadSource", "LeadSource"),
    plain("description", "Description"),
    plain("address.street", "MailingStreet"),
    plain("address.city", "MailingCity"),
    plain("address.state", "MailingState"),
    plain("address.postalCode", "MailingPostalCode"),
    plain("address.country", "MailingCountry"),
];

static ACCOUNT_FIELDS: [FieldMapping; 13] = [
    plain("name", "Name"),
    plain("industry", "Industry"),
    with("website", "Website", FieldTransform::Url),
    with("phone", "Phone", FieldTransform::Phone),
    with("employees", "NumberOfEmployees", FieldTransform::Integer),
    with("annualRevenue", "AnnualRevenue", FieldTransform::Number),
    plain("type", "Type"),
    plain("description", "Description"),
    plain("address.street", "BillingStreet"),
    plain("address.city", "BillingCity"),
    plain("address.state", "BillingState"),
    plain("address.postalCode", "BillingPostalCode"),
    plain("address.country", "BillingCountry"),
];

static OPPORTUNITY_FIELDS: [FieldMapping; 9] = [
    plain("name", "Name"),
    with("amount", "Amount", FieldTransform::Number),
    with("stage", "StageName", FieldTransform::Stage),
    with("closeDate", "CloseDate", FieldTransform::Date),
    with("probability", "Probability", FieldTransform::Percent),
    plain("accountId", "AccountId"),
    plain("type", "Type"),
    plain("leadSource", "LeadSource"),
    plain("description", "Description"),
];

impl SObjectType {
    pub const ALL: [SObjectType; 3] = [
        SObjectType::Contact,
        SObjectType::Account,
        SObjectType::Opportunity,
    ];

    /// API name used in REST paths
    pub fn api_name(&self) -> &'static str {
        match self {
            SObjectType::Contact => "Contact",
            SObjectType::Account => "Account",
            SObjectType::Opportunity => "Opportunity",
        }
    }

    pub fn field_mappings(&self) -> &'static [FieldMapping] {
        match self {
            SObjectType::Contact => &CONTACT_FIELDS,
            SObjectType::Account => &ACCOUNT_FIELDS,
            SObjectType::Opportunity => &OPPORTUNITY_FIELDS,
        }
    }

    pub fn required_fields(&self) -> &'static [&'static str] {
        match self {
            SObjectType::Contact => &["LastName"],
            SObjectType::Account => &["Name"],
            SObjectType::Opportunity => &["Name", "StageName", "CloseDate"],
        }
    }

    /// Values backfilled when the source record has none
    pub fn default_values(&self) -> &'static [(&'static str, &'static str)] {
        match self {
            SObjectType::Opportunity => &[("StageName", "Prospecting")],
            _ => &[],
        }
    }

    pub fn email_fields(&self) -> &'static [&'static str] {
        match self {
            SObjectType::Contact => &["Email"],
            _ => &[],
        }
    }

    pub fn date_fields(&self) -> &'static [&'static str] {
        match self {
            SObjectType::Contact => &["Birthdate"],
            SObjectType::Opportunity => &["CloseDate"],
            SObjectType::Account => &[],
        }
    }

    pub fn numeric_fields(&self) -> impl Iterator<Item = &'static str> {
        self.field_mappings()
            .iter()
            .filter(|m| m.transform.map_or(false, |t| t.is_numeric()))
            .map(|m| m.target)
    }
}

impl fmt::Display for SObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.api_name())
    }
}

impl FromStr for SObjectType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "contact" | "contacts" => Ok(SObjectType::Contact),
            "account" | "accounts" | "company" | "companies" => Ok(SObjectType::Account),
            "opportunity" | "opportunities" | "deal" | "deals" => Ok(SObjectType::Opportunity),
            other => Err(format!("unsupported object type: {}", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_targets_are_unique_per_object() {
        for object in SObjectType::ALL {
            let mut seen = HashSet::new();
            for mapping in object.field_mappings() {
                assert!(seen.insert(mapping.target), "{} maps {} twice", object, mapping.target);
            }
        }
    }

    #[test]
    fn test_required_fields_are_mapped() {
        for object in SObjectType::ALL {
            for required in object.required_fields() {
                assert!(object
                    .field_mappings()
                    .iter()
                    .any(|m| m.target == *required));
            }
        }
    }

    #[test]
    fn test_numeric_fields() {
        let numeric: Vec<_> = SObjectType::Opportunity.numeric_fields().collect();
        assert_eq!(numeric, vec!["Amount", "Probability"]);
        assert_eq!(SObjectType::Contact.numeric_fields().count(), 0);
    }

    #[test]
    fn test_parse_object_names() {
        assert_eq!("contacts".parse(), Ok(SObjectType::Contact));
        assert_eq!("Deal".parse(), Ok(SObjectType::Opportunity));
        assert_eq!("Company".parse(), Ok(SObjectType::Account));
        assert!("Lead".parse::<SObjectType>().is_err());
    }
}
