use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementType {
    ContactInfo,
    Calculation,
    Metric,
}

impl ElementType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ElementType::ContactInfo => "contact_info",
            ElementType::Calculation => "calculation",
            ElementType::Metric => "metric",
        }
    }
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ElementType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "contact_info" | "contact" => Ok(ElementType::ContactInfo),
            "calculation" => Ok(ElementType::Calculation),
            "metric" => Ok(ElementType::Metric),
            other => Err(format!("unknown element type '{}'", other)),
        }
    }
}

/// A deduplicated real-world fact referenced by one or more pages.
/// Never deleted; a new value bumps `version`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SharedDataElement {
    pub id: i64,
    pub element_name: String,
    pub element_type: ElementType,
    pub current_value: Value,
    /// 0-100
    pub confidence: u8,
    pub is_derived: bool,
    pub formula_expression: Option<String>,
    pub version: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Everything needed to insert an element; the store assigns id,
/// version and timestamps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewElement {
    pub element_name: String,
    pub element_type: ElementType,
    pub current_value: Value,
    pub confidence: u8,
    pub is_derived: bool,
    pub formula_expression: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceType {
    /// The page on which the element was first seen
    Primary,
    Reference,
}

impl ReferenceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReferenceType::Primary => "primary",
            ReferenceType::Reference => "reference",
        }
    }
}

impl FromStr for ReferenceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "primary" => Ok(ReferenceType::Primary),
            "reference" => Ok(ReferenceType::Reference),
            other => Err(format!("unknown reference type '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageReference {
    pub page_url: String,
    pub element_id: i64,
    pub reference_type: ReferenceType,
    pub display_label: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_element_type_round_trips_through_str() {
        for t in [ElementType::ContactInfo, ElementType::Calculation, ElementType::Metric] {
            assert_eq!(t.as_str().parse::<ElementType>().unwrap(), t);
        }
        assert!("formula".parse::<ElementType>().is_err());
    }

    #[test]
    fn test_element_type_serializes_snake_case() {
        let json = serde_json::to_string(&ElementType::ContactInfo).unwrap();
        assert_eq!(json, "\"contact_info\"");
    }
}
