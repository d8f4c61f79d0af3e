//! Shared types for the check-in kiosk

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::num::ParseIntError;
use std::str::FromStr;

/// Newtype wrapper for person IDs to provide type safety
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct PersonId(
    #[serde(serialize_with = "serialize_id", deserialize_with = "deserialize_id")] pub u64,
);

impl std::fmt::Display for PersonId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for PersonId {
    type Err = ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(PersonId)
    }
}

/// Newtype wrapper for event instance IDs to provide type safety
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct InstanceId(
    #[serde(serialize_with = "serialize_id", deserialize_with = "deserialize_id")] pub u64,
);

impl std::fmt::Display for InstanceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for InstanceId {
    type Err = ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(InstanceId)
    }
}

/// Breeze sends identifiers as decimal strings; they go back out the same way
fn serialize_id<S>(id: &u64, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.collect_str(id)
}

/// Accept an identifier as either a decimal string or a non-negative integer
fn deserialize_id<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::{self, Visitor};

    struct IdVisitor;

    impl<'de> Visitor<'de> for IdVisitor {
        type Value = u64;

        fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
            formatter.write_str("a non-negative integer or a decimal string")
        }

        fn visit_str<E>(self, value: &str) -> Result<u64, E>
        where
            E: de::Error,
        {
            value.trim().parse().map_err(|_| E::invalid_value(de::Unexpected::Str(value), &self))
        }

        fn visit_u64<E>(self, value: u64) -> Result<u64, E>
        where
            E: de::Error,
        {
            Ok(value)
        }

        fn visit_i64<E>(self, value: i64) -> Result<u64, E>
        where
            E: de::Error,
        {
            u64::try_from(value).map_err(|_| E::invalid_value(de::Unexpected::Signed(value), &self))
        }
    }

    deserializer.deserialize_any(IdVisitor)
}

/// A person who can be selected at the kiosk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FamilyMember {
    pub person_id: PersonId,
    #[serde(alias = "name")]
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role_name: Option<String>,
}

impl FamilyMember {
    pub fn new(person_id: PersonId, display_name: impl Into<String>) -> Self {
        Self { person_id, display_name: display_name.into(), role_name: None }
    }
}

/// Pair recovered from a check-in code (values are already reduced mod 32768)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DecodedCode {
    pub person_id: PersonId,
    pub instance_id: InstanceId,
}

/// Per-member request sent to the attendance service
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckinRequest {
    pub person_id: PersonId,
    pub display_name: String,
    pub code: String,
}

/// Per-member outcome reported by the attendance service
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckinResult {
    pub person_id: PersonId,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CheckinResult {
    pub fn ok(person_id: PersonId) -> Self {
        Self { person_id, success: true, error: None }
    }

    pub fn failed(person_id: PersonId, error: impl Into<String>) -> Self {
        Self { person_id, success: false, error: Some(error.into()) }
    }
}

/// One printable label
///
/// Member labels identify a checked-in person; aggregate labels (the parent
/// pickup ticket) only carry the shared family code. Custom labels hold
/// caller-supplied text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Label {
    Member { person_id: PersonId, display_name: String, code: String },
    Aggregate { code: String, extra: String },
    Custom { name: String, code: String, extra: String },
}

impl Label {
    pub fn code(&self) -> &str {
        match self {
            Label::Member { code, .. } | Label::Aggregate { code, .. } | Label::Custom { code, .. } => {
                code
            }
        }
    }

    pub fn is_aggregate(&self) -> bool {
        matches!(self, Label::Aggregate { .. })
    }
}

/// Caller-supplied label text, e.g. a parent tear-off listing the kids' names
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelText {
    pub name: String,
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub extra: String,
}

impl LabelText {
    pub fn into_label(self) -> Label {
        Label::Custom { name: self.name, code: self.code, extra: self.extra }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_accepts_string_or_number() {
        let from_str: PersonId = serde_json::from_str(r#""12345""#).unwrap();
        let from_num: PersonId = serde_json::from_str("12345").unwrap();
        assert_eq!(from_str, from_num);
        assert_eq!(from_str, PersonId(12345));
    }

    #[test]
    fn test_id_rejects_negative_and_garbage() {
        assert!(serde_json::from_str::<InstanceId>("-4").is_err());
        assert!(serde_json::from_str::<InstanceId>(r#""abc""#).is_err());
    }

    #[test]
    fn test_id_serializes_as_string() {
        let json = serde_json::to_string(&InstanceId(42)).unwrap();
        assert_eq!(json, r#""42""#);
    }

    #[test]
    fn test_family_member_accepts_name_alias() {
        let member: FamilyMember =
            serde_json::from_str(r#"{"person_id":"7","name":"Ada Lovelace"}"#).unwrap();
        assert_eq!(member, FamilyMember::new(PersonId(7), "Ada Lovelace"));
    }

    #[test]
    fn test_label_serialization_is_tagged() {
        let label = Label::Aggregate { code: "225-BBCJ".to_string(), extra: "parent".to_string() };
        let value = serde_json::to_value(&label).unwrap();
        assert_eq!(value["kind"], "aggregate");
        assert_eq!(value["extra"], "parent");
        assert!(label.is_aggregate());
        assert_eq!(label.code(), "225-BBCJ");
    }

    #[test]
    fn test_label_text_defaults_code_and_extra() {
        let text: LabelText = serde_json::from_str(r#"{"name":"Parent"}"#).unwrap();
        assert_eq!(text.code, "");
        assert_eq!(text.extra, "");

        let label = text.into_label();
        assert!(!label.is_aggregate());
        assert_eq!(label.code(), "");
    }
}
