//! Breeze ChMS HTTP client
//!
//! Implements the attendance capability (check-in, family lookup) and the
//! pass-through lookups the kiosk UI needs (events, eligibility, attendance
//! lists, person details).
//!
//! API notes:
//! - Base: https://{subdomain}.breezechms.com/api, auth via `Api-Key` header
//! - Attendance mutations answer with JSON `true` / `"true"` on success
//! - Identifiers travel as decimal strings

use crate::domain::types::{CheckinRequest, CheckinResult, FamilyMember, InstanceId, PersonId};
use crate::infra::config::Config;
use crate::services::checkin::{AttendanceService, ServiceError};
use async_trait::async_trait;
use reqwest::Method;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

/// Longest error body carried into a `ServiceError::Status`
const MAX_ERROR_BODY: usize = 200;

pub struct BreezeClient {
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl BreezeClient {
    pub fn new(config: &Config) -> Result<Self, ServiceError> {
        let base_url = format!("https://{}.breezechms.com/api", config.breeze_subdomain());
        Self::with_base_url(
            base_url,
            config.breeze_api_key(),
            Duration::from_millis(config.breeze_timeout_ms()),
        )
    }

    /// Client against an explicit API root (tests, proxies)
    pub fn with_base_url(
        base_url: impl Into<String>,
        api_key: &str,
        timeout: Duration,
    ) -> Result<Self, ServiceError> {
        // Create HTTP client once for reuse (connection pooling)
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ServiceError::Transport(e.to_string()))?;

        Ok(Self { base_url: base_url.into(), api_key: api_key.to_string(), client })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn request(
        &self,
        method: Method,
        endpoint: &str,
        query: &[(&str, String)],
    ) -> Result<Value, ServiceError> {
        let url = format!("{}/{}", self.base_url, endpoint);

        let response = self
            .client
            .request(method.clone(), &url)
            .header("Api-Key", &self.api_key)
            .query(query)
            .send()
            .await
            .map_err(|e| ServiceError::Transport(e.to_string()))?;

        let status = response.status();
        let body = response.bytes().await.map_err(|e| ServiceError::Transport(e.to_string()))?;

        debug!(
            method = %method,
            endpoint = %endpoint,
            status = %status.as_u16(),
            bytes = body.len(),
            "breeze_response"
        );

        if !status.is_success() {
            let body: String =
                String::from_utf8_lossy(&body).chars().take(MAX_ERROR_BODY).collect();
            return Err(ServiceError::Status { status: status.as_u16(), body });
        }

        serde_json::from_slice(&body).map_err(|e| ServiceError::Decode(e.to_string()))
    }

    /// Events, optionally filtered by date range (YYYY-MM-DD)
    pub async fn events(&self, start: Option<&str>, end: Option<&str>) -> Result<Value, ServiceError> {
        let mut query = Vec::new();
        if let Some(start) = start {
            query.push(("start", start.to_string()));
        }
        if let Some(end) = end {
            query.push(("end", end.to_string()));
        }
        self.request(Method::GET, "events", &query).await
    }

    /// People eligible to check in to an instance
    pub async fn eligible_people(&self, instance_id: InstanceId) -> Result<Value, ServiceError> {
        self.request(
            Method::POST,
            "events/attendance/eligible",
            &[("instance_id", instance_id.to_string())],
        )
        .await
    }

    /// Who is checked in to an instance
    pub async fn list_attendance(&self, instance_id: InstanceId) -> Result<Value, ServiceError> {
        self.request(
            Method::POST,
            "events/attendance/list",
            &[("instance_id", instance_id.to_string())],
        )
        .await
    }

    pub async fn add_attendance(
        &self,
        instance_id: InstanceId,
        person_id: PersonId,
    ) -> Result<bool, ServiceError> {
        let result = self
            .request(
                Method::POST,
                "events/attendance/add",
                &[("instance_id", instance_id.to_string()), ("person_id", person_id.to_string())],
            )
            .await?;
        Ok(is_true(&result))
    }

    /// Check a person out of an instance
    pub async fn delete_attendance(
        &self,
        instance_id: InstanceId,
        person_id: PersonId,
    ) -> Result<bool, ServiceError> {
        let result = self
            .request(
                Method::POST,
                "events/attendance/delete",
                &[("instance_id", instance_id.to_string()), ("person_id", person_id.to_string())],
            )
            .await?;
        Ok(is_true(&result))
    }

    /// Full person record
    pub async fn person(&self, person_id: PersonId) -> Result<Value, ServiceError> {
        let filter = serde_json::json!({ "id": person_id.to_string() }).to_string();
        let result = self
            .request(Method::GET, "people", &[("details", "1".to_string()), ("filter_json", filter)])
            .await?;

        Ok(match result {
            Value::Array(mut people) if !people.is_empty() => people.swap_remove(0),
            other => other,
        })
    }

    /// Family members of a person, normalized
    pub async fn family(&self, person_id: PersonId) -> Result<Vec<FamilyMember>, ServiceError> {
        let result = self.request(Method::GET, &format!("people/{}", person_id), &[]).await?;
        Ok(result.get("family").map(normalize_family).unwrap_or_default())
    }

    /// Person details with the normalized family attached under `family`
    pub async fn person_with_family(&self, person_id: PersonId) -> Result<Value, ServiceError> {
        let person = self.person(person_id).await?;
        let Value::Object(mut record) = person else {
            return Err(ServiceError::Decode(format!("no person record for {}", person_id)));
        };

        let family = BreezeClient::family(self, person_id).await?;
        let family = serde_json::to_value(family).map_err(|e| ServiceError::Decode(e.to_string()))?;
        record.insert("family".to_string(), family);
        Ok(Value::Object(record))
    }
}

#[async_trait]
impl AttendanceService for BreezeClient {
    async fn check_in(
        &self,
        instance_id: InstanceId,
        request: &CheckinRequest,
    ) -> Result<CheckinResult, ServiceError> {
        if self.add_attendance(instance_id, request.person_id).await? {
            debug!(instance_id = %instance_id, person_id = %request.person_id, "breeze_checked_in");
            Ok(CheckinResult::ok(request.person_id))
        } else {
            Ok(CheckinResult::failed(request.person_id, "Failed"))
        }
    }

    async fn family(&self, person_id: PersonId) -> Result<Vec<FamilyMember>, ServiceError> {
        BreezeClient::family(self, person_id).await
    }
}

/// Breeze answers attendance mutations with `true` or `"true"`
fn is_true(value: &Value) -> bool {
    matches!(value, Value::Bool(true)) || value.as_str() == Some("true")
}

/// Identifier as Breeze sends it: a decimal string or a number
fn parse_id(value: &Value) -> Option<u64> {
    match value {
        Value::String(s) => s.trim().parse().ok(),
        Value::Number(n) => n.as_u64(),
        _ => None,
    }
}

fn str_field<'a>(value: Option<&'a Value>, key: &str) -> &'a str {
    value.and_then(|v| v.get(key)).and_then(Value::as_str).unwrap_or("").trim()
}

/// Flatten Breeze family records into `FamilyMember`s
///
/// The id comes from `person_id`, falling back to `details.id` and then `id`.
/// The preferred first name (`force_first_name`) wins over `first_name`.
/// Records without a usable id are skipped.
pub fn normalize_family(raw: &Value) -> Vec<FamilyMember> {
    let Some(records) = raw.as_array() else {
        return Vec::new();
    };

    records
        .iter()
        .filter_map(|record| {
            let details = record.get("details");
            let id = record
                .get("person_id")
                .and_then(parse_id)
                .or_else(|| details.and_then(|d| d.get("id")).and_then(parse_id))
                .or_else(|| record.get("id").and_then(parse_id));

            let Some(id) = id else {
                warn!(record = %record, "breeze_family_record_without_id");
                return None;
            };

            let first = match str_field(details, "force_first_name") {
                "" => str_field(details, "first_name"),
                preferred => preferred,
            };
            let last = str_field(details, "last_name");
            let display_name = format!("{} {}", first, last).trim().to_string();

            let role_name = match str_field(Some(record), "role_name") {
                "" => None,
                role => Some(role.to_string()),
            };

            Some(FamilyMember { person_id: PersonId(id), display_name, role_name })
        })
        .collect()
}
