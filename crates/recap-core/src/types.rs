use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::ValidationError;

// =============================================================================
// Enums
// =============================================================================

/// Reporting cadence stamped on each report.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportKind {
    #[default]
    Weekly,
    Daily,
    Custom,
}

impl ReportKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Weekly => "weekly",
            Self::Daily => "daily",
            Self::Custom => "custom",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "weekly" => Some(Self::Weekly),
            "daily" => Some(Self::Daily),
            "custom" => Some(Self::Custom),
            _ => None,
        }
    }
}

impl fmt::Display for ReportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Report lifecycle states. Strictly forward-only:
/// Collecting -> Frozen -> Delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportStatus {
    /// The open window; new events are attributed to it.
    Collecting,
    /// Closed window with an immutable summary, awaiting delivery.
    Frozen,
    /// Every recipient received it (or the empty-report policy applied).
    Delivered,
}

impl ReportStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Collecting => "collecting",
            Self::Frozen => "frozen",
            Self::Delivered => "delivered",
        }
    }
}

impl fmt::Display for ReportStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ReportStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "collecting" => Ok(Self::Collecting),
            "frozen" => Ok(Self::Frozen),
            "delivered" => Ok(Self::Delivered),
            _ => Err(ValidationError::UnknownStatus(s.to_string())),
        }
    }
}

/// Outcome of a single delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Sent,
    Failed,
}

impl AttemptOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sent => "sent",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "sent" => Some(Self::Sent),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// Direction of a week-over-week change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendDirection {
    Up,
    Down,
    Same,
}

impl TrendDirection {
    /// Arrow glyph used in rendered reports.
    pub fn arrow(&self) -> &'static str {
        match self {
            Self::Up => "↑",
            Self::Down => "↓",
            Self::Same => "→",
        }
    }
}

// =============================================================================
// Event payload
// =============================================================================

/// The subject of an event, keyed by `object.type`.
///
/// Known shapes get typed fields; anything else lands in `Generic` with its
/// fields preserved. A known type without an `id` also falls back to
/// `Generic`. Fields a known shape does not type are kept in `extra`, and a
/// numeric `id` stays in `extra` as a number so it serializes unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub enum ObjectRef {
    Post {
        id: String,
        title: Option<String>,
        post_type: Option<String>,
        extra: Map<String, Value>,
    },
    Comment {
        id: String,
        post_id: Option<String>,
        extra: Map<String, Value>,
    },
    User {
        id: String,
        login: Option<String>,
        extra: Map<String, Value>,
    },
    Plugin {
        id: String,
        name: Option<String>,
        version: Option<String>,
        extra: Map<String, Value>,
    },
    Setting {
        id: String,
        extra: Map<String, Value>,
    },
    Generic {
        object_type: String,
        id: Option<String>,
        fields: Map<String, Value>,
    },
}

impl ObjectRef {
    /// The `object.type` tag.
    pub fn object_type(&self) -> &str {
        match self {
            Self::Post { .. } => "post",
            Self::Comment { .. } => "comment",
            Self::User { .. } => "user",
            Self::Plugin { .. } => "plugin",
            Self::Setting { .. } => "setting",
            Self::Generic { object_type, .. } => object_type,
        }
    }

    pub fn id(&self) -> Option<&str> {
        match self {
            Self::Post { id, .. }
            | Self::Comment { id, .. }
            | Self::User { id, .. }
            | Self::Plugin { id, .. }
            | Self::Setting { id, .. } => Some(id),
            Self::Generic { id, .. } => id.as_deref(),
        }
    }

    /// Untyped fields carried alongside the typed ones.
    pub fn extra(&self) -> &Map<String, Value> {
        match self {
            Self::Post { extra, .. }
            | Self::Comment { extra, .. }
            | Self::User { extra, .. }
            | Self::Plugin { extra, .. }
            | Self::Setting { extra, .. } => extra,
            Self::Generic { fields, .. } => fields,
        }
    }

    /// Human-friendly name for highlights: title, login or plugin name when
    /// present, the id otherwise.
    pub fn display_name(&self) -> String {
        let named = match self {
            Self::Post { title, .. } => title.as_deref(),
            Self::User { login, .. } => login.as_deref(),
            Self::Plugin { name, .. } => name.as_deref(),
            _ => None,
        };
        match (named, self.id()) {
            (Some(n), _) if !n.is_empty() => n.to_string(),
            (_, Some(id)) => format!("{} #{}", self.object_type(), id),
            _ => self.object_type().to_string(),
        }
    }
}

/// Read a string-or-number id field as a string.
///
/// A string is taken out of `map`; a number is left in place so the
/// original value is re-emitted.
fn take_id(map: &mut Map<String, Value>, key: &str) -> Option<String> {
    match map.get(key) {
        Some(Value::String(s)) if !s.is_empty() => {
            let s = s.clone();
            map.remove(key);
            Some(s)
        }
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    }
}

/// Take a string field out of `map`. Non-string values stay behind.
fn take_str(map: &mut Map<String, Value>, key: &str) -> Option<String> {
    match map.get(key) {
        Some(Value::String(s)) => {
            let s = s.clone();
            map.remove(key);
            Some(s)
        }
        _ => None,
    }
}

impl TryFrom<Value> for ObjectRef {
    type Error = ValidationError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        let Value::Object(mut map) = value else {
            return Err(ValidationError::NotAnObject);
        };

        let object_type = match map.get("type") {
            None => return Err(ValidationError::MissingField("object.type")),
            Some(Value::String(s)) if !s.trim().is_empty() => s.trim().to_string(),
            Some(_) => return Err(ValidationError::EmptyField { field: "object.type" }),
        };
        map.remove("type");

        let known = matches!(
            object_type.as_str(),
            "post" | "comment" | "user" | "plugin" | "setting"
        );
        let id = take_id(&mut map, "id");
        let (true, Some(id)) = (known, id.clone()) else {
            return Ok(Self::Generic {
                object_type,
                id,
                fields: map,
            });
        };

        Ok(match object_type.as_str() {
            "post" => {
                let title = take_str(&mut map, "title");
                let post_type = take_str(&mut map, "post_type");
                Self::Post {
                    id,
                    title,
                    post_type,
                    extra: map,
                }
            }
            "comment" => {
                let post_id = take_id(&mut map, "post_id");
                Self::Comment {
                    id,
                    post_id,
                    extra: map,
                }
            }
            "user" => {
                let login = take_str(&mut map, "login");
                Self::User {
                    id,
                    login,
                    extra: map,
                }
            }
            "plugin" => {
                let name = take_str(&mut map, "name");
                let version = take_str(&mut map, "version");
                Self::Plugin {
                    id,
                    name,
                    version,
                    extra: map,
                }
            }
            _ => Self::Setting { id, extra: map },
        })
    }
}

impl From<ObjectRef> for Value {
    fn from(object: ObjectRef) -> Self {
        let mut map = Map::new();
        map.insert(
            "type".to_string(),
            Value::String(object.object_type().to_string()),
        );
        let mut put = |key: &str, value: Option<String>| {
            if let Some(v) = value {
                map.insert(key.to_string(), Value::String(v));
            }
        };
        let extra = match object {
            ObjectRef::Post {
                id,
                title,
                post_type,
                extra,
            } => {
                put("id", Some(id));
                put("title", title);
                put("post_type", post_type);
                extra
            }
            ObjectRef::Comment { id, post_id, extra } => {
                put("id", Some(id));
                put("post_id", post_id);
                extra
            }
            ObjectRef::User { id, login, extra } => {
                put("id", Some(id));
                put("login", login);
                extra
            }
            ObjectRef::Plugin {
                id,
                name,
                version,
                extra,
            } => {
                put("id", Some(id));
                put("name", name);
                put("version", version);
                extra
            }
            ObjectRef::Setting { id, extra } => {
                put("id", Some(id));
                extra
            }
            ObjectRef::Generic { id, fields, .. } => {
                put("id", id);
                fields
            }
        };
        // Untyped values win over their stringified copies (numeric ids).
        for (k, v) in extra {
            if k != "type" {
                map.insert(k, v);
            }
        }
        Value::Object(map)
    }
}

/// The document carried by every event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventPayload {
    pub action: String,
    pub object: ObjectRef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Map<String, Value>>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl EventPayload {
    pub fn new(action: impl Into<String>, object: ObjectRef) -> Self {
        Self {
            action: action.into(),
            object,
            context: None,
            metadata: Map::new(),
        }
    }

    /// Validate an externally submitted payload.
    ///
    /// Only `action` and `object.type` are required; everything else is
    /// carried through as-is.
    pub fn from_submission(value: Value) -> Result<Self, ValidationError> {
        let Value::Object(mut map) = value else {
            return Err(ValidationError::NotAnObject);
        };

        let action = match map.remove("action") {
            None => return Err(ValidationError::MissingField("action")),
            Some(Value::String(s)) if !s.trim().is_empty() => s.trim().to_string(),
            Some(_) => return Err(ValidationError::EmptyField { field: "action" }),
        };

        let object = match map.remove("object") {
            None | Some(Value::Null) => return Err(ValidationError::MissingField("object")),
            Some(v @ Value::Object(_)) => ObjectRef::try_from(v)?,
            Some(_) => return Err(ValidationError::MissingField("object.type")),
        };

        let context = match map.remove("context") {
            Some(Value::Object(c)) => Some(c),
            _ => None,
        };
        let metadata = match map.remove("metadata") {
            Some(Value::Object(m)) => m,
            _ => Map::new(),
        };

        Ok(Self {
            action,
            object,
            context,
            metadata,
        })
    }
}

// =============================================================================
// Records
// =============================================================================

/// An event about to be stored.
#[derive(Debug, Clone, PartialEq)]
pub struct NewEvent {
    pub event_type: String,
    pub subtype: Option<String>,
    pub object_id: String,
    pub actor_id: Option<String>,
    pub payload: EventPayload,
    pub timestamp: DateTime<Utc>,
    pub origin: String,
}

impl NewEvent {
    /// Build an event from a payload; the object id comes from the payload.
    pub fn from_payload(
        event_type: impl Into<String>,
        payload: EventPayload,
        actor_id: Option<String>,
        origin: impl Into<String>,
    ) -> Self {
        let object_id = payload
            .object
            .id()
            .map(|s| s.to_string())
            .unwrap_or_default();
        Self {
            event_type: event_type.into(),
            subtype: None,
            object_id,
            actor_id,
            payload,
            timestamp: Utc::now(),
            origin: origin.into(),
        }
    }

    pub fn with_subtype(mut self, subtype: impl Into<String>) -> Self {
        self.subtype = Some(subtype.into());
        self
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}

/// A stored event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub event_type: String,
    pub subtype: Option<String>,
    pub object_id: String,
    pub actor_id: Option<String>,
    pub payload: EventPayload,
    pub timestamp: DateTime<Utc>,
    /// Owning report; `None` while the event sits in the open window.
    pub report_id: Option<Uuid>,
    pub origin: String,
}

/// Count of events for one type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeCount {
    pub event_type: String,
    pub count: u64,
}

/// Per-type totals, kept in descending count order (ties by type name).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TypeTotals(Vec<TypeCount>);

impl TypeTotals {
    pub fn from_counts<I>(counts: I) -> Self
    where
        I: IntoIterator<Item = (String, u64)>,
    {
        let mut merged: BTreeMap<String, u64> = BTreeMap::new();
        for (event_type, count) in counts {
            *merged.entry(event_type).or_insert(0) += count;
        }
        let mut entries: Vec<TypeCount> = merged
            .into_iter()
            .map(|(event_type, count)| TypeCount { event_type, count })
            .collect();
        entries.sort_by(|a, b| {
            b.count
                .cmp(&a.count)
                .then_with(|| a.event_type.cmp(&b.event_type))
        });
        Self(entries)
    }

    pub fn get(&self, event_type: &str) -> u64 {
        self.0
            .iter()
            .find(|c| c.event_type == event_type)
            .map(|c| c.count)
            .unwrap_or(0)
    }

    pub fn iter(&self) -> impl Iterator<Item = &TypeCount> {
        self.0.iter()
    }

    pub fn total(&self) -> u64 {
        self.0.iter().map(|c| c.count).sum()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Comparison of one type between two consecutive windows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendRecord {
    pub current: u64,
    pub previous: u64,
    pub change_percent: f64,
    pub direction: TrendDirection,
}

/// An actor and how many events they produced in the window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contributor {
    pub actor_id: String,
    pub event_count: u64,
}

/// Computed statistics attached to a report at freeze time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReportSummary {
    pub totals: TypeTotals,
    pub trends: BTreeMap<String, TrendRecord>,
    pub highlights: Vec<String>,
    pub top_contributors: Vec<Contributor>,
    /// Free-text narrative; `None` renders as "No narrative available."
    pub narrative: Option<String>,
}

/// A reporting window and, once frozen, its summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub id: Uuid,
    pub kind: ReportKind,
    pub status: ReportStatus,
    pub window_start: DateTime<Utc>,
    pub window_end: Option<DateTime<Utc>>,
    pub event_count: u64,
    pub summary: Option<ReportSummary>,
    pub frozen_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
}

/// Audit record of one try to transmit a report to one recipient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryAttempt {
    pub id: Uuid,
    pub report_id: Uuid,
    pub recipient: String,
    pub outcome: AttemptOutcome,
    pub attempted_at: DateTime<Utc>,
    pub error: Option<String>,
    pub retry_count: u32,
}
