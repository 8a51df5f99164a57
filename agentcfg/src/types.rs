use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value as JsonValue;
use std::collections::{BTreeMap, HashMap};

/// Etag reported when no configuration document exists for a service.
pub const ETAG_SENTINEL: &str = "-";

/// Agent settings, opaque to this crate.
pub type Settings = BTreeMap<String, String>;

/// Service identity as sent to the configuration store.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Service {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,
}

impl Service {
    pub fn new<N>(name: N, environment: Option<String>) -> Self
    where
        N: Into<String>,
    {
        Service {
            name: name.into(),
            environment,
        }
    }
}

/// A normalized agent configuration query.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Query {
    pub service: Service,
    /// Agent making the request. Never part of the cache identity.
    pub agent_name: Option<String>,
    /// Conditional-match token supplied by the caller, already unquoted.
    pub etag: Option<String>,
}

impl Query {
    pub fn cache_key(&self) -> CacheKey {
        CacheKey(self.service.clone())
    }
}

/// Cache identity: service name and environment only.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CacheKey(pub Service);

/// Outcome of a successful fetch, including "no document".
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FetchResult {
    pub settings: Settings,
    pub etag: String,
    pub agent_name: Option<String>,
}

impl FetchResult {
    pub fn not_found() -> Self {
        FetchResult {
            settings: Settings::new(),
            etag: ETAG_SENTINEL.to_string(),
            agent_name: None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.etag == ETAG_SENTINEL
    }
}

impl From<StoreDocument> for FetchResult {
    fn from(document: StoreDocument) -> Self {
        FetchResult {
            settings: document.settings,
            etag: document.etag,
            agent_name: document.agent_name.filter(|agent| !agent.is_empty()),
        }
    }
}

/// The stored configuration document for one service/environment.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct StoreDocument {
    #[serde(default, deserialize_with = "deserialize_settings")]
    pub settings: Settings,
    #[serde(default)]
    pub etag: String,
    #[serde(default)]
    pub agent_name: Option<String>,
}

/// Stores may hold numbers or booleans as setting values; agents always
/// receive strings.
fn deserialize_settings<'de, D>(deserializer: D) -> Result<Settings, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<HashMap<String, JsonValue>> = Option::deserialize(deserializer)?;

    Ok(raw
        .unwrap_or_default()
        .into_iter()
        .filter_map(|(key, value)| {
            let value = match value {
                JsonValue::Null => return None,
                JsonValue::String(s) => s,
                other => other.to_string(),
            };
            Some((key, value))
        })
        .collect())
}
