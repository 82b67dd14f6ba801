// ABOUTME: Converts loosely-typed extraction results into the canonical display dataset
// ABOUTME: Pure transform: tables become uniform rows, client info is aggregated afterwards

mod client_info;

pub use client_info::{aggregate_client_info, ClientInfo};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;

use crate::error::PortalError;

const TABLE_KEY_PREFIX: &str = "auto_detected_table_";

/// Fields that identify a row, in priority order.
const ID_FIELDS: [&str; 4] = ["app_number", "company_number", "domain", "profile_url"];

/// One extracted record. Keys follow the upstream sheet; `id` is always set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Row(Map<String, Value>);

impl Row {
    pub fn id(&self) -> &str {
        self.0.get("id").and_then(Value::as_str).unwrap_or_default()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Encoded image, if the record carried one.
    pub fn image(&self) -> Option<&str> {
        self.0.get("image").and_then(Value::as_str)
    }

    /// Scalar field rendered as trimmed text; empty values count as absent.
    pub fn text(&self, key: &str) -> Option<String> {
        let text = match self.0.get(key)? {
            Value::String(s) => s.trim().to_string(),
            Value::Number(n) => n.to_string(),
            Value::Bool(b) => b.to_string(),
            _ => return None,
        };
        (!text.is_empty()).then_some(text)
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tab {
    pub name: String,
    #[serde(rename = "hasData")]
    pub has_data: bool,
    pub data: Vec<Row>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedDataset {
    pub client_info: ClientInfo,
    pub tabs: Vec<Tab>,
}

impl NormalizedDataset {
    pub fn row_count(&self) -> usize {
        self.tabs.iter().map(|tab| tab.data.len()).sum()
    }
}

/// Normalize a completed job's result.
///
/// Accepts either a multi-sheet payload (`{ "tabs": [...] }`) or a single
/// sheet carrying an `auto_detected_table_<n>` array, optionally wrapped in a
/// top-level `data` object. Only a non-object payload is an error.
pub fn normalize(raw: &Value) -> Result<NormalizedDataset, PortalError> {
    let root = raw.as_object().ok_or_else(|| {
        PortalError::Normalization(format!("expected a JSON object, got {}", kind_of(raw)))
    })?;
    let root = match root.get("data") {
        Some(Value::Object(inner)) => inner,
        _ => root,
    };

    let tabs: Vec<Tab> = match root.get("tabs") {
        Some(Value::Array(tabs)) => tabs
            .iter()
            .map(|tab| match tab {
                Value::Object(tab) => build_tab(tab, "Unknown Tab"),
                _ => empty_tab("Unknown Tab".to_string(), None),
            })
            .collect(),
        _ => vec![build_tab(root, "Results")],
    };

    let client_info = aggregate_client_info(&tabs);

    tracing::debug!(
        tabs = tabs.len(),
        rows = tabs.iter().map(|t| t.data.len()).sum::<usize>(),
        "Normalized extraction result"
    );

    Ok(NormalizedDataset { client_info, tabs })
}

fn build_tab(tab: &Map<String, Value>, default_name: &str) -> Tab {
    let name = ["sheet_name", "name"]
        .iter()
        .find_map(|key| {
            tab.get(*key)
                .and_then(Value::as_str)
                .filter(|name| !name.trim().is_empty())
        })
        .unwrap_or(default_name)
        .to_string();
    let metadata = tab.get("metadata").filter(|m| m.is_object()).cloned();

    let source = match tab.get("extracted_data") {
        Some(Value::Object(extracted)) => extracted,
        _ => tab,
    };

    // Key/value-only sheets have no table and stay unexpanded.
    let Some(records) = find_table(source) else {
        return empty_tab(name, metadata);
    };

    let mut seen = HashSet::new();
    let data: Vec<Row> = records
        .iter()
        .enumerate()
        .filter_map(|(index, record)| {
            record
                .as_object()
                .map(|record| normalize_record(record, index + 1, &mut seen))
        })
        .collect();

    Tab {
        name,
        has_data: !data.is_empty(),
        data,
        metadata,
    }
}

fn empty_tab(name: String, metadata: Option<Value>) -> Tab {
    Tab {
        name,
        has_data: false,
        data: Vec::new(),
        metadata,
    }
}

/// First `auto_detected_table_<n>` key holding an array.
fn find_table(source: &Map<String, Value>) -> Option<&Vec<Value>> {
    source.iter().find_map(|(key, value)| {
        let suffix = key.strip_prefix(TABLE_KEY_PREFIX)?;
        if suffix.is_empty() || !suffix.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        value.as_array()
    })
}

fn normalize_record(
    record: &Map<String, Value>,
    position: usize,
    seen: &mut HashSet<String>,
) -> Row {
    let mut fields = Map::with_capacity(record.len() + 1);
    for (key, value) in record {
        if key == "image" || key == "id" {
            continue;
        }
        fields.insert(key.clone(), value.clone());
    }

    let row = Row(fields);
    let id = unique_id(&row, position, seen);
    let mut fields = row.0;
    fields.insert("id".to_string(), Value::String(id));

    if let Some(image) = record.get("image").and_then(flatten_image) {
        fields.insert("image".to_string(), Value::String(image));
    }

    Row(fields)
}

/// `{ "base64": "..." }` and plain strings both become the encoded string.
fn flatten_image(image: &Value) -> Option<String> {
    match image {
        Value::String(s) => Some(s.clone()),
        Value::Object(wrapper) => wrapper
            .get("base64")
            .and_then(Value::as_str)
            .map(str::to_string),
        _ => None,
    }
}

fn unique_id(row: &Row, position: usize, seen: &mut HashSet<String>) -> String {
    let base = ID_FIELDS
        .iter()
        .find_map(|field| row.text(field))
        .unwrap_or_else(|| format!("row-{}", position));

    let mut id = base.clone();
    let mut suffix = position;
    while seen.contains(&id) {
        id = format!("{}-{}", base, suffix);
        suffix += 1;
    }
    seen.insert(id.clone());
    id
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
