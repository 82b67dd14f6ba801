// ABOUTME: Aggregates the client summary from all normalized rows
// ABOUTME: Goods/services classes, countries and SIC codes are derived, the rest are fixed

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::LazyLock;

use super::{Row, Tab};

const CLIENT_NAME: &str = "TMH Client";
const SEARCH_TYPE: &str = "Multi-Source Search";
const BUSINESS_NATURE: &str = "Trademark & Business Intelligence";
const DEFAULT_COUNTRIES: &str = "UK";
const DEFAULT_SIC_CODE: &str = "Educational Support Services";

const MAX_COUNTRIES: usize = 5;
const MAX_SIC_CODES: usize = 3;

static PARENTHESIZED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\(([^()]*)\)").expect("parenthesized code pattern"));

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientInfo {
    pub client_name: String,
    pub search_type: String,
    pub gs_classes: String,
    pub sic_code: String,
    pub business_nature: String,
    pub countries: String,
}

/// Scan every row of every tab once the tabs are built.
pub fn aggregate_client_info(tabs: &[Tab]) -> ClientInfo {
    let rows = || tabs.iter().flat_map(|tab| tab.data.iter());

    ClientInfo {
        client_name: CLIENT_NAME.to_string(),
        search_type: SEARCH_TYPE.to_string(),
        gs_classes: gs_classes(rows()),
        sic_code: sic_codes(tabs),
        business_nature: BUSINESS_NATURE.to_string(),
        countries: countries(rows()),
    }
}

fn gs_classes<'a>(rows: impl Iterator<Item = &'a Row>) -> String {
    let mut classes = Vec::new();
    for row in rows {
        match row.get("classes") {
            Some(Value::String(list)) => classes.extend(list.split(',').map(str::to_string)),
            Some(Value::Number(n)) => classes.push(n.to_string()),
            Some(Value::Array(items)) => classes.extend(items.iter().filter_map(scalar_text)),
            _ => {}
        }
    }

    let mut classes = dedupe(classes.iter().map(|c| c.trim().to_string()));
    // Stable: tokens without a leading number keep their first-seen order at the end.
    classes.sort_by(|a, b| match (leading_number(a), leading_number(b)) {
        (Some(x), Some(y)) => x.len().cmp(&y.len()).then_with(|| x.cmp(y)),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    });
    classes.join(", ")
}

fn countries<'a>(rows: impl Iterator<Item = &'a Row>) -> String {
    let found = dedupe(rows.filter_map(country_of));
    if found.is_empty() {
        return DEFAULT_COUNTRIES.to_string();
    }
    found
        .into_iter()
        .take(MAX_COUNTRIES)
        .collect::<Vec<_>>()
        .join(", ")
}

fn country_of(row: &Row) -> Option<String> {
    let office = row.text("office");
    if let Some(code) = office.as_deref().and_then(office_code) {
        return Some(code);
    }
    row.text("owner_location")
        .or_else(|| row.text("country"))
        .or(office)
}

/// Content of the last `( ... )` group, e.g. `"United Kingdom (UK)"` -> `"UK"`.
fn office_code(office: &str) -> Option<String> {
    PARENTHESIZED
        .captures_iter(office)
        .last()
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|code| !code.is_empty())
}

fn sic_codes(tabs: &[Tab]) -> String {
    let companies = tabs.iter().find(|tab| {
        let name = tab.name.to_lowercase();
        name.contains("company") || name.contains("companies")
    });
    let Some(companies) = companies.filter(|tab| tab.has_data) else {
        return DEFAULT_SIC_CODE.to_string();
    };

    let codes = dedupe(companies.data.iter().filter_map(|row| {
        row.text("sic")
            .and_then(|sic| sic.split_whitespace().next().map(str::to_string))
    }));
    if codes.is_empty() {
        return DEFAULT_SIC_CODE.to_string();
    }
    codes
        .into_iter()
        .take(MAX_SIC_CODES)
        .collect::<Vec<_>>()
        .join(", ")
}

fn dedupe(values: impl Iterator<Item = String>) -> Vec<String> {
    let mut seen = HashSet::new();
    values
        .filter(|v| !v.is_empty() && seen.insert(v.clone()))
        .collect()
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Leading digit run without leading zeros. Shorter runs are smaller numbers,
/// so (length, text) orders them numerically at any width.
fn leading_number(token: &str) -> Option<&str> {
    let end = token
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(token.len());
    if end == 0 {
        return None;
    }
    let digits = token[..end].trim_start_matches('0');
    Some(if digits.is_empty() { "0" } else { digits })
}
