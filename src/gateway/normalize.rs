//! Field extraction shared by the gateway adapters.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::Decimal;
use serde_json::Value;

use super::RecordTransformError;
use crate::money::{parse_major_units, parse_minor_units};

/// Default currency when a gateway omits it. All supported gateways settle in BRL.
pub(crate) const DEFAULT_CURRENCY: &str = "BRL";

/// Reads fields off one raw gateway item, attaching its id to any error.
pub(crate) struct Item<'a> {
    raw: &'a Value,
    id: Option<String>,
}

impl<'a> Item<'a> {
    pub(crate) fn new(raw: &'a Value, id_field: &str) -> Self {
        let id = id_string(raw.get(id_field));
        Self { raw, id }
    }

    pub(crate) fn error(&self, message: impl Into<String>) -> RecordTransformError {
        RecordTransformError::new(self.id.clone(), message)
    }

    pub(crate) fn id(&self) -> Result<String, RecordTransformError> {
        match &self.id {
            Some(id) if !id.is_empty() => Ok(id.clone()),
            _ => Err(self.error("missing id")),
        }
    }

    /// Follow a `/`-separated path, e.g. `amount/value`.
    pub(crate) fn path(&self, path: &str) -> Option<&'a Value> {
        path.split('/')
            .try_fold(self.raw, |node, key| node.get(key))
            .filter(|v| !v.is_null())
    }

    pub(crate) fn str(&self, path: &str) -> Option<String> {
        self.path(path).and_then(|v| id_string(Some(v)))
    }

    pub(crate) fn required_str(&self, path: &str) -> Result<String, RecordTransformError> {
        self.str(path)
            .ok_or_else(|| self.error(format!("missing field {}", path)))
    }

    pub(crate) fn major_amount(&self, path: &str) -> Result<Decimal, RecordTransformError> {
        let value = self
            .path(path)
            .ok_or_else(|| self.error(format!("missing amount {}", path)))?;
        parse_major_units(value).ok_or_else(|| self.error(format!("unreadable amount {}", path)))
    }

    pub(crate) fn minor_amount(&self, path: &str) -> Result<Decimal, RecordTransformError> {
        let value = self
            .path(path)
            .ok_or_else(|| self.error(format!("missing amount {}", path)))?;
        parse_minor_units(value).ok_or_else(|| self.error(format!("unreadable amount {}", path)))
    }

    /// First of `paths` that holds a readable timestamp.
    pub(crate) fn timestamp(&self, paths: &[&str]) -> Result<DateTime<Utc>, RecordTransformError> {
        paths
            .iter()
            .filter_map(|p| self.str(p))
            .find_map(|s| parse_timestamp(&s))
            .ok_or_else(|| self.error(format!("no readable timestamp in {}", paths.join(", "))))
    }

    pub(crate) fn date(&self, path: &str) -> Option<NaiveDate> {
        self.str(path)
            .and_then(|s| parse_timestamp(&s))
            .map(|ts| ts.date_naive())
    }

    pub(crate) fn currency(&self, path: &str) -> String {
        self.str(path)
            .map(|c| c.to_ascii_uppercase())
            .unwrap_or_else(|| DEFAULT_CURRENCY.to_string())
    }

    pub(crate) fn raw(&self) -> Value {
        self.raw.clone()
    }
}

/// Ids arrive as strings from most gateways and as numbers from Mercado Pago.
pub(crate) fn id_string(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// RFC 3339, naive `YYYY-MM-DD HH:MM:SS` (assumed UTC) or a bare date.
pub(crate) fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .map(|d| d.and_time(NaiveTime::MIN).and_utc())
}

/// Pull the item array out of a list response.
pub(crate) fn list_items<'a>(
    body: &'a Value,
    field: &str,
) -> Option<&'a Vec<Value>> {
    body.get(field).and_then(Value::as_array)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::str::FromStr;

    #[test]
    fn test_parse_timestamp_formats() {
        let rfc = parse_timestamp("2024-01-15T10:30:00.000-03:00").unwrap();
        assert_eq!(rfc.to_rfc3339(), "2024-01-15T13:30:00+00:00");

        let naive = parse_timestamp("2024-01-15 10:30:00").unwrap();
        assert_eq!(naive.to_rfc3339(), "2024-01-15T10:30:00+00:00");

        let date = parse_timestamp("2024-01-15").unwrap();
        assert_eq!(date.to_rfc3339(), "2024-01-15T00:00:00+00:00");

        assert!(parse_timestamp("yesterday").is_none());
    }

    #[test]
    fn test_item_paths_and_errors() {
        let raw = json!({"id": 991, "amount": {"value": 2590}, "created": null});
        let item = Item::new(&raw, "id");
        assert_eq!(item.id().unwrap(), "991");
        assert_eq!(item.minor_amount("amount/value").unwrap(), Decimal::from_str("25.90").unwrap());
        assert!(item.path("created").is_none());

        let err = item.required_str("customer/id").unwrap_err();
        assert_eq!(err.external_id.as_deref(), Some("991"));
        assert!(err.message.contains("customer/id"));
    }

    #[test]
    fn test_missing_id() {
        let raw = json!({"value": 10});
        let item = Item::new(&raw, "id");
        assert!(item.id().is_err());
        assert_eq!(item.currency("currency"), "BRL");
    }
}
