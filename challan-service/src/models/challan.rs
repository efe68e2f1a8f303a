//! Challans, the vehicles they belong to, and the line items a client pays for.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;
use std::collections::HashSet;
use tracing::warn;
use uuid::Uuid;

use super::money::serialize_opt_decimal;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChallanStatus {
    Pending,
    Overdue,
    Paid,
}

impl ChallanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Overdue => "OVERDUE",
            Self::Paid => "PAID",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(Self::Pending),
            "OVERDUE" => Some(Self::Overdue),
            "PAID" => Some(Self::Paid),
            _ => None,
        }
    }
}

impl std::fmt::Display for ChallanStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Vehicle {
    pub id: Uuid,
    pub vehicle_number: String,
    pub vehicle_type: String,
    pub owner_name: Option<String>,
    pub image_url: Option<String>,
}

/// Stored challan row. `status` is kept as text like the other enum columns.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Challan {
    pub id: Uuid,
    pub vehicle_id: Uuid,
    pub challan_number: String,
    pub violation_type: String,
    pub description: Option<String>,
    pub amount: Decimal,
    pub status: String,
    pub fine_date: Option<NaiveDate>,
    pub fine_time: Option<NaiveTime>,
    pub location: Option<String>,
    pub proof_image_url: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl Challan {
    pub fn parsed_status(&self) -> Option<ChallanStatus> {
        ChallanStatus::parse(&self.status)
    }
}

/// One challan as the client submitted it for payment.
///
/// `id` is the public challan number, `db_id` the internal row id. Both are
/// kept as raw JSON: a callback arrives after the money is captured, so a
/// malformed id must not reject it. Every other field the client sends is
/// kept in `extra` so the receipt snapshot reproduces the line item exactly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChallanLineItem {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub db_id: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        serialize_with = "serialize_opt_decimal"
    )]
    pub amount: Option<Decimal>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Strings and numbers as text. Empty strings, null and structured values
/// have no text.
fn value_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

impl ChallanLineItem {
    /// Label used in gateway notes: the challan number, else the row id.
    pub fn reference(&self) -> Option<String> {
        self.id
            .as_ref()
            .and_then(value_text)
            .or_else(|| self.db_id.as_ref().and_then(value_text))
    }

    /// Internal row id, when `dbId` holds a UUID.
    pub fn internal_id(&self) -> Option<Uuid> {
        let raw = self.db_id.as_ref().and_then(value_text)?;
        match Uuid::parse_str(&raw) {
            Ok(id) => Some(id),
            Err(_) => {
                warn!(db_id = %raw, "Ignoring line item with non-UUID dbId");
                None
            }
        }
    }
}

/// Distinct internal challan ids referenced by `items`, in first-seen order.
/// Items without a UUID `dbId` are skipped.
pub fn internal_challan_ids(items: &[ChallanLineItem]) -> Vec<Uuid> {
    let mut seen = HashSet::new();
    items
        .iter()
        .filter_map(ChallanLineItem::internal_id)
        .filter(|id| seen.insert(*id))
        .collect()
}

/// Comma-joined references for the gateway order notes.
pub fn challan_references(items: &[ChallanLineItem]) -> String {
    items
        .iter()
        .filter_map(ChallanLineItem::reference)
        .collect::<Vec<_>>()
        .join(",")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn item(value: serde_json::Value) -> ChallanLineItem {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn line_item_keeps_unknown_fields() {
        let raw = json!({
            "id": "CH-2023-89210",
            "dbId": "7f1c1d0e-8d0a-4b8e-9a53-0f4f4c1f2a11",
            "amount": 1000,
            "type": "Overspeeding",
            "location": "Mumbai-Pune Expressway, km 42"
        });
        let parsed = item(raw);

        assert_eq!(parsed.reference().as_deref(), Some("CH-2023-89210"));
        assert_eq!(parsed.amount, Some(Decimal::from(1000)));
        assert_eq!(parsed.extra["type"], "Overspeeding");

        let back = serde_json::to_value(&parsed).unwrap();
        assert_eq!(back["location"], "Mumbai-Pune Expressway, km 42");
        assert_eq!(back["dbId"], "7f1c1d0e-8d0a-4b8e-9a53-0f4f4c1f2a11");
        assert_eq!(back["amount"].as_f64(), Some(1000.0));
    }

    #[test]
    fn internal_ids_skip_missing_and_duplicates() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let items = vec![
            item(json!({"id": "CH-1", "dbId": a})),
            item(json!({"id": "CH-2"})),
            item(json!({"id": "CH-3", "dbId": b})),
            item(json!({"id": "CH-1", "dbId": a})),
        ];
        assert_eq!(internal_challan_ids(&items), vec![a, b]);
    }

    #[test]
    fn malformed_ids_are_kept_but_not_used() {
        let a = Uuid::new_v4();
        let items = vec![
            item(json!({"id": 7, "dbId": 42})),
            item(json!({"id": "CH-2", "dbId": "not-a-uuid"})),
            item(json!({"id": "CH-3", "dbId": a})),
            item(json!({"id": null, "dbId": {"nested": true}})),
        ];

        assert_eq!(internal_challan_ids(&items), vec![a]);
        assert_eq!(challan_references(&items), "7,CH-2,CH-3");

        let back = serde_json::to_value(&items[0]).unwrap();
        assert_eq!(back["dbId"], 42);
        assert_eq!(back["id"], 7);
    }

    #[test]
    fn references_fall_back_to_row_id() {
        let a = Uuid::new_v4();
        let items = vec![
            item(json!({"id": "CH-1"})),
            item(json!({"dbId": a})),
            item(json!({"amount": 10})),
        ];
        assert_eq!(challan_references(&items), format!("CH-1,{}", a));
    }

    #[test]
    fn status_round_trips_through_text() {
        for status in [ChallanStatus::Pending, ChallanStatus::Overdue, ChallanStatus::Paid] {
            assert_eq!(ChallanStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(ChallanStatus::parse("paid"), None);
    }
}
