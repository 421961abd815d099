use crate::model::stage::Stage;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Stable unique identifier of a pipeline item (a deal).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(String);

impl ItemId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ItemId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// An item on the board.
///
/// `payload` carries the business fields (title, owner, amount, ...). The
/// board engine never inspects it; it is copied unchanged on stage updates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub id: ItemId,
    pub stage: Stage,
    #[serde(default)]
    pub payload: BTreeMap<String, Value>,
    /// Server-stamped modification time in microseconds since the epoch.
    #[serde(default)]
    pub updated_at_us: i64,
}

impl Item {
    #[must_use]
    pub fn new(id: impl Into<ItemId>, stage: Stage) -> Self {
        Self {
            id: id.into(),
            stage,
            payload: BTreeMap::new(),
            updated_at_us: 0,
        }
    }

    /// Builder-style payload field setter.
    #[must_use]
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.payload.insert(key.into(), value.into());
        self
    }

    /// Copy of this item in another stage, payload untouched.
    #[must_use]
    pub fn with_stage(&self, stage: Stage) -> Self {
        Self {
            stage,
            ..self.clone()
        }
    }

    /// Title field, if the payload carries one.
    #[must_use]
    pub fn title(&self) -> Option<&str> {
        self.payload.get("title").and_then(Value::as_str)
    }
}

impl From<String> for ItemId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

#[cfg(test)]
mod tests {
    use super::{Item, ItemId};
    use crate::model::stage::Stage;
    use serde_json::json;

    #[test]
    fn with_stage_copies_payload_unchanged() {
        let item = Item::new("d1", Stage::new("Lead"))
            .with_field("title", "Acme renewal")
            .with_field("amount", 12_500);
        let moved = item.with_stage(Stage::new("Proposal"));

        assert_eq!(moved.stage, Stage::new("Proposal"));
        assert_eq!(moved.payload, item.payload);
        assert_eq!(moved.id, item.id);
        assert_eq!(moved.title(), Some("Acme renewal"));
    }

    #[test]
    fn item_json_shape() {
        let item = Item::new("d1", Stage::new("Lead")).with_field("owner", "sam");
        let value = serde_json::to_value(&item).expect("serialize");
        assert_eq!(
            value,
            json!({
                "id": "d1",
                "stage": "Lead",
                "payload": {"owner": "sam"},
                "updated_at_us": 0
            })
        );
        let back: Item = serde_json::from_value(value).expect("deserialize");
        assert_eq!(back, item);
    }

    #[test]
    fn item_id_displays_raw() {
        assert_eq!(ItemId::new("deal-7").to_string(), "deal-7");
    }
}
