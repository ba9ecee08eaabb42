//! JSON response shapes returned by the platform handlers.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// `Information` is a single text block, or one block per queried slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Information {
    Text(String),
    Slots(Vec<String>),
}

/// Fixed resource envelope for FRUID reads.
///
/// `Actions` and `Resources` are always empty; they are kept so clients see a
/// stable shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryEnvelope {
    #[serde(rename = "Information")]
    pub information: Information,
    #[serde(rename = "Actions")]
    pub actions: Vec<Value>,
    #[serde(rename = "Resources")]
    pub resources: Vec<Value>,
}

impl InventoryEnvelope {
    pub fn new(information: Information) -> Self {
        Self {
            information,
            actions: Vec::new(),
            resources: Vec::new(),
        }
    }

    pub fn to_value(&self) -> Value {
        json!({
            "Information": self.information,
            "Actions": self.actions,
            "Resources": self.resources,
        })
    }
}

/// `{"result": "success"}` / `{"result": "fail"}` returned by action handlers.
pub fn action_result(ok: bool) -> Value {
    json!({ "result": if ok { "success" } else { "fail" } })
}
