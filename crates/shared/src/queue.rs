//! Backend `/queue` response.
//!
//! Each list is normally an array of `[priority, promptId, graph, extraData,
//! outputNodeIds]` tuples, but a single tuple (or object) may appear in place
//! of the array. Entries that cannot be read are skipped with a warning.

use comfyui_mini_domain::{NodeId, PromptId, QueueItem, QueueSnapshot};
use serde::{Deserialize, Deserializer};
use serde_json::Value;

use crate::error::ProtocolError;

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct QueueStatusResponse {
    #[serde(default, deserialize_with = "one_or_many")]
    pub queue_running: Vec<Value>,
    #[serde(default, deserialize_with = "one_or_many")]
    pub queue_pending: Vec<Value>,
    /// Only sent by some backend builds; finished runs are tracked locally
    #[serde(default, deserialize_with = "one_or_many")]
    pub queue_completed: Vec<Value>,
}

impl QueueStatusResponse {
    pub fn into_snapshot(self) -> QueueSnapshot {
        QueueSnapshot {
            running: parse_entries(self.queue_running),
            pending: parse_entries(self.queue_pending),
        }
    }
}

fn parse_entries(values: Vec<Value>) -> Vec<QueueItem> {
    values
        .into_iter()
        .filter_map(|value| match parse_queue_entry(value) {
            Ok(item) => Some(item),
            Err(e) => {
                tracing::warn!(error = %e, "Skipping unreadable queue entry");
                None
            }
        })
        .collect()
}

/// Read one queue entry, either in tuple form or as an object.
pub fn parse_queue_entry(value: Value) -> Result<QueueItem, ProtocolError> {
    let invalid = |reason: &str| ProtocolError::InvalidPayload {
        kind: "queue entry".to_string(),
        reason: reason.to_string(),
    };

    let items = match value {
        Value::Array(items) => items,
        Value::Object(_) => {
            return serde_json::from_value(value).map_err(|e| invalid(&e.to_string()));
        }
        _ => return Err(invalid("expected an array or object")),
    };

    let mut fields = items.into_iter();
    let priority = fields
        .next()
        .and_then(|v| v.as_i64().or_else(|| v.as_f64().map(|f| f as i64)))
        .ok_or_else(|| invalid("missing priority"))?;
    let prompt_id = fields
        .next()
        .and_then(|v| v.as_str().map(PromptId::from))
        .ok_or_else(|| invalid("missing prompt id"))?;
    let workflow = fields.next().unwrap_or(Value::Null);
    let extra_data = fields.next().unwrap_or(Value::Null);
    let output_node_ids = fields
        .next()
        .and_then(|v| match v {
            Value::Array(ids) => Some(
                ids.iter()
                    .filter_map(|id| match id {
                        Value::String(s) => Some(NodeId::from(s.as_str())),
                        Value::Number(n) => Some(NodeId::from(n.to_string())),
                        _ => None,
                    })
                    .collect(),
            ),
            _ => None,
        })
        .unwrap_or_default();

    Ok(QueueItem {
        priority,
        prompt_id,
        workflow,
        extra_data,
        output_node_ids,
        workflow_name: None,
    })
}

fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Null => Vec::new(),
        Value::Array(items) if is_single_tuple(&items) => vec![Value::Array(items)],
        Value::Array(items) => items,
        single => vec![single],
    })
}

// A bare tuple starts with its numeric priority; a list of tuples starts with
// an array.
fn is_single_tuple(items: &[Value]) -> bool {
    matches!(items.first(), Some(Value::Number(_)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tuple(priority: i64, id: &str) -> Value {
        json!([priority, id, {"9": {"class_type": "SaveImage", "inputs": {}}}, {"client_id": "c"}, ["9"]])
    }

    #[test]
    fn reads_lists_of_tuples() {
        let response: QueueStatusResponse = serde_json::from_value(json!({
            "queue_running": [tuple(3, "p1")],
            "queue_pending": [tuple(4, "p2"), tuple(5, "p3")]
        }))
        .unwrap();
        let snapshot = response.into_snapshot();

        assert_eq!(snapshot.running.len(), 1);
        let running = &snapshot.running[0];
        assert_eq!(running.priority, 3);
        assert_eq!(running.prompt_id.as_str(), "p1");
        assert_eq!(running.output_node_ids, vec![NodeId::from("9")]);
        assert_eq!(running.node_count(), 1);
        assert_eq!(snapshot.pending.len(), 2);
    }

    #[test]
    fn a_single_tuple_is_one_entry() {
        let response: QueueStatusResponse = serde_json::from_value(json!({
            "queue_running": tuple(1, "p1"),
            "queue_pending": []
        }))
        .unwrap();
        let snapshot = response.into_snapshot();
        assert_eq!(snapshot.running.len(), 1);
        assert!(snapshot.pending.is_empty());
    }

    #[test]
    fn missing_lists_are_empty() {
        let response: QueueStatusResponse = serde_json::from_value(json!({})).unwrap();
        assert!(response.into_snapshot().is_idle());
    }

    #[test]
    fn object_entries_are_accepted() {
        let item = parse_queue_entry(json!({
            "priority": 2,
            "promptId": "p9",
            "workflow": {}
        }))
        .unwrap();
        assert_eq!(item.prompt_id.as_str(), "p9");
    }

    #[test]
    fn unreadable_entries_are_skipped() {
        let response: QueueStatusResponse = serde_json::from_value(json!({
            "queue_running": [["not a priority"], tuple(1, "ok"), 42]
        }))
        .unwrap();
        let running = response.into_snapshot().running;
        assert_eq!(running.len(), 1);
        assert_eq!(running[0].prompt_id.as_str(), "ok");
    }
}
