use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub type Slices = IndexMap<String, Value>;

/// The durable record: `{ schemaVersion, slices: { name: value } }`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedSnapshot {
    #[serde(default)]
    pub schema_version: u32,
    #[serde(default)]
    pub slices: Slices,
}

impl PersistedSnapshot {
    pub fn new(schema_version: u32, slices: Slices) -> Self {
        Self {
            schema_version,
            slices,
        }
    }

    pub fn slice(&self, name: &str) -> Option<&Value> {
        self.slices.get(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn json_shape_matches_durable_format() {
        let mut slices = Slices::new();
        slices.insert("user".into(), json!({ "name": "x" }));
        let snapshot = PersistedSnapshot::new(3, slices);
        let encoded = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(
            encoded,
            json!({ "schemaVersion": 3, "slices": { "user": { "name": "x" } } })
        );

        let legacy: PersistedSnapshot =
            serde_json::from_value(json!({ "slices": { "user": {} } })).unwrap();
        assert_eq!(legacy.schema_version, 0);
    }

    #[test]
    fn cbor_round_trip_keeps_slice_order() {
        let mut slices = Slices::new();
        slices.insert("zeta".into(), json!([1, 2.5, "three", null, true]));
        slices.insert("alpha".into(), json!({ "nested": { "n": -4 } }));
        let snapshot = PersistedSnapshot::new(1, slices);
        let bytes = serde_cbor::to_vec(&snapshot).expect("encode");
        let decoded: PersistedSnapshot = serde_cbor::from_slice(&bytes).expect("decode");
        assert_eq!(decoded, snapshot);
        assert_eq!(decoded.slices.keys().collect::<Vec<_>>(), vec!["zeta", "alpha"]);
    }
}
