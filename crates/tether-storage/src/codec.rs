use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use serde_json::{Map, Value};

use crate::{PersistedSnapshot, SnapshotStage, StorageError, StorageResult};

/// Converts one slice between its in-memory and durable forms.
pub trait SliceCodec: Send + Sync {
    fn encode(&self, value: &Value) -> Result<Value, String>;
    fn decode(&self, stored: Value) -> Result<Value, String>;
}

/// Stores the slice as-is.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityCodec;

impl SliceCodec for IdentityCodec {
    fn encode(&self, value: &Value) -> Result<Value, String> {
        Ok(value.clone())
    }

    fn decode(&self, stored: Value) -> Result<Value, String> {
        Ok(stored)
    }
}

/// Stores only the listed top-level fields of an object slice. The loaded
/// value is partial and relies on the one-level merge at load time.
#[derive(Debug, Clone)]
pub struct FieldsCodec {
    fields: Vec<String>,
}

impl FieldsCodec {
    pub fn new<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            fields: fields.into_iter().map(Into::into).collect(),
        }
    }

    fn pick(&self, object: &Map<String, Value>) -> Value {
        let picked: Map<String, Value> = self
            .fields
            .iter()
            .filter_map(|field| object.get(field).map(|v| (field.clone(), v.clone())))
            .collect();
        Value::Object(picked)
    }
}

impl SliceCodec for FieldsCodec {
    fn encode(&self, value: &Value) -> Result<Value, String> {
        match value {
            Value::Object(object) => Ok(self.pick(object)),
            other => Err(format!("expected an object slice, found {other}")),
        }
    }

    fn decode(&self, stored: Value) -> Result<Value, String> {
        match &stored {
            Value::Object(object) => Ok(self.pick(object)),
            _ => Err("expected an object".into()),
        }
    }
}

/// The allow-list of persisted slices with the codec for each. Slices not in
/// the map are never written and are dropped on load.
#[derive(Clone, Default)]
pub struct StorageMap {
    codecs: IndexMap<String, Arc<dyn SliceCodec>>,
}

impl fmt::Debug for StorageMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageMap")
            .field("slices", &self.codecs.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl StorageMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn slice(mut self, name: impl Into<String>) -> Self {
        self.insert(name, Arc::new(IdentityCodec));
        self
    }

    pub fn slice_with(mut self, name: impl Into<String>, codec: Arc<dyn SliceCodec>) -> Self {
        self.insert(name, codec);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, codec: Arc<dyn SliceCodec>) {
        self.codecs.insert(name.into(), codec);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.codecs.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.codecs.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.codecs.is_empty()
    }

    fn codec_error(slice: &str, message: String) -> StorageError {
        StorageError::Codec {
            slice: slice.to_string(),
            message,
        }
    }
}

impl SnapshotStage for StorageMap {
    fn name(&self) -> &'static str {
        "select"
    }

    fn on_load(&self, snapshot: PersistedSnapshot) -> StorageResult<PersistedSnapshot> {
        let PersistedSnapshot {
            schema_version,
            slices,
        } = snapshot;
        let mut selected = IndexMap::new();
        for (name, stored) in slices {
            let Some(codec) = self.codecs.get(&name) else {
                log::debug!("dropping stored slice '{name}' outside the storage map");
                continue;
            };
            let value = codec
                .decode(stored)
                .map_err(|message| Self::codec_error(&name, message))?;
            selected.insert(name, value);
        }
        Ok(PersistedSnapshot::new(schema_version, selected))
    }

    fn on_save(&self, snapshot: PersistedSnapshot) -> StorageResult<PersistedSnapshot> {
        let mut selected = IndexMap::new();
        for (name, codec) in &self.codecs {
            let Some(value) = snapshot.slices.get(name) else {
                continue;
            };
            let encoded = codec
                .encode(value)
                .map_err(|message| Self::codec_error(name, message))?;
            selected.insert(name.clone(), encoded);
        }
        Ok(PersistedSnapshot::new(snapshot.schema_version, selected))
    }
}
