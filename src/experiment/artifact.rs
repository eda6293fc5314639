//! Artifacts logged with a run
//!
//! An artifact is stored in the event's `value` column as a tagged
//! [`ArtifactValue`]:
//!
//! | input                         | format     | `data`                        |
//! |-------------------------------|------------|-------------------------------|
//! | JSON literal                  | `type`     | the literal                   |
//! | metadata record               | `metadata` | the serialized record         |
//! | model or tracker object       | `model`    | name in the models store      |
//! | frame, records or JSON object | `dataset`  | name in the datasets store    |
//! | anything else (bytes)         | `blob`     | base64 of the bytes           |

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;
use uuid::Uuid;

use crate::metadata::Metadata;
use crate::object::{Object, ObjectType};
use crate::store::{GetOptions, ObjectStore, PutOptions};
use crate::{Error, Result};

/// Where object artifacts are stored, in both stores.
pub const ARTIFACTS_PREFIX: &str = ".experiments/.artefacts/";

/// Something to log as an artifact.
#[derive(Debug, Clone, PartialEq)]
pub enum Artifact<'a> {
    /// Primitive or JSON literal, stored inline
    Value(Value),
    /// Reference to an existing registry object
    Metadata(&'a Metadata),
    /// Object to store in the registry and reference
    Object(&'a Object),
    /// Opaque bytes, stored inline as base64
    Bytes(&'a [u8]),
}

impl Artifact<'_> {
    /// Inline literal.
    #[must_use]
    pub fn value(value: impl Into<Value>) -> Self {
        Self::Value(value.into())
    }
}

impl<'a> From<&'a Metadata> for Artifact<'a> {
    fn from(meta: &'a Metadata) -> Self {
        Self::Metadata(meta)
    }
}

impl<'a> From<&'a Object> for Artifact<'a> {
    fn from(obj: &'a Object) -> Self {
        Self::Object(obj)
    }
}

impl<'a> From<&'a [u8]> for Artifact<'a> {
    fn from(bytes: &'a [u8]) -> Self {
        Self::Bytes(bytes)
    }
}

/// Storage format of an artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactFormat {
    /// JSON literal
    Type,
    /// Serialized metadata record
    Metadata,
    /// Object in the models store
    Model,
    /// Object in the datasets store
    Dataset,
    /// Base64 encoded bytes
    Blob,
}

/// Artifact payload as stored in an event's `value` column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactValue {
    /// Logged key, or store name for `model` and `dataset`
    pub name: String,
    /// Storage format
    pub format: ArtifactFormat,
    /// Literal, record, store name or base64 payload
    pub data: Value,
}

/// An artifact read back from the log.
#[derive(Debug, Clone, PartialEq)]
pub enum RestoredArtifact {
    /// Inline literal
    Value(Value),
    /// Referenced metadata record
    Metadata(Box<Metadata>),
    /// Object loaded from its store
    Object(Object),
    /// Decoded bytes
    Bytes(Vec<u8>),
}

/// Classify and persist an artifact, returning the payload to log.
pub(super) fn store_artifact(
    key: &str,
    artifact: &Artifact<'_>,
    models: &dyn ObjectStore,
    datasets: &dyn ObjectStore,
) -> Result<ArtifactValue> {
    let value = match artifact {
        Artifact::Value(value) => ArtifactValue {
            name: key.to_string(),
            format: ArtifactFormat::Type,
            data: value.clone(),
        },
        Artifact::Metadata(meta) => ArtifactValue {
            name: key.to_string(),
            format: ArtifactFormat::Metadata,
            data: serde_json::to_value(meta)?,
        },
        Artifact::Object(obj) => match obj.object_type() {
            ObjectType::Model | ObjectType::Tracker => {
                let meta = models.put(obj, &artifact_name(), &PutOptions::new().noversion())?;
                ArtifactValue {
                    name: meta.name().to_string(),
                    format: ArtifactFormat::Model,
                    data: Value::from(meta.name()),
                }
            }
            ObjectType::Frame | ObjectType::Records | ObjectType::Json => {
                let meta = datasets.put(obj, &artifact_name(), &PutOptions::new().append(false))?;
                ArtifactValue {
                    name: meta.name().to_string(),
                    format: ArtifactFormat::Dataset,
                    data: Value::from(meta.name()),
                }
            }
            ObjectType::Bytes => {
                let Object::Bytes(bytes) = obj else {
                    return Err(Error::InvalidInput(format!("artifact '{key}' is not bytes")));
                };
                blob(key, bytes)
            }
        },
        Artifact::Bytes(bytes) => blob(key, bytes),
    };
    Ok(value)
}

/// Load an artifact payload back into a value or object.
pub(super) fn restore_artifact(
    value: &ArtifactValue,
    models: &dyn ObjectStore,
    datasets: &dyn ObjectStore,
) -> Result<RestoredArtifact> {
    match value.format {
        ArtifactFormat::Type => Ok(RestoredArtifact::Value(value.data.clone())),
        ArtifactFormat::Metadata => Ok(RestoredArtifact::Metadata(Box::new(
            serde_json::from_value(value.data.clone())?,
        ))),
        ArtifactFormat::Model | ArtifactFormat::Dataset => {
            let store = if value.format == ArtifactFormat::Model {
                models
            } else {
                datasets
            };
            let name = value.data.as_str().unwrap_or(&value.name);
            store
                .get(name, &GetOptions::new())?
                .map(RestoredArtifact::Object)
                .ok_or_else(|| Error::NotFound(format!("artifact object '{name}'")))
        }
        ArtifactFormat::Blob => {
            let encoded = value
                .data
                .as_str()
                .ok_or_else(|| Error::InvalidInput(format!("blob artifact '{}' is not a string", value.name)))?;
            let bytes = STANDARD
                .decode(encoded)
                .map_err(|e| Error::InvalidInput(format!("blob artifact '{}': {e}", value.name)))?;
            Ok(RestoredArtifact::Bytes(bytes))
        }
    }
}

fn artifact_name() -> String {
    format!("{ARTIFACTS_PREFIX}{}", Uuid::new_v4().simple())
}

fn blob(key: &str, bytes: &[u8]) -> ArtifactValue {
    warn!(key, size = bytes.len(), "artifact has no registry backend, storing as base64 blob");
    ArtifactValue {
        name: key.to_string(),
        format: ArtifactFormat::Blob,
        data: Value::from(STANDARD.encode(bytes)),
    }
}
