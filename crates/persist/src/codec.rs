//! Artifact encoding.
//!
//! The engine only needs a [`ModelSerializer`]: something that turns grouped
//! models into bytes and back. [`CborCodec`] is the reference implementation.
//!
//! Layout of a CBOR codec artifact:
//! ```text
//! zstd(
//!   CBOR Envelope {
//!     schema_version: u32,
//!     sha256: hex digest of `body`,
//!     body: bytes = CBOR [ { tag, models: [model value, ...] }, ... ]   // group order
//!   }
//! )
//! ```

use std::io::{Read, Write};
use std::sync::Arc;

use ciborium::Value;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use snapreg_registry::{ModelGroups, ModelTypeTable, ValueError};

/// Current artifact schema version.
pub const ARTIFACT_SCHEMA_VERSION: u32 = 1;

const DEFAULT_COMPRESSION_LEVEL: i32 = 3;

/// Errors from encoding or decoding an artifact.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("CBOR serialization error: {0}")]
    Encode(String),
    #[error("CBOR deserialization error: {0}")]
    Decode(String),
    #[error("model type `{0}` is not registered")]
    UnknownType(String),
    #[error("model is `{actual}`, expected `{expected}`")]
    TypeMismatch { expected: String, actual: String },
    #[error("schema version mismatch: file has v{file_version}, expected v{expected_version}")]
    SchemaMismatch {
        file_version: u32,
        expected_version: u32,
    },
    #[error("integrity check failed: expected {expected}, got {actual}")]
    IntegrityMismatch { expected: String, actual: String },
}

impl CodecError {
    fn from_value(err: ValueError, decoding: bool) -> Self {
        match err {
            ValueError::UnknownType(tag) => Self::UnknownType(tag),
            ValueError::WrongType { expected, actual } => Self::TypeMismatch {
                expected: expected.to_string(),
                actual: actual.to_string(),
            },
            ValueError::Cbor(msg) if decoding => Self::Decode(msg),
            ValueError::Cbor(msg) => Self::Encode(msg),
        }
    }
}

/// Encode/decode capability the save pipeline and loader are written against.
///
/// `decode(encode(groups))` must reproduce the same models (SMRIs, references,
/// fields) in the same group order.
pub trait ModelSerializer: Send + Sync {
    fn encode(&self, groups: &ModelGroups) -> Result<Vec<u8>, CodecError>;
    fn decode(&self, bytes: &[u8]) -> Result<ModelGroups, CodecError>;
}

#[derive(Debug, Serialize, Deserialize)]
struct EncodedGroup {
    tag: String,
    models: Vec<Value>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    schema_version: u32,
    sha256: String,
    body: Value,
}

/// CBOR + zstd codec driven by a [`ModelTypeTable`].
#[derive(Debug, Clone)]
pub struct CborCodec {
    table: Arc<ModelTypeTable>,
    compression_level: i32,
}

impl CborCodec {
    pub fn new(table: Arc<ModelTypeTable>) -> Self {
        Self {
            table,
            compression_level: DEFAULT_COMPRESSION_LEVEL,
        }
    }

    pub fn with_compression_level(mut self, level: i32) -> Self {
        self.compression_level = level;
        self
    }

    pub fn table(&self) -> &Arc<ModelTypeTable> {
        &self.table
    }
}

impl ModelSerializer for CborCodec {
    fn encode(&self, groups: &ModelGroups) -> Result<Vec<u8>, CodecError> {
        let encoded = groups
            .iter()
            .map(|(tag, models)| {
                let models = models
                    .iter()
                    .map(|m| self.table.encode_model(&**m))
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(|e| CodecError::from_value(e, false))?;
                Ok(EncodedGroup {
                    tag: tag.as_str().to_owned(),
                    models,
                })
            })
            .collect::<Result<Vec<_>, CodecError>>()?;

        let body = cbor_serialize(&encoded)?;
        let envelope = Envelope {
            schema_version: ARTIFACT_SCHEMA_VERSION,
            sha256: sha256_hex(&body),
            body: Value::Bytes(body),
        };
        let cbor_bytes = cbor_serialize(&envelope)?;
        let compressed = zstd_compress(&cbor_bytes, self.compression_level)?;

        tracing::debug!(
            groups = groups.group_count(),
            models = groups.model_count(),
            raw = cbor_bytes.len(),
            compressed = compressed.len(),
            "artifact encoded"
        );
        Ok(compressed)
    }

    fn decode(&self, bytes: &[u8]) -> Result<ModelGroups, CodecError> {
        let cbor_bytes = zstd_decompress(bytes)?;
        let envelope: Envelope = cbor_deserialize(&cbor_bytes)?;

        if envelope.schema_version != ARTIFACT_SCHEMA_VERSION {
            return Err(CodecError::SchemaMismatch {
                file_version: envelope.schema_version,
                expected_version: ARTIFACT_SCHEMA_VERSION,
            });
        }

        let Value::Bytes(body) = envelope.body else {
            return Err(CodecError::Decode("envelope body is not a byte string".into()));
        };
        let actual = sha256_hex(&body);
        if actual != envelope.sha256 {
            return Err(CodecError::IntegrityMismatch {
                expected: envelope.sha256,
                actual,
            });
        }

        let encoded: Vec<EncodedGroup> = cbor_deserialize(&body)?;
        let mut groups = ModelGroups::new();
        for group in encoded {
            for value in group.models {
                let model = self
                    .table
                    .decode_model(&group.tag, value)
                    .map_err(|e| CodecError::from_value(e, true))?;
                groups.push(model);
            }
        }

        tracing::debug!(
            groups = groups.group_count(),
            models = groups.model_count(),
            "artifact decoded"
        );
        Ok(groups)
    }
}

fn cbor_serialize<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, CodecError> {
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf).map_err(|e| CodecError::Encode(e.to_string()))?;
    Ok(buf)
}

fn cbor_deserialize<T: for<'de> Deserialize<'de>>(data: &[u8]) -> Result<T, CodecError> {
    ciborium::from_reader(data).map_err(|e| CodecError::Decode(e.to_string()))
}

fn zstd_compress(data: &[u8], level: i32) -> Result<Vec<u8>, CodecError> {
    let mut encoder = zstd::Encoder::new(Vec::new(), level)?;
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

fn zstd_decompress(data: &[u8]) -> Result<Vec<u8>, CodecError> {
    let mut decoder = zstd::Decoder::new(data)?;
    let mut buf = Vec::new();
    decoder.read_to_end(&mut buf)?;
    Ok(buf)
}

pub(crate) fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use snapreg_registry::{ModelHeader, ModelRecord, Smri, SnapshotModel, TypeTag, order_and_group};

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    pub(crate) struct Tree {
        pub header: ModelHeader,
        pub height: f32,
        pub species: String,
    }

    impl ModelRecord for Tree {
        const TYPE_TAG: TypeTag = TypeTag::new("tree");
        const SERIALIZE_ORDER: Option<u32> = Some(5);

        fn header(&self) -> &ModelHeader {
            &self.header
        }
        fn header_mut(&mut self) -> &mut ModelHeader {
            &mut self.header
        }
    }

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    pub(crate) struct Rock {
        pub header: ModelHeader,
        pub mass: u64,
    }

    impl ModelRecord for Rock {
        const TYPE_TAG: TypeTag = TypeTag::new("rock");
        const SERIALIZE_ORDER: Option<u32> = Some(1);

        fn header(&self) -> &ModelHeader {
            &self.header
        }
        fn header_mut(&mut self) -> &mut ModelHeader {
            &mut self.header
        }
    }

    pub(crate) fn table() -> Arc<ModelTypeTable> {
        let mut table = ModelTypeTable::new();
        table
            .register::<Tree>()
            .unwrap()
            .register::<Rock>()
            .unwrap();
        Arc::new(table)
    }

    pub(crate) fn tree(smri: u32, refs: &[u32]) -> Tree {
        Tree {
            header: ModelHeader::with_refs(Smri(smri), refs.iter().copied().map(Smri)),
            height: smri as f32 * 1.5,
            species: format!("oak-{smri}"),
        }
    }

    pub(crate) fn rock(smri: u32, refs: &[u32]) -> Rock {
        Rock {
            header: ModelHeader::with_refs(Smri(smri), refs.iter().copied().map(Smri)),
            mass: u64::from(smri) * 100,
        }
    }

    fn sample_groups(table: &ModelTypeTable) -> ModelGroups {
        let models: Vec<Box<dyn SnapshotModel>> = vec![
            Box::new(tree(1, &[2])),
            Box::new(rock(2, &[1, 2])),
            Box::new(tree(3, &[])),
        ];
        order_and_group(models, table)
    }

    #[test]
    fn roundtrip_preserves_models_and_group_order() {
        let table = table();
        let codec = CborCodec::new(Arc::clone(&table));
        let groups = sample_groups(&table);

        let bytes = codec.encode(&groups).unwrap();
        let decoded = codec.decode(&bytes).unwrap();

        assert_eq!(decoded.group_order(), vec![Rock::TYPE_TAG, Tree::TYPE_TAG]);
        let trees: Vec<&Tree> = decoded
            .get(Tree::TYPE_TAG)
            .unwrap()
            .iter()
            .map(|m| m.downcast_ref::<Tree>().unwrap())
            .collect();
        assert_eq!(trees, vec![&tree(1, &[2]), &tree(3, &[])]);

        let rocks = decoded.get(Rock::TYPE_TAG).unwrap();
        assert_eq!(rocks[0].downcast_ref::<Rock>(), Some(&rock(2, &[1, 2])));
    }

    #[test]
    fn roundtrip_of_empty_groups() {
        let codec = CborCodec::new(table());
        let bytes = codec.encode(&ModelGroups::new()).unwrap();
        assert!(codec.decode(&bytes).unwrap().is_empty());
    }

    #[test]
    fn unregistered_type_fails_encode() {
        let mut only_trees = ModelTypeTable::new();
        only_trees.register::<Tree>().unwrap();
        let codec = CborCodec::new(Arc::new(only_trees));

        let mut groups = ModelGroups::new();
        groups.push(Box::new(rock(1, &[])));
        assert!(matches!(
            codec.encode(&groups),
            Err(CodecError::UnknownType(tag)) if tag == "rock"
        ));
    }

    #[test]
    fn unknown_tag_fails_decode() {
        let bytes = CborCodec::new(table())
            .encode(&sample_groups(&table()))
            .unwrap();

        let mut only_trees = ModelTypeTable::new();
        only_trees.register::<Tree>().unwrap();
        let reader = CborCodec::new(Arc::new(only_trees));
        assert!(matches!(
            reader.decode(&bytes),
            Err(CodecError::UnknownType(tag)) if tag == "rock"
        ));
    }

    #[test]
    fn tampered_body_fails_integrity() {
        let body = cbor_serialize(&Vec::<EncodedGroup>::new()).unwrap();
        let envelope = Envelope {
            schema_version: ARTIFACT_SCHEMA_VERSION,
            sha256: "0".repeat(64),
            body: Value::Bytes(body),
        };
        let bytes = zstd_compress(&cbor_serialize(&envelope).unwrap(), 3).unwrap();
        assert!(matches!(
            CborCodec::new(table()).decode(&bytes),
            Err(CodecError::IntegrityMismatch { .. })
        ));
    }

    #[test]
    fn schema_mismatch_fail_closed() {
        let body = cbor_serialize(&Vec::<EncodedGroup>::new()).unwrap();
        let envelope = Envelope {
            schema_version: 999,
            sha256: sha256_hex(&body),
            body: Value::Bytes(body),
        };
        let bytes = zstd_compress(&cbor_serialize(&envelope).unwrap(), 3).unwrap();
        match CborCodec::new(table()).decode(&bytes) {
            Err(CodecError::SchemaMismatch {
                file_version,
                expected_version,
            }) => {
                assert_eq!(file_version, 999);
                assert_eq!(expected_version, ARTIFACT_SCHEMA_VERSION);
            }
            Err(e) => panic!("expected SchemaMismatch, got: {e}"),
            Ok(_) => panic!("expected error, got Ok"),
        }
    }

    #[test]
    fn garbage_input_is_an_error() {
        let codec = CborCodec::new(table());
        assert!(codec.decode(b"definitely not zstd").is_err());
    }

    #[test]
    fn compression_level_is_configurable() {
        let table = table();
        let groups = sample_groups(&table);
        let fast = CborCodec::new(Arc::clone(&table)).with_compression_level(1);
        let bytes = fast.encode(&groups).unwrap();
        assert_eq!(fast.decode(&bytes).unwrap().model_count(), 3);
    }
}
