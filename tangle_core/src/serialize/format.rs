//! The file format: a fixed binary header followed by a bincode-encoded,
//! versioned payload.

use crate::errors::TangleError;
use crate::nodes::animation::InterpolationType;
use crate::nodes::data_array::ArrayData;
use crate::property::PropertySemantics;
use crate::value::{PropertyKind, PropertyValue};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use serde::{Deserialize, Serialize};

pub const FILE_MAGIC: [u8; 4] = *b"TGLE";
/// Current file format version.
pub const FILE_FORMAT_VERSION: u32 = 2;
/// The previous version, still loadable in compatibility mode.
pub const FILE_FORMAT_COMPAT_VERSION: u32 = 1;

/// magic + host version triple + runtime version triple + format version.
pub const HEADER_LEN: usize = 4 + 12 + 12 + 4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHeader {
    pub host_version: [u32; 3],
    pub runtime_version: [u32; 3],
    pub format_version: u32,
}

impl FileHeader {
    pub fn write(&self, out: &mut Vec<u8>) -> Result<(), TangleError> {
        out.extend_from_slice(&FILE_MAGIC);
        for part in self.host_version.iter().chain(self.runtime_version.iter()) {
            out.write_u32::<LittleEndian>(*part)?;
        }
        out.write_u32::<LittleEndian>(self.format_version)?;
        Ok(())
    }

    /// Parses the header; returns it plus the number of consumed bytes.
    pub fn read(data: &[u8]) -> Result<(FileHeader, usize), TangleError> {
        if data.len() < HEADER_LEN {
            return Err(TangleError::Format(format!(
                "buffer of {} bytes is too short to hold a file header",
                data.len()
            )));
        }
        if data[..4] != FILE_MAGIC {
            return Err(TangleError::Format(
                "buffer does not start with the file magic".into(),
            ));
        }
        let mut cursor = std::io::Cursor::new(&data[4..HEADER_LEN]);
        let mut triple = || -> Result<[u32; 3], TangleError> {
            Ok([
                cursor.read_u32::<LittleEndian>()?,
                cursor.read_u32::<LittleEndian>()?,
                cursor.read_u32::<LittleEndian>()?,
            ])
        };
        let host_version = triple()?;
        let runtime_version = triple()?;
        let format_version = cursor.read_u32::<LittleEndian>()?;
        Ok((
            FileHeader {
                host_version,
                runtime_version,
                format_version,
            },
            HEADER_LEN,
        ))
    }
}

/// One property, persisted with its whole subtree.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PropertyRecord {
    pub name: String,
    pub kind: PropertyKind,
    pub semantics: PropertySemantics,
    /// Present exactly for primitive leaves.
    pub value: Option<PropertyValue>,
    pub was_set: bool,
    pub children: Vec<PropertyRecord>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DataArrayRecord {
    pub id: u64,
    pub name: String,
    pub data: ArrayData,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ChannelRecord {
    pub name: String,
    pub timestamps: u64,
    pub keyframes: u64,
    pub interpolation: InterpolationType,
    pub tangents_in: Option<u64>,
    pub tangents_out: Option<u64>,
}

/// The per-variant payload of a node.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum NodeKindRecord {
    Script { source: String },
    Interface,
    Animation { channels: Vec<ChannelRecord> },
    Timer,
    AnchorPoint { transform_node: u64, camera_node: u64 },
    TransformBinding { object: u64 },
    AppearanceBinding { object: u64 },
    CameraBinding { object: u64 },
    RenderPassBinding { object: u64 },
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct NodeRecord {
    pub id: u64,
    pub name: String,
    pub kind: NodeKindRecord,
    pub input: Option<PropertyRecord>,
    /// Absent for interface nodes, whose single tree is stored as `input`.
    pub output: Option<PropertyRecord>,
}

/// A link, persisted as node ids plus child-index paths (name paths would
/// be ambiguous for unnamed array elements).
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct LinkRecord {
    pub source_node: u64,
    pub source_path: Vec<u32>,
    pub target_node: u64,
    pub target_path: Vec<u32>,
}

pub mod v1 {
    use super::{DataArrayRecord, LinkRecord, NodeRecord};
    use serde::{Deserialize, Serialize};

    #[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
    pub struct Root {
        pub data_arrays: Vec<DataArrayRecord>,
        pub nodes: Vec<NodeRecord>,
        pub links: Vec<LinkRecord>,
    }
}

pub mod v2 {
    use super::{DataArrayRecord, LinkRecord, NodeRecord};
    use serde::{Deserialize, Serialize};

    #[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
    pub struct Metadata {
        /// Free-form name of the tool that wrote the file.
        pub exporter: String,
    }

    #[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
    pub struct Root {
        pub metadata: Metadata,
        pub data_arrays: Vec<DataArrayRecord>,
        pub nodes: Vec<NodeRecord>,
        pub links: Vec<LinkRecord>,
    }

    impl From<super::v1::Root> for Root {
        fn from(root: super::v1::Root) -> Self {
            Root {
                metadata: Metadata::default(),
                data_arrays: root.data_arrays,
                nodes: root.nodes,
                links: root.links,
            }
        }
    }
}

/// The payload root. Variant order is append-only so older files keep
/// their bincode tag.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum FileConfig {
    V1(v1::Root),
    V2(v2::Root),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header() -> FileHeader {
        FileHeader {
            host_version: [1, 2, 3],
            runtime_version: [0, 1, 0],
            format_version: FILE_FORMAT_VERSION,
        }
    }

    #[test]
    fn header_round_trip() {
        let mut buffer = vec![];
        header().write(&mut buffer).unwrap();
        assert_eq!(buffer.len(), HEADER_LEN);
        let (read, consumed) = FileHeader::read(&buffer).unwrap();
        assert_eq!(read, header());
        assert_eq!(consumed, HEADER_LEN);
    }

    #[test]
    fn truncated_header_is_rejected() {
        let mut buffer = vec![];
        header().write(&mut buffer).unwrap();
        let err = FileHeader::read(&buffer[..10]).unwrap_err();
        assert!(err.to_string().contains("too short"));
    }

    #[test]
    fn wrong_magic_is_rejected() {
        let mut buffer = vec![];
        header().write(&mut buffer).unwrap();
        buffer[0] = b'X';
        let err = FileHeader::read(&buffer).unwrap_err();
        assert!(err.to_string().contains("magic"));
    }

    #[test]
    fn payload_round_trip_keeps_records() {
        let root = v2::Root {
            metadata: v2::Metadata {
                exporter: "test".into(),
            },
            data_arrays: vec![DataArrayRecord {
                id: 1,
                name: "stamps".into(),
                data: ArrayData::Float(vec![0.0, 1.0]),
            }],
            nodes: vec![NodeRecord {
                id: 1,
                name: "node".into(),
                kind: NodeKindRecord::Timer,
                input: Some(PropertyRecord {
                    name: "IN".into(),
                    kind: PropertyKind::Struct,
                    semantics: PropertySemantics::ScriptInput,
                    value: None,
                    was_set: false,
                    children: vec![PropertyRecord {
                        name: "tick".into(),
                        kind: PropertyKind::Float,
                        semantics: PropertySemantics::ScriptInput,
                        value: Some(PropertyValue::Float(0.5)),
                        was_set: true,
                        children: vec![],
                    }],
                }),
                output: None,
            }],
            links: vec![LinkRecord {
                source_node: 1,
                source_path: vec![0],
                target_node: 2,
                target_path: vec![1, 0],
            }],
        };
        let config = FileConfig::V2(root);
        let encoded = bincode::serialize(&config).unwrap();
        let decoded: FileConfig = bincode::deserialize(&encoded).unwrap();
        assert_eq!(decoded, config);
    }

    #[test]
    fn previous_version_payload_still_decodes() {
        // A file written when only V1 existed carries variant tag 0, which
        // the current enum still maps to V1.
        let root = v1::Root {
            data_arrays: vec![],
            nodes: vec![],
            links: vec![],
        };
        let encoded = bincode::serialize(&FileConfig::V1(root.clone())).unwrap();
        match bincode::deserialize(&encoded).unwrap() {
            FileConfig::V1(decoded) => assert_eq!(decoded, root),
            other => panic!("unexpected payload {other:?}"),
        }
        let upgraded: v2::Root = root.into();
        assert_eq!(upgraded.metadata, v2::Metadata::default());
    }
}
