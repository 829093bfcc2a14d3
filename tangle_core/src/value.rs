//! The typed value model shared by all properties.

use serde::{Deserialize, Serialize};

pub type Vec2f = [f32; 2];
pub type Vec3f = [f32; 3];
pub type Vec4f = [f32; 4];
pub type Vec2i = [i32; 2];
pub type Vec3i = [i32; 3];
pub type Vec4i = [i32; 4];

/// Runtime type tag of a property.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PropertyKind {
    Float,
    Vec2f,
    Vec3f,
    Vec4f,
    Int32,
    Vec2i,
    Vec3i,
    Vec4i,
    Bool,
    String,
    Struct,
    Array,
}

impl PropertyKind {
    /// Primitive kinds carry a value and are the only kinds that can be linked.
    pub fn is_primitive(self) -> bool {
        !self.can_have_children()
    }

    pub fn can_have_children(self) -> bool {
        matches!(self, PropertyKind::Struct | PropertyKind::Array)
    }

    /// Kinds usable as animation keyframes or data array elements.
    pub fn is_interpolatable(self) -> bool {
        matches!(
            self,
            PropertyKind::Float
                | PropertyKind::Vec2f
                | PropertyKind::Vec3f
                | PropertyKind::Vec4f
                | PropertyKind::Int32
                | PropertyKind::Vec2i
                | PropertyKind::Vec3i
                | PropertyKind::Vec4i
        )
    }

    pub fn name(self) -> &'static str {
        match self {
            PropertyKind::Float => "Float",
            PropertyKind::Vec2f => "Vec2f",
            PropertyKind::Vec3f => "Vec3f",
            PropertyKind::Vec4f => "Vec4f",
            PropertyKind::Int32 => "Int32",
            PropertyKind::Vec2i => "Vec2i",
            PropertyKind::Vec3i => "Vec3i",
            PropertyKind::Vec4i => "Vec4i",
            PropertyKind::Bool => "Bool",
            PropertyKind::String => "String",
            PropertyKind::Struct => "Struct",
            PropertyKind::Array => "Array",
        }
    }
}

impl std::fmt::Display for PropertyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A tagged primitive value as stored in a leaf property.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum PropertyValue {
    Float(f32),
    Vec2f(Vec2f),
    Vec3f(Vec3f),
    Vec4f(Vec4f),
    Int32(i32),
    Vec2i(Vec2i),
    Vec3i(Vec3i),
    Vec4i(Vec4i),
    Bool(bool),
    String(String),
}

impl PropertyValue {
    pub fn kind(&self) -> PropertyKind {
        match self {
            PropertyValue::Float(_) => PropertyKind::Float,
            PropertyValue::Vec2f(_) => PropertyKind::Vec2f,
            PropertyValue::Vec3f(_) => PropertyKind::Vec3f,
            PropertyValue::Vec4f(_) => PropertyKind::Vec4f,
            PropertyValue::Int32(_) => PropertyKind::Int32,
            PropertyValue::Vec2i(_) => PropertyKind::Vec2i,
            PropertyValue::Vec3i(_) => PropertyKind::Vec3i,
            PropertyValue::Vec4i(_) => PropertyKind::Vec4i,
            PropertyValue::Bool(_) => PropertyKind::Bool,
            PropertyValue::String(_) => PropertyKind::String,
        }
    }

    /// The default value a freshly constructed leaf of `kind` holds.
    /// Returns `None` for complex kinds, they have no value of their own.
    pub fn zero(kind: PropertyKind) -> Option<PropertyValue> {
        Some(match kind {
            PropertyKind::Float => PropertyValue::Float(0.0),
            PropertyKind::Vec2f => PropertyValue::Vec2f([0.0; 2]),
            PropertyKind::Vec3f => PropertyValue::Vec3f([0.0; 3]),
            PropertyKind::Vec4f => PropertyValue::Vec4f([0.0; 4]),
            PropertyKind::Int32 => PropertyValue::Int32(0),
            PropertyKind::Vec2i => PropertyValue::Vec2i([0; 2]),
            PropertyKind::Vec3i => PropertyValue::Vec3i([0; 3]),
            PropertyKind::Vec4i => PropertyValue::Vec4i([0; 4]),
            PropertyKind::Bool => PropertyValue::Bool(false),
            PropertyKind::String => PropertyValue::String(String::new()),
            PropertyKind::Struct | PropertyKind::Array => return None,
        })
    }
}

/// Rust types that map onto a [`PropertyKind`] tag, for typed get/set.
pub trait PropertyData: Sized {
    const KIND: PropertyKind;

    fn into_value(self) -> PropertyValue;
    fn from_value(value: &PropertyValue) -> Option<Self>;
}

macro_rules! impl_property_data {
    ($t:ty, $kind:ident) => {
        impl PropertyData for $t {
            const KIND: PropertyKind = PropertyKind::$kind;

            fn into_value(self) -> PropertyValue {
                PropertyValue::$kind(self)
            }

            fn from_value(value: &PropertyValue) -> Option<Self> {
                match value {
                    PropertyValue::$kind(v) => Some(v.clone()),
                    _ => None,
                }
            }
        }
    };
}

impl_property_data!(f32, Float);
impl_property_data!(Vec2f, Vec2f);
impl_property_data!(Vec3f, Vec3f);
impl_property_data!(Vec4f, Vec4f);
impl_property_data!(i32, Int32);
impl_property_data!(Vec2i, Vec2i);
impl_property_data!(Vec3i, Vec3i);
impl_property_data!(Vec4i, Vec4i);
impl_property_data!(bool, Bool);
impl_property_data!(String, String);
