//! Immutable typed buffers, referenced by animation channels.

use crate::value::{PropertyKind, PropertyValue, Vec2f, Vec2i, Vec3f, Vec3i, Vec4f, Vec4i};
use crate::DataArrayId;
use serde::{Deserialize, Serialize};

/// The payload of a data array. Only interpolatable kinds are allowed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ArrayData {
    Float(Vec<f32>),
    Vec2f(Vec<Vec2f>),
    Vec3f(Vec<Vec3f>),
    Vec4f(Vec<Vec4f>),
    Int32(Vec<i32>),
    Vec2i(Vec<Vec2i>),
    Vec3i(Vec<Vec3i>),
    Vec4i(Vec<Vec4i>),
}

impl ArrayData {
    pub fn kind(&self) -> PropertyKind {
        match self {
            ArrayData::Float(_) => PropertyKind::Float,
            ArrayData::Vec2f(_) => PropertyKind::Vec2f,
            ArrayData::Vec3f(_) => PropertyKind::Vec3f,
            ArrayData::Vec4f(_) => PropertyKind::Vec4f,
            ArrayData::Int32(_) => PropertyKind::Int32,
            ArrayData::Vec2i(_) => PropertyKind::Vec2i,
            ArrayData::Vec3i(_) => PropertyKind::Vec3i,
            ArrayData::Vec4i(_) => PropertyKind::Vec4i,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            ArrayData::Float(v) => v.len(),
            ArrayData::Vec2f(v) => v.len(),
            ArrayData::Vec3f(v) => v.len(),
            ArrayData::Vec4f(v) => v.len(),
            ArrayData::Int32(v) => v.len(),
            ArrayData::Vec2i(v) => v.len(),
            ArrayData::Vec3i(v) => v.len(),
            ArrayData::Vec4i(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn element(&self, index: usize) -> Option<PropertyValue> {
        Some(match self {
            ArrayData::Float(v) => PropertyValue::Float(*v.get(index)?),
            ArrayData::Vec2f(v) => PropertyValue::Vec2f(*v.get(index)?),
            ArrayData::Vec3f(v) => PropertyValue::Vec3f(*v.get(index)?),
            ArrayData::Vec4f(v) => PropertyValue::Vec4f(*v.get(index)?),
            ArrayData::Int32(v) => PropertyValue::Int32(*v.get(index)?),
            ArrayData::Vec2i(v) => PropertyValue::Vec2i(*v.get(index)?),
            ArrayData::Vec3i(v) => PropertyValue::Vec3i(*v.get(index)?),
            ArrayData::Vec4i(v) => PropertyValue::Vec4i(*v.get(index)?),
        })
    }
}

/// A named, immutable, engine-owned buffer.
#[derive(Clone, Debug, PartialEq)]
pub struct DataArray {
    id: DataArrayId,
    name: String,
    data: ArrayData,
}

impl DataArray {
    pub(crate) fn new(id: DataArrayId, name: impl Into<String>, data: ArrayData) -> Self {
        DataArray {
            id,
            name: name.into(),
            data,
        }
    }

    pub fn id(&self) -> DataArrayId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn data(&self) -> &ArrayData {
        &self.data
    }

    pub fn kind(&self) -> PropertyKind {
        self.data.kind()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn elements_are_tagged_values() {
        let data = ArrayData::Vec2f(vec![[0.0, 10.0], [1.0, 20.0]]);
        assert_eq!(data.kind(), PropertyKind::Vec2f);
        assert_eq!(data.len(), 2);
        assert_eq!(data.element(1), Some(PropertyValue::Vec2f([1.0, 20.0])));
        assert_eq!(data.element(2), None);
    }

    #[test]
    fn array_carries_id_and_name() {
        let array = DataArray::new(DataArrayId(7), "stamps", ArrayData::Float(vec![0.0, 1.0]));
        assert_eq!(array.id(), DataArrayId(7));
        assert_eq!(array.name(), "stamps");
        assert_eq!(array.kind(), PropertyKind::Float);
        assert_eq!(array.len(), 2);
    }
}
