//! Hierarchical type descriptors from which property trees are built.

use crate::errors::TangleError;
use crate::value::PropertyKind;
use serde::{Deserialize, Serialize};

/// Describes the shape of a property tree: a name, a type tag, and (for
/// struct/array kinds) the descriptors of the children.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TypeData {
    pub name: String,
    pub kind: PropertyKind,
    pub children: Vec<TypeData>,
}

impl TypeData {
    pub fn primitive(name: impl Into<String>, kind: PropertyKind) -> Self {
        TypeData {
            name: name.into(),
            kind,
            children: vec![],
        }
    }

    pub fn structure(name: impl Into<String>, children: Vec<TypeData>) -> Self {
        TypeData {
            name: name.into(),
            kind: PropertyKind::Struct,
            children,
        }
    }

    /// An array of `count` elements, each shaped like `element`.
    /// Array elements carry no name of their own.
    pub fn array_of(name: impl Into<String>, element: TypeData, count: usize) -> Self {
        let mut element = element;
        element.name.clear();
        TypeData {
            name: name.into(),
            kind: PropertyKind::Array,
            children: std::iter::repeat(element).take(count).collect(),
        }
    }

    /// Checks the descriptor invariants: primitives have no children, struct
    /// children have unique non-empty names, array elements are unnamed and
    /// share one type structure.
    pub fn validate(&self) -> Result<(), TangleError> {
        match self.kind {
            PropertyKind::Struct => {
                let mut seen = std::collections::BTreeSet::new();
                for child in &self.children {
                    if child.name.is_empty() {
                        return Err(TangleError::Schema(format!(
                            "struct '{}' has a child with an empty name",
                            self.name
                        )));
                    }
                    if !seen.insert(child.name.as_str()) {
                        return Err(TangleError::Schema(format!(
                            "struct '{}' has duplicate child name '{}'",
                            self.name, child.name
                        )));
                    }
                    child.validate()?;
                }
            }
            PropertyKind::Array => {
                for child in &self.children {
                    if !child.name.is_empty() {
                        return Err(TangleError::Schema(format!(
                            "array '{}' has a named element '{}'",
                            self.name, child.name
                        )));
                    }
                    child.validate()?;
                }
                if let Some(first) = self.children.first() {
                    if !self.children.iter().all(|c| first.same_structure(c)) {
                        return Err(TangleError::Schema(format!(
                            "array '{}' has elements of differing types",
                            self.name
                        )));
                    }
                }
            }
            _ => {
                if !self.children.is_empty() {
                    return Err(TangleError::Schema(format!(
                        "primitive property '{}' of type {} cannot have children",
                        self.name, self.kind
                    )));
                }
            }
        }
        Ok(())
    }

    /// Structural equality: same kinds and child names all the way down,
    /// ignoring the name of the roots themselves.
    pub fn same_structure(&self, other: &TypeData) -> bool {
        self.kind == other.kind
            && self.children.len() == other.children.len()
            && self
                .children
                .iter()
                .zip(other.children.iter())
                .all(|(a, b)| a.name == b.name && a.same_structure(b))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn struct_with_unique_names_is_valid() {
        let ty = TypeData::structure(
            "IN",
            vec![
                TypeData::primitive("a", PropertyKind::Float),
                TypeData::primitive("b", PropertyKind::Vec3f),
            ],
        );
        assert!(ty.validate().is_ok());
    }

    #[test]
    fn duplicate_child_names_are_rejected() {
        let ty = TypeData::structure(
            "IN",
            vec![
                TypeData::primitive("a", PropertyKind::Float),
                TypeData::primitive("a", PropertyKind::Float),
            ],
        );
        let err = ty.validate().unwrap_err();
        assert!(err.to_string().contains("duplicate child name 'a'"));
    }

    #[test]
    fn primitive_with_children_is_rejected() {
        let ty = TypeData {
            name: "x".into(),
            kind: PropertyKind::Float,
            children: vec![TypeData::primitive("y", PropertyKind::Float)],
        };
        assert!(ty.validate().is_err());
    }

    #[test]
    fn array_elements_share_structure() {
        let ty = TypeData::array_of("arr", TypeData::primitive("", PropertyKind::Vec2f), 3);
        assert!(ty.validate().is_ok());
        assert_eq!(ty.children.len(), 3);
        assert!(ty.children.iter().all(|c| c.name.is_empty()));

        let mut broken = ty.clone();
        broken.children[1].kind = PropertyKind::Float;
        assert!(broken.validate().is_err());
    }

    #[test]
    fn same_structure_ignores_root_name() {
        let a = TypeData::structure("A", vec![TypeData::primitive("x", PropertyKind::Bool)]);
        let b = TypeData::structure("B", vec![TypeData::primitive("x", PropertyKind::Bool)]);
        let c = TypeData::structure("C", vec![TypeData::primitive("y", PropertyKind::Bool)]);
        assert!(a.same_structure(&b));
        assert!(!a.same_structure(&c));
    }
}
