//! Properties and the arena that owns them.
//!
//! All cross references (owner node, parent, children, link endpoints) are
//! ids into the [`PropertyPool`], never pointers, so the engine stays the
//! single mutation root during an update.

use crate::errors::TangleError;
use crate::typedata::TypeData;
use crate::value::{PropertyData, PropertyKind, PropertyValue};
use crate::NodeId;
use serde::{Deserialize, Serialize};

/// Handle to a property inside a [`PropertyPool`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PropertyId(pub(crate) u32);

/// What a property is for; determines which operations are allowed on it.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PropertySemantics {
    ScriptInput,
    ScriptOutput,
    BindingInput,
    AnimationInput,
    AnimationOutput,
    Interface,
}

impl PropertySemantics {
    /// May appear on the receiving end of a link.
    pub fn is_input(self) -> bool {
        matches!(
            self,
            PropertySemantics::ScriptInput
                | PropertySemantics::BindingInput
                | PropertySemantics::AnimationInput
                | PropertySemantics::Interface
        )
    }

    /// May appear on the driving end of a link.
    pub fn is_output(self) -> bool {
        matches!(
            self,
            PropertySemantics::ScriptOutput
                | PropertySemantics::AnimationOutput
                | PropertySemantics::Interface
        )
    }

    /// May be written through the public set path.
    pub fn is_user_settable(self) -> bool {
        self.is_input()
    }
}

#[derive(Debug)]
pub struct Property {
    name: String,
    kind: PropertyKind,
    semantics: PropertySemantics,
    owner: NodeId,
    parent: Option<PropertyId>,
    children: Vec<PropertyId>,
    /// `Some` for primitive leaves, `None` for struct/array.
    value: Option<PropertyValue>,
    /// True once the value was explicitly written since construction.
    was_set: bool,
    /// True while the value differs from what it was when the owning node
    /// last executed; cleared by the engine after that node runs.
    changed: bool,
    /// True while an incoming link drives this property.
    linked_input: bool,
}

impl Property {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> PropertyKind {
        self.kind
    }

    pub fn semantics(&self) -> PropertySemantics {
        self.semantics
    }

    pub fn owner(&self) -> NodeId {
        self.owner
    }

    pub fn parent(&self) -> Option<PropertyId> {
        self.parent
    }

    pub fn children(&self) -> &[PropertyId] {
        &self.children
    }

    pub fn value(&self) -> Option<&PropertyValue> {
        self.value.as_ref()
    }

    pub fn was_set(&self) -> bool {
        self.was_set
    }

    pub fn changed(&self) -> bool {
        self.changed
    }

    pub fn is_linked_input(&self) -> bool {
        self.linked_input
    }
}

/// Arena holding every property of every node of one engine.
#[derive(Debug, Default)]
pub struct PropertyPool {
    slots: Vec<Option<Property>>,
    free: Vec<u32>,
}

impl PropertyPool {
    /// Builds a property tree from a validated descriptor. Leaves start at
    /// the zero value of their type with `was_set == false`.
    pub fn instantiate(
        &mut self,
        ty: &TypeData,
        semantics: PropertySemantics,
        owner: NodeId,
    ) -> Result<PropertyId, TangleError> {
        ty.validate()?;
        Ok(self.instantiate_validated(ty, semantics, owner, None))
    }

    fn instantiate_validated(
        &mut self,
        ty: &TypeData,
        semantics: PropertySemantics,
        owner: NodeId,
        parent: Option<PropertyId>,
    ) -> PropertyId {
        let id = self.alloc(Property {
            name: ty.name.clone(),
            kind: ty.kind,
            semantics,
            owner,
            parent,
            children: vec![],
            value: PropertyValue::zero(ty.kind),
            was_set: false,
            changed: false,
            linked_input: false,
        });
        let children: Vec<PropertyId> = ty
            .children
            .iter()
            .map(|child| self.instantiate_validated(child, semantics, owner, Some(id)))
            .collect();
        self.slot_mut(id).children = children;
        id
    }

    fn alloc(&mut self, property: Property) -> PropertyId {
        if let Some(index) = self.free.pop() {
            self.slots[index as usize] = Some(property);
            PropertyId(index)
        } else {
            self.slots.push(Some(property));
            PropertyId(self.slots.len() as u32 - 1)
        }
    }

    /// Releases a property and all its descendants.
    pub fn release_tree(&mut self, root: PropertyId) {
        for child in self.slot(root).children.clone() {
            self.release_tree(child);
        }
        self.slots[root.0 as usize] = None;
        self.free.push(root.0);
    }

    fn slot(&self, id: PropertyId) -> &Property {
        self.slots[id.0 as usize]
            .as_ref()
            .expect("property id must refer to a live property")
    }

    fn slot_mut(&mut self, id: PropertyId) -> &mut Property {
        self.slots[id.0 as usize]
            .as_mut()
            .expect("property id must refer to a live property")
    }

    pub fn get(&self, id: PropertyId) -> Option<&Property> {
        self.slots.get(id.0 as usize).and_then(|s| s.as_ref())
    }

    /// Panics on a stale id; engine internals only hold live ids.
    pub fn property(&self, id: PropertyId) -> &Property {
        self.slot(id)
    }

    pub fn child_count(&self, id: PropertyId) -> usize {
        self.slot(id).children.len()
    }

    pub fn child_by_index(&self, id: PropertyId, index: usize) -> Option<PropertyId> {
        self.slot(id).children.get(index).copied()
    }

    pub fn child_by_name(&self, id: PropertyId, name: &str) -> Option<PropertyId> {
        self.slot(id)
            .children
            .iter()
            .copied()
            .find(|&c| self.slot(c).name == name)
    }

    /// Resolves a sequence of child names starting at `root`.
    pub fn resolve_names(&self, root: PropertyId, names: &[&str]) -> Option<PropertyId> {
        let mut current = root;
        for name in names {
            current = self.child_by_name(current, name)?;
        }
        Some(current)
    }

    /// Resolves a child-index path starting at `root`.
    pub fn resolve_path(&self, root: PropertyId, path: &[u32]) -> Option<PropertyId> {
        let mut current = root;
        for &index in path {
            current = self.child_by_index(current, index as usize)?;
        }
        Some(current)
    }

    /// The child-index path from the tree root down to `id`.
    pub fn path_of(&self, id: PropertyId) -> Vec<u32> {
        let mut path = vec![];
        let mut current = id;
        while let Some(parent) = self.slot(current).parent {
            let index = self
                .slot(parent)
                .children
                .iter()
                .position(|&c| c == current)
                .expect("child must be listed in its parent");
            path.push(index as u32);
            current = parent;
        }
        path.reverse();
        path
    }

    /// The root of the tree containing `id`.
    pub fn root_of(&self, id: PropertyId) -> PropertyId {
        let mut current = id;
        while let Some(parent) = self.slot(current).parent {
            current = parent;
        }
        current
    }

    /// All primitive leaves below (and including) `root`, depth first.
    pub fn leaf_descendants(&self, root: PropertyId) -> Vec<PropertyId> {
        let mut leaves = vec![];
        self.collect_leaves(root, &mut leaves);
        leaves
    }

    fn collect_leaves(&self, id: PropertyId, out: &mut Vec<PropertyId>) {
        let property = self.slot(id);
        if property.kind.is_primitive() {
            out.push(id);
        } else {
            for child in property.children.clone() {
                self.collect_leaves(child, out);
            }
        }
    }

    /// Typed read; `None` when the tag does not match, the property is
    /// not a leaf, or the id is stale.
    pub fn get_value<T: PropertyData>(&self, id: PropertyId) -> Option<T> {
        self.get(id)?.value.as_ref().and_then(T::from_value)
    }

    /// The public set path, subject to the semantics matrix. Returns
    /// whether the stored value actually changed.
    pub fn set_value<T: PropertyData>(
        &mut self,
        id: PropertyId,
        value: T,
    ) -> Result<bool, TangleError> {
        let property = self
            .get(id)
            .ok_or_else(|| TangleError::Value("property does not exist".to_string()))?;
        if !property.kind.is_primitive() {
            return Err(TangleError::Value(format!(
                "property '{}' of type {} cannot be set directly",
                property.name, property.kind
            )));
        }
        if property.kind != T::KIND {
            return Err(TangleError::Value(format!(
                "property '{}' of type {} cannot be set with a {} value",
                property.name,
                property.kind,
                T::KIND
            )));
        }
        if !property.semantics.is_user_settable() {
            return Err(TangleError::Value(format!(
                "property '{}' is an output and cannot be set",
                property.name
            )));
        }
        if property.linked_input {
            return Err(TangleError::Value(format!(
                "property '{}' is driven by a link and cannot be set",
                property.name
            )));
        }
        Ok(self.store(id, value.into_value(), true))
    }

    /// Privileged write used by the engine during link propagation.
    /// Bypasses the linked-input check; does not touch `was_set`.
    /// Returns whether the stored value actually changed.
    pub(crate) fn set_from_source(&mut self, id: PropertyId, value: &PropertyValue) -> bool {
        debug_assert_eq!(self.slot(id).kind, value.kind());
        self.store(id, value.clone(), false)
    }

    /// Privileged write used by a node filling its own outputs.
    pub(crate) fn set_node_output(
        &mut self,
        id: PropertyId,
        value: PropertyValue,
    ) -> Result<bool, TangleError> {
        let property = self.slot(id);
        if property.kind != value.kind() {
            return Err(TangleError::Value(format!(
                "property '{}' of type {} cannot be set with a {} value",
                property.name,
                property.kind,
                value.kind()
            )));
        }
        Ok(self.store(id, value, false))
    }

    fn store(&mut self, id: PropertyId, value: PropertyValue, from_user: bool) -> bool {
        let property = self.slot_mut(id);
        let differs = property.value.as_ref() != Some(&value);
        property.value = Some(value);
        if from_user {
            property.was_set = true;
        }
        if differs {
            property.changed = true;
        }
        differs
    }

    pub(crate) fn clear_changed(&mut self, id: PropertyId) {
        self.slot_mut(id).changed = false;
    }

    /// Marks or unmarks `id` as link-driven. Linking clears `was_set`, the
    /// value is owned by the link from now on.
    pub(crate) fn set_linked_input(&mut self, id: PropertyId, linked: bool) {
        let property = self.slot_mut(id);
        property.linked_input = linked;
        if linked {
            property.was_set = false;
        }
    }

    /// Restores persisted leaf state during deserialization.
    pub(crate) fn restore_leaf(
        &mut self,
        id: PropertyId,
        value: PropertyValue,
        was_set: bool,
    ) -> Result<(), TangleError> {
        let property = self.slot_mut(id);
        if property.kind != value.kind() {
            return Err(TangleError::Format(format!(
                "persisted value of type {} does not match property '{}' of type {}",
                value.kind(),
                property.name,
                property.kind
            )));
        }
        property.value = Some(value);
        property.was_set = was_set;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Vec2f;

    fn test_tree() -> (PropertyPool, PropertyId) {
        let mut pool = PropertyPool::default();
        let ty = TypeData::structure(
            "IN",
            vec![
                TypeData::primitive("speed", PropertyKind::Float),
                TypeData::structure(
                    "nested",
                    vec![TypeData::primitive("flag", PropertyKind::Bool)],
                ),
                TypeData::array_of("points", TypeData::primitive("", PropertyKind::Vec2f), 2),
            ],
        );
        let root = pool
            .instantiate(&ty, PropertySemantics::ScriptInput, NodeId(1))
            .unwrap();
        (pool, root)
    }

    #[test]
    fn leaves_default_to_zero_and_unset() {
        let (pool, root) = test_tree();
        let speed = pool.child_by_name(root, "speed").unwrap();
        assert_eq!(pool.get_value::<f32>(speed), Some(0.0));
        assert!(!pool.property(speed).was_set());
        assert!(!pool.property(speed).changed());
    }

    #[test]
    fn set_and_get_round_trip() {
        let (mut pool, root) = test_tree();
        let speed = pool.child_by_name(root, "speed").unwrap();
        assert!(pool.set_value(speed, 2.5f32).unwrap());
        assert_eq!(pool.get_value::<f32>(speed), Some(2.5));
        assert!(pool.property(speed).was_set());
        // Same value again: allowed, but not a change.
        assert!(!pool.set_value(speed, 2.5f32).unwrap());
    }

    #[test]
    fn wrong_type_is_rejected_without_side_effects() {
        let (mut pool, root) = test_tree();
        let speed = pool.child_by_name(root, "speed").unwrap();
        assert!(pool.set_value(speed, true).is_err());
        assert_eq!(pool.get_value::<f32>(speed), Some(0.0));
        assert!(!pool.property(speed).was_set());
    }

    #[test]
    fn complex_properties_cannot_be_set() {
        let (mut pool, root) = test_tree();
        let nested = pool.child_by_name(root, "nested").unwrap();
        assert!(pool.set_value(nested, 1.0f32).is_err());
        assert!(pool.set_value(root, 1.0f32).is_err());
    }

    #[test]
    fn linked_input_rejects_user_set_but_accepts_source() {
        let (mut pool, root) = test_tree();
        let speed = pool.child_by_name(root, "speed").unwrap();
        pool.set_value(speed, 1.0f32).unwrap();
        pool.set_linked_input(speed, true);
        // Linking takes ownership of the value.
        assert!(!pool.property(speed).was_set());
        assert!(pool.set_value(speed, 2.0f32).is_err());
        assert_eq!(pool.get_value::<f32>(speed), Some(1.0));
        assert!(pool.set_from_source(speed, &PropertyValue::Float(3.0)));
        assert_eq!(pool.get_value::<f32>(speed), Some(3.0));
    }

    #[test]
    fn name_and_index_navigation() {
        let (pool, root) = test_tree();
        let flag = pool.resolve_names(root, &["nested", "flag"]).unwrap();
        assert_eq!(pool.property(flag).kind(), PropertyKind::Bool);
        assert_eq!(pool.path_of(flag), vec![1, 0]);
        assert_eq!(pool.resolve_path(root, &[1, 0]), Some(flag));
        assert_eq!(pool.root_of(flag), root);
        assert_eq!(pool.child_by_name(root, "missing"), None);
    }

    #[test]
    fn array_elements_are_unnamed_leaves() {
        let (mut pool, root) = test_tree();
        let points = pool.child_by_name(root, "points").unwrap();
        assert_eq!(pool.child_count(points), 2);
        let first = pool.child_by_index(points, 0).unwrap();
        assert_eq!(pool.property(first).name(), "");
        assert!(pool.set_value(first, [1.0f32, 2.0]).unwrap());
        assert_eq!(pool.get_value::<Vec2f>(first), Some([1.0, 2.0]));
    }

    #[test]
    fn leaf_descendants_depth_first() {
        let (pool, root) = test_tree();
        let leaves = pool.leaf_descendants(root);
        let names: Vec<_> = leaves
            .iter()
            .map(|&l| pool.property(l).name().to_string())
            .collect();
        assert_eq!(names, vec!["speed", "flag", "", ""]);
    }

    #[test]
    fn arrays_of_structs_nest_and_resolve_by_path() {
        let mut pool = PropertyPool::default();
        let element = TypeData::structure(
            "",
            vec![
                TypeData::primitive("position", PropertyKind::Vec3f),
                TypeData::primitive("weight", PropertyKind::Float),
            ],
        );
        let ty = TypeData::structure(
            "IN",
            vec![TypeData::array_of("joints", element, 2)],
        );
        let root = pool
            .instantiate(&ty, PropertySemantics::ScriptInput, NodeId(1))
            .unwrap();

        // Elements are unnamed, so only index paths reach inside them.
        let weight = pool.resolve_path(root, &[0, 1, 1]).unwrap();
        assert_eq!(pool.property(weight).name(), "weight");
        assert!(pool.set_value(weight, 0.75f32).unwrap());
        assert_eq!(pool.path_of(weight), vec![0, 1, 1]);
        assert_eq!(pool.leaf_descendants(root).len(), 4);
        assert_eq!(pool.resolve_names(root, &["joints", "weight"]), None);
    }

    #[test]
    fn release_tree_frees_slots_for_reuse() {
        let (mut pool, root) = test_tree();
        let occupied = pool.slots.iter().filter(|s| s.is_some()).count();
        pool.release_tree(root);
        assert_eq!(pool.slots.iter().filter(|s| s.is_some()).count(), 0);
        let ty = TypeData::primitive("x", PropertyKind::Int32);
        pool.instantiate(&ty, PropertySemantics::Interface, NodeId(2))
            .unwrap();
        assert!(pool.slots.len() <= occupied);
    }
}
