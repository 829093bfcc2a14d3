//! Binding nodes: the write-through layer into the host scene.
//!
//! A binding forwards exactly those input leaves that were explicitly set
//! by the user (`was_set`) or that a link drove to a new value this tick.
//! Leaves never touched since creation are not pushed to the host, so
//! host-side defaults survive until the logic graph takes over a field.

use crate::errors::TangleError;
use crate::property::{Property, PropertyId, PropertyPool};
use crate::scene::{
    AppearanceHandle, CameraHandle, RenderPassHandle, SceneObjectId, TransformHandle,
};
use crate::typedata::TypeData;
use crate::value::{PropertyKind, Vec3f};

fn should_write(property: &Property) -> bool {
    property.was_set() || (property.is_linked_input() && property.changed())
}

fn leaf<T: crate::value::PropertyData>(
    pool: &PropertyPool,
    parent: PropertyId,
    name: &str,
) -> Result<Option<(PropertyId, T)>, String> {
    let id = pool
        .child_by_name(parent, name)
        .ok_or_else(|| format!("binding input '{name}' is missing"))?;
    if !should_write(pool.property(id)) {
        return Ok(None);
    }
    let value = pool
        .get_value(id)
        .ok_or_else(|| format!("binding input '{name}' has an unexpected type"))?;
    Ok(Some((id, value)))
}

#[derive(Debug)]
pub struct TransformBinding {
    object: TransformHandle,
}

impl TransformBinding {
    pub(crate) fn new(object: TransformHandle) -> Self {
        TransformBinding { object }
    }

    pub fn object(&self) -> &TransformHandle {
        &self.object
    }

    pub fn object_id(&self) -> SceneObjectId {
        self.object.borrow().id()
    }

    pub(crate) fn input_type() -> TypeData {
        TypeData::structure(
            "IN",
            vec![
                TypeData::primitive("visibility", PropertyKind::Bool),
                TypeData::primitive("rotation", PropertyKind::Vec3f),
                TypeData::primitive("translation", PropertyKind::Vec3f),
                TypeData::primitive("scaling", PropertyKind::Vec3f),
            ],
        )
    }

    pub(crate) fn update(
        &mut self,
        input: Option<PropertyId>,
        pool: &mut PropertyPool,
    ) -> Result<(), String> {
        let input = input.ok_or("transform binding has no inputs")?;
        let mut object = self.object.borrow_mut();
        if let Some((_, visible)) = leaf::<bool>(pool, input, "visibility")? {
            object.set_visibility(visible);
        }
        if let Some((_, rotation)) = leaf::<Vec3f>(pool, input, "rotation")? {
            object.set_rotation(rotation);
        }
        if let Some((_, translation)) = leaf::<Vec3f>(pool, input, "translation")? {
            object.set_translation(translation);
        }
        if let Some((_, scaling)) = leaf::<Vec3f>(pool, input, "scaling")? {
            object.set_scaling(scaling);
        }
        Ok(())
    }
}

#[derive(Debug)]
pub struct AppearanceBinding {
    object: AppearanceHandle,
}

impl AppearanceBinding {
    pub(crate) fn new(object: AppearanceHandle) -> Self {
        AppearanceBinding { object }
    }

    pub fn object(&self) -> &AppearanceHandle {
        &self.object
    }

    pub fn object_id(&self) -> SceneObjectId {
        self.object.borrow().id()
    }

    /// Derives the input schema from the host object's uniforms.
    pub(crate) fn input_type(object: &AppearanceHandle) -> Result<TypeData, TangleError> {
        let object = object.borrow();
        let mut children = vec![];
        for uniform in object.uniforms() {
            if !uniform.kind.is_interpolatable() {
                return Err(TangleError::Attachment(format!(
                    "uniform '{}' of appearance '{}' has unsupported type {}",
                    uniform.name,
                    object.name(),
                    uniform.kind
                )));
            }
            children.push(TypeData::primitive(uniform.name, uniform.kind));
        }
        Ok(TypeData::structure("IN", children))
    }

    pub(crate) fn update(
        &mut self,
        input: Option<PropertyId>,
        pool: &mut PropertyPool,
    ) -> Result<(), String> {
        let input = input.ok_or("appearance binding has no inputs")?;
        let mut object = self.object.borrow_mut();
        for index in 0..pool.child_count(input) {
            let id = pool
                .child_by_index(input, index)
                .ok_or("appearance input schema changed during update")?;
            let property = pool.property(id);
            if !should_write(property) {
                continue;
            }
            let value = property
                .value()
                .ok_or("appearance input is not a leaf")?
                .clone();
            object.set_uniform(pool.property(id).name(), &value);
        }
        Ok(())
    }
}

#[derive(Debug)]
pub struct CameraBinding {
    object: CameraHandle,
}

impl CameraBinding {
    pub(crate) fn new(object: CameraHandle) -> Self {
        CameraBinding { object }
    }

    pub fn object(&self) -> &CameraHandle {
        &self.object
    }

    pub fn object_id(&self) -> SceneObjectId {
        self.object.borrow().id()
    }

    pub(crate) fn input_type() -> TypeData {
        TypeData::structure(
            "IN",
            vec![
                TypeData::structure(
                    "viewport",
                    vec![
                        TypeData::primitive("offsetX", PropertyKind::Int32),
                        TypeData::primitive("offsetY", PropertyKind::Int32),
                        TypeData::primitive("width", PropertyKind::Int32),
                        TypeData::primitive("height", PropertyKind::Int32),
                    ],
                ),
                TypeData::structure(
                    "frustum",
                    vec![
                        TypeData::primitive("nearPlane", PropertyKind::Float),
                        TypeData::primitive("farPlane", PropertyKind::Float),
                        TypeData::primitive("fieldOfView", PropertyKind::Float),
                        TypeData::primitive("aspectRatio", PropertyKind::Float),
                    ],
                ),
            ],
        )
    }

    pub(crate) fn update(
        &mut self,
        input: Option<PropertyId>,
        pool: &mut PropertyPool,
    ) -> Result<(), String> {
        let input = input.ok_or("camera binding has no inputs")?;
        let viewport = pool
            .child_by_name(input, "viewport")
            .ok_or("camera input 'viewport' is missing")?;
        let frustum = pool
            .child_by_name(input, "frustum")
            .ok_or("camera input 'frustum' is missing")?;

        // The host setters take the whole group; one touched leaf flushes
        // the group with the current values of its siblings.
        let group_touched = |pool: &PropertyPool, group: PropertyId| {
            (0..pool.child_count(group)).any(|i| {
                pool.child_by_index(group, i)
                    .map(|id| should_write(pool.property(id)))
                    .unwrap_or(false)
            })
        };

        let read = |pool: &PropertyPool, group: PropertyId, index: usize| {
            pool.child_by_index(group, index)
                .and_then(|id| pool.property(id).value().cloned())
        };

        let mut object = self.object.borrow_mut();
        if group_touched(pool, viewport) {
            let mut values = [0i32; 4];
            for (index, value) in values.iter_mut().enumerate() {
                *value = match read(pool, viewport, index) {
                    Some(crate::value::PropertyValue::Int32(v)) => v,
                    _ => return Err("camera viewport inputs must be Int32".into()),
                };
            }
            object.set_viewport(values[0], values[1], values[2], values[3]);
        }
        if group_touched(pool, frustum) {
            let mut values = [0f32; 4];
            for (index, value) in values.iter_mut().enumerate() {
                *value = match read(pool, frustum, index) {
                    Some(crate::value::PropertyValue::Float(v)) => v,
                    _ => return Err("camera frustum inputs must be Float".into()),
                };
            }
            object.set_frustum(values[0], values[1], values[2], values[3]);
        }
        Ok(())
    }
}

#[derive(Debug)]
pub struct RenderPassBinding {
    object: RenderPassHandle,
}

impl RenderPassBinding {
    pub(crate) fn new(object: RenderPassHandle) -> Self {
        RenderPassBinding { object }
    }

    pub fn object(&self) -> &RenderPassHandle {
        &self.object
    }

    pub fn object_id(&self) -> SceneObjectId {
        self.object.borrow().id()
    }

    pub(crate) fn input_type() -> TypeData {
        TypeData::structure(
            "IN",
            vec![
                TypeData::primitive("enabled", PropertyKind::Bool),
                TypeData::primitive("renderOrder", PropertyKind::Int32),
            ],
        )
    }

    pub(crate) fn update(
        &mut self,
        input: Option<PropertyId>,
        pool: &mut PropertyPool,
    ) -> Result<(), String> {
        let input = input.ok_or("render pass binding has no inputs")?;
        let mut object = self.object.borrow_mut();
        if let Some((_, enabled)) = leaf::<bool>(pool, input, "enabled")? {
            object.set_enabled(enabled);
        }
        if let Some((_, order)) = leaf::<i32>(pool, input, "renderOrder")? {
            object.set_render_order(order);
        }
        Ok(())
    }
}
