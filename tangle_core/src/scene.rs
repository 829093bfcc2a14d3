//! The host rendering scene, seen as an opaque sink.
//!
//! Binding nodes forward their input leaves into these objects; the engine
//! never reads host state back except where anchor points need a position
//! and a projection. Handles are shared single-threaded via `Rc<RefCell>`.

use crate::value::{PropertyKind, PropertyValue, Vec2f, Vec3f};
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::rc::Rc;

/// Identity of a host scene object, stable across save/load.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SceneObjectId(pub u64);

/// One settable uniform of an appearance.
#[derive(Clone, Debug, PartialEq)]
pub struct UniformInfo {
    pub name: String,
    pub kind: PropertyKind,
}

pub trait TransformObject: std::fmt::Debug {
    fn id(&self) -> SceneObjectId;
    fn name(&self) -> String;
    fn set_visibility(&mut self, visible: bool);
    fn set_rotation(&mut self, rotation: Vec3f);
    fn set_translation(&mut self, translation: Vec3f);
    fn set_scaling(&mut self, scaling: Vec3f);
    /// World-space origin of the object, for anchor points.
    fn world_position(&self) -> Vec3f;
}

pub trait AppearanceObject: std::fmt::Debug {
    fn id(&self) -> SceneObjectId;
    fn name(&self) -> String;
    /// The settable uniforms, in a stable order.
    fn uniforms(&self) -> Vec<UniformInfo>;
    fn set_uniform(&mut self, name: &str, value: &PropertyValue);
}

pub trait CameraObject: std::fmt::Debug {
    fn id(&self) -> SceneObjectId;
    fn name(&self) -> String;
    fn set_viewport(&mut self, offset_x: i32, offset_y: i32, width: i32, height: i32);
    fn set_frustum(&mut self, near_plane: f32, far_plane: f32, field_of_view: f32, aspect: f32);
    /// Projects a world-space point to viewport coordinates plus depth.
    fn project(&self, world: Vec3f) -> (Vec2f, f32);
}

pub trait RenderPassObject: std::fmt::Debug {
    fn id(&self) -> SceneObjectId;
    fn name(&self) -> String;
    fn set_enabled(&mut self, enabled: bool);
    fn set_render_order(&mut self, order: i32);
}

pub type TransformHandle = Rc<RefCell<dyn TransformObject>>;
pub type AppearanceHandle = Rc<RefCell<dyn AppearanceObject>>;
pub type CameraHandle = Rc<RefCell<dyn CameraObject>>;
pub type RenderPassHandle = Rc<RefCell<dyn RenderPassObject>>;

/// Resolves persisted scene object ids when an engine is loaded.
pub trait Scene {
    fn find_transform(&self, id: SceneObjectId) -> Option<TransformHandle>;
    fn find_appearance(&self, id: SceneObjectId) -> Option<AppearanceHandle>;
    fn find_camera(&self, id: SceneObjectId) -> Option<CameraHandle>;
    fn find_render_pass(&self, id: SceneObjectId) -> Option<RenderPassHandle>;
}
