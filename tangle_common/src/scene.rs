//! An in-memory host scene whose objects remember what was written to
//! them. Shaped after the fakes the engine's own tests use.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;
use tangle_core::scene::{
    AppearanceHandle, AppearanceObject, CameraHandle, CameraObject, RenderPassHandle,
    RenderPassObject, Scene, SceneObjectId, TransformHandle, TransformObject, UniformInfo,
};
use tangle_core::value::{PropertyKind, PropertyValue, Vec2f, Vec3f};

#[derive(Debug)]
pub struct MemoryTransform {
    id: SceneObjectId,
    name: String,
    pub visibility: bool,
    pub rotation: Vec3f,
    pub translation: Vec3f,
    pub scaling: Vec3f,
    /// Counts every setter call, to observe write-through granularity.
    pub writes: usize,
}

impl TransformObject for MemoryTransform {
    fn id(&self) -> SceneObjectId {
        self.id
    }

    fn name(&self) -> String {
        self.name.clone()
    }

    fn set_visibility(&mut self, visible: bool) {
        self.visibility = visible;
        self.writes += 1;
    }

    fn set_rotation(&mut self, rotation: Vec3f) {
        self.rotation = rotation;
        self.writes += 1;
    }

    fn set_translation(&mut self, translation: Vec3f) {
        self.translation = translation;
        self.writes += 1;
    }

    fn set_scaling(&mut self, scaling: Vec3f) {
        self.scaling = scaling;
        self.writes += 1;
    }

    fn world_position(&self) -> Vec3f {
        self.translation
    }
}

#[derive(Debug)]
pub struct MemoryAppearance {
    id: SceneObjectId,
    name: String,
    uniforms: Vec<UniformInfo>,
    /// Uniform writes, latest value per name.
    pub written: BTreeMap<String, PropertyValue>,
}

impl AppearanceObject for MemoryAppearance {
    fn id(&self) -> SceneObjectId {
        self.id
    }

    fn name(&self) -> String {
        self.name.clone()
    }

    fn uniforms(&self) -> Vec<UniformInfo> {
        self.uniforms.clone()
    }

    fn set_uniform(&mut self, name: &str, value: &PropertyValue) {
        self.written.insert(name.to_string(), value.clone());
    }
}

#[derive(Debug)]
pub struct MemoryCamera {
    id: SceneObjectId,
    name: String,
    pub viewport: [i32; 4],
    pub frustum: [f32; 4],
}

impl CameraObject for MemoryCamera {
    fn id(&self) -> SceneObjectId {
        self.id
    }

    fn name(&self) -> String {
        self.name.clone()
    }

    fn set_viewport(&mut self, offset_x: i32, offset_y: i32, width: i32, height: i32) {
        self.viewport = [offset_x, offset_y, width, height];
    }

    fn set_frustum(&mut self, near_plane: f32, far_plane: f32, field_of_view: f32, aspect: f32) {
        self.frustum = [near_plane, far_plane, field_of_view, aspect];
    }

    fn project(&self, world: Vec3f) -> (Vec2f, f32) {
        // A flat stand-in projection: offset by the viewport origin, depth
        // straight from the z component.
        (
            [
                world[0] + self.viewport[0] as f32,
                world[1] + self.viewport[1] as f32,
            ],
            world[2],
        )
    }
}

#[derive(Debug)]
pub struct MemoryRenderPass {
    id: SceneObjectId,
    name: String,
    pub enabled: bool,
    pub render_order: i32,
}

impl RenderPassObject for MemoryRenderPass {
    fn id(&self) -> SceneObjectId {
        self.id
    }

    fn name(&self) -> String {
        self.name.clone()
    }

    fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    fn set_render_order(&mut self, order: i32) {
        self.render_order = order;
    }
}

/// Owns in-memory scene objects and resolves them by id on load.
#[derive(Debug, Default)]
pub struct MemoryScene {
    next_id: u64,
    transforms: Vec<Rc<RefCell<MemoryTransform>>>,
    appearances: Vec<Rc<RefCell<MemoryAppearance>>>,
    cameras: Vec<Rc<RefCell<MemoryCamera>>>,
    render_passes: Vec<Rc<RefCell<MemoryRenderPass>>>,
}

impl MemoryScene {
    pub fn new() -> Self {
        MemoryScene::default()
    }

    fn allocate_id(&mut self) -> SceneObjectId {
        self.next_id += 1;
        SceneObjectId(self.next_id)
    }

    pub fn add_transform(&mut self, name: &str) -> Rc<RefCell<MemoryTransform>> {
        let object = Rc::new(RefCell::new(MemoryTransform {
            id: self.allocate_id(),
            name: name.to_string(),
            visibility: true,
            rotation: [0.0; 3],
            translation: [0.0; 3],
            scaling: [1.0; 3],
            writes: 0,
        }));
        self.transforms.push(object.clone());
        object
    }

    pub fn add_appearance(
        &mut self,
        name: &str,
        uniforms: Vec<(&str, PropertyKind)>,
    ) -> Rc<RefCell<MemoryAppearance>> {
        let object = Rc::new(RefCell::new(MemoryAppearance {
            id: self.allocate_id(),
            name: name.to_string(),
            uniforms: uniforms
                .into_iter()
                .map(|(name, kind)| UniformInfo {
                    name: name.to_string(),
                    kind,
                })
                .collect(),
            written: BTreeMap::new(),
        }));
        self.appearances.push(object.clone());
        object
    }

    pub fn add_camera(&mut self, name: &str) -> Rc<RefCell<MemoryCamera>> {
        let object = Rc::new(RefCell::new(MemoryCamera {
            id: self.allocate_id(),
            name: name.to_string(),
            viewport: [0, 0, 16, 16],
            frustum: [0.1, 100.0, 45.0, 1.0],
        }));
        self.cameras.push(object.clone());
        object
    }

    pub fn add_render_pass(&mut self, name: &str) -> Rc<RefCell<MemoryRenderPass>> {
        let object = Rc::new(RefCell::new(MemoryRenderPass {
            id: self.allocate_id(),
            name: name.to_string(),
            enabled: true,
            render_order: 0,
        }));
        self.render_passes.push(object.clone());
        object
    }
}

impl Scene for MemoryScene {
    fn find_transform(&self, id: SceneObjectId) -> Option<TransformHandle> {
        self.transforms
            .iter()
            .find(|t| t.borrow().id == id)
            .map(|t| t.clone() as TransformHandle)
    }

    fn find_appearance(&self, id: SceneObjectId) -> Option<AppearanceHandle> {
        self.appearances
            .iter()
            .find(|a| a.borrow().id == id)
            .map(|a| a.clone() as AppearanceHandle)
    }

    fn find_camera(&self, id: SceneObjectId) -> Option<CameraHandle> {
        self.cameras
            .iter()
            .find(|c| c.borrow().id == id)
            .map(|c| c.clone() as CameraHandle)
    }

    fn find_render_pass(&self, id: SceneObjectId) -> Option<RenderPassHandle> {
        self.render_passes
            .iter()
            .find(|p| p.borrow().id == id)
            .map(|p| p.clone() as RenderPassHandle)
    }
}
