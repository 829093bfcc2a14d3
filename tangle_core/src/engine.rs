//! The engine: owns every node, property, and data array, and runs the
//! dirty-driven topological update.

use crate::dependencies::Dependencies;
use crate::errors::{ErrorRecord, ErrorReporting, TangleError};
use crate::node::{LogicNode, NodeKind, UpdateContext};
use crate::nodes::anchor::AnchorPointNode;
use crate::nodes::animation::{self, AnimationChannel, AnimationNode};
use crate::nodes::bindings::{
    AppearanceBinding, CameraBinding, RenderPassBinding, TransformBinding,
};
use crate::nodes::data_array::{ArrayData, DataArray};
use crate::nodes::script::{InterfaceNode, ScriptEngine, ScriptNode};
use crate::nodes::timer::TimerNode;
use crate::property::{PropertyId, PropertyPool, PropertySemantics};
use crate::scene::{AppearanceHandle, CameraHandle, RenderPassHandle, Scene, TransformHandle};
use crate::typedata::TypeData;
use crate::value::{PropertyData, PropertyKind};
use crate::{DataArrayId, NodeId};
use std::collections::BTreeMap;

/// Construction options for a [`LogicEngine`].
#[derive(Debug, Default)]
pub struct EngineOptions {
    /// Version of the host rendering engine, stamped into saved files.
    /// Loading rejects files saved under a different major version.
    pub host_version: [u32; 3],
    /// The script host; engines without one cannot create script nodes.
    pub script_engine: Option<Box<dyn ScriptEngine>>,
}

#[derive(Debug)]
pub struct LogicEngine {
    pub(crate) host_version: [u32; 3],
    pub(crate) script_engine: Option<Box<dyn ScriptEngine>>,
    pub(crate) pool: PropertyPool,
    pub(crate) nodes: BTreeMap<NodeId, LogicNode>,
    pub(crate) arrays: BTreeMap<DataArrayId, DataArray>,
    pub(crate) deps: Dependencies,
    pub(crate) errors: ErrorReporting,
    pub(crate) next_node_id: u64,
    pub(crate) next_array_id: u64,
    pub(crate) dirty_tracking: bool,
}

impl Default for LogicEngine {
    fn default() -> Self {
        LogicEngine::new(EngineOptions::default())
    }
}

impl LogicEngine {
    pub fn new(options: EngineOptions) -> Self {
        LogicEngine {
            host_version: options.host_version,
            script_engine: options.script_engine,
            pool: PropertyPool::default(),
            nodes: BTreeMap::new(),
            arrays: BTreeMap::new(),
            deps: Dependencies::default(),
            errors: ErrorReporting::default(),
            next_node_id: 1,
            next_array_id: 1,
            dirty_tracking: true,
        }
    }

    // ---------------------------------------------------------------- ids

    fn allocate_node_id(&mut self) -> NodeId {
        let id = NodeId(self.next_node_id);
        self.next_node_id += 1;
        id
    }

    fn allocate_array_id(&mut self) -> DataArrayId {
        let id = DataArrayId(self.next_array_id);
        self.next_array_id += 1;
        id
    }

    fn record<T>(&mut self, result: Result<T, TangleError>) -> Result<T, TangleError> {
        if let Err(error) = &result {
            self.errors.add_error(error, None);
        }
        result
    }

    fn insert_node(
        &mut self,
        id: NodeId,
        name: &str,
        input: Option<PropertyId>,
        output: Option<PropertyId>,
        kind: NodeKind,
    ) -> NodeId {
        self.nodes
            .insert(id, LogicNode::new(id, name, input, output, kind));
        self.deps.add_node(id);
        id
    }

    // ----------------------------------------------------------- creation

    /// Compiles `source` with the engine's script host and creates a node
    /// with the property trees the script declares.
    pub fn create_script(&mut self, source: &str, name: &str) -> Result<NodeId, TangleError> {
        self.errors.clear();
        let result = self.create_script_inner(source, name);
        self.record(result)
    }

    fn create_script_inner(&mut self, source: &str, name: &str) -> Result<NodeId, TangleError> {
        let engine = self.script_engine.as_mut().ok_or_else(|| {
            TangleError::Schema("this engine was created without a script host".into())
        })?;
        let compiled = engine
            .compile(source, name)
            .map_err(|message| TangleError::Schema(format!("failed to compile script '{name}': {message}")))?;
        let interface = compiled.interface();
        if interface.inputs.kind != PropertyKind::Struct
            || interface.outputs.kind != PropertyKind::Struct
        {
            return Err(TangleError::Schema(format!(
                "script '{name}' must declare struct roots for inputs and outputs"
            )));
        }

        let id = self.allocate_node_id();
        let input = self
            .pool
            .instantiate(&interface.inputs, PropertySemantics::ScriptInput, id)?;
        let output = match self
            .pool
            .instantiate(&interface.outputs, PropertySemantics::ScriptOutput, id)
        {
            Ok(output) => output,
            Err(error) => {
                self.pool.release_tree(input);
                return Err(error);
            }
        };
        Ok(self.insert_node(
            id,
            name,
            Some(input),
            Some(output),
            NodeKind::Script(ScriptNode::new(source, compiled)),
        ))
    }

    /// A facade node with one `Interface`-tagged tree serving as both
    /// input and output.
    pub fn create_interface(&mut self, ty: TypeData, name: &str) -> Result<NodeId, TangleError> {
        self.errors.clear();
        let result = (|| {
            if ty.kind != PropertyKind::Struct {
                return Err(TangleError::Schema(format!(
                    "interface '{name}' must have a struct root"
                )));
            }
            let id = self.allocate_node_id();
            let root = self
                .pool
                .instantiate(&ty, PropertySemantics::Interface, id)?;
            Ok(self.insert_node(
                id,
                name,
                Some(root),
                Some(root),
                NodeKind::Interface(InterfaceNode::default()),
            ))
        })();
        self.record(result)
    }

    pub fn create_timer(&mut self, name: &str) -> Result<NodeId, TangleError> {
        self.errors.clear();
        let input_ty = TypeData::structure(
            "IN",
            vec![TypeData::primitive("tick", PropertyKind::Float)],
        );
        let output_ty = TypeData::structure(
            "OUT",
            vec![TypeData::primitive("time", PropertyKind::Float)],
        );
        let id = self.allocate_node_id();
        let input = self
            .pool
            .instantiate(&input_ty, PropertySemantics::ScriptInput, id)
            .expect("timer schema is fixed");
        let output = self
            .pool
            .instantiate(&output_ty, PropertySemantics::ScriptOutput, id)
            .expect("timer schema is fixed");
        Ok(self.insert_node(
            id,
            name,
            Some(input),
            Some(output),
            NodeKind::Timer(TimerNode::new()),
        ))
    }

    /// An immutable typed buffer; referenced by animation channels.
    pub fn create_data_array(
        &mut self,
        data: ArrayData,
        name: &str,
    ) -> Result<DataArrayId, TangleError> {
        self.errors.clear();
        let result = (|| {
            if data.is_empty() {
                return Err(TangleError::Schema(format!(
                    "cannot create data array '{name}' with no elements"
                )));
            }
            let id = self.allocate_array_id();
            self.arrays.insert(id, DataArray::new(id, name, data));
            Ok(id)
        })();
        self.record(result)
    }

    pub fn create_animation_node(
        &mut self,
        channels: Vec<AnimationChannel>,
        name: &str,
    ) -> Result<NodeId, TangleError> {
        self.errors.clear();
        let result = self.create_animation_inner(channels, name);
        self.record(result)
    }

    fn create_animation_inner(
        &mut self,
        channels: Vec<AnimationChannel>,
        name: &str,
    ) -> Result<NodeId, TangleError> {
        if channels.is_empty() {
            return Err(TangleError::Schema(format!(
                "animation node '{name}' needs at least one channel"
            )));
        }
        let mut duration = 0.0f32;
        for channel in &channels {
            let channel_end = animation::validate_channel(&self.arrays, channel)?;
            duration = duration.max(channel_end);
        }

        let input_ty = animation_input_type();
        let mut output_children = vec![TypeData::primitive("progress", PropertyKind::Float)];
        for channel in &channels {
            let kind = self.arrays[&channel.keyframes].kind();
            output_children.push(TypeData::primitive(channel.name.clone(), kind));
        }
        let output_ty = TypeData::structure("OUT", output_children);

        let id = self.allocate_node_id();
        let input = self
            .pool
            .instantiate(&input_ty, PropertySemantics::AnimationInput, id)
            .expect("animation input schema is fixed");
        let output = match self
            .pool
            .instantiate(&output_ty, PropertySemantics::AnimationOutput, id)
        {
            Ok(output) => output,
            Err(error) => {
                self.pool.release_tree(input);
                return Err(error);
            }
        };
        Ok(self.insert_node(
            id,
            name,
            Some(input),
            Some(output),
            NodeKind::Animation(AnimationNode::new(channels, duration)),
        ))
    }

    pub fn create_transform_binding(
        &mut self,
        object: TransformHandle,
        name: &str,
    ) -> Result<NodeId, TangleError> {
        self.errors.clear();
        let id = self.allocate_node_id();
        let input = self
            .pool
            .instantiate(
                &TransformBinding::input_type(),
                PropertySemantics::BindingInput,
                id,
            )
            .expect("transform schema is fixed");
        Ok(self.insert_node(
            id,
            name,
            Some(input),
            None,
            NodeKind::TransformBinding(TransformBinding::new(object)),
        ))
    }

    pub fn create_appearance_binding(
        &mut self,
        object: AppearanceHandle,
        name: &str,
    ) -> Result<NodeId, TangleError> {
        self.errors.clear();
        let result = (|| {
            let input_ty = AppearanceBinding::input_type(&object)?;
            let id = self.allocate_node_id();
            let input = self
                .pool
                .instantiate(&input_ty, PropertySemantics::BindingInput, id)?;
            Ok(self.insert_node(
                id,
                name,
                Some(input),
                None,
                NodeKind::AppearanceBinding(AppearanceBinding::new(object)),
            ))
        })();
        self.record(result)
    }

    pub fn create_camera_binding(
        &mut self,
        object: CameraHandle,
        name: &str,
    ) -> Result<NodeId, TangleError> {
        self.errors.clear();
        let id = self.allocate_node_id();
        let input = self
            .pool
            .instantiate(
                &CameraBinding::input_type(),
                PropertySemantics::BindingInput,
                id,
            )
            .expect("camera schema is fixed");
        Ok(self.insert_node(
            id,
            name,
            Some(input),
            None,
            NodeKind::CameraBinding(CameraBinding::new(object)),
        ))
    }

    pub fn create_render_pass_binding(
        &mut self,
        object: RenderPassHandle,
        name: &str,
    ) -> Result<NodeId, TangleError> {
        self.errors.clear();
        let id = self.allocate_node_id();
        let input = self
            .pool
            .instantiate(
                &RenderPassBinding::input_type(),
                PropertySemantics::BindingInput,
                id,
            )
            .expect("render pass schema is fixed");
        Ok(self.insert_node(
            id,
            name,
            Some(input),
            None,
            NodeKind::RenderPassBinding(RenderPassBinding::new(object)),
        ))
    }

    /// A read-only node projecting a transform's position through a camera.
    /// The engine wires synthetic edges so the anchor runs after both.
    pub fn create_anchor_point(
        &mut self,
        transform_node: NodeId,
        camera_node: NodeId,
        name: &str,
    ) -> Result<NodeId, TangleError> {
        self.errors.clear();
        let result = (|| {
            let transform = match self.nodes.get(&transform_node).map(|n| n.kind()) {
                Some(NodeKind::TransformBinding(binding)) => binding.object().clone(),
                _ => {
                    return Err(TangleError::Schema(format!(
                        "anchor point '{name}' needs a transform binding as its first dependency"
                    )))
                }
            };
            let camera = match self.nodes.get(&camera_node).map(|n| n.kind()) {
                Some(NodeKind::CameraBinding(binding)) => binding.object().clone(),
                _ => {
                    return Err(TangleError::Schema(format!(
                        "anchor point '{name}' needs a camera binding as its second dependency"
                    )))
                }
            };
            let output_ty = TypeData::structure(
                "OUT",
                vec![
                    TypeData::primitive("viewportCoords", PropertyKind::Vec2f),
                    TypeData::primitive("depth", PropertyKind::Float),
                ],
            );
            let id = self.allocate_node_id();
            let output = self
                .pool
                .instantiate(&output_ty, PropertySemantics::ScriptOutput, id)
                .expect("anchor schema is fixed");
            self.insert_node(
                id,
                name,
                None,
                Some(output),
                NodeKind::AnchorPoint(AnchorPointNode::new(
                    transform_node,
                    camera_node,
                    transform,
                    camera,
                )),
            );
            self.deps.add_node_dependency(transform_node, id);
            self.deps.add_node_dependency(camera_node, id);
            Ok(id)
        })();
        self.record(result)
    }

    // ---------------------------------------------------------- destroy

    pub fn destroy_node(&mut self, id: NodeId) -> Result<(), TangleError> {
        self.errors.clear();
        let result = self.destroy_node_inner(id);
        self.record(result)
    }

    fn destroy_node_inner(&mut self, id: NodeId) -> Result<(), TangleError> {
        let (input, output, is_binding, anchor_deps, name) = {
            let node = self.nodes.get(&id).ok_or_else(|| {
                TangleError::NotFound("can't find node in this engine".to_string())
            })?;
            let anchor_deps = match node.kind() {
                NodeKind::AnchorPoint(anchor) => {
                    Some((anchor.transform_node(), anchor.camera_node()))
                }
                _ => None,
            };
            (
                node.input(),
                node.output(),
                node.kind().is_binding(),
                anchor_deps,
                node.name().to_string(),
            )
        };

        if is_binding {
            for other in self.nodes.values() {
                if let NodeKind::AnchorPoint(anchor) = other.kind() {
                    if anchor.transform_node() == id || anchor.camera_node() == id {
                        return Err(TangleError::InUse(format!(
                            "failed to destroy node '{}', it is used by anchor point '{}'",
                            name,
                            other.name()
                        )));
                    }
                }
            }
        }

        if let Some((transform_node, camera_node)) = anchor_deps {
            self.deps.remove_node_dependency(transform_node, id);
            self.deps.remove_node_dependency(camera_node, id);
        }

        let mut leaves = vec![];
        if let Some(root) = input {
            leaves.extend(self.pool.leaf_descendants(root));
        }
        if let Some(root) = output {
            if Some(root) != input {
                leaves.extend(self.pool.leaf_descendants(root));
            }
        }
        self.deps.remove_node(id, &leaves, &mut self.pool);

        if let Some(root) = input {
            self.pool.release_tree(root);
        }
        if let Some(root) = output {
            if Some(root) != input {
                self.pool.release_tree(root);
            }
        }
        self.nodes.remove(&id);
        Ok(())
    }

    pub fn destroy_data_array(&mut self, id: DataArrayId) -> Result<(), TangleError> {
        self.errors.clear();
        let result = (|| {
            let array = self.arrays.get(&id).ok_or_else(|| {
                TangleError::NotFound("can't find data array in this engine".to_string())
            })?;
            for node in self.nodes.values() {
                if let NodeKind::Animation(animation) = node.kind() {
                    for channel in animation.channels() {
                        let used = channel.timestamps == id
                            || channel.keyframes == id
                            || channel.tangents_in == Some(id)
                            || channel.tangents_out == Some(id);
                        if used {
                            return Err(TangleError::InUse(format!(
                                "failed to destroy data array '{}', it is used in animation node '{}' channel '{}'",
                                array.name(),
                                node.name(),
                                channel.name
                            )));
                        }
                    }
                }
            }
            self.arrays.remove(&id);
            Ok(())
        })();
        self.record(result)
    }

    // ------------------------------------------------------------- links

    pub fn link(&mut self, output: PropertyId, input: PropertyId) -> Result<(), TangleError> {
        self.errors.clear();
        let result = self.deps.link(&mut self.pool, output, input);
        if result.is_ok() {
            let owner = self.pool.property(input).owner();
            if let Some(node) = self.nodes.get_mut(&owner) {
                node.set_dirty(true);
            }
        }
        self.record(result)
    }

    pub fn unlink(&mut self, output: PropertyId, input: PropertyId) -> Result<(), TangleError> {
        self.errors.clear();
        let result = self.deps.unlink(&mut self.pool, output, input);
        self.record(result)
    }

    /// The output currently driving `input`, if any.
    pub fn linked_source(&self, input: PropertyId) -> Option<PropertyId> {
        self.deps.linked_source(input)
    }

    pub fn links(&self) -> Vec<(PropertyId, PropertyId)> {
        self.deps.links().collect()
    }

    // ------------------------------------------------------------ update

    /// One tick: executes dirty nodes in topological order and propagates
    /// changed output values across links.
    pub fn update(&mut self) -> Result<(), TangleError> {
        self.errors.clear();
        let order = match self.deps.sorted_nodes() {
            Ok(order) => order.to_vec(),
            Err(error) => {
                self.errors.add_error(&error, None);
                return Err(error);
            }
        };

        for id in order {
            let (input_root, output_root) = {
                let node = match self.nodes.get_mut(&id) {
                    Some(node) => node,
                    None => continue,
                };
                if self.dirty_tracking && !node.is_dirty() {
                    continue;
                }
                let mut ctx = UpdateContext {
                    pool: &mut self.pool,
                    arrays: &self.arrays,
                };
                if let Err(error) = node.update(&mut ctx) {
                    self.errors.add_error(&error, Some(id));
                    return Err(error);
                }
                (node.input(), node.output())
            };

            // Fire only on change: untouched outputs do not propagate, so
            // downstream nodes only dirty when their inputs really moved.
            if let Some(root) = output_root {
                for leaf in self.pool.leaf_descendants(root) {
                    if !self.pool.property(leaf).changed() {
                        continue;
                    }
                    let value = match self.pool.property(leaf).value() {
                        Some(value) => value.clone(),
                        None => continue,
                    };
                    let targets: Vec<PropertyId> = self.deps.targets_of(leaf).collect();
                    for target in targets {
                        if self.pool.set_from_source(target, &value) {
                            let owner = self.pool.property(target).owner();
                            if let Some(node) = self.nodes.get_mut(&owner) {
                                node.set_dirty(true);
                            }
                        }
                    }
                }
            }

            let mut roots = std::collections::BTreeSet::new();
            roots.extend(input_root);
            roots.extend(output_root);
            for root in roots {
                for leaf in self.pool.leaf_descendants(root) {
                    self.pool.clear_changed(leaf);
                }
            }
            if let Some(node) = self.nodes.get_mut(&id) {
                // Self-advancing nodes stay scheduled for the next tick.
                let keep = node.kind().wants_update();
                node.set_dirty(keep);
            }
        }
        Ok(())
    }

    // ------------------------------------------------------- value access

    pub fn set<T: PropertyData>(
        &mut self,
        property: PropertyId,
        value: T,
    ) -> Result<(), TangleError> {
        let owner = self.pool.get(property).map(|p| p.owner());
        match self.pool.set_value(property, value) {
            Ok(changed) => {
                if changed {
                    if let Some(node) = owner.and_then(|o| self.nodes.get_mut(&o)) {
                        node.set_dirty(true);
                    }
                }
                Ok(())
            }
            Err(error) => {
                self.errors.add_error(&error, owner);
                Err(error)
            }
        }
    }

    pub fn get<T: PropertyData>(&self, property: PropertyId) -> Option<T> {
        self.pool.get_value(property)
    }

    /// Root of a node's input tree.
    pub fn input(&self, node: NodeId) -> Option<PropertyId> {
        self.nodes.get(&node).and_then(|n| n.input())
    }

    /// Root of a node's output tree.
    pub fn output(&self, node: NodeId) -> Option<PropertyId> {
        self.nodes.get(&node).and_then(|n| n.output())
    }

    /// Resolves a name path below `root`.
    pub fn property(&self, root: PropertyId, path: &[&str]) -> Option<PropertyId> {
        self.pool.resolve_names(root, path)
    }

    pub fn pool(&self) -> &PropertyPool {
        &self.pool
    }

    // ------------------------------------------------------------ lookup

    pub fn node(&self, id: NodeId) -> Option<&LogicNode> {
        self.nodes.get(&id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &LogicNode> {
        self.nodes.values()
    }

    /// First node with the given name, in id order.
    pub fn find_node(&self, name: &str) -> Option<NodeId> {
        self.nodes
            .values()
            .find(|n| n.name() == name)
            .map(|n| n.id())
    }

    fn nodes_of_kind(&self, filter: fn(&NodeKind) -> bool) -> Vec<NodeId> {
        self.nodes
            .values()
            .filter(|n| filter(n.kind()))
            .map(|n| n.id())
            .collect()
    }

    pub fn scripts(&self) -> Vec<NodeId> {
        self.nodes_of_kind(|k| matches!(k, NodeKind::Script(_)))
    }

    pub fn interfaces(&self) -> Vec<NodeId> {
        self.nodes_of_kind(|k| matches!(k, NodeKind::Interface(_)))
    }

    pub fn animation_nodes(&self) -> Vec<NodeId> {
        self.nodes_of_kind(|k| matches!(k, NodeKind::Animation(_)))
    }

    pub fn timers(&self) -> Vec<NodeId> {
        self.nodes_of_kind(|k| matches!(k, NodeKind::Timer(_)))
    }

    pub fn anchor_points(&self) -> Vec<NodeId> {
        self.nodes_of_kind(|k| matches!(k, NodeKind::AnchorPoint(_)))
    }

    pub fn transform_bindings(&self) -> Vec<NodeId> {
        self.nodes_of_kind(|k| matches!(k, NodeKind::TransformBinding(_)))
    }

    pub fn appearance_bindings(&self) -> Vec<NodeId> {
        self.nodes_of_kind(|k| matches!(k, NodeKind::AppearanceBinding(_)))
    }

    pub fn camera_bindings(&self) -> Vec<NodeId> {
        self.nodes_of_kind(|k| matches!(k, NodeKind::CameraBinding(_)))
    }

    pub fn render_pass_bindings(&self) -> Vec<NodeId> {
        self.nodes_of_kind(|k| matches!(k, NodeKind::RenderPassBinding(_)))
    }

    pub fn data_array(&self, id: DataArrayId) -> Option<&DataArray> {
        self.arrays.get(&id)
    }

    pub fn data_arrays(&self) -> impl Iterator<Item = &DataArray> {
        self.arrays.values()
    }

    pub fn find_data_array(&self, name: &str) -> Option<DataArrayId> {
        self.arrays
            .values()
            .find(|a| a.name() == name)
            .map(|a| a.id())
    }

    // ------------------------------------------------------- diagnostics

    pub fn errors(&self) -> &[ErrorRecord] {
        self.errors.errors()
    }

    /// True while any node still has its dirty flag set.
    pub fn is_dirty(&self) -> bool {
        self.nodes.values().any(|n| n.is_dirty())
    }

    /// Disabling dirty tracking executes every node on each update;
    /// intended for diagnostics.
    pub fn set_dirty_tracking(&mut self, enabled: bool) {
        self.dirty_tracking = enabled;
    }

    pub fn dirty_tracking(&self) -> bool {
        self.dirty_tracking
    }

    pub fn host_version(&self) -> [u32; 3] {
        self.host_version
    }

    // ----------------------------------------------------------- persist

    /// Serializes the whole engine into a self-contained buffer.
    pub fn save_to_buffer(&mut self) -> Result<Vec<u8>, TangleError> {
        self.errors.clear();
        let result = crate::serialize::save(self);
        self.record(result)
    }

    /// Replaces this engine's content with the buffer's. Bindings are
    /// re-attached through `scene`; on any failure the engine is left
    /// unchanged.
    pub fn load_from_buffer(
        &mut self,
        data: &[u8],
        scene: &dyn Scene,
    ) -> Result<(), TangleError> {
        self.errors.clear();
        let result = crate::serialize::load(self, data, scene);
        self.record(result)
    }
}

pub(crate) fn animation_input_type() -> TypeData {
    TypeData::structure(
        "IN",
        vec![
            TypeData::primitive("timeDelta", PropertyKind::Float),
            TypeData::primitive("play", PropertyKind::Bool),
            TypeData::primitive("loop", PropertyKind::Bool),
            TypeData::primitive("rewindOnStop", PropertyKind::Bool),
            TypeData::primitive("timeRange", PropertyKind::Vec2f),
        ],
    )
}
