//! Saving and loading whole engines.
//!
//! Loading is all or nothing: the buffer is materialized into a staging
//! engine first and only swapped in once every object resolved, so a
//! failed load leaves the running engine untouched.

pub mod format;

use crate::engine::{animation_input_type, EngineOptions, LogicEngine};
use crate::errors::TangleError;
use crate::node::{LogicNode, NodeKind};
use crate::nodes::anchor::AnchorPointNode;
use crate::nodes::animation::{self, AnimationChannel, AnimationNode};
use crate::nodes::bindings::{
    AppearanceBinding, CameraBinding, RenderPassBinding, TransformBinding,
};
use crate::nodes::data_array::DataArray;
use crate::nodes::script::{InterfaceNode, ScriptNode};
use crate::nodes::timer::TimerNode;
use crate::property::{PropertyId, PropertyPool, PropertySemantics};
use crate::scene::{Scene, SceneObjectId};
use crate::typedata::TypeData;
use crate::value::PropertyKind;
use crate::{DataArrayId, NodeId, RUNTIME_VERSION};
use format::{
    ChannelRecord, DataArrayRecord, FileConfig, FileHeader, LinkRecord, NodeKindRecord,
    NodeRecord, PropertyRecord, FILE_FORMAT_COMPAT_VERSION, FILE_FORMAT_VERSION,
};

// ------------------------------------------------------------------ save

pub(crate) fn save(engine: &LogicEngine) -> Result<Vec<u8>, TangleError> {
    let data_arrays: Vec<DataArrayRecord> = engine
        .arrays
        .values()
        .map(|array| DataArrayRecord {
            id: array.id().0,
            name: array.name().to_string(),
            data: array.data().clone(),
        })
        .collect();

    let mut nodes = vec![];
    for node in engine.nodes.values() {
        nodes.push(node_record(engine, node));
    }

    let mut links: Vec<LinkRecord> = engine
        .deps
        .links()
        .map(|(output, input)| LinkRecord {
            source_node: engine.pool.property(output).owner().0,
            source_path: engine.pool.path_of(output),
            target_node: engine.pool.property(input).owner().0,
            target_path: engine.pool.path_of(input),
        })
        .collect();
    links.sort();

    let root = format::v2::Root {
        metadata: format::v2::Metadata::default(),
        data_arrays,
        nodes,
        links,
    };

    let mut out = vec![];
    FileHeader {
        host_version: engine.host_version,
        runtime_version: RUNTIME_VERSION,
        format_version: FILE_FORMAT_VERSION,
    }
    .write(&mut out)?;
    let payload = bincode::serialize(&FileConfig::V2(root))
        .map_err(|e| TangleError::Format(format!("failed to encode payload: {e}")))?;
    out.extend_from_slice(&payload);
    log::debug!(
        "saved {} nodes, {} data arrays, {} links ({} bytes)",
        engine.nodes.len(),
        engine.arrays.len(),
        engine.deps.links().count(),
        out.len()
    );
    Ok(out)
}

fn node_record(engine: &LogicEngine, node: &LogicNode) -> NodeRecord {
    let kind = match node.kind() {
        NodeKind::Script(script) => NodeKindRecord::Script {
            source: script.source().to_string(),
        },
        NodeKind::Interface(_) => NodeKindRecord::Interface,
        NodeKind::Animation(animation) => NodeKindRecord::Animation {
            channels: animation
                .channels()
                .iter()
                .map(|channel| ChannelRecord {
                    name: channel.name.clone(),
                    timestamps: channel.timestamps.0,
                    keyframes: channel.keyframes.0,
                    interpolation: channel.interpolation,
                    tangents_in: channel.tangents_in.map(|id| id.0),
                    tangents_out: channel.tangents_out.map(|id| id.0),
                })
                .collect(),
        },
        NodeKind::Timer(_) => NodeKindRecord::Timer,
        NodeKind::AnchorPoint(anchor) => NodeKindRecord::AnchorPoint {
            transform_node: anchor.transform_node().0,
            camera_node: anchor.camera_node().0,
        },
        NodeKind::TransformBinding(binding) => NodeKindRecord::TransformBinding {
            object: binding.object_id().0,
        },
        NodeKind::AppearanceBinding(binding) => NodeKindRecord::AppearanceBinding {
            object: binding.object_id().0,
        },
        NodeKind::CameraBinding(binding) => NodeKindRecord::CameraBinding {
            object: binding.object_id().0,
        },
        NodeKind::RenderPassBinding(binding) => NodeKindRecord::RenderPassBinding {
            object: binding.object_id().0,
        },
    };

    let input = node.input().map(|root| property_record(&engine.pool, root));
    // An interface node's single tree is stored once, as the input.
    let output = if matches!(node.kind(), NodeKind::Interface(_)) {
        None
    } else {
        node.output().map(|root| property_record(&engine.pool, root))
    };

    NodeRecord {
        id: node.id().0,
        name: node.name().to_string(),
        kind,
        input,
        output,
    }
}

fn property_record(pool: &PropertyPool, id: PropertyId) -> PropertyRecord {
    let property = pool.property(id);
    PropertyRecord {
        name: property.name().to_string(),
        kind: property.kind(),
        semantics: property.semantics(),
        value: property.value().cloned(),
        was_set: property.was_set(),
        children: property
            .children()
            .iter()
            .map(|&child| property_record(pool, child))
            .collect(),
    }
}

// ------------------------------------------------------------------ load

pub(crate) fn load(
    engine: &mut LogicEngine,
    data: &[u8],
    scene: &dyn Scene,
) -> Result<(), TangleError> {
    let (header, consumed) = FileHeader::read(data)?;
    if header.format_version > FILE_FORMAT_VERSION {
        return Err(TangleError::Format(format!(
            "file format version {} is newer than the supported version {}",
            header.format_version, FILE_FORMAT_VERSION
        )));
    }
    if header.format_version < FILE_FORMAT_COMPAT_VERSION {
        return Err(TangleError::Format(format!(
            "expected file format version {FILE_FORMAT_VERSION} (or compatible {FILE_FORMAT_COMPAT_VERSION}), but found {}",
            header.format_version
        )));
    }
    if header.host_version[0] != engine.host_version[0] {
        let [em, en, ep] = engine.host_version;
        let [fm, fn_, fp] = header.host_version;
        return Err(TangleError::Format(format!(
            "expected host engine version {em}.{en}.{ep} but found {fm}.{fn_}.{fp}"
        )));
    }

    let config: FileConfig = bincode::deserialize(&data[consumed..])
        .map_err(|e| TangleError::Format(format!("corrupted payload: {e}")))?;
    let root: format::v2::Root = match (header.format_version, config) {
        (FILE_FORMAT_VERSION, FileConfig::V2(root)) => root,
        (FILE_FORMAT_COMPAT_VERSION, FileConfig::V1(root)) => {
            log::debug!(
                "loading file with previous format version {} in compatibility mode",
                header.format_version
            );
            root.into()
        }
        _ => {
            return Err(TangleError::Format(
                "file format version does not match the payload layout".into(),
            ))
        }
    };

    // Stage everything; only a fully resolved file replaces the engine.
    let script_engine = engine.script_engine.take();
    let mut staging = LogicEngine::new(EngineOptions {
        host_version: engine.host_version,
        script_engine,
    });
    staging.dirty_tracking = engine.dirty_tracking;

    match populate(&mut staging, &root, scene) {
        Ok(()) => {
            log::debug!(
                "loaded {} nodes, {} data arrays, {} links",
                staging.nodes.len(),
                staging.arrays.len(),
                staging.deps.links().count()
            );
            *engine = staging;
            Ok(())
        }
        Err(error) => {
            engine.script_engine = staging.script_engine.take();
            Err(error)
        }
    }
}

fn populate(
    staging: &mut LogicEngine,
    root: &format::v2::Root,
    scene: &dyn Scene,
) -> Result<(), TangleError> {
    for record in &root.data_arrays {
        if record.data.is_empty() {
            return Err(TangleError::Format(format!(
                "persisted data array '{}' has no elements",
                record.name
            )));
        }
        let id = DataArrayId(record.id);
        let array = DataArray::new(id, record.name.clone(), record.data.clone());
        if staging.arrays.insert(id, array).is_some() {
            return Err(TangleError::Format(format!(
                "duplicate data array id {}",
                record.id
            )));
        }
        staging.next_array_id = staging.next_array_id.max(record.id + 1);
    }

    // Anchor points reference other nodes, so they come in a second pass.
    for record in &root.nodes {
        if !matches!(record.kind, NodeKindRecord::AnchorPoint { .. }) {
            build_node(staging, record, scene)?;
        }
    }
    for record in &root.nodes {
        if matches!(record.kind, NodeKindRecord::AnchorPoint { .. }) {
            build_anchor(staging, record)?;
        }
    }

    for link in &root.links {
        let source_root = staging
            .nodes
            .get(&NodeId(link.source_node))
            .ok_or_else(|| {
                TangleError::Format(format!(
                    "link references unknown node id {}",
                    link.source_node
                ))
            })?
            .output()
            .ok_or_else(|| TangleError::Format("link source node has no outputs".into()))?;
        let output = staging
            .pool
            .resolve_path(source_root, &link.source_path)
            .ok_or_else(|| TangleError::Format("invalid link source path".into()))?;
        let target_root = staging
            .nodes
            .get(&NodeId(link.target_node))
            .ok_or_else(|| {
                TangleError::Format(format!(
                    "link references unknown node id {}",
                    link.target_node
                ))
            })?
            .input()
            .ok_or_else(|| TangleError::Format("link target node has no inputs".into()))?;
        let input = staging
            .pool
            .resolve_path(target_root, &link.target_path)
            .ok_or_else(|| TangleError::Format("invalid link target path".into()))?;
        staging.deps.link(&mut staging.pool, output, input)?;
    }

    Ok(())
}

fn claim_node_id(staging: &mut LogicEngine, record: &NodeRecord) -> Result<NodeId, TangleError> {
    let id = NodeId(record.id);
    if record.id == 0 || staging.nodes.contains_key(&id) {
        return Err(TangleError::Format(format!(
            "invalid or duplicate node id {}",
            record.id
        )));
    }
    staging.next_node_id = staging.next_node_id.max(record.id + 1);
    Ok(id)
}

fn required_tree<'a>(
    record: &'a NodeRecord,
    side: &str,
) -> Result<&'a PropertyRecord, TangleError> {
    let tree = match side {
        "input" => record.input.as_ref(),
        _ => record.output.as_ref(),
    };
    tree.ok_or_else(|| {
        TangleError::Format(format!(
            "persisted node '{}' is missing its {} properties",
            record.name, side
        ))
    })
}

fn build_node(
    staging: &mut LogicEngine,
    record: &NodeRecord,
    scene: &dyn Scene,
) -> Result<(), TangleError> {
    let id = claim_node_id(staging, record)?;

    match &record.kind {
        NodeKindRecord::Script { source } => {
            let script_engine = staging.script_engine.as_mut().ok_or_else(|| {
                TangleError::Format(
                    "file contains script nodes but this engine has no script host".into(),
                )
            })?;
            let compiled = script_engine.compile(source, &record.name).map_err(|m| {
                TangleError::Format(format!(
                    "failed to compile persisted script '{}': {m}",
                    record.name
                ))
            })?;
            let interface = compiled.interface();
            let input_record = required_tree(record, "input")?;
            let output_record = required_tree(record, "output")?;
            if !record_type(input_record).same_structure(&interface.inputs)
                || !record_type(output_record).same_structure(&interface.outputs)
            {
                return Err(TangleError::Format(format!(
                    "persisted properties of script '{}' do not match its interface",
                    record.name
                )));
            }
            let input = instantiate_record(
                &mut staging.pool,
                input_record,
                PropertySemantics::ScriptInput,
                id,
            )?;
            let output = instantiate_record(
                &mut staging.pool,
                output_record,
                PropertySemantics::ScriptOutput,
                id,
            )?;
            staging.nodes.insert(
                id,
                LogicNode::new(
                    id,
                    &record.name,
                    Some(input),
                    Some(output),
                    NodeKind::Script(ScriptNode::new(source.clone(), compiled)),
                ),
            );
        }
        NodeKindRecord::Interface => {
            let tree_record = required_tree(record, "input")?;
            if tree_record.kind != PropertyKind::Struct {
                return Err(TangleError::Format(format!(
                    "persisted interface '{}' must have a struct root",
                    record.name
                )));
            }
            let tree = instantiate_record(
                &mut staging.pool,
                tree_record,
                PropertySemantics::Interface,
                id,
            )?;
            staging.nodes.insert(
                id,
                LogicNode::new(
                    id,
                    &record.name,
                    Some(tree),
                    Some(tree),
                    NodeKind::Interface(InterfaceNode::default()),
                ),
            );
        }
        NodeKindRecord::Animation { channels } => {
            let channels: Vec<AnimationChannel> = channels
                .iter()
                .map(|c| AnimationChannel {
                    name: c.name.clone(),
                    timestamps: DataArrayId(c.timestamps),
                    keyframes: DataArrayId(c.keyframes),
                    interpolation: c.interpolation,
                    tangents_in: c.tangents_in.map(DataArrayId),
                    tangents_out: c.tangents_out.map(DataArrayId),
                })
                .collect();
            if channels.is_empty() {
                return Err(TangleError::Format(format!(
                    "persisted animation node '{}' has no channels",
                    record.name
                )));
            }
            let mut duration = 0.0f32;
            for channel in &channels {
                duration = duration.max(animation::validate_channel(&staging.arrays, channel)?);
            }

            let input_record = required_tree(record, "input")?;
            let output_record = required_tree(record, "output")?;
            let mut expected_output =
                vec![TypeData::primitive("progress", PropertyKind::Float)];
            for channel in &channels {
                expected_output.push(TypeData::primitive(
                    channel.name.clone(),
                    staging.arrays[&channel.keyframes].kind(),
                ));
            }
            let valid = record_type(input_record).same_structure(&animation_input_type())
                && record_type(output_record)
                    .same_structure(&TypeData::structure("OUT", expected_output));
            if !valid {
                return Err(TangleError::Format(format!(
                    "persisted animation node '{}' has missing or invalid properties",
                    record.name
                )));
            }

            let input = instantiate_record(
                &mut staging.pool,
                input_record,
                PropertySemantics::AnimationInput,
                id,
            )?;
            let output = instantiate_record(
                &mut staging.pool,
                output_record,
                PropertySemantics::AnimationOutput,
                id,
            )?;
            staging.nodes.insert(
                id,
                LogicNode::new(
                    id,
                    &record.name,
                    Some(input),
                    Some(output),
                    NodeKind::Animation(AnimationNode::new(channels, duration)),
                ),
            );
        }
        NodeKindRecord::Timer => {
            let input = instantiate_record(
                &mut staging.pool,
                required_tree(record, "input")?,
                PropertySemantics::ScriptInput,
                id,
            )?;
            let output = instantiate_record(
                &mut staging.pool,
                required_tree(record, "output")?,
                PropertySemantics::ScriptOutput,
                id,
            )?;
            staging.nodes.insert(
                id,
                LogicNode::new(
                    id,
                    &record.name,
                    Some(input),
                    Some(output),
                    NodeKind::Timer(TimerNode::new()),
                ),
            );
        }
        NodeKindRecord::TransformBinding { object } => {
            let handle = scene.find_transform(SceneObjectId(*object)).ok_or_else(|| {
                TangleError::Attachment(format!(
                    "transform object {} referenced by binding '{}' is missing from the scene",
                    object, record.name
                ))
            })?;
            let input = rebuild_binding_inputs(
                staging,
                id,
                record,
                TransformBinding::input_type(),
            )?;
            staging.nodes.insert(
                id,
                LogicNode::new(
                    id,
                    &record.name,
                    Some(input),
                    None,
                    NodeKind::TransformBinding(TransformBinding::new(handle)),
                ),
            );
        }
        NodeKindRecord::AppearanceBinding { object } => {
            let handle = scene
                .find_appearance(SceneObjectId(*object))
                .ok_or_else(|| {
                    TangleError::Attachment(format!(
                        "appearance object {} referenced by binding '{}' is missing from the scene",
                        object, record.name
                    ))
                })?;
            let input_ty = AppearanceBinding::input_type(&handle)?;
            let input = rebuild_binding_inputs(staging, id, record, input_ty)?;
            staging.nodes.insert(
                id,
                LogicNode::new(
                    id,
                    &record.name,
                    Some(input),
                    None,
                    NodeKind::AppearanceBinding(AppearanceBinding::new(handle)),
                ),
            );
        }
        NodeKindRecord::CameraBinding { object } => {
            let handle = scene.find_camera(SceneObjectId(*object)).ok_or_else(|| {
                TangleError::Attachment(format!(
                    "camera object {} referenced by binding '{}' is missing from the scene",
                    object, record.name
                ))
            })?;
            let input =
                rebuild_binding_inputs(staging, id, record, CameraBinding::input_type())?;
            staging.nodes.insert(
                id,
                LogicNode::new(
                    id,
                    &record.name,
                    Some(input),
                    None,
                    NodeKind::CameraBinding(CameraBinding::new(handle)),
                ),
            );
        }
        NodeKindRecord::RenderPassBinding { object } => {
            let handle = scene
                .find_render_pass(SceneObjectId(*object))
                .ok_or_else(|| {
                    TangleError::Attachment(format!(
                        "render pass object {} referenced by binding '{}' is missing from the scene",
                        object, record.name
                    ))
                })?;
            let input = rebuild_binding_inputs(
                staging,
                id,
                record,
                RenderPassBinding::input_type(),
            )?;
            staging.nodes.insert(
                id,
                LogicNode::new(
                    id,
                    &record.name,
                    Some(input),
                    None,
                    NodeKind::RenderPassBinding(RenderPassBinding::new(handle)),
                ),
            );
        }
        NodeKindRecord::AnchorPoint { .. } => unreachable!("anchors build in the second pass"),
    }
    staging.deps.add_node(id);
    Ok(())
}

fn build_anchor(staging: &mut LogicEngine, record: &NodeRecord) -> Result<(), TangleError> {
    let id = claim_node_id(staging, record)?;
    let (transform_node, camera_node) = match &record.kind {
        NodeKindRecord::AnchorPoint {
            transform_node,
            camera_node,
        } => (NodeId(*transform_node), NodeId(*camera_node)),
        _ => unreachable!("caller filters for anchor records"),
    };

    let transform = match staging.nodes.get(&transform_node).map(|n| n.kind()) {
        Some(NodeKind::TransformBinding(binding)) => binding.object().clone(),
        _ => {
            return Err(TangleError::Format(format!(
                "anchor point '{}' references node {} which is not a transform binding",
                record.name, transform_node.0
            )))
        }
    };
    let camera = match staging.nodes.get(&camera_node).map(|n| n.kind()) {
        Some(NodeKind::CameraBinding(binding)) => binding.object().clone(),
        _ => {
            return Err(TangleError::Format(format!(
                "anchor point '{}' references node {} which is not a camera binding",
                record.name, camera_node.0
            )))
        }
    };

    let output = instantiate_record(
        &mut staging.pool,
        required_tree(record, "output")?,
        PropertySemantics::ScriptOutput,
        id,
    )?;
    staging.nodes.insert(
        id,
        LogicNode::new(
            id,
            &record.name,
            None,
            Some(output),
            NodeKind::AnchorPoint(AnchorPointNode::new(
                transform_node,
                camera_node,
                transform,
                camera,
            )),
        ),
    );
    staging.deps.add_node(id);
    staging.deps.add_node_dependency(transform_node, id);
    staging.deps.add_node_dependency(camera_node, id);
    Ok(())
}

/// Binding inputs are re-derived from the re-attached object, then the
/// persisted leaves are merged in by name.
fn rebuild_binding_inputs(
    staging: &mut LogicEngine,
    id: NodeId,
    record: &NodeRecord,
    input_ty: TypeData,
) -> Result<PropertyId, TangleError> {
    let input_record = required_tree(record, "input")?;
    let root = staging
        .pool
        .instantiate(&input_ty, PropertySemantics::BindingInput, id)?;
    merge_binding_inputs(&mut staging.pool, root, input_record, &record.name)?;
    Ok(root)
}

fn merge_binding_inputs(
    pool: &mut PropertyPool,
    new_root: PropertyId,
    record: &PropertyRecord,
    binding_name: &str,
) -> Result<(), TangleError> {
    for child in &record.children {
        let target = pool.child_by_name(new_root, &child.name).ok_or_else(|| {
            TangleError::Attachment(format!(
                "input '{}' of binding '{}' does not exist on the re-attached object",
                child.name, binding_name
            ))
        })?;
        if pool.property(target).kind() != child.kind {
            return Err(TangleError::Attachment(format!(
                "input '{}' of binding '{}' changed type on the re-attached object ({} vs {})",
                child.name,
                binding_name,
                child.kind,
                pool.property(target).kind()
            )));
        }
        if child.kind.is_primitive() {
            let value = child.value.clone().ok_or_else(|| {
                TangleError::Format(format!(
                    "persisted leaf '{}' of binding '{}' has no value",
                    child.name, binding_name
                ))
            })?;
            pool.restore_leaf(target, value, child.was_set)?;
        } else {
            merge_binding_inputs(pool, target, child, binding_name)?;
        }
    }
    Ok(())
}

fn record_type(record: &PropertyRecord) -> TypeData {
    TypeData {
        name: record.name.clone(),
        kind: record.kind,
        children: record.children.iter().map(record_type).collect(),
    }
}

fn check_semantics(
    record: &PropertyRecord,
    expected: PropertySemantics,
) -> Result<(), TangleError> {
    if record.semantics != expected {
        return Err(TangleError::Format(format!(
            "persisted property '{}' has unexpected semantics",
            record.name
        )));
    }
    for child in &record.children {
        check_semantics(child, expected)?;
    }
    Ok(())
}

/// Builds a property tree exactly as persisted: shape, values, was_set.
fn instantiate_record(
    pool: &mut PropertyPool,
    record: &PropertyRecord,
    expected: PropertySemantics,
    owner: NodeId,
) -> Result<PropertyId, TangleError> {
    check_semantics(record, expected)?;
    let ty = record_type(record);
    let root = pool
        .instantiate(&ty, expected, owner)
        .map_err(|e| TangleError::Format(format!("invalid persisted property tree: {e}")))?;
    restore_values(pool, root, record)?;
    Ok(root)
}

fn restore_values(
    pool: &mut PropertyPool,
    id: PropertyId,
    record: &PropertyRecord,
) -> Result<(), TangleError> {
    if record.kind.is_primitive() {
        let value = record.value.clone().ok_or_else(|| {
            TangleError::Format(format!("persisted leaf '{}' has no value", record.name))
        })?;
        pool.restore_leaf(id, value, record.was_set)?;
    } else {
        if record.value.is_some() {
            return Err(TangleError::Format(format!(
                "persisted complex property '{}' carries a value",
                record.name
            )));
        }
        for (index, child) in record.children.iter().enumerate() {
            let child_id = pool
                .child_by_index(id, index)
                .expect("tree was instantiated from this record");
            restore_values(pool, child_id, child)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::animation::{AnimationChannel, InterpolationType};
    use crate::nodes::data_array::ArrayData;
    use crate::nodes::script::ScriptInterface;
    use crate::value::Vec2f;
    use tangle_common::{CallbackScriptEngine, MemoryScene};

    fn adder_host() -> CallbackScriptEngine {
        let mut host = CallbackScriptEngine::new();
        host.register(
            "adder",
            ScriptInterface {
                inputs: TypeData::structure(
                    "IN",
                    vec![TypeData::primitive("value", PropertyKind::Int32)],
                ),
                outputs: TypeData::structure(
                    "OUT",
                    vec![TypeData::primitive("value", PropertyKind::Int32)],
                ),
            },
            || {
                Box::new(|io| {
                    let value: i32 = io.read(&["value"])?;
                    io.write(&["value"], value + 1)
                })
            },
        );
        host
    }

    fn engine_with_host(host_version: [u32; 3]) -> LogicEngine {
        LogicEngine::new(EngineOptions {
            host_version,
            script_engine: Some(Box::new(adder_host())),
        })
    }

    fn leaf(engine: &LogicEngine, root: Option<PropertyId>, path: &[&str]) -> PropertyId {
        engine
            .property(root.expect("node must have the tree"), path)
            .unwrap()
    }

    #[test]
    fn values_and_flags_survive_a_round_trip() {
        let mut engine = LogicEngine::default();
        let scene = MemoryScene::new();
        let facade = engine
            .create_interface(
                TypeData::structure(
                    "facade",
                    vec![
                        TypeData::primitive("speed", PropertyKind::Float),
                        TypeData::primitive("offset", PropertyKind::Vec2f),
                        TypeData::primitive("label", PropertyKind::String),
                        TypeData::primitive("count", PropertyKind::Vec4i),
                    ],
                ),
                "Facade",
            )
            .unwrap();
        engine
            .set(leaf(&engine, engine.input(facade), &["speed"]), 2.5f32)
            .unwrap();
        engine
            .set(
                leaf(&engine, engine.input(facade), &["label"]),
                String::from("hello"),
            )
            .unwrap();

        let buffer = engine.save_to_buffer().unwrap();

        let mut restored = LogicEngine::default();
        restored.load_from_buffer(&buffer, &scene).unwrap();
        let facade = restored.find_node("Facade").unwrap();
        let speed = leaf(&restored, restored.input(facade), &["speed"]);
        let offset = leaf(&restored, restored.input(facade), &["offset"]);
        let label = leaf(&restored, restored.input(facade), &["label"]);
        assert_eq!(restored.get::<f32>(speed), Some(2.5));
        assert_eq!(restored.get::<Vec2f>(offset), Some([0.0, 0.0]));
        assert_eq!(restored.get::<String>(label).as_deref(), Some("hello"));
        assert!(restored.pool().property(speed).was_set());
        assert!(!restored.pool().property(offset).was_set());
    }

    #[test]
    fn scripts_recompile_and_links_reconnect() {
        let scene = MemoryScene::new();
        let mut engine = engine_with_host([1, 0, 0]);
        let a = engine.create_script("adder", "A").unwrap();
        let b = engine.create_script("adder", "B").unwrap();
        engine
            .link(
                leaf(&engine, engine.output(a), &["value"]),
                leaf(&engine, engine.input(b), &["value"]),
            )
            .unwrap();
        engine
            .set(leaf(&engine, engine.input(a), &["value"]), 10i32)
            .unwrap();
        let buffer = engine.save_to_buffer().unwrap();

        let mut restored = engine_with_host([1, 0, 0]);
        restored.load_from_buffer(&buffer, &scene).unwrap();
        restored.update().unwrap();
        let b = restored.find_node("B").unwrap();
        assert_eq!(
            restored.get::<i32>(leaf(&restored, restored.output(b), &["value"])),
            Some(12)
        );
        let a = restored.find_node("A").unwrap();
        match restored.node(a).unwrap().kind() {
            crate::node::NodeKind::Script(script) => assert_eq!(script.source(), "adder"),
            other => panic!("unexpected kind {other:?}"),
        }
    }

    // Scenario: animation inputs persist, elapsed progress does not.
    #[test]
    fn animation_inputs_persist_but_progress_restarts() {
        let scene = MemoryScene::new();
        let mut engine = LogicEngine::default();
        let stamps = engine
            .create_data_array(ArrayData::Float(vec![1.0, 2.0]), "stamps")
            .unwrap();
        let keys = engine
            .create_data_array(ArrayData::Vec2f(vec![[0.0, 10.0], [1.0, 20.0]]), "keys")
            .unwrap();
        let anim = engine
            .create_animation_node(
                vec![AnimationChannel {
                    name: "channel".into(),
                    timestamps: stamps,
                    keyframes: keys,
                    interpolation: InterpolationType::Linear,
                    tangents_in: None,
                    tangents_out: None,
                }],
                "anim",
            )
            .unwrap();
        let input = engine.input(anim);
        engine.set(leaf(&engine, input, &["play"]), true).unwrap();
        engine.set(leaf(&engine, input, &["loop"]), true).unwrap();
        engine
            .set(leaf(&engine, input, &["rewindOnStop"]), true)
            .unwrap();
        engine
            .set(leaf(&engine, input, &["timeRange"]), [1.0f32, 2.0])
            .unwrap();
        engine
            .set(leaf(&engine, input, &["timeDelta"]), 0.5f32)
            .unwrap();
        engine.update().unwrap();
        let progress = leaf(&engine, engine.output(anim), &["progress"]);
        assert_eq!(engine.get::<f32>(progress), Some(0.5));

        let buffer = engine.save_to_buffer().unwrap();
        let mut restored = LogicEngine::default();
        restored.load_from_buffer(&buffer, &scene).unwrap();
        let anim = restored.find_node("anim").unwrap();
        let input = restored.input(anim);
        assert_eq!(restored.get::<bool>(leaf(&restored, input, &["play"])), Some(true));
        assert_eq!(restored.get::<bool>(leaf(&restored, input, &["loop"])), Some(true));
        assert_eq!(
            restored.get::<bool>(leaf(&restored, input, &["rewindOnStop"])),
            Some(true)
        );
        assert_eq!(
            restored.get::<Vec2f>(leaf(&restored, input, &["timeRange"])),
            Some([1.0, 2.0])
        );

        // Progress was not persisted: advancing by zero starts from the
        // beginning of the time range, at the first keyframe.
        restored
            .set(leaf(&restored, input, &["timeDelta"]), 0.0f32)
            .unwrap();
        restored.update().unwrap();
        let progress = leaf(&restored, restored.output(anim), &["progress"]);
        assert_eq!(restored.get::<f32>(progress), Some(0.0));
        let channel = leaf(&restored, restored.output(anim), &["channel"]);
        assert_eq!(restored.get::<Vec2f>(channel), Some([0.0, 10.0]));
    }

    #[test]
    fn bindings_reattach_and_merge_by_name() {
        let mut scene = MemoryScene::new();
        let transform = scene.add_transform("node");
        let mut engine = LogicEngine::default();
        let binding = engine
            .create_transform_binding(transform.clone(), "NodeBinding")
            .unwrap();
        engine
            .set(
                leaf(&engine, engine.input(binding), &["translation"]),
                [1.0f32, 2.0, 3.0],
            )
            .unwrap();
        let buffer = engine.save_to_buffer().unwrap();

        let mut restored = LogicEngine::default();
        restored.load_from_buffer(&buffer, &scene).unwrap();
        restored.update().unwrap();
        // The merged was_set leaf flows back into the host object.
        assert_eq!(transform.borrow().translation, [1.0, 2.0, 3.0]);
    }

    #[test]
    fn missing_scene_object_fails_and_keeps_the_engine() {
        let mut scene = MemoryScene::new();
        let transform = scene.add_transform("node");
        let mut engine = LogicEngine::default();
        engine
            .create_transform_binding(transform, "NodeBinding")
            .unwrap();
        let buffer = engine.save_to_buffer().unwrap();

        let mut restored = LogicEngine::default();
        restored
            .create_interface(
                TypeData::structure(
                    "keep",
                    vec![TypeData::primitive("x", PropertyKind::Float)],
                ),
                "Keep",
            )
            .unwrap();
        let empty = MemoryScene::new();
        let err = restored.load_from_buffer(&buffer, &empty).unwrap_err();
        assert!(matches!(err, TangleError::Attachment(_)));
        // All or nothing: the previous content is untouched.
        assert!(restored.find_node("Keep").is_some());
        assert!(restored.find_node("NodeBinding").is_none());
        assert_eq!(restored.errors().len(), 1);
    }

    #[test]
    fn changed_uniform_type_is_an_attachment_error() {
        let mut scene = MemoryScene::new();
        let appearance = scene.add_appearance("mat", vec![("opacity", PropertyKind::Float)]);
        let mut engine = LogicEngine::default();
        engine
            .create_appearance_binding(appearance, "MatBinding")
            .unwrap();
        let buffer = engine.save_to_buffer().unwrap();

        // Same object id, different uniform type.
        let mut other_scene = MemoryScene::new();
        other_scene.add_appearance("mat", vec![("opacity", PropertyKind::Int32)]);
        let mut restored = LogicEngine::default();
        let err = restored.load_from_buffer(&buffer, &other_scene).unwrap_err();
        assert!(matches!(err, TangleError::Attachment(_)));
        assert!(err.to_string().contains("opacity"));
    }

    #[test]
    fn newer_format_version_is_rejected() {
        let scene = MemoryScene::new();
        let mut engine = LogicEngine::default();
        let mut buffer = engine.save_to_buffer().unwrap();
        // Patch the format version field at the end of the header.
        let offset = format::HEADER_LEN - 4;
        buffer[offset..format::HEADER_LEN]
            .copy_from_slice(&(FILE_FORMAT_VERSION + 1).to_le_bytes());
        let err = engine.load_from_buffer(&buffer, &scene).unwrap_err();
        assert!(err.to_string().contains("newer"));
    }

    #[test]
    fn too_old_format_version_is_rejected() {
        let scene = MemoryScene::new();
        let mut engine = LogicEngine::default();
        let mut buffer = engine.save_to_buffer().unwrap();
        let offset = format::HEADER_LEN - 4;
        buffer[offset..format::HEADER_LEN].copy_from_slice(&0u32.to_le_bytes());
        let err = engine.load_from_buffer(&buffer, &scene).unwrap_err();
        assert!(err.to_string().contains("expected file format version"));
    }

    #[test]
    fn host_major_version_mismatch_is_rejected() {
        let scene = MemoryScene::new();
        let mut engine = LogicEngine::new(EngineOptions {
            host_version: [2, 0, 0],
            script_engine: None,
        });
        let buffer = engine.save_to_buffer().unwrap();

        let mut restored = LogicEngine::new(EngineOptions {
            host_version: [1, 4, 2],
            script_engine: None,
        });
        let err = restored.load_from_buffer(&buffer, &scene).unwrap_err();
        assert!(err
            .to_string()
            .contains("expected host engine version 1.4.2 but found 2.0.0"));
    }

    #[test]
    fn previous_format_version_loads_in_compat_mode() {
        let scene = MemoryScene::new();
        let mut engine = LogicEngine::default();
        engine
            .create_interface(
                TypeData::structure(
                    "facade",
                    vec![TypeData::primitive("x", PropertyKind::Float)],
                ),
                "Facade",
            )
            .unwrap();
        let buffer = engine.save_to_buffer().unwrap();

        // Re-encode the same content the way the previous version wrote it.
        let (header, consumed) = FileHeader::read(&buffer).unwrap();
        let root = match bincode::deserialize(&buffer[consumed..]).unwrap() {
            FileConfig::V2(root) => root,
            other => panic!("unexpected payload {other:?}"),
        };
        let old_root = format::v1::Root {
            data_arrays: root.data_arrays,
            nodes: root.nodes,
            links: root.links,
        };
        let mut old_buffer = vec![];
        FileHeader {
            format_version: FILE_FORMAT_COMPAT_VERSION,
            ..header
        }
        .write(&mut old_buffer)
        .unwrap();
        old_buffer.extend(bincode::serialize(&FileConfig::V1(old_root)).unwrap());

        let mut restored = LogicEngine::default();
        restored.load_from_buffer(&old_buffer, &scene).unwrap();
        assert!(restored.find_node("Facade").is_some());
    }

    #[test]
    fn corrupted_payload_is_a_format_error() {
        let scene = MemoryScene::new();
        let mut engine = LogicEngine::default();
        let mut buffer = engine.save_to_buffer().unwrap();
        buffer.truncate(format::HEADER_LEN + 2);
        buffer.extend_from_slice(&[0xff; 3]);
        let err = engine.load_from_buffer(&buffer, &scene).unwrap_err();
        assert!(matches!(err, TangleError::Format(_)));
    }

    #[test]
    fn loading_scripts_without_a_host_fails() {
        let scene = MemoryScene::new();
        let mut engine = engine_with_host([1, 0, 0]);
        engine.create_script("adder", "A").unwrap();
        let buffer = engine.save_to_buffer().unwrap();

        let mut hostless = LogicEngine::default();
        let err = hostless.load_from_buffer(&buffer, &scene).unwrap_err();
        assert!(err.to_string().contains("no script host"));
    }

    #[test]
    fn anchor_points_reconnect_to_their_bindings() {
        let mut scene = MemoryScene::new();
        let transform = scene.add_transform("node");
        let camera = scene.add_camera("main");
        let mut engine = LogicEngine::default();
        let tb = engine
            .create_transform_binding(transform, "NodeBinding")
            .unwrap();
        let cb = engine.create_camera_binding(camera, "CameraBinding").unwrap();
        engine.create_anchor_point(tb, cb, "Anchor").unwrap();
        let buffer = engine.save_to_buffer().unwrap();

        let mut restored = LogicEngine::default();
        restored.load_from_buffer(&buffer, &scene).unwrap();
        restored.update().unwrap();
        let anchor = restored.find_node("Anchor").unwrap();
        match restored.node(anchor).unwrap().kind() {
            crate::node::NodeKind::AnchorPoint(a) => {
                assert_eq!(a.transform_node(), tb);
                assert_eq!(a.camera_node(), cb);
            }
            other => panic!("unexpected kind {other:?}"),
        }
        // Anchors keep their place behind the bindings.
        let order: Vec<_> = restored.deps.sorted_nodes().unwrap().to_vec();
        let position = |id| order.iter().position(|&n| n == id).unwrap();
        assert!(position(tb) < position(anchor));
        assert!(position(cb) < position(anchor));

        // The reconnected anchor keeps tracking the host across ticks.
        restored
            .set(
                leaf(&restored, restored.input(tb), &["translation"]),
                [3.0f32, 4.0, 5.0],
            )
            .unwrap();
        restored.update().unwrap();
        let coords = leaf(&restored, restored.output(anchor), &["viewportCoords"]);
        let depth = leaf(&restored, restored.output(anchor), &["depth"]);
        assert_eq!(restored.get::<Vec2f>(coords), Some([3.0, 4.0]));
        assert_eq!(restored.get::<f32>(depth), Some(5.0));
        restored
            .set(
                leaf(&restored, restored.input(tb), &["translation"]),
                [30.0f32, 40.0, 50.0],
            )
            .unwrap();
        restored.update().unwrap();
        assert_eq!(restored.get::<Vec2f>(coords), Some([30.0, 40.0]));
        assert_eq!(restored.get::<f32>(depth), Some(50.0));
    }

    #[test]
    fn cubic_channels_keep_their_tangent_references() {
        let scene = MemoryScene::new();
        let mut engine = LogicEngine::default();
        let stamps = engine
            .create_data_array(ArrayData::Float(vec![0.0, 2.0]), "stamps")
            .unwrap();
        let keys = engine
            .create_data_array(ArrayData::Float(vec![1.0, 5.0]), "keys")
            .unwrap();
        let tangents = engine
            .create_data_array(ArrayData::Float(vec![0.0, 0.0]), "tangents")
            .unwrap();
        engine
            .create_animation_node(
                vec![AnimationChannel {
                    name: "value".into(),
                    timestamps: stamps,
                    keyframes: keys,
                    interpolation: InterpolationType::Cubic,
                    tangents_in: Some(tangents),
                    tangents_out: Some(tangents),
                }],
                "cubic",
            )
            .unwrap();
        let buffer = engine.save_to_buffer().unwrap();

        let mut restored = LogicEngine::default();
        restored.load_from_buffer(&buffer, &scene).unwrap();
        let anim = restored.find_node("cubic").unwrap();
        match restored.node(anim).unwrap().kind() {
            crate::node::NodeKind::Animation(animation) => {
                let channel = &animation.channels()[0];
                assert_eq!(channel.interpolation, InterpolationType::Cubic);
                assert_eq!(channel.tangents_in, Some(tangents));
                assert_eq!(channel.tangents_out, Some(tangents));
                assert_eq!(animation.duration(), 2.0);
            }
            other => panic!("unexpected kind {other:?}"),
        }

        // The restored node samples with the persisted tangents.
        let input = restored.input(anim);
        restored.set(leaf(&restored, input, &["play"]), true).unwrap();
        restored
            .set(leaf(&restored, input, &["timeDelta"]), 1.0f32)
            .unwrap();
        restored.update().unwrap();
        let out = leaf(&restored, restored.output(anim), &["value"]);
        let got = restored.get::<f32>(out).unwrap();
        assert!((got - 3.0).abs() < 1e-5);
    }

    #[test]
    fn saved_buffers_are_stable_across_identical_saves() {
        let mut engine = LogicEngine::default();
        engine
            .create_interface(
                TypeData::structure(
                    "facade",
                    vec![TypeData::primitive("x", PropertyKind::Float)],
                ),
                "Facade",
            )
            .unwrap();
        let first = engine.save_to_buffer().unwrap();
        let second = engine.save_to_buffer().unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn value_serialization_round_trips_every_primitive() {
        let mut engine = LogicEngine::default();
        let scene = MemoryScene::new();
        let children = vec![
            TypeData::primitive("f", PropertyKind::Float),
            TypeData::primitive("v2f", PropertyKind::Vec2f),
            TypeData::primitive("v3f", PropertyKind::Vec3f),
            TypeData::primitive("v4f", PropertyKind::Vec4f),
            TypeData::primitive("i", PropertyKind::Int32),
            TypeData::primitive("v2i", PropertyKind::Vec2i),
            TypeData::primitive("v3i", PropertyKind::Vec3i),
            TypeData::primitive("v4i", PropertyKind::Vec4i),
            TypeData::primitive("b", PropertyKind::Bool),
            TypeData::primitive("s", PropertyKind::String),
        ];
        let facade = engine
            .create_interface(TypeData::structure("all", children), "All")
            .unwrap();
        let input = engine.input(facade);
        engine.set(leaf(&engine, input, &["f"]), 1.5f32).unwrap();
        engine.set(leaf(&engine, input, &["v2f"]), [1.0f32, 2.0]).unwrap();
        engine
            .set(leaf(&engine, input, &["v3f"]), [1.0f32, 2.0, 3.0])
            .unwrap();
        engine
            .set(leaf(&engine, input, &["v4f"]), [1.0f32, 2.0, 3.0, 4.0])
            .unwrap();
        engine.set(leaf(&engine, input, &["i"]), -7i32).unwrap();
        engine.set(leaf(&engine, input, &["v2i"]), [1i32, 2]).unwrap();
        engine.set(leaf(&engine, input, &["v3i"]), [1i32, 2, 3]).unwrap();
        engine
            .set(leaf(&engine, input, &["v4i"]), [1i32, 2, 3, 4])
            .unwrap();
        engine.set(leaf(&engine, input, &["b"]), true).unwrap();
        engine
            .set(leaf(&engine, input, &["s"]), String::from("tangle"))
            .unwrap();

        let buffer = engine.save_to_buffer().unwrap();
        let mut restored = LogicEngine::default();
        restored.load_from_buffer(&buffer, &scene).unwrap();
        let facade = restored.find_node("All").unwrap();
        let input = restored.input(facade);
        assert_eq!(restored.get::<f32>(leaf(&restored, input, &["f"])), Some(1.5));
        assert_eq!(
            restored.get::<crate::value::Vec4f>(leaf(&restored, input, &["v4f"])),
            Some([1.0, 2.0, 3.0, 4.0])
        );
        assert_eq!(
            restored.get::<crate::value::Vec4i>(leaf(&restored, input, &["v4i"])),
            Some([1, 2, 3, 4])
        );
        assert_eq!(restored.get::<bool>(leaf(&restored, input, &["b"])), Some(true));
        assert_eq!(
            restored.get::<String>(leaf(&restored, input, &["s"])).as_deref(),
            Some("tangle")
        );
        assert_eq!(
            restored.get::<crate::value::Vec2i>(leaf(&restored, input, &["v2i"])),
            Some([1, 2])
        );
    }
}
