//! The common node header and the dispatch over node variants.

use crate::errors::TangleError;
use crate::nodes::anchor::AnchorPointNode;
use crate::nodes::animation::AnimationNode;
use crate::nodes::bindings::{
    AppearanceBinding, CameraBinding, RenderPassBinding, TransformBinding,
};
use crate::nodes::data_array::DataArray;
use crate::nodes::script::{InterfaceNode, ScriptNode};
use crate::nodes::timer::TimerNode;
use crate::property::{PropertyId, PropertyPool};
use crate::{DataArrayId, NodeId};
use std::collections::BTreeMap;

/// Engine state a node may touch while it executes.
pub struct UpdateContext<'a> {
    pub pool: &'a mut PropertyPool,
    pub arrays: &'a BTreeMap<DataArrayId, DataArray>,
}

/// The closed set of node variants the scheduler dispatches over.
#[derive(Debug)]
pub enum NodeKind {
    Script(ScriptNode),
    Interface(InterfaceNode),
    Animation(AnimationNode),
    Timer(TimerNode),
    AnchorPoint(AnchorPointNode),
    TransformBinding(TransformBinding),
    AppearanceBinding(AppearanceBinding),
    CameraBinding(CameraBinding),
    RenderPassBinding(RenderPassBinding),
}

impl NodeKind {
    pub fn kind_name(&self) -> &'static str {
        match self {
            NodeKind::Script(_) => "script",
            NodeKind::Interface(_) => "interface",
            NodeKind::Animation(_) => "animation",
            NodeKind::Timer(_) => "timer",
            NodeKind::AnchorPoint(_) => "anchor point",
            NodeKind::TransformBinding(_) => "transform binding",
            NodeKind::AppearanceBinding(_) => "appearance binding",
            NodeKind::CameraBinding(_) => "camera binding",
            NodeKind::RenderPassBinding(_) => "render pass binding",
        }
    }

    /// True for nodes that must stay scheduled without input changes: a
    /// playing animation, a timer on its internal clock, and anchor
    /// points. Anchors have no input leaves, so no link propagation can
    /// ever re-dirty them; their host objects change under them whenever
    /// the bindings they sit behind push new state.
    pub(crate) fn wants_update(&self) -> bool {
        match self {
            NodeKind::Animation(node) => node.wants_update(),
            NodeKind::Timer(node) => node.wants_update(),
            NodeKind::AnchorPoint(_) => true,
            _ => false,
        }
    }

    pub fn is_binding(&self) -> bool {
        matches!(
            self,
            NodeKind::TransformBinding(_)
                | NodeKind::AppearanceBinding(_)
                | NodeKind::CameraBinding(_)
                | NodeKind::RenderPassBinding(_)
        )
    }
}

#[derive(Debug)]
pub struct LogicNode {
    id: NodeId,
    name: String,
    dirty: bool,
    input: Option<PropertyId>,
    output: Option<PropertyId>,
    kind: NodeKind,
}

impl LogicNode {
    /// Nodes start dirty so the first update executes them.
    pub(crate) fn new(
        id: NodeId,
        name: impl Into<String>,
        input: Option<PropertyId>,
        output: Option<PropertyId>,
        kind: NodeKind,
    ) -> Self {
        LogicNode {
            id,
            name: name.into(),
            dirty: true,
            input,
            output,
            kind,
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn set_dirty(&mut self, dirty: bool) {
        self.dirty = dirty;
    }

    /// Root of the input tree; `None` for nodes without inputs.
    pub fn input(&self) -> Option<PropertyId> {
        self.input
    }

    /// Root of the output tree; `None` for binding-only nodes.
    pub fn output(&self) -> Option<PropertyId> {
        self.output
    }

    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    pub fn update(&mut self, ctx: &mut UpdateContext<'_>) -> Result<(), TangleError> {
        let result = match &mut self.kind {
            NodeKind::Script(node) => node.update(self.input, self.output, ctx.pool),
            NodeKind::Interface(node) => node.update(),
            NodeKind::Animation(node) => {
                node.update(self.input, self.output, ctx.pool, ctx.arrays)
            }
            NodeKind::Timer(node) => node.update(self.input, self.output, ctx.pool),
            NodeKind::AnchorPoint(node) => node.update(self.output, ctx.pool),
            NodeKind::TransformBinding(node) => node.update(self.input, ctx.pool),
            NodeKind::AppearanceBinding(node) => node.update(self.input, ctx.pool),
            NodeKind::CameraBinding(node) => node.update(self.input, ctx.pool),
            NodeKind::RenderPassBinding(node) => node.update(self.input, ctx.pool),
        };
        result.map_err(|message| TangleError::Runtime {
            node_name: self.name.clone(),
            message,
        })
    }
}
