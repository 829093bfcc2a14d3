//! Anchor points: screen-space projection of a transform through a camera.

use crate::property::{PropertyId, PropertyPool};
use crate::scene::{CameraHandle, TransformHandle};
use crate::value::PropertyValue;
use crate::NodeId;

/// Read-only composite node. Its outputs depend on the host objects of a
/// transform binding and a camera binding, so the engine places it behind
/// both through synthetic graph edges.
#[derive(Debug)]
pub struct AnchorPointNode {
    transform_node: NodeId,
    camera_node: NodeId,
    transform: TransformHandle,
    camera: CameraHandle,
}

impl AnchorPointNode {
    pub(crate) fn new(
        transform_node: NodeId,
        camera_node: NodeId,
        transform: TransformHandle,
        camera: CameraHandle,
    ) -> Self {
        AnchorPointNode {
            transform_node,
            camera_node,
            transform,
            camera,
        }
    }

    pub fn transform_node(&self) -> NodeId {
        self.transform_node
    }

    pub fn camera_node(&self) -> NodeId {
        self.camera_node
    }

    pub(crate) fn update(
        &mut self,
        output: Option<PropertyId>,
        pool: &mut PropertyPool,
    ) -> Result<(), String> {
        let output = output.ok_or("anchor point has no outputs")?;
        let world = self.transform.borrow().world_position();
        let (coords, depth) = self.camera.borrow().project(world);

        let coords_prop = pool
            .child_by_index(output, 0)
            .ok_or("anchor output schema is incomplete")?;
        pool.set_node_output(coords_prop, PropertyValue::Vec2f(coords))
            .map_err(|e| e.to_string())?;
        let depth_prop = pool
            .child_by_index(output, 1)
            .ok_or("anchor output schema is incomplete")?;
        pool.set_node_output(depth_prop, PropertyValue::Float(depth))
            .map_err(|e| e.to_string())?;
        Ok(())
    }
}
