/*
    A logic runtime driving a host rendering scene.

    The engine evaluates a DAG of nodes whose typed property trees are
    connected by value-propagating links. Each update executes the dirty
    nodes in topological order; binding nodes forward their inputs into
    host scene objects at the end of the chain.

    Everything is single threaded; the engine is the only mutation root.
    Cross references between objects are ids (node ids, property ids,
    data array ids), never pointers, which also makes them stable across
    save and load.
*/

pub mod dependencies;
pub mod engine;
pub mod errors;
pub mod graph;
pub mod links;
pub mod node;
pub mod nodes;
pub mod property;
pub mod scene;
pub mod serialize;
pub mod typedata;
pub mod value;

use serde::{Deserialize, Serialize};

/// Node ids are engine-local and monotonically assigned, which keeps
/// them stable in saved files and cheap to order.
#[derive(Clone, Copy, Eq, Hash, Ord, PartialEq, PartialOrd, Debug, Serialize, Deserialize)]
pub struct NodeId(pub u64);

/// Data array ids, assigned like node ids.
#[derive(Clone, Copy, Eq, Hash, Ord, PartialEq, PartialOrd, Debug, Serialize, Deserialize)]
pub struct DataArrayId(pub u64);

/// Version of this runtime, stamped into saved files.
pub const RUNTIME_VERSION: [u32; 3] = [0, 1, 0];

pub use engine::{EngineOptions, LogicEngine};
pub use errors::{ErrorRecord, TangleError};

pub mod prelude {
    pub use crate::engine::{EngineOptions, LogicEngine};
    pub use crate::errors::TangleError;
    pub use crate::nodes::animation::{AnimationChannel, InterpolationType};
    pub use crate::nodes::data_array::ArrayData;
    pub use crate::nodes::script::{CompiledScript, ScriptEngine, ScriptInterface, ScriptIo};
    pub use crate::property::{PropertyId, PropertySemantics};
    pub use crate::scene::{Scene, SceneObjectId};
    pub use crate::typedata::TypeData;
    pub use crate::value::{PropertyKind, PropertyValue};
    pub use crate::{DataArrayId, NodeId};
}
