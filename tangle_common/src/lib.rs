//! Support implementations of the engine's host capabilities: a
//! callback-backed script engine and an in-memory scene. Used by tests,
//! the demo, and embedders that do not bring their own.

pub mod scene;
pub mod script;

pub use scene::{
    MemoryAppearance, MemoryCamera, MemoryRenderPass, MemoryScene, MemoryTransform,
};
pub use script::CallbackScriptEngine;
