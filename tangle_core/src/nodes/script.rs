//! Script nodes and the script host capability.
//!
//! The embedded language itself lives outside this crate. A host brings a
//! [`ScriptEngine`] that turns source text into [`CompiledScript`]s; the
//! node only schedules them and moves values across the [`ScriptIo`]
//! boundary.

use crate::property::{PropertyId, PropertyPool};
use crate::typedata::TypeData;
use crate::value::PropertyData;

/// The input/output shape a compiled script declares.
#[derive(Clone, Debug, PartialEq)]
pub struct ScriptInterface {
    pub inputs: TypeData,
    pub outputs: TypeData,
}

/// Typed access a running script gets to its own property trees.
///
/// Reads see the input tree, writes go to the output tree; a script cannot
/// reach any other node's state through this.
pub struct ScriptIo<'a> {
    pool: &'a mut PropertyPool,
    input: PropertyId,
    output: PropertyId,
}

impl<'a> ScriptIo<'a> {
    pub(crate) fn new(pool: &'a mut PropertyPool, input: PropertyId, output: PropertyId) -> Self {
        ScriptIo {
            pool,
            input,
            output,
        }
    }

    pub fn read<T: PropertyData>(&self, path: &[&str]) -> Result<T, String> {
        let id = self
            .pool
            .resolve_names(self.input, path)
            .ok_or_else(|| format!("no input property at '{}'", path.join(".")))?;
        self.pool
            .get_value(id)
            .ok_or_else(|| format!("input property '{}' has a different type", path.join(".")))
    }

    pub fn write<T: PropertyData>(&mut self, path: &[&str], value: T) -> Result<(), String> {
        let id = self
            .pool
            .resolve_names(self.output, path)
            .ok_or_else(|| format!("no output property at '{}'", path.join(".")))?;
        self.pool
            .set_node_output(id, value.into_value())
            .map_err(|e| e.to_string())?;
        Ok(())
    }
}

/// A compiled script ready to run.
pub trait CompiledScript: std::fmt::Debug {
    /// The property shape this script wants; queried once at node creation.
    fn interface(&self) -> ScriptInterface;

    /// One execution; errors surface as the node's runtime error.
    fn run(&mut self, io: &mut ScriptIo<'_>) -> Result<(), String>;
}

/// Compiles source text in the embedded language.
pub trait ScriptEngine: std::fmt::Debug {
    fn compile(&mut self, source: &str, name: &str) -> Result<Box<dyn CompiledScript>, String>;
}

#[derive(Debug)]
pub struct ScriptNode {
    source: String,
    script: Box<dyn CompiledScript>,
}

impl ScriptNode {
    pub(crate) fn new(source: impl Into<String>, script: Box<dyn CompiledScript>) -> Self {
        ScriptNode {
            source: source.into(),
            script,
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub(crate) fn update(
        &mut self,
        input: Option<PropertyId>,
        output: Option<PropertyId>,
        pool: &mut PropertyPool,
    ) -> Result<(), String> {
        let (input, output) = match (input, output) {
            (Some(input), Some(output)) => (input, output),
            _ => return Err("script node has no property trees".into()),
        };
        let mut io = ScriptIo::new(pool, input, output);
        self.script.run(&mut io)
    }
}

/// Facade node: a single `Interface`-tagged tree that is both input and
/// output, used for renaming and grouping. Its update is the identity.
#[derive(Debug, Default)]
pub struct InterfaceNode {}

impl InterfaceNode {
    pub(crate) fn update(&mut self) -> Result<(), String> {
        // Input and output are the same property tree; values already sit
        // where downstream links pick them up.
        Ok(())
    }
}
