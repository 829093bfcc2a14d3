//! A script host backed by Rust closures.
//!
//! Every registered callback plays the role of a compiled script chunk:
//! `compile` looks the source text up as a callback name and hands out a
//! fresh closure instance, so two script nodes made from the same callback
//! never share state unless the callback captures it on purpose.

use std::collections::HashMap;
use tangle_core::nodes::script::{CompiledScript, ScriptEngine, ScriptInterface, ScriptIo};

/// The execution payload of one script instance.
pub type RunCallback = Box<dyn FnMut(&mut ScriptIo<'_>) -> Result<(), String>>;

type CallbackFactory = Box<dyn Fn() -> RunCallback>;

struct CallbackEntry {
    interface: ScriptInterface,
    factory: CallbackFactory,
}

/// A [`ScriptEngine`] resolving source strings to registered callbacks.
#[derive(Default)]
pub struct CallbackScriptEngine {
    callbacks: HashMap<String, CallbackEntry>,
}

impl std::fmt::Debug for CallbackScriptEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<_> = self.callbacks.keys().collect();
        names.sort();
        f.debug_struct("CallbackScriptEngine")
            .field("callbacks", &names)
            .finish()
    }
}

impl CallbackScriptEngine {
    pub fn new() -> Self {
        CallbackScriptEngine::default()
    }

    /// Registers a callback under `name`. The factory runs once per
    /// compile and produces that instance's closure.
    pub fn register<F>(&mut self, name: &str, interface: ScriptInterface, factory: F)
    where
        F: Fn() -> RunCallback + 'static,
    {
        let previous = self.callbacks.insert(
            name.to_string(),
            CallbackEntry {
                interface,
                factory: Box::new(factory),
            },
        );
        if previous.is_some() {
            log::warn!("callback '{name}' was registered twice, keeping the newer one");
        }
    }
}

impl ScriptEngine for CallbackScriptEngine {
    fn compile(&mut self, source: &str, name: &str) -> Result<Box<dyn CompiledScript>, String> {
        let entry = self
            .callbacks
            .get(source)
            .ok_or_else(|| format!("no callback '{source}' registered (for script '{name}')"))?;
        Ok(Box::new(CallbackScript {
            name: source.to_string(),
            interface: entry.interface.clone(),
            run: (entry.factory)(),
        }))
    }
}

struct CallbackScript {
    name: String,
    interface: ScriptInterface,
    run: RunCallback,
}

impl std::fmt::Debug for CallbackScript {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackScript")
            .field("name", &self.name)
            .finish()
    }
}

impl CompiledScript for CallbackScript {
    fn interface(&self) -> ScriptInterface {
        self.interface.clone()
    }

    fn run(&mut self, io: &mut ScriptIo<'_>) -> Result<(), String> {
        (self.run)(io)
    }
}
