//! Function registry.
//!
//! Maps a function's declared name to a [`Descriptor`] whose factory builds an
//! executable instance.  Units are registered explicitly during an
//! initialization phase (see [`Registry::with_builtins`]); the orchestrator
//! only ever looks names up, so new capabilities never touch call sites.
//!
//! A registry is an ordinary value.  Once built it is read-only and can be
//! shared across concurrent runs behind an `Arc`.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use super::builtins;
use super::function::{FunctionEnv, ScriptFunction};

/// Builds a unit bound to one invocation's environment.
pub type Factory =
    Arc<dyn for<'a> Fn(FunctionEnv<'a>) -> Box<dyn ScriptFunction + 'a> + Send + Sync>;

// ── Descriptor ────────────────────────────────────────────────────────────────

/// Registration record for one unit.
#[derive(Clone)]
pub struct Descriptor {
    pub name: String,
    pub description: String,
    /// Fewest positional arguments the unit accepts; checked before dispatch.
    pub min_args: usize,
    factory: Factory,
}

impl Descriptor {
    pub fn new<F>(name: impl Into<String>, description: impl Into<String>, factory: F) -> Self
    where
        F: for<'a> Fn(FunctionEnv<'a>) -> Box<dyn ScriptFunction + 'a> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            min_args: 0,
            factory: Arc::new(factory),
        }
    }

    pub fn min_args(mut self, n: usize) -> Self {
        self.min_args = n;
        self
    }

    /// Construct an instance bound to `env`.
    pub fn instantiate<'a>(&self, env: FunctionEnv<'a>) -> Box<dyn ScriptFunction + 'a> {
        (self.factory)(env)
    }
}

impl fmt::Debug for Descriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Descriptor")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("min_args", &self.min_args)
            .finish_non_exhaustive()
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("function `{0}` is already registered")]
    DuplicateName(String),
    #[error("unknown function `{0}`")]
    NotFound(String),
}

// ── Registry ──────────────────────────────────────────────────────────────────

/// Name → [`Descriptor`] catalog.  Names match exactly (case-sensitive).
#[derive(Debug, Default, Clone)]
pub struct Registry {
    functions: HashMap<String, Descriptor>,
}

impl Registry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding every builtin unit.
    pub fn with_builtins() -> Result<Self, RegistryError> {
        let mut reg = Self::new();
        reg.register_all(builtins::descriptors())?;
        Ok(reg)
    }

    /// Add a descriptor.  Fails if the name is taken.
    pub fn register(&mut self, desc: Descriptor) -> Result<(), RegistryError> {
        if self.functions.contains_key(&desc.name) {
            return Err(RegistryError::DuplicateName(desc.name));
        }
        tracing::debug!(function = %desc.name, "registered function");
        self.functions.insert(desc.name.clone(), desc);
        Ok(())
    }

    /// Register a batch, stopping at the first duplicate.
    pub fn register_all(
        &mut self,
        descs: impl IntoIterator<Item = Descriptor>,
    ) -> Result<(), RegistryError> {
        descs.into_iter().try_for_each(|d| self.register(d))
    }

    /// Look a function up by name.
    pub fn resolve(&self, name: &str) -> Result<&Descriptor, RegistryError> {
        self.functions
            .get(name)
            .ok_or_else(|| RegistryError::NotFound(name.to_owned()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    /// All descriptors, sorted by name.
    pub fn descriptors(&self) -> Vec<&Descriptor> {
        let mut all: Vec<_> = self.functions.values().collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
