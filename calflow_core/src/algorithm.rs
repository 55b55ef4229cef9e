//! Algorithm trait, factory registry and closure adapter.

use std::collections::BTreeMap;
use std::fmt;

use crate::context::EventContext;
use crate::error::{PfError, PfResult};
use crate::list_store::AlgorithmId;
use calflow_env::AlgorithmConfig;

/// One step of the reconstruction pipeline.
///
/// `run` receives the id of its own scope; temporary lists it creates are
/// registered under that id and removed when it returns.
pub trait Algorithm {
    /// Registered type name, used in logs.
    fn type_name(&self) -> &str;

    /// Reads keys from `config` and builds daughter algorithms through
    /// `factory`. Missing optional keys keep their defaults.
    fn read_settings(&mut self, _config: &AlgorithmConfig, _factory: &AlgorithmFactory) -> PfResult<()> {
        Ok(())
    }

    fn run(&mut self, ctx: &mut EventContext, id: AlgorithmId) -> PfResult<()>;
}

type Constructor = Box<dyn Fn() -> Box<dyn Algorithm>>;

/// Maps type names to constructors.
#[derive(Default)]
pub struct AlgorithmFactory {
    constructors: BTreeMap<String, Constructor>,
}

impl fmt::Debug for AlgorithmFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AlgorithmFactory")
            .field("types", &self.constructors.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl AlgorithmFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Factory with every built-in algorithm type registered.
    pub fn with_builtin() -> Self {
        let mut factory = Self::new();
        crate::algorithms::register_builtin(&mut factory);
        factory
    }

    /// Registers a constructor; a duplicate type name is `NotAllowed`.
    pub fn register<F>(&mut self, type_name: &str, constructor: F) -> PfResult<()>
    where
        F: Fn() -> Box<dyn Algorithm> + 'static,
    {
        if self.constructors.contains_key(type_name) {
            return Err(PfError::not_allowed(format!(
                "algorithm type '{}' is already registered",
                type_name
            )));
        }
        self.constructors.insert(type_name.to_string(), Box::new(constructor));
        Ok(())
    }

    pub(crate) fn insert<F>(&mut self, type_name: &str, constructor: F)
    where
        F: Fn() -> Box<dyn Algorithm> + 'static,
    {
        self.constructors.insert(type_name.to_string(), Box::new(constructor));
    }

    pub fn is_registered(&self, type_name: &str) -> bool {
        self.constructors.contains_key(type_name)
    }

    pub fn type_names(&self) -> impl Iterator<Item = &str> {
        self.constructors.keys().map(String::as_str)
    }

    /// Builds and configures the algorithm described by `config`.
    pub fn create(&self, config: &AlgorithmConfig) -> PfResult<Box<dyn Algorithm>> {
        let constructor = self.constructors.get(&config.algorithm_type).ok_or_else(|| {
            PfError::not_found(format!("algorithm type '{}' is not registered", config.algorithm_type))
        })?;
        let mut algorithm = constructor();
        algorithm.read_settings(config, self)?;
        Ok(algorithm)
    }

    /// Builds the single daughter registered under `role`.
    pub fn create_daughter(&self, config: &AlgorithmConfig, role: &str) -> PfResult<Box<dyn Algorithm>> {
        let daughter = config.daughters.get(role).ok_or_else(|| {
            PfError::not_found(format!("'{}' has no '{}' daughter", config.label(), role))
        })?;
        self.create(daughter)
    }

    /// Like `create_daughter`, but a missing role yields `None`.
    pub fn create_optional_daughter(
        &self,
        config: &AlgorithmConfig,
        role: &str,
    ) -> PfResult<Option<Box<dyn Algorithm>>> {
        match config.daughters.get(role) {
            Some(daughter) => self.create(daughter).map(Some),
            None => Ok(None),
        }
    }

    /// Builds the ordered daughter list under `role`; missing means empty.
    pub fn create_daughter_list(&self, config: &AlgorithmConfig, role: &str) -> PfResult<Vec<Box<dyn Algorithm>>> {
        config
            .daughter_lists
            .get(role)
            .map(|list| list.iter().map(|c| self.create(c)).collect())
            .unwrap_or_else(|| Ok(Vec::new()))
    }
}

/// Wraps a closure as an algorithm. Handy for tests and small glue steps.
pub struct FnAlgorithm<F> {
    type_name: String,
    body: F,
}

impl<F> FnAlgorithm<F>
where
    F: FnMut(&mut EventContext, AlgorithmId) -> PfResult<()>,
{
    pub fn new(type_name: impl Into<String>, body: F) -> Self {
        Self {
            type_name: type_name.into(),
            body,
        }
    }
}

impl<F> Algorithm for FnAlgorithm<F>
where
    F: FnMut(&mut EventContext, AlgorithmId) -> PfResult<()>,
{
    fn type_name(&self) -> &str {
        &self.type_name
    }

    fn run(&mut self, ctx: &mut EventContext, id: AlgorithmId) -> PfResult<()> {
        (self.body)(ctx, id)
    }
}
