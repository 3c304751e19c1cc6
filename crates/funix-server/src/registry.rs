//! The function table: built once during setup, read-only while serving.

use std::collections::HashMap;
use std::sync::Arc;

use funix_schema::{
    FunctionConfig, FunctionSchema, Resolver, SchemaBuilder, Selector, Signature, ThemeSet,
};
use indexmap::IndexMap;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{FunctionError, RegistryError};
use crate::function::{CallContext, Callable, Kwargs, Output, identity};

/// Where an argument's initial value comes from.
#[derive(Debug, Clone, PartialEq)]
pub struct PreFillLink {
    pub argument: String,
    pub source: Uuid,
    pub selector: Selector,
}

#[derive(Clone)]
pub struct RegisteredFunction {
    pub schema: Arc<FunctionSchema>,
    pub callable: Arc<dyn Callable>,
    pub pre_fill: Vec<PreFillLink>,
}

pub struct Registry {
    resolver: Resolver,
    themes: ThemeSet,
    functions: IndexMap<Uuid, RegisteredFunction>,
    paths: HashMap<String, Uuid>,
    identities: HashMap<usize, Uuid>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new(Resolver::default(), ThemeSet::default())
    }
}

impl Registry {
    pub fn new(resolver: Resolver, themes: ThemeSet) -> Self {
        Self {
            resolver,
            themes,
            functions: IndexMap::new(),
            paths: HashMap::new(),
            identities: HashMap::new(),
        }
    }

    pub fn resolver_mut(&mut self) -> &mut Resolver {
        &mut self.resolver
    }

    pub fn themes(&self) -> &ThemeSet {
        &self.themes
    }

    pub fn themes_mut(&mut self) -> &mut ThemeSet {
        &mut self.themes
    }

    /// Build the schema and add the function. Registering the same path
    /// again replaces the earlier function.
    pub fn register(
        &mut self,
        signature: &Signature,
        config: &FunctionConfig,
        callable: Arc<dyn Callable>,
    ) -> Result<Arc<FunctionSchema>, RegistryError> {
        let schema = SchemaBuilder::new(&self.resolver, &self.themes)
            .build(signature, config)
            .map_err(|error| RegistryError::Schema {
                function: signature.name.clone(),
                error,
            })?;

        let pre_fill = config
            .pre_fill
            .iter()
            .map(|(argument, pre_fill)| {
                let source = self.lookup(&pre_fill.function).map(|f| f.schema.id).ok_or_else(|| {
                    RegistryError::UnknownPreFillSource {
                        function: signature.name.clone(),
                        argument: argument.clone(),
                        from: pre_fill.function.clone(),
                    }
                })?;
                Ok(PreFillLink {
                    argument: argument.clone(),
                    source,
                    selector: pre_fill.selector.clone(),
                })
            })
            .collect::<Result<Vec<_>, RegistryError>>()?;

        if let Some(previous) = self.functions.get(&schema.id) {
            warn!(path = %schema.path, "replacing registered function");
            self.identities.remove(&identity(&previous.callable));
        }

        let schema = Arc::new(schema);
        self.paths.insert(schema.path.clone(), schema.id);
        self.identities.insert(identity(&callable), schema.id);
        self.functions.insert(
            schema.id,
            RegisteredFunction {
                schema: schema.clone(),
                callable,
                pre_fill,
            },
        );
        info!(function = %schema.name, path = %schema.path, "function registered");
        Ok(schema)
    }

    /// Register a closure. Returns the stored `Arc` too, so other
    /// functions can return it as a call target.
    pub fn register_fn<F>(
        &mut self,
        signature: &Signature,
        config: &FunctionConfig,
        f: F,
    ) -> Result<(Arc<FunctionSchema>, Arc<dyn Callable>), RegistryError>
    where
        F: Fn(Kwargs, &mut CallContext) -> Result<Output, FunctionError> + Send + Sync + 'static,
    {
        let callable: Arc<dyn Callable> = Arc::new(f);
        let schema = self.register(signature, config, callable.clone())?;
        Ok((schema, callable))
    }

    pub fn get(&self, id: &Uuid) -> Option<&RegisteredFunction> {
        self.functions.get(id)
    }

    pub fn by_path(&self, path: &str) -> Option<&RegisteredFunction> {
        self.paths.get(path).and_then(|id| self.functions.get(id))
    }

    /// Id string, path, or function name.
    pub fn lookup(&self, key: &str) -> Option<&RegisteredFunction> {
        if let Ok(id) = key.parse::<Uuid>() {
            if let Some(function) = self.functions.get(&id) {
                return Some(function);
            }
        }
        self.by_path(key)
            .or_else(|| self.functions.values().find(|f| f.schema.name == key))
    }

    /// The registration a returned callable belongs to.
    pub fn identify(&self, callable: &Arc<dyn Callable>) -> Option<&RegisteredFunction> {
        self.identities
            .get(&identity(callable))
            .and_then(|id| self.functions.get(id))
    }

    pub fn iter(&self) -> impl Iterator<Item = &RegisteredFunction> {
        self.functions.values()
    }

    /// First registered function.
    pub fn default_function(&self) -> Option<&RegisteredFunction> {
        self.functions.values().next()
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use funix_schema::{Annotation, SchemaError};
    use serde_json::json;

    fn echo(args: Kwargs, _: &mut CallContext) -> Result<Output, FunctionError> {
        Ok(Output::json(json!(args.to_json())))
    }

    #[test]
    fn lookups_resolve_id_path_name_and_identity() {
        let mut registry = Registry::default();
        let signature = Signature::new("echo").arg("x", Annotation::int());
        let (schema, callable) = registry
            .register_fn(&signature, &FunctionConfig::new().path("say"), echo)
            .unwrap();

        assert_eq!(registry.lookup(&schema.id.to_string()).unwrap().schema.id, schema.id);
        assert_eq!(registry.lookup("say").unwrap().schema.id, schema.id);
        assert_eq!(registry.lookup("echo").unwrap().schema.id, schema.id);
        assert_eq!(registry.identify(&callable).unwrap().schema.id, schema.id);
        assert!(registry.lookup("missing").is_none());
    }

    #[test]
    fn reregistering_a_path_replaces_the_function() {
        let mut registry = Registry::default();
        let signature = Signature::new("echo");
        let (_, first) = registry.register_fn(&signature, &FunctionConfig::new(), echo).unwrap();
        let (_, second) = registry.register_fn(&signature, &FunctionConfig::new(), echo).unwrap();

        assert_eq!(registry.len(), 1);
        assert!(registry.identify(&first).is_none());
        assert!(registry.identify(&second).is_some());
    }

    #[test]
    fn registration_errors_name_the_function() {
        let mut registry = Registry::default();
        let signature = Signature::new("bad").arg("x", Annotation::int());
        let config = FunctionConfig::new()
            .whitelist("x", json!([1]))
            .examples("x", json!([2]));
        let err = registry.register_fn(&signature, &config, echo).err().unwrap();
        assert!(matches!(
            err,
            RegistryError::Schema {
                ref function,
                error: SchemaError::WhitelistExampleConflict { .. },
            } if function == "bad"
        ));
        assert!(registry.is_empty());
    }

    #[test]
    fn pre_fill_sources_must_exist_first() {
        let mut registry = Registry::default();
        let target = Signature::new("target").arg("x", Annotation::int());
        let config = FunctionConfig::new().pre_fill("x", "source", Selector::Result);
        assert!(matches!(
            registry.register_fn(&target, &config, echo),
            Err(RegistryError::UnknownPreFillSource { .. })
        ));

        let (source, _) = registry
            .register_fn(&Signature::new("source"), &FunctionConfig::new(), echo)
            .unwrap();
        let (schema, _) = registry.register_fn(&target, &config, echo).unwrap();
        assert_eq!(registry.get(&schema.id).unwrap().pre_fill[0].source, source.id);
    }
}
