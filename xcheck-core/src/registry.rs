//! Registration table
//!
//! Maps each instrumented function to its identity tag, enable flag,
//! per-parameter policy and return policy. The table is validated once,
//! when the runtime is built:
//!
//! - a checked parameter or return whose type has no hashing strategy is
//!   an [`UnsupportedType`](XCheckError::UnsupportedType) error
//! - a per-type combiner that does not exist is an
//!   [`UnknownCombiner`](XCheckError::UnknownCombiner) error
//! - two enabled functions with the same tag are a
//!   [`TagCollision`](XCheckError::TagCollision) error
//!
//! Afterwards the table is read-only. Calls to unregistered functions
//! (when allowed) resolve their policy from the configuration on first use
//! and are cached.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use crate::config::XCheckConfig;
use crate::error::{Result, XCheckError};
use crate::hash::combiner::{CombinerTable, FieldCombiner};
use crate::hash::{CrossCheckHash, HashContext, PrimitiveKind};
use crate::identity::{tag_of, SymbolTable};

/// A parameter or return type as declared at registration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeRef {
    pub type_name: String,
    /// Statically known to implement [`CrossCheckHash`]
    pub hashable: bool,
}

impl TypeRef {
    /// A Rust type with a hashing strategy
    pub fn of<T: CrossCheckHash + ?Sized>() -> Self {
        Self {
            type_name: std::any::type_name::<T>().to_string(),
            hashable: true,
        }
    }

    /// A type known only by name, checked against the registered types
    pub fn named(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            hashable: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamSpec {
    pub name: String,
    pub ty: TypeRef,
}

/// Declaration of one instrumented function
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionSpec {
    pub name: String,
    pub params: Vec<ParamSpec>,
    /// `None` for functions without a return value
    pub returns: Option<TypeRef>,
}

impl FunctionSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: Vec::new(),
            returns: None,
        }
    }

    pub fn param<T: CrossCheckHash + ?Sized>(mut self, name: impl Into<String>) -> Self {
        self.params.push(ParamSpec {
            name: name.into(),
            ty: TypeRef::of::<T>(),
        });
        self
    }

    pub fn param_named(mut self, name: impl Into<String>, type_name: impl Into<String>) -> Self {
        self.params.push(ParamSpec {
            name: name.into(),
            ty: TypeRef::named(type_name),
        });
        self
    }

    pub fn returns<T: CrossCheckHash + ?Sized>(mut self) -> Self {
        self.returns = Some(TypeRef::of::<T>());
        self
    }

    pub fn returns_named(mut self, type_name: impl Into<String>) -> Self {
        self.returns = Some(TypeRef::named(type_name));
        self
    }
}

/// Resolved parameter policy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamSite {
    pub name: String,
    pub type_name: String,
    pub checked: bool,
}

/// Resolved, read-only entry of the registration table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionSite {
    pub name: String,
    pub tag: u32,
    pub enabled: bool,
    /// Declared parameters; `None` when the function was not registered
    pub params: Option<Vec<ParamSite>>,
    pub check_return: bool,
    /// Argument policy for functions without declared parameters
    unregistered_policy: Option<crate::config::FunctionPolicy>,
}

impl FunctionSite {
    /// Whether argument `index` is hashed
    pub fn checks_arg(&self, index: usize) -> bool {
        if !self.enabled {
            return false;
        }
        match (&self.params, &self.unregistered_policy) {
            (Some(params), _) => params.get(index).map(|p| p.checked).unwrap_or(false),
            (None, Some(policy)) => policy.checks_arg(index, ""),
            (None, None) => false,
        }
    }

    /// Number of declared parameters, if known
    pub fn arity(&self) -> Option<usize> {
        self.params.as_ref().map(|p| p.len())
    }

    pub fn is_registered(&self) -> bool {
        self.params.is_some()
    }
}

/// Builder collecting declarations before validation
pub struct RegistryBuilder {
    config: XCheckConfig,
    functions: Vec<FunctionSpec>,
    types: HashSet<String>,
    combiners: Vec<Arc<dyn FieldCombiner>>,
}

impl RegistryBuilder {
    pub fn new(config: XCheckConfig) -> Self {
        let mut types: HashSet<String> = PrimitiveKind::ALL
            .iter()
            .map(|k| k.type_name().to_string())
            .collect();
        for builtin in ["isize", "usize", "str", "&str", "String"] {
            types.insert(builtin.to_string());
        }
        Self {
            config,
            functions: Vec::new(),
            types,
            combiners: Vec::new(),
        }
    }

    /// Declare a named type as hashable
    pub fn register_type(&mut self, type_name: impl Into<String>) -> &mut Self {
        self.types.insert(type_name.into());
        self
    }

    pub fn function(&mut self, spec: FunctionSpec) -> &mut Self {
        self.functions.push(spec);
        self
    }

    /// Make a user combiner available to per-type assignments
    pub fn combiner(&mut self, combiner: Arc<dyn FieldCombiner>) -> &mut Self {
        self.combiners.push(combiner);
        self
    }

    fn check_type(&self, ty: &TypeRef, location: impl FnOnce() -> String) -> Result<()> {
        if ty.hashable || self.types.contains(&ty.type_name) {
            Ok(())
        } else {
            Err(XCheckError::UnsupportedType {
                type_name: ty.type_name.clone(),
                location: location(),
            })
        }
    }

    /// Validate every declaration and freeze the table
    pub fn build(self) -> Result<Registry> {
        self.config.validate()?;

        let mut combiners = CombinerTable::new();
        for combiner in &self.combiners {
            combiners.register(Arc::clone(combiner));
        }
        for (type_name, combiner) in &self.config.combiners {
            combiners.assign(type_name, combiner)?;
        }
        if let Some(default) = &self.config.default_combiner {
            combiners.set_default(default)?;
        }

        let mut symbols = SymbolTable::new();
        let mut sites: HashMap<String, Arc<FunctionSite>> = HashMap::new();
        let mut by_tag: HashMap<u32, Arc<FunctionSite>> = HashMap::new();

        for spec in &self.functions {
            if sites.contains_key(&spec.name) {
                return Err(XCheckError::DuplicateFunction {
                    name: spec.name.clone(),
                });
            }
            let policy = self.config.policy_for(&spec.name)?;

            let mut params = Vec::with_capacity(spec.params.len());
            for (index, param) in spec.params.iter().enumerate() {
                let checked = policy.enabled && policy.checks_arg(index, &param.name);
                if checked {
                    self.check_type(&param.ty, || {
                        format!("argument {} ('{}') of '{}'", index, param.name, spec.name)
                    })?;
                }
                params.push(ParamSite {
                    name: param.name.clone(),
                    type_name: param.ty.type_name.clone(),
                    checked,
                });
            }

            let check_return = policy.enabled && policy.check_return && spec.returns.is_some();
            if let (true, Some(ret)) = (check_return, &spec.returns) {
                self.check_type(ret, || format!("return value of '{}'", spec.name))?;
            }

            let tag = if policy.enabled {
                symbols.insert(&spec.name)?
            } else {
                tag_of(&spec.name)
            };

            let site = Arc::new(FunctionSite {
                name: spec.name.clone(),
                tag,
                enabled: policy.enabled,
                params: Some(params),
                check_return,
                unregistered_policy: None,
            });
            if site.enabled {
                by_tag.insert(tag, Arc::clone(&site));
            }
            sites.insert(spec.name.clone(), site);
        }

        tracing::debug!(
            functions = sites.len(),
            enabled = by_tag.len(),
            combiners = ?combiners,
            "Registration table validated"
        );

        Ok(Registry {
            config: self.config,
            sites,
            by_tag,
            symbols,
            combiners,
            unregistered: RwLock::new(LazySites::default()),
        })
    }
}

/// Unregistered functions resolved so far
#[derive(Default)]
struct LazySites {
    by_name: HashMap<String, Arc<FunctionSite>>,
    /// Enabled sites only; a disabled function emits no tag to collide
    by_tag: HashMap<u32, String>,
}

/// Validated registration table
pub struct Registry {
    config: XCheckConfig,
    sites: HashMap<String, Arc<FunctionSite>>,
    by_tag: HashMap<u32, Arc<FunctionSite>>,
    symbols: SymbolTable,
    combiners: CombinerTable,
    unregistered: RwLock<LazySites>,
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("functions", &self.sites.len())
            .field("combiners", &self.combiners)
            .finish()
    }
}

impl Registry {
    pub fn builder(config: XCheckConfig) -> RegistryBuilder {
        RegistryBuilder::new(config)
    }

    pub fn config(&self) -> &XCheckConfig {
        &self.config
    }

    /// Registered function by name
    pub fn site(&self, name: &str) -> Option<&Arc<FunctionSite>> {
        self.sites.get(name)
    }

    /// Enabled registered function by tag
    pub fn site_by_tag(&self, tag: u32) -> Option<&Arc<FunctionSite>> {
        self.by_tag.get(&tag)
    }

    /// Site for a call to `name`, registered or resolved from the config
    pub fn resolve(&self, name: &str) -> Result<Arc<FunctionSite>> {
        if let Some(site) = self.sites.get(name) {
            return Ok(Arc::clone(site));
        }
        if !self.config.allow_unregistered {
            return Err(XCheckError::UnregisteredFunction {
                name: name.to_string(),
            });
        }

        if let Ok(cache) = self.unregistered.read() {
            if let Some(site) = cache.by_name.get(name) {
                return Ok(Arc::clone(site));
            }
        }

        let tag = tag_of(name);
        if let Some(existing) = self.symbols.resolve(tag) {
            return Err(XCheckError::TagCollision {
                tag,
                first: existing.to_string(),
                second: name.to_string(),
            });
        }

        let policy = self.config.policy_for(name)?;
        let site = Arc::new(FunctionSite {
            name: name.to_string(),
            tag,
            enabled: policy.enabled,
            params: None,
            check_return: policy.enabled && policy.check_return,
            unregistered_policy: Some(policy),
        });

        let mut cache = self.unregistered.write().map_err(|_| XCheckError::StorageLocked)?;
        if let Some(existing) = cache.by_name.get(name) {
            return Ok(Arc::clone(existing));
        }
        if site.enabled {
            if let Some(existing) = cache.by_tag.get(&tag) {
                return Err(XCheckError::TagCollision {
                    tag,
                    first: existing.clone(),
                    second: name.to_string(),
                });
            }
            cache.by_tag.insert(tag, name.to_string());
        }
        cache.by_name.insert(name.to_string(), Arc::clone(&site));
        Ok(site)
    }

    /// Whether records for a bare tag (C callers) are emitted
    pub fn tag_enabled(&self, tag: u32) -> bool {
        if !self.config.enabled {
            return false;
        }
        match self.by_tag.get(&tag) {
            Some(site) => site.enabled,
            None => {
                // Disabled registered functions are absent from by_tag.
                let disabled = self.sites.values().any(|s| s.tag == tag && !s.enabled);
                !disabled && self.config.allow_unregistered
            }
        }
    }

    /// Tag → name table of every enabled registered function
    pub fn symbols(&self) -> &SymbolTable {
        &self.symbols
    }

    pub fn combiners(&self) -> &CombinerTable {
        &self.combiners
    }

    /// Hash context with configured limits and combiners
    pub fn hash_context(&self) -> HashContext<'_> {
        HashContext::with_combiners(self.config.limits, &self.combiners)
    }

    pub fn len(&self) -> usize {
        self.sites.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sites.is_empty()
    }
}
