//! Runtime configuration
//!
//! Everything the instrumented program decides at startup: which functions
//! are cross-checked, which arguments and returns are hashed, which
//! combiner each aggregate type uses, traversal bounds and emitter
//! settings.
//!
//! ```json
//! {
//!   "functions": [
//!     { "pattern": "*" },
//!     { "pattern": "log_*", "enabled": false },
//!     { "pattern": "parse", "skip_args": ["scratch"], "skip_return": true }
//!   ],
//!   "combiners": { "Point": "rotate_xor" },
//!   "limits": { "max_depth": 4 },
//!   "emitter": { "format": "binary" }
//! }
//! ```
//!
//! Function rules are applied in order; later matching rules override
//! earlier ones field by field.

use std::collections::BTreeMap;
use std::path::Path;

use glob::Pattern;
use serde::{Deserialize, Serialize};

use crate::emitter::EmitterConfig;
use crate::error::{Result, XCheckError};
use crate::hash::HashLimits;

/// Environment variable naming a JSON configuration file
pub const ENV_CONFIG: &str = "XCHECK_CONFIG";

/// Selects an argument by position or by parameter name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ArgSelector {
    Index(usize),
    Name(String),
}

impl ArgSelector {
    pub fn matches(&self, index: usize, name: &str) -> bool {
        match self {
            ArgSelector::Index(i) => *i == index,
            ArgSelector::Name(n) => n == name,
        }
    }
}

/// Per-function override, matched by glob
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionRule {
    /// Glob over function names (`*`, `?`, `[...]`)
    pub pattern: String,
    /// Enable or disable matching functions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    /// Arguments hashed even when `check_args` is off
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub check_args: Vec<ArgSelector>,
    /// Arguments never hashed
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub skip_args: Vec<ArgSelector>,
    /// Suppress the Return record
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_return: Option<bool>,
}

impl FunctionRule {
    pub fn new(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            enabled: None,
            check_args: Vec::new(),
            skip_args: Vec::new(),
            skip_return: None,
        }
    }

    pub fn enable(mut self) -> Self {
        self.enabled = Some(true);
        self
    }

    pub fn disable(mut self) -> Self {
        self.enabled = Some(false);
        self
    }

    pub fn check_arg(mut self, arg: ArgSelector) -> Self {
        self.check_args.push(arg);
        self
    }

    pub fn skip_arg(mut self, arg: ArgSelector) -> Self {
        self.skip_args.push(arg);
        self
    }

    pub fn skip_return(mut self) -> Self {
        self.skip_return = Some(true);
        self
    }
}

/// Effective policy for one function after applying every matching rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionPolicy {
    pub enabled: bool,
    pub check_return: bool,
    check_args_by_default: bool,
    check_args: Vec<ArgSelector>,
    skip_args: Vec<ArgSelector>,
}

impl FunctionPolicy {
    /// Whether argument `index` named `name` is hashed
    pub fn checks_arg(&self, index: usize, name: &str) -> bool {
        if self.skip_args.iter().any(|s| s.matches(index, name)) {
            return false;
        }
        self.check_args_by_default || self.check_args.iter().any(|s| s.matches(index, name))
    }
}

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct XCheckConfig {
    /// Master switch; when off no records are emitted
    pub enabled: bool,
    /// Hash arguments unless a rule skips them
    pub check_args: bool,
    /// Emit Return records unless a rule skips them
    pub check_returns: bool,
    /// Accept calls to functions missing from the registration table
    pub allow_unregistered: bool,
    /// Ordered per-function rules
    pub functions: Vec<FunctionRule>,
    /// Combiner name per aggregate type name
    pub combiners: BTreeMap<String, String>,
    /// Combiner used for types without an entry in `combiners`
    pub default_combiner: Option<String>,
    /// Traversal bounds
    pub limits: HashLimits,
    /// Emitter settings
    pub emitter: EmitterConfig,
}

impl Default for XCheckConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            check_args: true,
            check_returns: true,
            allow_unregistered: true,
            functions: Vec::new(),
            combiners: BTreeMap::new(),
            default_combiner: None,
            limits: HashLimits::default(),
            emitter: EmitterConfig::default(),
        }
    }
}

impl XCheckConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Configuration for a process started without explicit setup:
    /// the file named by `XCHECK_CONFIG` (or defaults), with emitter
    /// settings overridden from the environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// [`XCheckConfig::from_env`] with variables read through `lookup`
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = match lookup(ENV_CONFIG) {
            Some(path) if !path.is_empty() => Self::from_file(&path)?,
            _ => Self::default(),
        };
        config.emitter = config.emitter.with_env_overrides(lookup)?;
        Ok(config)
    }

    /// Load a JSON configuration file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_rule(mut self, rule: FunctionRule) -> Self {
        self.functions.push(rule);
        self
    }

    /// Disable every function matching `pattern`
    pub fn disable(self, pattern: impl Into<String>) -> Self {
        self.with_rule(FunctionRule::new(pattern).disable())
    }

    /// Re-enable every function matching `pattern`
    pub fn enable(self, pattern: impl Into<String>) -> Self {
        self.with_rule(FunctionRule::new(pattern).enable())
    }

    pub fn with_combiner(mut self, type_name: impl Into<String>, combiner: impl Into<String>) -> Self {
        self.combiners.insert(type_name.into(), combiner.into());
        self
    }

    pub fn with_default_combiner(mut self, combiner: impl Into<String>) -> Self {
        self.default_combiner = Some(combiner.into());
        self
    }

    pub fn with_limits(mut self, limits: HashLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_emitter(mut self, emitter: EmitterConfig) -> Self {
        self.emitter = emitter;
        self
    }

    pub fn with_check_args(mut self, enabled: bool) -> Self {
        self.check_args = enabled;
        self
    }

    pub fn with_check_returns(mut self, enabled: bool) -> Self {
        self.check_returns = enabled;
        self
    }

    pub fn with_allow_unregistered(mut self, allowed: bool) -> Self {
        self.allow_unregistered = allowed;
        self
    }

    /// Check glob syntax, limits and emitter settings
    pub fn validate(&self) -> Result<()> {
        for rule in &self.functions {
            Pattern::new(&rule.pattern).map_err(|e| XCheckError::InvalidConfig {
                reason: format!("invalid function pattern '{}': {}", rule.pattern, e),
            })?;
        }
        if self.limits.max_len == 0 {
            return Err(XCheckError::InvalidConfig {
                reason: "limits.max_len must be at least 1".to_string(),
            });
        }
        self.emitter.validate()
    }

    /// Resolve the effective policy for `function`
    pub fn policy_for(&self, function: &str) -> Result<FunctionPolicy> {
        let mut policy = FunctionPolicy {
            enabled: self.enabled,
            check_return: self.check_returns,
            check_args_by_default: self.check_args,
            check_args: Vec::new(),
            skip_args: Vec::new(),
        };

        for rule in &self.functions {
            let pattern = Pattern::new(&rule.pattern).map_err(|e| XCheckError::InvalidConfig {
                reason: format!("invalid function pattern '{}': {}", rule.pattern, e),
            })?;
            if !pattern.matches(function) {
                continue;
            }
            if let Some(enabled) = rule.enabled {
                policy.enabled = self.enabled && enabled;
            }
            if let Some(skip) = rule.skip_return {
                policy.check_return = !skip;
            }
            policy.check_args.extend(rule.check_args.iter().cloned());
            policy.skip_args.extend(rule.skip_args.iter().cloned());
        }

        Ok(policy)
    }
}
