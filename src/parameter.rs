//! Typed migration parameters and `{name}` placeholder substitution.
//!
//! Parameters are declared by the external configuration, resolved once per
//! invocation (defaults applied, allowed-value sets enforced) before any
//! database access, and rendered into SQL text as properly escaped literals.
//! Values always replace an entire placeholder span; they are never spliced
//! into statement fragments, so a value cannot change statement structure.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use crate::error::Error;

/// The declared type of a migration parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParameterType {
    Boolean,
    Integer,
    Text,
    Decimal,
    Path,
}

impl std::fmt::Display for ParameterType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ParameterType::Boolean => "boolean",
            ParameterType::Integer => "integer",
            ParameterType::Text => "text",
            ParameterType::Decimal => "decimal",
            ParameterType::Path => "path",
        };
        f.write_str(name)
    }
}

/// A resolved, typed parameter value.
#[derive(Debug, Clone, PartialEq)]
pub enum ParameterValue {
    Boolean(bool),
    Integer(i64),
    Text(String),
    Decimal(f64),
    Path(PathBuf),
}

impl ParameterValue {
    pub fn ty(&self) -> ParameterType {
        match self {
            ParameterValue::Boolean(_) => ParameterType::Boolean,
            ParameterValue::Integer(_) => ParameterType::Integer,
            ParameterValue::Text(_) => ParameterType::Text,
            ParameterValue::Decimal(_) => ParameterType::Decimal,
            ParameterValue::Path(_) => ParameterType::Path,
        }
    }

    /// Render this value as a SQL literal. Booleans and numerics are
    /// unquoted; text and paths are single-quoted with internal quotes
    /// doubled, switching to `E'...'` form when backslashes need escaping.
    pub fn render_literal(&self) -> String {
        match self {
            ParameterValue::Boolean(true) => "TRUE".to_string(),
            ParameterValue::Boolean(false) => "FALSE".to_string(),
            ParameterValue::Integer(i) => i.to_string(),
            ParameterValue::Decimal(d) => d.to_string(),
            ParameterValue::Text(s) => quote_literal(s),
            ParameterValue::Path(p) => quote_literal(&p.to_string_lossy()),
        }
    }

    /// JSON representation used for persisted parameter snapshots.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            ParameterValue::Boolean(b) => serde_json::Value::from(*b),
            ParameterValue::Integer(i) => serde_json::Value::from(*i),
            ParameterValue::Text(s) => serde_json::Value::from(s.as_str()),
            ParameterValue::Decimal(d) => serde_json::Value::from(*d),
            ParameterValue::Path(p) => serde_json::Value::from(p.to_string_lossy().as_ref()),
        }
    }
}

fn quote_literal(s: &str) -> String {
    let doubled = s.replace('\'', "''");
    if doubled.contains('\\') {
        format!("E'{}'", doubled.replace('\\', "\\\\"))
    } else {
        format!("'{doubled}'")
    }
}

impl From<bool> for ParameterValue {
    fn from(v: bool) -> Self {
        ParameterValue::Boolean(v)
    }
}

impl From<i64> for ParameterValue {
    fn from(v: i64) -> Self {
        ParameterValue::Integer(v)
    }
}

impl From<i32> for ParameterValue {
    fn from(v: i32) -> Self {
        ParameterValue::Integer(v.into())
    }
}

impl From<f64> for ParameterValue {
    fn from(v: f64) -> Self {
        ParameterValue::Decimal(v)
    }
}

impl From<&str> for ParameterValue {
    fn from(v: &str) -> Self {
        ParameterValue::Text(v.to_string())
    }
}

impl From<String> for ParameterValue {
    fn from(v: String) -> Self {
        ParameterValue::Text(v)
    }
}

impl From<PathBuf> for ParameterValue {
    fn from(v: PathBuf) -> Self {
        ParameterValue::Path(v)
    }
}

/// The declaration of a migration parameter, owned by the configuration.
#[derive(Debug, Clone)]
pub struct ParameterDefinition {
    name: String,
    ty: ParameterType,
    default: Option<ParameterValue>,
    allowed_values: Option<Vec<ParameterValue>>,
    app_only: bool,
    description: Option<String>,
}

impl ParameterDefinition {
    pub fn new(name: impl Into<String>, ty: ParameterType) -> Self {
        Self {
            name: name.into(),
            ty,
            default: None,
            allowed_values: None,
            app_only: false,
            description: None,
        }
    }

    pub fn with_default(mut self, default: impl Into<ParameterValue>) -> Self {
        self.default = Some(default.into());
        self
    }

    pub fn with_allowed_values<I, V>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<ParameterValue>,
    {
        self.allowed_values = Some(values.into_iter().map(Into::into).collect());
        self
    }

    /// Mark this parameter as allowed to vary between invocations. Standard
    /// (non app-only) parameters must stay constant across the module's
    /// lifecycle once recorded.
    pub fn app_only(mut self) -> Self {
        self.app_only = true;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ty(&self) -> ParameterType {
        self.ty
    }

    pub fn is_app_only(&self) -> bool {
        self.app_only
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// Coerce a value to this definition's declared type and enforce the
    /// allowed-value set. Integers widen to decimals and text narrows to
    /// paths; everything else must match exactly.
    fn coerce(&self, value: ParameterValue) -> Result<ParameterValue, Error> {
        let coerced = match (self.ty, value) {
            (ParameterType::Decimal, ParameterValue::Integer(i)) => {
                ParameterValue::Decimal(i as f64)
            }
            (ParameterType::Path, ParameterValue::Text(s)) => ParameterValue::Path(s.into()),
            (ty, value) if value.ty() == ty => value,
            (ty, value) => {
                return Err(Error::Configuration(format!(
                    "parameter '{}' expects type {} but got {} ({})",
                    self.name,
                    ty,
                    value.ty(),
                    value.render_literal()
                )));
            }
        };
        if let ParameterValue::Decimal(d) = coerced {
            if !d.is_finite() {
                return Err(Error::Configuration(format!(
                    "parameter '{}' must be a finite number",
                    self.name
                )));
            }
        }
        if let Some(allowed) = &self.allowed_values {
            if !allowed.contains(&coerced) {
                return Err(Error::Configuration(format!(
                    "value {} is not allowed for parameter '{}' (allowed: {})",
                    coerced.render_literal(),
                    self.name,
                    allowed
                        .iter()
                        .map(|v| v.render_literal())
                        .collect::<Vec<_>>()
                        .join(", ")
                )));
            }
        }
        Ok(coerced)
    }
}

/// The fully resolved name → value mapping for one invocation.
#[derive(Debug, Clone, Default)]
pub struct ParameterSet {
    values: BTreeMap<String, ParameterValue>,
    app_only: BTreeSet<String>,
}

impl ParameterSet {
    /// Resolve supplied values against the declared definitions.
    ///
    /// Every definition without a default must be supplied; supplied names
    /// without a definition are rejected; all values are type-checked and
    /// validated against their allowed-value sets. Fails before any database
    /// access.
    pub fn resolve(
        definitions: &[ParameterDefinition],
        supplied: &BTreeMap<String, ParameterValue>,
    ) -> Result<Self, Error> {
        for name in supplied.keys() {
            if !definitions.iter().any(|d| d.name() == name) {
                return Err(Error::Configuration(format!(
                    "unknown parameter '{name}' supplied"
                )));
            }
        }

        let mut values = BTreeMap::new();
        let mut app_only = BTreeSet::new();
        for definition in definitions {
            let value = match supplied.get(definition.name()) {
                Some(value) => value.clone(),
                None => match &definition.default {
                    Some(default) => default.clone(),
                    None => {
                        return Err(Error::Configuration(format!(
                            "parameter '{}' has no default and was not supplied",
                            definition.name()
                        )));
                    }
                },
            };
            let value = definition.coerce(value)?;
            if definition.is_app_only() {
                app_only.insert(definition.name().to_string());
            }
            values.insert(definition.name().to_string(), value);
        }
        Ok(Self { values, app_only })
    }

    pub fn get(&self, name: &str) -> Option<&ParameterValue> {
        self.values.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ParameterValue)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Snapshot of all standard (non app-only) parameter values as canonical
    /// JSON. BTreeMap ordering makes the serialized form byte-stable across
    /// invocations, which the consistency check relies on.
    pub fn standard_snapshot(&self) -> BTreeMap<String, serde_json::Value> {
        self.values
            .iter()
            .filter(|(name, _)| !self.app_only.contains(*name))
            .map(|(name, value)| (name.clone(), value.to_json()))
            .collect()
    }
}

/// Replace every `{name}` placeholder in `text` with the named parameter's
/// rendered SQL literal.
///
/// `context` identifies the changeset or hook for error messages. A
/// placeholder naming an unresolved parameter is an error; literal braces
/// are not supported in changeset or hook SQL.
pub fn substitute(text: &str, parameters: &ParameterSet, context: &str) -> Result<String, Error> {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let close = after.find('}').ok_or_else(|| {
            Error::Configuration(format!("unterminated '{{' placeholder in {context}"))
        })?;
        let name = &after[..close];
        match parameters.get(name) {
            Some(value) => out.push_str(&value.render_literal()),
            None => {
                return Err(Error::UnknownPlaceholder {
                    name: name.to_string(),
                    context: context.to_string(),
                });
            }
        }
        rest = &after[close + 1..];
    }
    out.push_str(rest);
    Ok(out)
}
