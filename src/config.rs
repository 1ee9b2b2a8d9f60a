//! The configuration consumed by the engine.
//!
//! Parsing and schema validation of configuration files are the caller's
//! concern; the engine consumes an already-validated, immutable structure
//! built through this module and holds it for the duration of a run.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use crate::changelog::ModuleChangeset;
use crate::error::Error;
use crate::hook::{Hook, HookKind, HookSource};
use crate::parameter::ParameterDefinition;
use crate::state::MigrationState;
use crate::version::ChangesetVersion;

pub(crate) const DEFAULT_TRACKING_TABLE: &str = "pgup_migrations";

/// Immutable configuration for one module's migration lifecycle.
#[derive(Clone)]
pub struct Config {
    module: String,
    tracking_table: String,
    changelog_roots: Vec<PathBuf>,
    parameters: Vec<ParameterDefinition>,
    drop_hooks: Vec<Hook>,
    create_hooks: Vec<Hook>,
    module_changesets: Vec<(ChangesetVersion, Arc<dyn ModuleChangeset>)>,
    /// Role/permission declarations, passed through untouched to the role
    /// collaborator.
    roles: Option<serde_json::Value>,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("module", &self.module)
            .field("tracking_table", &self.tracking_table)
            .field("changelog_roots", &self.changelog_roots)
            .field("parameters", &self.parameters)
            .field("drop_hooks", &self.drop_hooks)
            .field("create_hooks", &self.create_hooks)
            .field(
                "module_changesets",
                &self
                    .module_changesets
                    .iter()
                    .map(|(version, module)| (version.to_string(), module.name().to_string()))
                    .collect::<Vec<_>>(),
            )
            .field("roles", &self.roles)
            .finish()
    }
}

impl Config {
    pub fn new(module: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            tracking_table: DEFAULT_TRACKING_TABLE.to_string(),
            changelog_roots: Vec::new(),
            parameters: Vec::new(),
            drop_hooks: Vec::new(),
            create_hooks: Vec::new(),
            module_changesets: Vec::new(),
            roles: None,
        }
    }

    /// Set a custom name for the tracking table, optionally schema-qualified.
    /// Defaults to "pgup_migrations" in the public schema.
    pub fn with_tracking_table(mut self, table: impl Into<String>) -> Self {
        self.tracking_table = table.into();
        self
    }

    /// Add a changelog root. Roots are merged in the order supplied.
    pub fn with_changelog_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.changelog_roots.push(root.into());
        self
    }

    pub fn with_parameter(mut self, definition: ParameterDefinition) -> Self {
        self.parameters.push(definition);
        self
    }

    /// Append a hook to the drop or create list. Hooks run in the order
    /// they were added.
    pub fn with_hook(mut self, hook: Hook) -> Self {
        match hook.kind() {
            HookKind::Drop => self.drop_hooks.push(hook),
            HookKind::Create => self.create_hooks.push(hook),
        }
        self
    }

    /// Register a Rust changeset at the given version, merged into the
    /// ordered sequence alongside SQL files.
    pub fn with_module_changeset(
        mut self,
        version: ChangesetVersion,
        changeset: Arc<dyn ModuleChangeset>,
    ) -> Self {
        self.module_changesets.push((version, changeset));
        self
    }

    pub fn with_roles(mut self, roles: serde_json::Value) -> Self {
        self.roles = Some(roles);
        self
    }

    pub fn module(&self) -> &str {
        &self.module
    }

    pub fn tracking_table(&self) -> &str {
        &self.tracking_table
    }

    pub fn changelog_roots(&self) -> &[PathBuf] {
        &self.changelog_roots
    }

    pub fn parameters(&self) -> &[ParameterDefinition] {
        &self.parameters
    }

    pub fn drop_hooks(&self) -> &[Hook] {
        &self.drop_hooks
    }

    pub fn create_hooks(&self) -> &[Hook] {
        &self.create_hooks
    }

    pub fn module_changesets(&self) -> &[(ChangesetVersion, Arc<dyn ModuleChangeset>)] {
        &self.module_changesets
    }

    pub fn roles(&self) -> Option<&serde_json::Value> {
        self.roles.as_ref()
    }

    /// Structural validation, run once when the [Upgrader](crate::Upgrader)
    /// is constructed.
    pub fn validate(&self) -> Result<(), Error> {
        if self.module.is_empty() {
            return Err(Error::Configuration("module name must not be empty".into()));
        }
        // Reject malformed table names early.
        MigrationState::new(&self.tracking_table, &self.module)?;
        if self.changelog_roots.is_empty() {
            return Err(Error::Configuration(
                "at least one changelog root is required".into(),
            ));
        }
        for root in &self.changelog_roots {
            if !root.is_dir() {
                return Err(Error::Configuration(format!(
                    "changelog root '{}' does not exist",
                    root.display()
                )));
            }
        }
        for (i, definition) in self.parameters.iter().enumerate() {
            if self.parameters[..i]
                .iter()
                .any(|d| d.name() == definition.name())
            {
                return Err(Error::Configuration(format!(
                    "duplicate parameter definition '{}'",
                    definition.name()
                )));
            }
        }
        for hook in self.drop_hooks.iter().chain(&self.create_hooks) {
            if let HookSource::File(path) = hook.source() {
                if !path.is_file() {
                    return Err(Error::Configuration(format!(
                        "hook file '{}' does not exist",
                        path.display()
                    )));
                }
            }
        }
        Ok(())
    }
}
