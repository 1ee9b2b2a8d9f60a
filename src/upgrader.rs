//! The migration orchestrator.
//!
//! [Upgrader] ties the other modules together: it resolves parameters,
//! discovers and orders changesets, runs drop hooks, applies whatever is
//! pending, runs create hooks, and records everything in the tracking table,
//! all inside a single database transaction. Either the whole run commits or
//! none of it does.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::time::{Duration, Instant};

use postgres::{Client, Transaction};
use serde::Serialize;

use crate::changelog::{Changeset, ChangesetSource, ChangelogRepository};
use crate::config::Config;
use crate::error::Error;
use crate::feedback::{Feedback, SilentFeedback};
use crate::hook::execute_sql;
use crate::parameter::{ParameterSet, ParameterValue};
use crate::state::{MigrationState, RecordKind};
use crate::version::ChangesetVersion;

/// Which top-level entry point produced a [Report].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Install,
    Upgrade,
    Uninstall,
    Baseline,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Operation::Install => "install",
            Operation::Upgrade => "upgrade",
            Operation::Uninstall => "uninstall",
            Operation::Baseline => "baseline",
        })
    }
}

/// Per-invocation options.
#[derive(Debug, Default, Clone)]
pub struct Options {
    max_version: Option<ChangesetVersion>,
    parameters: BTreeMap<String, ParameterValue>,
    skip_roles: bool,
    skip_grant: bool,
    skip_drop_app: bool,
    skip_create_app: bool,
}

impl Options {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stop after the given version; changesets of strictly greater versions
    /// are left pending for a later run.
    pub fn with_max_version(mut self, version: ChangesetVersion) -> Self {
        self.max_version = Some(version);
        self
    }

    /// Supply a value for a declared parameter. Unknown names are rejected
    /// during parameter resolution.
    pub fn with_parameter(
        mut self,
        name: impl Into<String>,
        value: impl Into<ParameterValue>,
    ) -> Self {
        self.parameters.insert(name.into(), value.into());
        self
    }

    /// Leave declared roles and grants alone for this run.
    pub fn skip_roles(mut self) -> Self {
        self.skip_roles = true;
        self
    }

    /// Create roles but do not grant them permissions.
    pub fn skip_grant(mut self) -> Self {
        self.skip_grant = true;
        self
    }

    /// Do not run drop hooks this run.
    pub fn skip_drop_app(mut self) -> Self {
        self.skip_drop_app = true;
        self
    }

    /// Do not run create hooks this run, leaving application objects down.
    pub fn skip_create_app(mut self) -> Self {
        self.skip_create_app = true;
        self
    }

    pub fn max_version(&self) -> Option<ChangesetVersion> {
        self.max_version
    }
}

/// Applies role and grant declarations.
///
/// Role handling is deployment-specific (managed roles, cloud providers
/// that reserve superuser, etc.), so the engine delegates it. The declared
/// `roles` value from the configuration is passed through untouched.
pub trait RoleSynchronizer {
    fn sync(
        &self,
        tx: &mut Transaction<'_>,
        roles: &serde_json::Value,
        grant: bool,
    ) -> Result<(), Error>;
}

/// What a run did, for callers that surface results to users or logs.
#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub operation: Operation,
    /// Identifiers of changesets applied by this run, in execution order.
    pub changesets_applied: Vec<String>,
    pub hooks_run: usize,
    pub tracking_table_created: bool,
    pub elapsed: Duration,
}

/// The migration orchestrator for one module.
pub struct Upgrader {
    config: Config,
    feedback: Box<dyn Feedback>,
    role_synchronizer: Option<Box<dyn RoleSynchronizer>>,
}

impl Upgrader {
    /// Build an upgrader over a configuration, validating it up front.
    pub fn new(config: Config) -> Result<Self, Error> {
        config.validate()?;
        Ok(Self {
            config,
            feedback: Box::new(SilentFeedback),
            role_synchronizer: None,
        })
    }

    pub fn with_feedback(mut self, feedback: Box<dyn Feedback>) -> Self {
        self.feedback = feedback;
        self
    }

    pub fn with_role_synchronizer(mut self, synchronizer: Box<dyn RoleSynchronizer>) -> Self {
        self.role_synchronizer = Some(synchronizer);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// First-time installation. Identical to [Upgrader::upgrade] except for
    /// the kind recorded against the invocation; on an already-installed
    /// database it degrades to an upgrade-style no-op.
    pub fn install(&self, client: &mut Client, options: &Options) -> Result<Report, Error> {
        self.run(client, options, Operation::Install)
    }

    /// Bring the database up to date with the changelog.
    pub fn upgrade(&self, client: &mut Client, options: &Options) -> Result<Report, Error> {
        self.run(client, options, Operation::Upgrade)
    }

    /// Tear down application objects by running the drop hooks only. The
    /// tracking table and all migrated structures are left in place.
    pub fn uninstall(&self, client: &mut Client, options: &Options) -> Result<Report, Error> {
        let started = Instant::now();
        let parameters = self.resolve_parameters(options)?;
        let state = self.state()?;

        let mut tx = client.transaction()?;
        if state.exists(&mut tx)? {
            state.check_parameters(&mut tx, &parameters.standard_snapshot())?;
        }
        let hooks = self.config.drop_hooks();
        let total = hooks.len();
        let mut hooks_run = 0;
        for (index, hook) in hooks.iter().enumerate() {
            self.checkpoint(&hook.label(), index + 1, total)?;
            hook.execute(&mut tx, &parameters)?;
            hooks_run += 1;
        }
        tx.commit()?;

        Ok(Report {
            operation: Operation::Uninstall,
            changesets_applied: Vec::new(),
            hooks_run,
            tracking_table_created: false,
            elapsed: started.elapsed(),
        })
    }

    /// Declare an existing database to already be at `version` without
    /// running anything. Changesets at or below the baseline are still
    /// applied individually on later runs unless recorded; the baseline row
    /// exists to document provenance and to seed the parameter snapshot.
    pub fn baseline(
        &self,
        client: &mut Client,
        version: ChangesetVersion,
        options: &Options,
    ) -> Result<Report, Error> {
        let started = Instant::now();
        let parameters = self.resolve_parameters(options)?;
        let state = self.state()?;

        let mut tx = client.transaction()?;
        let created = state.create_if_absent(&mut tx)?;
        let snapshot = parameters.standard_snapshot();
        state.check_parameters(&mut tx, &snapshot)?;
        state.set_baseline(&mut tx, version, &snapshot)?;
        tx.commit()?;

        Ok(Report {
            operation: Operation::Baseline,
            changesets_applied: Vec::new(),
            hooks_run: 0,
            tracking_table_created: created,
            elapsed: started.elapsed(),
        })
    }

    fn run(
        &self,
        client: &mut Client,
        options: &Options,
        operation: Operation,
    ) -> Result<Report, Error> {
        let started = Instant::now();
        let parameters = self.resolve_parameters(options)?;
        let changesets = self.list_changesets(options)?;
        let state = self.state()?;

        #[cfg(feature = "tracing")]
        tracing::info!(
            module = self.config.module(),
            operation = %operation,
            listed = changesets.len(),
            "starting run"
        );

        let mut tx = client.transaction()?;
        let created = state.create_if_absent(&mut tx)?;
        let snapshot = parameters.standard_snapshot();
        state.check_parameters(&mut tx, &snapshot)?;

        // Pending = listed and not yet recorded. Membership is by identifier,
        // so changesets merged in later than already-applied versions are
        // still picked up.
        let mut pending = Vec::new();
        for changeset in changesets {
            if !state.is_applied(&mut tx, changeset.id())? {
                pending.push(changeset);
            }
        }

        let drop_hooks: &[_] = if options.skip_drop_app {
            &[]
        } else {
            self.config.drop_hooks()
        };
        let create_hooks: &[_] = if options.skip_create_app {
            &[]
        } else {
            self.config.create_hooks()
        };
        let sync_roles = !options.skip_roles
            && self.role_synchronizer.is_some()
            && self.config.roles().is_some();
        let total =
            drop_hooks.len() + pending.len() + create_hooks.len() + usize::from(sync_roles);
        let mut current = 0;
        let mut hooks_run = 0;

        for hook in drop_hooks {
            current += 1;
            self.checkpoint(&hook.label(), current, total)?;
            hook.execute(&mut tx, &parameters)?;
            hooks_run += 1;
        }

        let mut applied = Vec::with_capacity(pending.len());
        for changeset in &pending {
            current += 1;
            self.checkpoint(changeset.id(), current, total)?;
            self.apply_changeset(&mut tx, changeset, &parameters)?;
            state.record(
                &mut tx,
                RecordKind::Changeset,
                Some(changeset.version()),
                Some(changeset.id()),
                &snapshot,
            )?;
            applied.push(changeset.id().to_string());
        }

        for hook in create_hooks {
            current += 1;
            self.checkpoint(&hook.label(), current, total)?;
            hook.execute(&mut tx, &parameters)?;
            hooks_run += 1;
        }

        // A no-op run against an up-to-date database leaves no trace, so
        // repeating it is row-for-row idempotent.
        if !applied.is_empty() || created {
            let kind = match operation {
                Operation::Install => RecordKind::Install,
                _ => RecordKind::Upgrade,
            };
            let version = pending.last().map(|c| c.version());
            state.record(&mut tx, kind, version, None, &snapshot)?;
        }

        if sync_roles {
            if let (Some(synchronizer), Some(roles)) =
                (self.role_synchronizer.as_ref(), self.config.roles())
            {
                current += 1;
                self.checkpoint("synchronizing roles", current, total)?;
                synchronizer.sync(&mut tx, roles, !options.skip_grant)?;
            }
        }

        tx.commit()?;

        #[cfg(feature = "tracing")]
        tracing::info!(
            module = self.config.module(),
            applied = applied.len(),
            "run committed"
        );

        Ok(Report {
            operation,
            changesets_applied: applied,
            hooks_run,
            tracking_table_created: created,
            elapsed: started.elapsed(),
        })
    }

    fn resolve_parameters(&self, options: &Options) -> Result<ParameterSet, Error> {
        ParameterSet::resolve(self.config.parameters(), &options.parameters)
    }

    fn state(&self) -> Result<MigrationState, Error> {
        MigrationState::new(self.config.tracking_table(), self.config.module())
    }

    /// SQL files across all roots plus registered module changesets, merged
    /// into one ordered sequence.
    fn list_changesets(&self, options: &Options) -> Result<Vec<Changeset>, Error> {
        let repository = ChangelogRepository::new(self.config.changelog_roots().to_vec());
        let mut changesets = repository.list(options.max_version)?;
        for (version, module) in self.config.module_changesets() {
            if options.max_version.is_some_and(|max| *version > max) {
                continue;
            }
            changesets.push(Changeset::new(
                *version,
                module.name().to_string(),
                ChangesetSource::Module(module.clone()),
            ));
        }
        crate::changelog::sort_changesets(&mut changesets);
        Ok(changesets)
    }

    fn apply_changeset(
        &self,
        tx: &mut Transaction<'_>,
        changeset: &Changeset,
        parameters: &ParameterSet,
    ) -> Result<(), Error> {
        #[cfg(feature = "tracing")]
        tracing::info!(changeset = changeset.id(), "applying changeset");
        match changeset.source() {
            ChangesetSource::SqlFile(path) => {
                let sql = fs::read_to_string(path).map_err(|e| {
                    Error::Configuration(format!(
                        "cannot read changeset '{}' from '{}': {e}",
                        changeset.id(),
                        path.display()
                    ))
                })?;
                execute_sql(tx, &sql, parameters, changeset.id())?;
                Ok(())
            }
            ChangesetSource::Module(module) => module.run(tx, parameters),
        }
    }

    /// Cancellation is polled before each step, never mid-statement. The
    /// error return drops the open transaction, rolling everything back.
    fn checkpoint(&self, message: &str, current: usize, total: usize) -> Result<(), Error> {
        if self.feedback.is_cancelled() {
            #[cfg(feature = "tracing")]
            tracing::warn!("run cancelled before step {current}/{total}");
            return Err(Error::Cancelled);
        }
        self.feedback.report_progress(message, current, total);
        Ok(())
    }
}
