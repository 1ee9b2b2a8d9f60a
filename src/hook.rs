//! Application lifecycle hooks.
//!
//! Hooks maintain schema-bound derived objects (views, triggers, functions)
//! that must be dropped before structural changes and re-created afterwards.
//! Drop hooks run before the changeset phase on every install/upgrade call
//! and are expected to be idempotent (`DROP ... IF EXISTS`); create hooks
//! run after all eligible changesets have succeeded.

use std::fmt;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use postgres::Transaction;

use crate::error::Error;
use crate::parameter::{substitute, ParameterSet};
use crate::splitter::{check_statement, split_statements};

/// Whether a hook tears down or (re)creates application objects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookKind {
    Drop,
    Create,
}

impl fmt::Display for HookKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            HookKind::Drop => "drop",
            HookKind::Create => "create",
        })
    }
}

/// A hook implemented in Rust.
///
/// The entry point receives the run's open transaction and the resolved
/// parameters; it can read any subset of them by name. Committing or rolling
/// back is the orchestrator's exclusive responsibility and is structurally
/// unavailable through the `Transaction` handle. Use [execute_sql] to run
/// substituted SQL text from inside a module hook.
pub trait HookModule: Send + Sync {
    fn name(&self) -> &str;

    fn run(&self, tx: &mut Transaction<'_>, parameters: &ParameterSet) -> Result<(), Error>;
}

/// Where a hook's content comes from.
#[derive(Clone)]
pub enum HookSource {
    /// SQL text given inline in the configuration.
    Inline(String),
    /// A SQL file, resolved relative to the configuration base directory.
    File(PathBuf),
    /// A registered Rust module hook.
    Module(Arc<dyn HookModule>),
}

impl fmt::Debug for HookSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HookSource::Inline(sql) => f.debug_tuple("Inline").field(&sql.len()).finish(),
            HookSource::File(path) => f.debug_tuple("File").field(path).finish(),
            HookSource::Module(module) => f.debug_tuple("Module").field(&module.name()).finish(),
        }
    }
}

/// One drop or create hook.
#[derive(Debug, Clone)]
pub struct Hook {
    kind: HookKind,
    source: HookSource,
}

impl Hook {
    pub fn inline(kind: HookKind, sql: impl Into<String>) -> Self {
        Self {
            kind,
            source: HookSource::Inline(sql.into()),
        }
    }

    pub fn from_file(kind: HookKind, path: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            source: HookSource::File(path.into()),
        }
    }

    pub fn from_module(kind: HookKind, module: Arc<dyn HookModule>) -> Self {
        Self {
            kind,
            source: HookSource::Module(module),
        }
    }

    pub fn kind(&self) -> HookKind {
        self.kind
    }

    pub fn source(&self) -> &HookSource {
        &self.source
    }

    /// Human-readable identity used in progress messages and errors.
    pub fn label(&self) -> String {
        match &self.source {
            HookSource::Inline(_) => format!("{} hook (inline)", self.kind),
            HookSource::File(path) => format!("{} hook '{}'", self.kind, path.display()),
            HookSource::Module(module) => format!("{} hook '{}'", self.kind, module.name()),
        }
    }

    /// Check the hook is runnable without touching the database: the file
    /// exists and its SQL splits cleanly with all placeholders resolvable.
    pub fn validate(&self, parameters: &ParameterSet) -> Result<(), Error> {
        match &self.source {
            HookSource::Inline(sql) => {
                for statement in split_statements(sql) {
                    check_statement(&statement)?;
                    substitute(&statement, parameters, &self.label())?;
                }
                Ok(())
            }
            HookSource::File(path) => {
                let sql = fs::read_to_string(path).map_err(|e| {
                    Error::Configuration(format!(
                        "cannot read hook file '{}': {e}",
                        path.display()
                    ))
                })?;
                for statement in split_statements(&sql) {
                    check_statement(&statement)?;
                    substitute(&statement, parameters, &self.label())?;
                }
                Ok(())
            }
            HookSource::Module(_) => Ok(()),
        }
    }

    /// Run the hook inside the given transaction. Failures are wrapped in
    /// [Error::HookExecution], identifying the hook's source.
    pub(crate) fn execute(
        &self,
        tx: &mut Transaction<'_>,
        parameters: &ParameterSet,
    ) -> Result<(), Error> {
        let label = self.label();
        #[cfg(feature = "tracing")]
        tracing::info!(hook = %label, "executing hook");
        let result = match &self.source {
            HookSource::Inline(sql) => execute_sql(tx, sql, parameters, &label).map(|_| ()),
            HookSource::File(path) => match fs::read_to_string(path) {
                Ok(sql) => execute_sql(tx, &sql, parameters, &label).map(|_| ()),
                Err(e) => Err(Error::Io(e)),
            },
            HookSource::Module(module) => module.run(tx, parameters),
        };
        result.map_err(|e| Error::HookExecution {
            hook: label,
            source: Box::new(e),
        })
    }
}

/// Split `sql` into statements, substitute `{name}` placeholders, and run
/// each statement in sequence without committing. Returns the number of
/// statements executed.
///
/// Fails on the first failing statement with [Error::SqlExecution] carrying
/// `source_id` and the statement's 1-based ordinal. Also available to module
/// hooks and changesets that assemble SQL at runtime.
pub fn execute_sql(
    tx: &mut Transaction<'_>,
    sql: &str,
    parameters: &ParameterSet,
    source_id: &str,
) -> Result<usize, Error> {
    let statements = split_statements(sql);
    for (index, statement) in statements.iter().enumerate() {
        check_statement(statement)?;
        let statement = substitute(statement, parameters, source_id)?;
        #[cfg(feature = "tracing")]
        tracing::debug!(source = source_id, ordinal = index + 1, "executing statement");
        tx.batch_execute(&statement)
            .map_err(|e| Error::SqlExecution {
                source_id: source_id.to_string(),
                ordinal: index + 1,
                source: e,
            })?;
    }
    Ok(statements.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_identify_the_source() {
        let hook = Hook::inline(HookKind::Drop, "DROP VIEW IF EXISTS v;");
        assert_eq!(hook.label(), "drop hook (inline)");
        let hook = Hook::from_file(HookKind::Create, "app/create_views.sql");
        assert!(hook.label().contains("create_views.sql"));
    }

    #[test]
    fn validate_catches_unknown_placeholder_without_a_database() {
        let params = ParameterSet::default();
        let hook = Hook::inline(HookKind::Create, "CREATE VIEW v AS SELECT {nope};");
        let err = hook.validate(&params).unwrap_err();
        assert!(matches!(err, Error::UnknownPlaceholder { .. }));
    }

    #[test]
    fn validate_catches_transaction_control() {
        let params = ParameterSet::default();
        let hook = Hook::inline(HookKind::Drop, "BEGIN; DROP VIEW v; COMMIT;");
        assert!(hook.validate(&params).is_err());
    }

    #[test]
    fn validate_reports_missing_file() {
        let params = ParameterSet::default();
        let hook = Hook::from_file(HookKind::Drop, "/nonexistent/hook.sql");
        let err = hook.validate(&params).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }
}

#[cfg(all(test, feature = "testing"))]
mod db_tests {
    use super::*;
    use crate::parameter::{ParameterDefinition, ParameterSet, ParameterType};
    use crate::test_postgres::get_test_client;
    use std::collections::BTreeMap;

    fn params(definitions: &[ParameterDefinition]) -> ParameterSet {
        ParameterSet::resolve(definitions, &BTreeMap::new()).unwrap()
    }

    #[test]
    fn inline_hook_executes_statement_by_statement() {
        let mut client = get_test_client();
        let mut tx = client.transaction().unwrap();
        let hook = Hook::inline(
            HookKind::Create,
            "CREATE TABLE t (id INT); CREATE VIEW v AS SELECT id FROM t;",
        );
        hook.execute(&mut tx, &ParameterSet::default()).unwrap();
        tx.commit().unwrap();

        let exists: bool = client
            .query_one(
                "SELECT EXISTS (SELECT FROM information_schema.views \
                 WHERE table_schema = 'public' AND table_name = 'v')",
                &[],
            )
            .unwrap()
            .get(0);
        assert!(exists);
    }

    #[test]
    fn failing_statement_reports_hook_and_ordinal() {
        let mut client = get_test_client();
        let mut tx = client.transaction().unwrap();
        let hook = Hook::inline(HookKind::Create, "SELECT 1; THIS IS NOT SQL;");
        let err = hook.execute(&mut tx, &ParameterSet::default()).unwrap_err();
        match err {
            Error::HookExecution { hook, source } => {
                assert_eq!(hook, "create hook (inline)");
                match *source {
                    Error::SqlExecution { ordinal, .. } => assert_eq!(ordinal, 2),
                    other => panic!("unexpected cause: {other:?}"),
                }
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn module_hook_receives_parameters_and_transaction() {
        struct RebuildViews;
        impl HookModule for RebuildViews {
            fn name(&self) -> &str {
                "rebuild_views"
            }
            fn run(&self, tx: &mut Transaction<'_>, parameters: &ParameterSet) -> Result<(), Error> {
                execute_sql(
                    tx,
                    "CREATE TABLE pts (id INT); \
                     COMMENT ON TABLE pts IS {note};",
                    parameters,
                    self.name(),
                )?;
                Ok(())
            }
        }

        let defs = [ParameterDefinition::new("note", ParameterType::Text).with_default("demo")];
        let mut client = get_test_client();
        let mut tx = client.transaction().unwrap();
        let hook = Hook::from_module(HookKind::Create, Arc::new(RebuildViews));
        hook.execute(&mut tx, &params(&defs)).unwrap();
        tx.commit().unwrap();
    }
}
