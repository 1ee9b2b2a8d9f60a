//! Persisted migration-state tracking.
//!
//! One append-only table is the single source of truth for "already
//! applied". Rows are inserted in the same transaction as the work they
//! describe, so a rollback of the run also discards its records.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use postgres::{GenericClient, Transaction};

use crate::error::{Error, ParameterMismatch};
use crate::version::ChangesetVersion;

/// What a tracking-table row describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    /// One applied changeset.
    Changeset,
    /// An install invocation's hook execution and parameter snapshot.
    Install,
    /// An upgrade invocation's hook execution and parameter snapshot.
    Upgrade,
    /// A version adopted without applying changesets.
    Baseline,
}

impl RecordKind {
    fn as_str(self) -> &'static str {
        match self {
            RecordKind::Changeset => "changeset",
            RecordKind::Install => "install",
            RecordKind::Upgrade => "upgrade",
            RecordKind::Baseline => "baseline",
        }
    }
}

impl std::fmt::Display for RecordKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of the tracking table.
#[derive(Debug, Clone, PartialEq)]
pub struct MigrationRecord {
    pub module: String,
    pub version: Option<ChangesetVersion>,
    pub changeset: Option<String>,
    pub kind: String,
    pub parameters: serde_json::Value,
    pub applied_at: DateTime<Utc>,
}

/// Owns the tracking table for one module.
///
/// The table name may be schema-qualified (`schema.table`); the table is
/// bootstrapped on first use.
#[derive(Debug, Clone)]
pub struct MigrationState {
    table: String,
    module: String,
}

impl MigrationState {
    pub fn new(table: impl Into<String>, module: impl Into<String>) -> Result<Self, Error> {
        let table = table.into();
        let parts: Vec<&str> = table.split('.').collect();
        if parts.len() > 2 {
            return Err(Error::Configuration(format!(
                "tracking table '{table}' must be 'table' or 'schema.table'"
            )));
        }
        for part in &parts {
            let mut bytes = part.bytes();
            let valid = matches!(bytes.next(), Some(b) if b.is_ascii_alphabetic() || b == b'_')
                && bytes.all(|b| b.is_ascii_alphanumeric() || b == b'_');
            if !valid {
                return Err(Error::Configuration(format!(
                    "tracking table '{table}' is not a valid identifier"
                )));
            }
        }
        Ok(Self {
            table,
            module: module.into(),
        })
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn module(&self) -> &str {
        &self.module
    }

    fn schema_and_table(&self) -> (&str, &str) {
        match self.table.split_once('.') {
            Some((schema, table)) => (schema, table),
            None => ("public", &self.table),
        }
    }

    /// Whether the tracking table exists.
    pub fn exists<C: GenericClient>(&self, client: &mut C) -> Result<bool, Error> {
        let (schema, table) = self.schema_and_table();
        let exists: bool = client
            .query_one(
                "SELECT EXISTS (SELECT FROM information_schema.tables \
                 WHERE table_schema = $1 AND table_name = $2)",
                &[&schema, &table],
            )?
            .get(0);
        Ok(exists)
    }

    /// Idempotent bootstrap. Returns true when the table was created by this
    /// call.
    pub fn create_if_absent<C: GenericClient>(&self, client: &mut C) -> Result<bool, Error> {
        if self.exists(client)? {
            return Ok(false);
        }
        #[cfg(feature = "tracing")]
        tracing::info!(table = %self.table, "creating migration tracking table");
        client.execute(
            &format!(
                "CREATE TABLE IF NOT EXISTS {} (
                    id SERIAL PRIMARY KEY,
                    module TEXT NOT NULL,
                    version TEXT,
                    changeset TEXT,
                    kind TEXT NOT NULL,
                    parameters TEXT NOT NULL,
                    applied_at TEXT NOT NULL
                )",
                self.table
            ),
            &[],
        )?;
        Ok(true)
    }

    /// Whether a changeset has already been recorded as applied.
    pub fn is_applied<C: GenericClient>(
        &self,
        client: &mut C,
        changeset_id: &str,
    ) -> Result<bool, Error> {
        let applied: bool = client
            .query_one(
                &format!(
                    "SELECT EXISTS (SELECT 1 FROM {} \
                     WHERE module = $1 AND changeset = $2 AND kind = 'changeset')",
                    self.table
                ),
                &[&self.module, &changeset_id],
            )?
            .get(0);
        Ok(applied)
    }

    /// The most recently recorded standard-parameter snapshot, if any.
    pub fn last_parameter_snapshot<C: GenericClient>(
        &self,
        client: &mut C,
    ) -> Result<Option<BTreeMap<String, serde_json::Value>>, Error> {
        let row = client.query_opt(
            &format!(
                "SELECT parameters FROM {} WHERE module = $1 ORDER BY id DESC LIMIT 1",
                self.table
            ),
            &[&self.module],
        )?;
        match row {
            None => Ok(None),
            Some(row) => {
                let raw: String = row.get(0);
                let snapshot = serde_json::from_str(&raw).map_err(|e| {
                    Error::Configuration(format!(
                        "corrupt parameter snapshot in tracking table: {e}"
                    ))
                })?;
                Ok(Some(snapshot))
            }
        }
    }

    /// Compare the current standard-parameter snapshot against the most
    /// recently recorded one, field by field. Any difference fails the run
    /// before it touches the schema.
    pub fn check_parameters<C: GenericClient>(
        &self,
        client: &mut C,
        current: &BTreeMap<String, serde_json::Value>,
    ) -> Result<(), Error> {
        let Some(recorded) = self.last_parameter_snapshot(client)? else {
            return Ok(());
        };
        let mut mismatches = Vec::new();
        let names: std::collections::BTreeSet<&String> =
            recorded.keys().chain(current.keys()).collect();
        for name in names {
            let old = recorded.get(name).cloned().unwrap_or(serde_json::Value::Null);
            let new = current.get(name).cloned().unwrap_or(serde_json::Value::Null);
            if old != new {
                mismatches.push(ParameterMismatch {
                    name: name.clone(),
                    recorded: old,
                    supplied: new,
                });
            }
        }
        if mismatches.is_empty() {
            Ok(())
        } else {
            Err(Error::ParameterConsistency { mismatches })
        }
    }

    /// Append one row. Called only after the work it describes has executed
    /// successfully, within the same transaction.
    pub fn record(
        &self,
        tx: &mut Transaction<'_>,
        kind: RecordKind,
        version: Option<ChangesetVersion>,
        changeset_id: Option<&str>,
        snapshot: &BTreeMap<String, serde_json::Value>,
    ) -> Result<(), Error> {
        let parameters = serde_json::to_string(snapshot)
            .map_err(|e| Error::Configuration(format!("cannot serialize parameters: {e}")))?;
        let version = version.map(|v| v.to_string());
        let applied_at = Utc::now().to_rfc3339();
        tx.execute(
            &format!(
                "INSERT INTO {} (module, version, changeset, kind, parameters, applied_at) \
                 VALUES ($1, $2, $3, $4, $5, $6)",
                self.table
            ),
            &[
                &self.module,
                &version,
                &changeset_id,
                &kind.as_str(),
                &parameters,
                &applied_at,
            ],
        )?;
        Ok(())
    }

    /// Record a version as applied without running any changesets, adopting
    /// an already-existing database.
    pub fn set_baseline(
        &self,
        tx: &mut Transaction<'_>,
        version: ChangesetVersion,
        snapshot: &BTreeMap<String, serde_json::Value>,
    ) -> Result<(), Error> {
        #[cfg(feature = "tracing")]
        tracing::info!(version = %version, table = %self.table, "setting baseline");
        self.record(tx, RecordKind::Baseline, Some(version), None, snapshot)
    }

    /// All recorded rows for this module, in the order they were appended.
    pub fn history<C: GenericClient>(&self, client: &mut C) -> Result<Vec<MigrationRecord>, Error> {
        if !self.exists(client)? {
            return Ok(Vec::new());
        }
        let rows = client.query(
            &format!(
                "SELECT module, version, changeset, kind, parameters, applied_at \
                 FROM {} WHERE module = $1 ORDER BY id",
                self.table
            ),
            &[&self.module],
        )?;
        rows.into_iter()
            .map(|row| {
                let version: Option<String> = row.get(1);
                let version = version.map(|v| v.parse()).transpose()?;
                let parameters: String = row.get(4);
                let parameters = serde_json::from_str(&parameters).map_err(|e| {
                    Error::Configuration(format!(
                        "corrupt parameter snapshot in tracking table: {e}"
                    ))
                })?;
                let applied_at: String = row.get(5);
                let applied_at = DateTime::parse_from_rfc3339(&applied_at)
                    .map_err(|e| {
                        Error::Configuration(format!("corrupt applied_at in tracking table: {e}"))
                    })?
                    .with_timezone(&Utc);
                Ok(MigrationRecord {
                    module: row.get(0),
                    version,
                    changeset: row.get(2),
                    kind: row.get(3),
                    parameters,
                    applied_at,
                })
            })
            .collect()
    }

    /// The highest version recorded as applied (changesets and baselines),
    /// if any.
    pub fn max_applied_version<C: GenericClient>(
        &self,
        client: &mut C,
    ) -> Result<Option<ChangesetVersion>, Error> {
        Ok(self
            .history(client)?
            .into_iter()
            .filter(|r| r.kind == "changeset" || r.kind == "baseline")
            .filter_map(|r| r.version)
            .max())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_invalid_table_names() {
        assert!(MigrationState::new("a.b.c", "m").is_err());
        assert!(MigrationState::new("1bad", "m").is_err());
        assert!(MigrationState::new("bad-name", "m").is_err());
        assert!(MigrationState::new("drop table x; --", "m").is_err());
        assert!(MigrationState::new("pgup_migrations", "m").is_ok());
        assert!(MigrationState::new("tools.pgup_migrations", "m").is_ok());
    }

    #[test]
    fn schema_defaults_to_public() {
        let state = MigrationState::new("pgup_migrations", "m").unwrap();
        assert_eq!(state.schema_and_table(), ("public", "pgup_migrations"));
        let state = MigrationState::new("tools.pgup_migrations", "m").unwrap();
        assert_eq!(state.schema_and_table(), ("tools", "pgup_migrations"));
    }
}

#[cfg(all(test, feature = "testing"))]
mod db_tests {
    use super::*;
    use crate::test_postgres::get_test_client;

    fn snapshot(pairs: &[(&str, serde_json::Value)]) -> BTreeMap<String, serde_json::Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn bootstrap_is_idempotent() {
        let mut client = get_test_client();
        let state = MigrationState::new("pgup_migrations", "demo").unwrap();

        assert!(!state.exists(&mut client).unwrap());
        assert!(state.create_if_absent(&mut client).unwrap());
        assert!(state.exists(&mut client).unwrap());
        assert!(!state.create_if_absent(&mut client).unwrap());
    }

    #[test]
    fn record_and_is_applied() {
        let mut client = get_test_client();
        let state = MigrationState::new("pgup_migrations", "demo").unwrap();
        state.create_if_absent(&mut client).unwrap();

        let snap = snapshot(&[("SRID", serde_json::json!(2056))]);
        let mut tx = client.transaction().unwrap();
        state
            .record(
                &mut tx,
                RecordKind::Changeset,
                Some("1.0.0".parse().unwrap()),
                Some("1.0.0/a.sql"),
                &snap,
            )
            .unwrap();
        tx.commit().unwrap();

        assert!(state.is_applied(&mut client, "1.0.0/a.sql").unwrap());
        assert!(!state.is_applied(&mut client, "1.0.0/b.sql").unwrap());
    }

    #[test]
    fn rollback_discards_records() {
        let mut client = get_test_client();
        let state = MigrationState::new("pgup_migrations", "demo").unwrap();
        state.create_if_absent(&mut client).unwrap();

        let snap = BTreeMap::new();
        let mut tx = client.transaction().unwrap();
        state
            .record(
                &mut tx,
                RecordKind::Changeset,
                Some("1.0.0".parse().unwrap()),
                Some("1.0.0/a.sql"),
                &snap,
            )
            .unwrap();
        drop(tx); // rollback

        assert!(!state.is_applied(&mut client, "1.0.0/a.sql").unwrap());
    }

    #[test]
    fn check_parameters_detects_mismatches() {
        let mut client = get_test_client();
        let state = MigrationState::new("pgup_migrations", "demo").unwrap();
        state.create_if_absent(&mut client).unwrap();

        // Nothing recorded yet: any snapshot passes.
        let current = snapshot(&[("SRID", serde_json::json!(2056))]);
        state.check_parameters(&mut client, &current).unwrap();

        let mut tx = client.transaction().unwrap();
        state
            .record(&mut tx, RecordKind::Install, None, None, &current)
            .unwrap();
        tx.commit().unwrap();

        state.check_parameters(&mut client, &current).unwrap();

        let changed = snapshot(&[("SRID", serde_json::json!(4326))]);
        let err = state.check_parameters(&mut client, &changed).unwrap_err();
        match err {
            Error::ParameterConsistency { mismatches } => {
                assert_eq!(mismatches.len(), 1);
                assert_eq!(mismatches[0].name, "SRID");
                assert_eq!(mismatches[0].recorded, serde_json::json!(2056));
                assert_eq!(mismatches[0].supplied, serde_json::json!(4326));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn history_preserves_append_order_and_baseline() {
        let mut client = get_test_client();
        let state = MigrationState::new("tools.pgup_migrations", "demo").unwrap();
        client.batch_execute("CREATE SCHEMA tools").unwrap();
        state.create_if_absent(&mut client).unwrap();

        let snap = BTreeMap::new();
        let mut tx = client.transaction().unwrap();
        state
            .set_baseline(&mut tx, "1.0.0".parse().unwrap(), &snap)
            .unwrap();
        state
            .record(
                &mut tx,
                RecordKind::Changeset,
                Some("1.0.1".parse().unwrap()),
                Some("1.0.1/b.sql"),
                &snap,
            )
            .unwrap();
        tx.commit().unwrap();

        let history = state.history(&mut client).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].kind, "baseline");
        assert_eq!(history[1].kind, "changeset");
        assert_eq!(history[1].changeset.as_deref(), Some("1.0.1/b.sql"));
        assert_eq!(
            state.max_applied_version(&mut client).unwrap(),
            Some("1.0.1".parse().unwrap())
        );
    }
}
