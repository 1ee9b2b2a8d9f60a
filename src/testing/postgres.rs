//! Test harness for exercising a migration configuration against a real
//! PostgreSQL database: [UpgradeTestHarness]

use postgres::types::FromSql;
use postgres::Client;

use crate::error::Error;
use crate::state::{MigrationRecord, MigrationState};
use crate::upgrader::{Options, Report, Upgrader};

/// Drives an [Upgrader] against a database and provides assertion helpers
/// for the resulting schema.
///
/// # Example
///
/// ```ignore
/// use pgup::testing::postgres::UpgradeTestHarness;
/// use pgup::{Config, Options, Upgrader};
///
/// let client = get_test_client(); // however you connect in your tests
/// let upgrader = Upgrader::new(
///     Config::new("myapp").with_changelog_root("changelogs"),
/// )?;
/// let mut harness = UpgradeTestHarness::new(client, upgrader);
///
/// harness.install(&Options::new())?;
/// harness.assert_table_exists("users")?;
///
/// harness.execute("INSERT INTO users (name) VALUES ('alice')")?;
/// let name: String = harness.query_one("SELECT name FROM users WHERE id = 1")?;
/// assert_eq!(name, "alice");
/// ```
pub struct UpgradeTestHarness {
    client: Client,
    upgrader: Upgrader,
}

impl UpgradeTestHarness {
    pub fn new(client: Client, upgrader: Upgrader) -> Self {
        Self { client, upgrader }
    }

    pub fn install(&mut self, options: &Options) -> Result<Report, Error> {
        self.upgrader.install(&mut self.client, options)
    }

    pub fn upgrade(&mut self, options: &Options) -> Result<Report, Error> {
        self.upgrader.upgrade(&mut self.client, options)
    }

    pub fn uninstall(&mut self, options: &Options) -> Result<Report, Error> {
        self.upgrader.uninstall(&mut self.client, options)
    }

    /// Every row recorded in the tracking table, oldest first. Empty when
    /// the table does not exist yet.
    pub fn history(&mut self) -> Result<Vec<MigrationRecord>, Error> {
        let config = self.upgrader.config();
        let state = MigrationState::new(config.tracking_table(), config.module())?;
        state.history(&mut self.client)
    }

    /// Execute a SQL statement (for setting up test data).
    pub fn execute(&mut self, sql: &str) -> Result<(), Error> {
        self.client.batch_execute(sql)?;
        Ok(())
    }

    /// Query a single value from the database.
    ///
    /// Note: The type `T` must be an owned type (e.g., `String` not `&str`).
    pub fn query_one<T>(&mut self, sql: &str) -> Result<T, Error>
    where
        T: for<'a> FromSql<'a>,
    {
        let row = self.client.query_one(sql, &[])?;
        Ok(row.get(0))
    }

    /// Query all values from a single-column result.
    pub fn query_all<T>(&mut self, sql: &str) -> Result<Vec<T>, Error>
    where
        T: for<'a> FromSql<'a>,
    {
        let rows = self.client.query(sql, &[])?;
        Ok(rows.iter().map(|row| row.get(0)).collect())
    }

    pub fn assert_table_exists(&mut self, table_name: &str) -> Result<(), Error> {
        let exists: bool = self
            .client
            .query_one(
                "SELECT EXISTS (SELECT FROM information_schema.tables \
                 WHERE table_schema = 'public' AND table_name = $1)",
                &[&table_name],
            )?
            .get(0);
        if !exists {
            return Err(Error::Generic(format!(
                "Table '{table_name}' does not exist"
            )));
        }
        Ok(())
    }

    pub fn assert_table_not_exists(&mut self, table_name: &str) -> Result<(), Error> {
        match self.assert_table_exists(table_name) {
            Ok(()) => Err(Error::Generic(format!(
                "Table '{table_name}' exists but should not"
            ))),
            Err(Error::Generic(_)) => Ok(()),
            Err(other) => Err(other),
        }
    }

    pub fn assert_view_exists(&mut self, view_name: &str) -> Result<(), Error> {
        let exists: bool = self
            .client
            .query_one(
                "SELECT EXISTS (SELECT FROM information_schema.views \
                 WHERE table_schema = 'public' AND table_name = $1)",
                &[&view_name],
            )?
            .get(0);
        if !exists {
            return Err(Error::Generic(format!("View '{view_name}' does not exist")));
        }
        Ok(())
    }

    pub fn assert_column_exists(
        &mut self,
        table_name: &str,
        column_name: &str,
    ) -> Result<(), Error> {
        let exists: bool = self
            .client
            .query_one(
                "SELECT EXISTS (SELECT FROM information_schema.columns \
                 WHERE table_schema = 'public' AND table_name = $1 AND column_name = $2)",
                &[&table_name, &column_name],
            )?
            .get(0);
        if !exists {
            return Err(Error::Generic(format!(
                "Column '{column_name}' does not exist in table '{table_name}'"
            )));
        }
        Ok(())
    }

    /// Get a mutable reference to the underlying client for advanced usage.
    pub fn client(&mut self) -> &mut Client {
        &mut self.client
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::test_postgres::get_test_client;
    use std::path::Path;

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    fn harness(root: &Path) -> UpgradeTestHarness {
        let upgrader =
            Upgrader::new(Config::new("harness_demo").with_changelog_root(root)).unwrap();
        UpgradeTestHarness::new(get_test_client(), upgrader)
    }

    #[test]
    fn install_execute_and_query() {
        let tmp = tempfile::tempdir().unwrap();
        write(
            tmp.path(),
            "1.0.0/users.sql",
            "CREATE TABLE users (id SERIAL PRIMARY KEY, name TEXT);",
        );
        let mut harness = harness(tmp.path());

        harness.install(&Options::new()).unwrap();
        harness.assert_table_exists("users").unwrap();
        harness.assert_column_exists("users", "name").unwrap();
        harness
            .execute("INSERT INTO users (name) VALUES ('alice')")
            .unwrap();
        let name: String = harness
            .query_one("SELECT name FROM users WHERE id = 1")
            .unwrap();
        assert_eq!(name, "alice");
    }

    #[test]
    fn history_reflects_applied_changesets() {
        let tmp = tempfile::tempdir().unwrap();
        write(tmp.path(), "1.0.0/a.sql", "CREATE TABLE a (id INT);");
        let mut harness = harness(tmp.path());

        assert!(harness.history().unwrap().is_empty());
        harness.install(&Options::new()).unwrap();
        let history = harness.history().unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].changeset.as_deref(), Some("1.0.0/a.sql"));
        assert_eq!(history[1].kind, "install");
    }

    #[test]
    fn assertions_report_missing_objects() {
        let tmp = tempfile::tempdir().unwrap();
        write(tmp.path(), "1.0.0/a.sql", "CREATE TABLE a (id INT);");
        let mut harness = harness(tmp.path());

        harness.assert_table_not_exists("a").unwrap();
        harness.install(&Options::new()).unwrap();
        assert!(harness.assert_table_not_exists("a").is_err());
        assert!(harness.assert_table_exists("missing").is_err());
        assert!(harness.assert_view_exists("missing_v").is_err());
    }
}
