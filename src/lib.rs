#![cfg_attr(docsrs, feature(doc_cfg))]
//! `pgup` is a library for managing PostgreSQL schema migrations driven by
//! versioned SQL changelogs.
//!
//! Core concepts:
//! - Migrations are plain `.sql` files organized under version directories
//!   (`changelogs/1.2.3/001_add_users.sql`), applied in version order and
//!   tracked row-by-row in a dedicated table.
//! - Application objects that depend on the schema (views, triggers,
//!   functions) are maintained by drop/create hooks that bracket every run,
//!   so they are always rebuilt against the current schema.
//! - SQL may reference typed, declared parameters through `{name}`
//!   placeholders; values are rendered as SQL literals, recorded alongside
//!   each run, and checked for consistency on later runs.
//!
//! # Atomicity
//!
//! An entire install or upgrade (drop hooks, changesets, create hooks,
//! bookkeeping) runs in a single transaction. A failing statement, a
//! failing hook, or a cancellation request rolls everything back, including
//! the tracking table rows written so far.
//!
//! # Example
//!
//! ```no_run
//! use pgup::{Config, Options, Upgrader};
//!
//! # fn main() -> Result<(), pgup::Error> {
//! let mut client = postgres::Client::connect(
//!     "postgres://localhost/mydb",
//!     postgres::NoTls,
//! )?;
//! let upgrader = Upgrader::new(
//!     Config::new("myapp").with_changelog_root("changelogs"),
//! )?;
//! let report = upgrader.upgrade(&mut client, &Options::new())?;
//! println!("applied {} changesets", report.changesets_applied.len());
//! # Ok(())
//! # }
//! ```
//!
//! # Features
//!
//! - Tracing integration - available with the `tracing` feature flag.
//! - Testing utilities - available with the `testing` feature flag.

mod error;
pub use error::{Error, ParameterMismatch};

mod version;
pub use version::ChangesetVersion;

pub mod splitter;

mod parameter;
pub use parameter::{
    substitute, ParameterDefinition, ParameterSet, ParameterType, ParameterValue,
};

mod changelog;
pub use changelog::{
    Changelog, ChangelogRepository, Changeset, ChangesetSource, ModuleChangeset,
};

mod state;
pub use state::{MigrationRecord, MigrationState, RecordKind};

mod hook;
pub use hook::{execute_sql, Hook, HookKind, HookModule, HookSource};

mod feedback;
pub use feedback::{CancelFlag, Feedback, LogFeedback, SilentFeedback};

mod config;
pub use config::Config;

mod upgrader;
pub use upgrader::{Operation, Options, Report, RoleSynchronizer, Upgrader};

#[cfg(feature = "testing")]
#[cfg_attr(docsrs, doc(cfg(feature = "testing")))]
pub mod testing;

#[cfg(all(test, feature = "testing"))]
pub(crate) mod test_postgres;
