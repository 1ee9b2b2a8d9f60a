//! Changeset discovery and ordering.
//!
//! A changelog root contains one subdirectory per version
//! (`<root>/<major.minor.patch>/<ordered-filename>.sql`). Versions are
//! ordered numerically; files within a version lexically by filename, so
//! changelog authors are expected to use numeric or zero-padded prefixes.
//! Multiple roots are merged into one sequence.

use std::collections::BTreeSet;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use postgres::Transaction;

use crate::error::Error;
use crate::parameter::ParameterSet;
use crate::version::ChangesetVersion;

/// A changeset implemented in Rust rather than as a SQL file.
///
/// Module changesets are registered on the configuration with a version and
/// merged into the ordered sequence alongside SQL files. They receive the
/// run's open transaction and the resolved parameters; committing or rolling
/// back is structurally impossible through the `Transaction` handle, which
/// keeps atomicity with the engine.
pub trait ModuleChangeset: Send + Sync {
    /// Name used for ordering within the version and for the changeset
    /// identifier (`<version>/<name>`).
    fn name(&self) -> &str;

    fn run(&self, tx: &mut Transaction<'_>, parameters: &ParameterSet) -> Result<(), Error>;
}

/// Where a changeset's content comes from.
#[derive(Clone)]
pub enum ChangesetSource {
    /// A `.sql` file under a changelog root.
    SqlFile(PathBuf),
    /// A registered Rust module changeset.
    Module(Arc<dyn ModuleChangeset>),
}

impl fmt::Debug for ChangesetSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChangesetSource::SqlFile(path) => f.debug_tuple("SqlFile").field(path).finish(),
            ChangesetSource::Module(module) => {
                f.debug_tuple("Module").field(&module.name()).finish()
            }
        }
    }
}

/// One versioned migration step.
///
/// The identifier (`<version>/<filename>`) is the changeset's identity in
/// the tracking table and must never be reinterpreted between runs.
#[derive(Debug, Clone)]
pub struct Changeset {
    id: String,
    version: ChangesetVersion,
    name: String,
    source: ChangesetSource,
}

impl Changeset {
    pub(crate) fn new(version: ChangesetVersion, name: String, source: ChangesetSource) -> Self {
        Self {
            id: format!("{version}/{name}"),
            version,
            name,
            source,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn version(&self) -> ChangesetVersion {
        self.version
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source(&self) -> &ChangesetSource {
        &self.source
    }
}

/// One version directory under a changelog root.
#[derive(Debug, Clone)]
pub struct Changelog {
    dir: PathBuf,
    version: ChangesetVersion,
}

impl Changelog {
    /// Create a changelog from a version directory. The directory's name
    /// must parse as `<major>.<minor>.<patch>`.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, Error> {
        let dir = dir.into();
        let name = dir
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| Error::VersionFormat(dir.display().to_string()))?;
        let version = name.parse()?;
        Ok(Self { dir, version })
    }

    pub fn version(&self) -> ChangesetVersion {
        self.version
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// The `.sql` files of this changelog in lexical filename order.
    /// Not recursive; other file types are ignored.
    pub fn files(&self) -> Result<Vec<PathBuf>, Error> {
        let mut files = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.is_file() && path.extension().is_some_and(|e| e == "sql") {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }

    /// Check that the directory exists and holds at least one SQL file.
    pub fn validate(&self) -> Result<(), Error> {
        if !self.dir.is_dir() {
            return Err(Error::Configuration(format!(
                "changelog directory '{}' does not exist",
                self.dir.display()
            )));
        }
        if self.files()?.is_empty() {
            return Err(Error::Configuration(format!(
                "changelog directory '{}' contains no SQL files",
                self.dir.display()
            )));
        }
        Ok(())
    }
}

/// Scans one or more changelog roots and produces the ordered changeset
/// sequence.
#[derive(Debug, Clone)]
pub struct ChangelogRepository {
    roots: Vec<PathBuf>,
}

impl ChangelogRepository {
    pub fn new(roots: Vec<PathBuf>) -> Self {
        Self { roots }
    }

    /// All version directories across the roots, ascending by version.
    /// Entries whose names do not parse as versions are skipped with a
    /// warning, not an error.
    pub fn changelogs(&self) -> Result<Vec<Changelog>, Error> {
        let mut changelogs = Vec::new();
        for root in &self.roots {
            for entry in fs::read_dir(root)? {
                let path = entry?.path();
                if !path.is_dir() {
                    continue;
                }
                match Changelog::new(&path) {
                    Ok(changelog) => changelogs.push(changelog),
                    Err(_) => {
                        #[cfg(feature = "tracing")]
                        tracing::warn!(
                            dir = %path.display(),
                            "ignoring changelog entry with non-version name"
                        );
                    }
                }
            }
        }
        changelogs.sort_by_key(|c| c.version());
        Ok(changelogs)
    }

    /// The merged, ordered changeset sequence, excluding versions strictly
    /// greater than `max_version` when given.
    ///
    /// Changeset identifiers must be globally unique across roots; a
    /// duplicate keeps the first occurrence (roots are scanned in the order
    /// supplied) and logs a warning. This is a documented hazard, not an
    /// enforced error.
    pub fn list(&self, max_version: Option<ChangesetVersion>) -> Result<Vec<Changeset>, Error> {
        let mut changesets = Vec::new();
        let mut seen = BTreeSet::new();
        for changelog in self.changelogs()? {
            if max_version.is_some_and(|max| changelog.version() > max) {
                continue;
            }
            for file in changelog.files()? {
                let name = file
                    .file_name()
                    .and_then(|n| n.to_str())
                    .unwrap_or_default()
                    .to_string();
                let changeset = Changeset::new(
                    changelog.version(),
                    name,
                    ChangesetSource::SqlFile(file.clone()),
                );
                if !seen.insert(changeset.id().to_string()) {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(
                        id = changeset.id(),
                        file = %file.display(),
                        "duplicate changeset identifier across roots; first occurrence wins"
                    );
                    continue;
                }
                changesets.push(changeset);
            }
        }
        sort_changesets(&mut changesets);
        Ok(changesets)
    }
}

/// Order by version (numeric), then by name (lexical).
pub(crate) fn sort_changesets(changesets: &mut [Changeset]) {
    changesets.sort_by(|a, b| {
        a.version()
            .cmp(&b.version())
            .then_with(|| a.name().cmp(b.name()))
    });
}
