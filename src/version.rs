use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// A changeset version parsed from a `<major>.<minor>.<patch>` folder name.
///
/// Ordering is numeric tuple comparison, never lexical: `1.9.0` sorts before
/// `1.10.0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ChangesetVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl ChangesetVersion {
    pub fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }
}

impl FromStr for ChangesetVersion {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split('.');
        let component = |part: Option<&str>| -> Result<u32, Error> {
            let part = part.ok_or_else(|| Error::VersionFormat(s.to_string()))?;
            if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
                return Err(Error::VersionFormat(s.to_string()));
            }
            part.parse::<u32>()
                .map_err(|_| Error::VersionFormat(s.to_string()))
        };
        let major = component(parts.next())?;
        let minor = component(parts.next())?;
        let patch = component(parts.next())?;
        if parts.next().is_some() {
            return Err(Error::VersionFormat(s.to_string()));
        }
        Ok(Self {
            major,
            minor,
            patch,
        })
    }
}

impl fmt::Display for ChangesetVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_round_trips() {
        let v: ChangesetVersion = "1.2.3".parse().unwrap();
        assert_eq!(v, ChangesetVersion::new(1, 2, 3));
        assert_eq!(v.to_string(), "1.2.3");
    }

    #[test]
    fn ordering_is_numeric_not_lexical() {
        let a: ChangesetVersion = "1.9.0".parse().unwrap();
        let b: ChangesetVersion = "1.10.0".parse().unwrap();
        assert!(a < b);

        let mut versions: Vec<ChangesetVersion> = ["2.0.0", "1.10.0", "1.2.0", "1.9.0", "10.0.0"]
            .iter()
            .map(|s| s.parse().unwrap())
            .collect();
        versions.sort();
        let rendered: Vec<String> = versions.iter().map(|v| v.to_string()).collect();
        assert_eq!(rendered, ["1.2.0", "1.9.0", "1.10.0", "2.0.0", "10.0.0"]);
    }

    #[test]
    fn rejects_malformed_versions() {
        for s in ["1.2", "1.2.3.4", "a.b.c", "1..3", "1.2.x", "", "1.2.-3", "v1.2.3"] {
            let err = s.parse::<ChangesetVersion>().unwrap_err();
            assert!(matches!(err, Error::VersionFormat(_)), "accepted {s:?}");
        }
    }
}
