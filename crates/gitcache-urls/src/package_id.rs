use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::canonical::strip_ref;

/// `<scheme>://…#<commit>` with an optional `git+` compound scheme.
static URL_FORM: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z]+(?:\+[a-z]+)?://\S+#[0-9a-f]{7,40}$").unwrap()
});

/// scp-style `git@host:owner/repo.git#<commit>`.
static SCP_FORM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^git@[^:\s]+:\S+#[0-9a-f]{7,40}$").unwrap());

#[derive(Debug, Error)]
pub enum PackageIdError {
    #[error("`{0}` is not a valid package id (expected `<git-url>#<commit>`)")]
    Invalid(String),
}

/// The logical key an artifact is cached under: `"<git-url>#<commit>"`.
///
/// The commit fragment is what makes the key immutable; symbolic refs are
/// resolved before a `PackageId` is ever formed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PackageId(String);

impl PackageId {
    /// Form a package id from a Git URL and a resolved commit.
    ///
    /// Any ref fragment already present on the URL is dropped in favor of
    /// the commit.
    pub fn new(git_url: &str, commit: &str) -> Result<Self, PackageIdError> {
        let candidate = format!("{}#{commit}", strip_ref(git_url));
        candidate.parse()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The URL half of the key.
    pub fn git_url(&self) -> &str {
        strip_ref(&self.0)
    }

    /// The commit half of the key.
    pub fn commit(&self) -> &str {
        self.0.rsplit_once('#').map(|(_, commit)| commit).unwrap_or("")
    }
}

impl FromStr for PackageId {
    type Err = PackageIdError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        if URL_FORM.is_match(value) || SCP_FORM.is_match(value) {
            Ok(Self(value.to_string()))
        } else {
            Err(PackageIdError::Invalid(value.to_string()))
        }
    }
}

impl fmt::Display for PackageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const COMMIT: &str = "0123456789abcdef0123456789abcdef01234567";

    #[test]
    fn accepts_canonical_forms() {
        for url in [
            "https://github.com/chalk/chalk.git",
            "git+https://github.com/chalk/chalk.git",
            "git://github.com/chalk/chalk.git",
        ] {
            let id = PackageId::new(url, COMMIT).unwrap();
            assert_eq!(id.commit(), COMMIT);
            assert_eq!(id.git_url(), url);
        }
    }

    #[test]
    fn accepts_scp_form() {
        let id: PackageId = format!("git@github.com:chalk/chalk.git#{COMMIT}")
            .parse()
            .unwrap();
        assert_eq!(id.commit(), COMMIT);
    }

    #[test]
    fn accepts_short_commits() {
        assert!(PackageId::new("https://github.com/chalk/chalk.git", "0123abc").is_ok());
    }

    #[test]
    fn rejects_missing_commit() {
        assert!("https://github.com/chalk/chalk.git".parse::<PackageId>().is_err());
        assert!(PackageId::new("https://github.com/chalk/chalk.git", "not-hex").is_err());
    }

    #[test]
    fn drops_existing_ref_fragment() {
        let id = PackageId::new("https://github.com/chalk/chalk.git#v5.0.0", COMMIT).unwrap();
        assert_eq!(
            id.as_str(),
            format!("https://github.com/chalk/chalk.git#{COMMIT}")
        );
    }
}
