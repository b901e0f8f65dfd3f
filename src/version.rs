//! # Version Reconciliation
//!
//! The package version lives in two places: a `__version__ = '...'` literal
//! in the library sources and the header of the Debian changelog. This module
//! parses both into a [`VersionTuple`], checks that they describe the same
//! release, and synthesizes development versions.
//!
//! ## Grammar
//!
//! ```text
//! version  = major "." minor "." patch [suffix] [dev]
//! suffix   = packaging text such as "-1" or "-1~trusty01"
//! dev      = "~dev" timestamp "+" commit
//! ```
//!
//! The changelog header has the form
//! `package (version) series; urgency=low`.
//!
//! ## Reconciliation
//!
//! Sources agree when major, minor and patch match; suffixes and build
//! metadata are packaging detail. When they disagree the operator is asked
//! through [`Confirm`]; a refusal is [`Error::VersionMismatch`]. Neither
//! source is ever picked silently.
//!
//! ## Development versions
//!
//! [`synthesize_dev_version`] appends `~dev<timestamp>+<commit>` to the
//! changelog version, prepends a changelog stanza for it and rewrites the
//! version literal, committing both files together or neither.

use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use log::{info, warn};
use regex::{Captures, Regex};

use crate::config::Maintainer;
use crate::error::{Error, Result};
use crate::fsutil;
use crate::prompt::Confirm;

static VERSION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?P<major>\d+)\.(?P<minor>\d+)\.(?P<patch>\d+)(?P<suffix>[-~+.A-Za-z0-9]*?)(?:~dev(?P<ts>\d+)\+(?P<hash>[0-9a-fA-F]+))?$",
    )
    .expect("version grammar is valid")
});

static LITERAL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?m)^(?P<head>__version__\s*=\s*)(?P<quote>['"])(?P<version>[^'"]*)['"]"#)
        .expect("version literal pattern is valid")
});

static RELEASE_DATE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^(?P<indent>[ \t]*)[^)\n]*(?P<tail>\)[ \t]*# release date ).*$")
        .expect("release date pattern is valid")
});

static CHANGELOG_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<package>\S+) \((?P<version>[^)]+)\) (?P<series>[^;]+); urgency=(?P<urgency>\S+)")
        .expect("changelog header pattern is valid")
});

/// Timestamp and commit of a development build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildMetadata {
    pub timestamp: i64,
    pub commit: String,
}

/// A parsed package version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionTuple {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
    /// Packaging suffix, e.g. `-1`.
    pub suffix: Option<String>,
    pub build: Option<BuildMetadata>,
}

impl VersionTuple {
    /// The release part as a semantic version, without suffix or build.
    pub fn core(&self) -> semver::Version {
        semver::Version::new(self.major, self.minor, self.patch)
    }

    /// Whether both versions name the same major.minor.patch release.
    pub fn same_release(&self, other: &VersionTuple) -> bool {
        self.core() == other.core()
    }

    /// This version marked as a development build of `commit`.
    pub fn with_build(&self, timestamp: i64, commit: &str) -> VersionTuple {
        VersionTuple {
            build: Some(BuildMetadata {
                timestamp,
                commit: commit.to_string(),
            }),
            ..self.clone()
        }
    }
}

impl FromStr for VersionTuple {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let caps = VERSION_RE.captures(s).ok_or_else(|| Error::VersionParse {
            source_name: "version string".to_string(),
            message: format!("'{}' is not major.minor.patch[suffix]", s),
        })?;

        let number = |name: &str| -> Result<u64> {
            caps[name].parse().map_err(|e| Error::VersionParse {
                source_name: "version string".to_string(),
                message: format!("{} component of '{}': {}", name, s, e),
            })
        };

        let build = match (caps.name("ts"), caps.name("hash")) {
            (Some(ts), Some(hash)) => Some(BuildMetadata {
                timestamp: ts.as_str().parse().map_err(|e| Error::VersionParse {
                    source_name: "version string".to_string(),
                    message: format!("build timestamp of '{}': {}", s, e),
                })?,
                commit: hash.as_str().to_string(),
            }),
            _ => None,
        };

        Ok(VersionTuple {
            major: number("major")?,
            minor: number("minor")?,
            patch: number("patch")?,
            suffix: caps
                .name("suffix")
                .map(|m| m.as_str().to_string())
                .filter(|s| !s.is_empty()),
            build,
        })
    }
}

impl fmt::Display for VersionTuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)?;
        if let Some(suffix) = &self.suffix {
            f.write_str(suffix)?;
        }
        if let Some(build) = &self.build {
            write!(f, "~dev{}+{}", build.timestamp, build.commit)?;
        }
        Ok(())
    }
}

/// The first line of a Debian changelog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangelogHeader {
    pub package: String,
    pub version: VersionTuple,
    pub series: String,
    pub urgency: String,
}

/// Extract the version from a `__version__ = '...'` literal.
pub fn parse_version_literal(content: &str) -> Result<VersionTuple> {
    let caps = LITERAL_RE.captures(content).ok_or_else(|| Error::VersionParse {
        source_name: "version literal".to_string(),
        message: "__version__ variable not found".to_string(),
    })?;
    caps["version"].parse().map_err(|e: Error| Error::VersionParse {
        source_name: "version literal".to_string(),
        message: e.to_string(),
    })
}

/// Parse the topmost changelog header, checking it belongs to `package`.
pub fn parse_changelog_header(content: &str, package: &str) -> Result<ChangelogHeader> {
    let first = content
        .lines()
        .find(|l| !l.trim().is_empty())
        .ok_or_else(|| Error::VersionParse {
            source_name: "changelog".to_string(),
            message: "changelog is empty".to_string(),
        })?;

    let caps = CHANGELOG_RE.captures(first).ok_or_else(|| Error::VersionParse {
        source_name: "changelog".to_string(),
        message: format!("malformed header: {}", first),
    })?;

    if &caps["package"] != package {
        return Err(Error::VersionParse {
            source_name: "changelog".to_string(),
            message: format!(
                "header names package '{}', expected '{}'",
                &caps["package"], package
            ),
        });
    }

    let version: VersionTuple = caps["version"].parse().map_err(|e: Error| Error::VersionParse {
        source_name: "changelog".to_string(),
        message: e.to_string(),
    })?;

    Ok(ChangelogHeader {
        package: caps["package"].to_string(),
        version,
        series: caps["series"].trim().to_string(),
        urgency: caps["urgency"].to_string(),
    })
}

/// Outcome of comparing the two version sources.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reconciliation {
    Aligned,
    Mismatch,
}

pub fn compare(literal: &VersionTuple, changelog: &VersionTuple) -> Reconciliation {
    if literal.same_release(changelog) {
        Reconciliation::Aligned
    } else {
        Reconciliation::Mismatch
    }
}

/// Reconcile the two sources, asking the operator on a mismatch.
///
/// Returns the changelog version, which carries the packaging suffix.
pub fn reconcile(
    literal: &VersionTuple,
    changelog: &VersionTuple,
    confirm: &dyn Confirm,
) -> Result<VersionTuple> {
    if compare(literal, changelog) == Reconciliation::Aligned {
        return Ok(changelog.clone());
    }

    warn!(
        "versions are not aligned: literal {}, changelog {}",
        literal.core(),
        changelog.core()
    );
    let prompt = format!(
        "Version literal says {} but the changelog says {}. Continue anyway?",
        literal.core(),
        changelog.core()
    );
    if confirm.confirm(&prompt)? {
        info!("operator accepted version mismatch");
        Ok(changelog.clone())
    } else {
        Err(Error::VersionMismatch {
            literal: literal.to_string(),
            changelog: changelog.to_string(),
        })
    }
}

/// Both version sources as read from disk.
#[derive(Debug, Clone)]
pub struct VersionSources {
    pub literal: VersionTuple,
    pub changelog: ChangelogHeader,
}

pub fn read_sources(version_file: &Path, changelog: &Path, package: &str) -> Result<VersionSources> {
    let literal = parse_version_literal(&std::fs::read_to_string(version_file)?)?;
    let changelog = parse_changelog_header(&std::fs::read_to_string(changelog)?, package)?;
    Ok(VersionSources { literal, changelog })
}

/// Replace the version literal and any release-date marker in `content`.
pub fn rewrite_version_literal(
    content: &str,
    version: &VersionTuple,
    when: DateTime<Utc>,
) -> Result<String> {
    if LITERAL_RE.find_iter(content).count() != 1 {
        return Err(Error::VersionParse {
            source_name: "version literal".to_string(),
            message: "expected exactly one __version__ assignment".to_string(),
        });
    }

    let version_str = version.to_string();
    let rewritten = LITERAL_RE.replace(content, |caps: &Captures| {
        format!(
            "{}{}{}{}",
            &caps["head"], &caps["quote"], version_str, &caps["quote"]
        )
    });

    let stamp = when.timestamp();
    let date = when.format("%a %b %e %H:%M:%S UTC %Y").to_string();
    let rewritten = RELEASE_DATE_RE.replace_all(&rewritten, |caps: &Captures| {
        format!("{}{}{}{}", &caps["indent"], stamp, &caps["tail"], date)
    });

    Ok(rewritten.into_owned())
}

/// A changelog stanza announcing an automatic development build.
pub fn changelog_stanza(
    package: &str,
    version: &VersionTuple,
    series: &str,
    maintainer: &Maintainer,
    commit: &str,
    when: DateTime<Utc>,
) -> String {
    format!(
        "{} ({}) {}; urgency=low\n\n  [Automatic Script]\n  * Development version from {} commit\n\n -- {} <{}>  {}\n\n",
        package,
        version,
        series,
        commit,
        maintainer.name,
        maintainer.email,
        when.format("%a, %d %b %Y %H:%M:%S %z"),
    )
}

/// Everything needed to stamp a development build.
pub struct DevBuild<'a> {
    pub package: &'a str,
    pub series: &'a str,
    pub maintainer: &'a Maintainer,
    pub commit: &'a str,
    pub when: DateTime<Utc>,
}

/// Rewrite the version literal and changelog for a development build.
///
/// Both files are updated together or neither is touched.
pub fn synthesize_dev_version(
    version_file: &Path,
    changelog: &Path,
    build: &DevBuild<'_>,
) -> Result<VersionTuple> {
    let literal_content = std::fs::read_to_string(version_file)?;
    let changelog_content = std::fs::read_to_string(changelog)?;

    // Validate both before touching anything.
    parse_version_literal(&literal_content)?;
    let header = parse_changelog_header(&changelog_content, build.package)?;

    let mut base = header.version.clone();
    base.build = None;
    let dev = base.with_build(build.when.timestamp(), build.commit);

    let stanza = changelog_stanza(
        build.package,
        &dev,
        build.series,
        build.maintainer,
        build.commit,
        build.when,
    );
    let new_changelog = format!("{}{}", stanza, changelog_content);
    let new_literal = rewrite_version_literal(&literal_content, &dev, build.when)?;

    fsutil::write_all_or_none(&[
        (changelog.to_path_buf(), new_changelog),
        (version_file.to_path_buf(), new_literal),
    ])?;

    info!("development version {}", dev);
    Ok(dev)
}
