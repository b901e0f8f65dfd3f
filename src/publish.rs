//! # Local Package Repository
//!
//! Built packages are published into a commit-addressed directory tree:
//!
//! ```text
//! <repo-root>/<series>/<line>/<package>.<commit>/
//!     *.deb *.dsc *.changes *.tar.*
//!     Packages Packages.gz Sources Sources.gz
//!     Release [Release.gpg]
//! ```
//!
//! Each entry is a complete flat APT repository. It is assembled in a hidden
//! staging directory beside the target and swapped in with
//! [`fsutil::replace_dir`], so publishing the same commit again replaces the
//! entry without ever exposing a half-written directory.

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;

use chrono::{DateTime, Utc};
use flate2::write::GzEncoder;
use flate2::Compression;
use log::{debug, info, warn};
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};
use crate::fsutil;

/// Index files listed in the `Release` manifest, in this order.
pub const INDEX_FILES: &[&str] = &["Packages", "Packages.gz", "Sources", "Sources.gz"];

const ARTIFACT_PATTERNS: &[&str] = &["*.deb", "*.dsc", "*.changes", "*.buildinfo", "*.tar.*"];

/// Produces the package and source indexes for a directory - allows mocking
/// in tests
pub trait IndexGenerator {
    fn packages(&self, dir: &Path) -> Result<String>;
    fn sources(&self, dir: &Path) -> Result<String>;
}

/// Indexes through `dpkg-scanpackages` and `dpkg-scansources`.
pub struct DpkgScanner;

impl DpkgScanner {
    fn scan(tool: &str, args: &[&str], dir: &Path) -> Result<String> {
        debug!("{} {} in {}", tool, args.join(" "), dir.display());
        let output = Command::new(tool)
            .args(args)
            .current_dir(dir)
            .output()
            .map_err(|e| Error::Publish {
                target: dir.display().to_string(),
                message: format!("failed to run {}: {}", tool, e),
            })?;
        if !output.status.success() {
            return Err(Error::Publish {
                target: dir.display().to_string(),
                message: format!(
                    "{} failed: {}",
                    tool,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

impl IndexGenerator for DpkgScanner {
    fn packages(&self, dir: &Path) -> Result<String> {
        Self::scan("dpkg-scanpackages", &[".", "/dev/null"], dir)
    }

    fn sources(&self, dir: &Path) -> Result<String> {
        Self::scan("dpkg-scansources", &["."], dir)
    }
}

/// Detached signature over the release manifest.
pub trait Signer {
    fn sign(&self, release: &Path, signature: &Path) -> Result<()>;
}

/// ASCII-armoured detached signatures with `gpg`.
pub struct GpgSigner {
    key: Option<String>,
}

impl GpgSigner {
    /// Sign with `key`, or with gpg's default key when `None`.
    pub fn new(key: Option<String>) -> Self {
        Self { key }
    }
}

impl Signer for GpgSigner {
    fn sign(&self, release: &Path, signature: &Path) -> Result<()> {
        let mut cmd = Command::new("gpg");
        cmd.args(["--batch", "--yes", "--armor", "--detach-sign"]);
        if let Some(key) = &self.key {
            cmd.args(["--local-user", key]);
        }
        cmd.arg("--output").arg(signature).arg(release);

        let output = cmd.output().map_err(|e| Error::Signing {
            message: format!("failed to run gpg: {}", e),
        })?;
        if !output.status.success() {
            return Err(Error::Signing {
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }
}

/// Files produced by one package build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactSet {
    pub package: String,
    pub version: String,
    /// Sorted by file name
    pub files: Vec<PathBuf>,
}

impl ArtifactSet {
    /// Collect the packages, source packages and manifests found in `dir`.
    pub fn collect(dir: &Path, package: &str, version: &str) -> Result<Self> {
        let mut files = Vec::new();
        for pattern in ARTIFACT_PATTERNS {
            let full = dir.join(pattern);
            let full = full.to_string_lossy();
            for entry in glob::glob(&full)? {
                match entry {
                    Ok(path) if path.is_file() => files.push(path),
                    Ok(_) => {}
                    Err(e) => warn!("skipping unreadable artifact: {}", e),
                }
            }
        }
        files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
        files.dedup();

        Ok(Self {
            package: package.to_string(),
            version: version.to_string(),
            files,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

fn gzip(src: &Path, dst: &Path) -> Result<()> {
    let mut input = File::open(src)?;
    let mut encoder = GzEncoder::new(File::create(dst)?, Compression::best());
    io::copy(&mut input, &mut encoder)?;
    encoder.finish()?.sync_all()?;
    Ok(())
}

/// Render a `Release` manifest covering `files` in `dir`.
pub fn release_manifest(dir: &Path, files: &[&str], suite: &str, origin: &str, when: DateTime<Utc>) -> Result<String> {
    let mut out = String::new();
    out.push_str(&format!("Origin: {}\n", origin));
    out.push_str(&format!("Label: {}\n", origin));
    out.push_str(&format!("Suite: {}\n", suite));
    out.push_str(&format!("Codename: {}\n", suite));
    out.push_str(&format!("Date: {}\n", when.format("%a, %d %b %Y %H:%M:%S UTC")));
    out.push_str("Architectures: amd64 i386 all source\n");
    out.push_str("SHA256:\n");
    for name in files {
        let bytes = fs::read(dir.join(name))?;
        let digest = hex::encode(Sha256::digest(&bytes));
        out.push_str(&format!(" {} {:>16} {}\n", digest, bytes.len(), name));
    }
    Ok(out)
}

/// Writes repository entries under `<repo-root>/<series>/<line>`.
pub struct Publisher<'a> {
    repo_root: PathBuf,
    series: String,
    line: String,
    indexer: &'a dyn IndexGenerator,
    signer: Option<&'a dyn Signer>,
}

impl<'a> Publisher<'a> {
    pub fn new(
        repo_root: impl Into<PathBuf>,
        series: impl Into<String>,
        line: impl Into<String>,
        indexer: &'a dyn IndexGenerator,
    ) -> Self {
        Self {
            repo_root: repo_root.into(),
            series: series.into(),
            line: line.into(),
            indexer,
            signer: None,
        }
    }

    /// Sign each `Release` manifest with `signer`.
    pub fn signed_by(mut self, signer: &'a dyn Signer) -> Self {
        self.signer = Some(signer);
        self
    }

    pub fn line_dir(&self) -> PathBuf {
        self.repo_root.join(&self.series).join(&self.line)
    }

    pub fn target_dir(&self, package: &str, commit: &str) -> PathBuf {
        self.line_dir().join(format!("{}.{}", package, commit))
    }

    /// Generate indexes, the release manifest and its signature in `dir`.
    pub fn write_indexes(&self, dir: &Path, origin: &str, when: DateTime<Utc>) -> Result<()> {
        let packages = self.indexer.packages(dir)?;
        fs::write(dir.join("Packages"), packages)?;
        gzip(&dir.join("Packages"), &dir.join("Packages.gz"))?;

        let sources = self.indexer.sources(dir)?;
        fs::write(dir.join("Sources"), sources)?;
        gzip(&dir.join("Sources"), &dir.join("Sources.gz"))?;

        let manifest = release_manifest(dir, INDEX_FILES, &self.series, origin, when)?;
        let release = dir.join("Release");
        fs::write(&release, manifest)?;

        if let Some(signer) = self.signer {
            signer.sign(&release, &dir.join("Release.gpg"))?;
        }
        Ok(())
    }

    fn fill_stage(&self, staged: &Path, artifacts: &ArtifactSet, when: DateTime<Utc>) -> Result<()> {
        fs::create_dir_all(staged)?;
        for file in &artifacts.files {
            let name = file.file_name().ok_or_else(|| Error::Publish {
                target: staged.display().to_string(),
                message: format!("artifact without a file name: {}", file.display()),
            })?;
            fs::copy(file, staged.join(name))?;
        }
        self.write_indexes(staged, &artifacts.package, when)
    }

    /// Publish `artifacts` as the entry for `commit`, replacing any existing
    /// entry for the same commit. Returns the entry's path.
    pub fn publish(&self, artifacts: &ArtifactSet, commit: &str, when: DateTime<Utc>) -> Result<PathBuf> {
        if artifacts.is_empty() {
            return Err(Error::Publish {
                target: artifacts.package.clone(),
                message: "no artifacts to publish".to_string(),
            });
        }

        let target = self.target_dir(&artifacts.package, commit);
        fs::create_dir_all(self.line_dir())?;
        let staged = fsutil::sibling(&target, "staging")?;
        if staged.exists() {
            fs::remove_dir_all(&staged)?;
        }

        let staged_result = self
            .fill_stage(&staged, artifacts, when)
            .and_then(|()| fsutil::replace_dir(&staged, &target));
        let replaced = match staged_result {
            Ok(replaced) => replaced,
            Err(e) => {
                let _ = fs::remove_dir_all(&staged);
                return Err(e);
            }
        };

        if replaced {
            info!("replaced existing build {}", target.display());
        } else {
            info!("published {}", target.display());
        }
        Ok(target)
    }
}

/// Find the published build of `package` for `commit` under `line_dir`.
///
/// With `allow_latest`, a missing exact build falls back to the most
/// recently modified build of the package.
pub fn find_build(line_dir: &Path, package: &str, commit: &str, allow_latest: bool) -> Result<PathBuf> {
    let exact = line_dir.join(format!("{}.{}", package, commit));
    if exact.is_dir() {
        return Ok(exact);
    }

    let not_found = || Error::BuildNotFound {
        package: package.to_string(),
        commit: commit.to_string(),
        location: line_dir.display().to_string(),
    };
    if !allow_latest || !line_dir.is_dir() {
        return Err(not_found());
    }

    let prefix = format!("{}.", package);
    let mut latest: Option<(std::time::SystemTime, PathBuf)> = None;
    for entry in fs::read_dir(line_dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if !name.starts_with(&prefix) || !entry.file_type()?.is_dir() {
            continue;
        }
        let modified = entry.metadata()?.modified()?;
        if latest.as_ref().is_none_or(|(t, _)| modified > *t) {
            latest = Some((modified, entry.path()));
        }
    }

    let (_, path) = latest.ok_or_else(not_found)?;
    let chosen = path
        .file_name()
        .and_then(|n| n.to_str())
        .and_then(|n| n.strip_prefix(&prefix))
        .unwrap_or_default()
        .to_string();
    warn!(
        "no build of {} for commit {}, using latest build {}",
        package, commit, chosen
    );
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::GzDecoder;
    use std::cell::Cell;
    use std::io::Read;
    use std::time::Duration;
    use tempfile::TempDir;

    struct FakeIndexer;

    impl IndexGenerator for FakeIndexer {
        fn packages(&self, dir: &Path) -> Result<String> {
            let mut names: Vec<String> = fs::read_dir(dir)?
                .filter_map(|e| e.ok())
                .map(|e| e.file_name().to_string_lossy().to_string())
                .filter(|n| n.ends_with(".deb"))
                .collect();
            names.sort();
            Ok(names
                .iter()
                .map(|n| format!("Filename: ./{}\n", n))
                .collect::<Vec<_>>()
                .join("\n"))
        }

        fn sources(&self, _dir: &Path) -> Result<String> {
            Ok("Package: python-oq-hazardlib\n".to_string())
        }
    }

    #[derive(Default)]
    struct FakeSigner {
        calls: Cell<u32>,
        fail: bool,
    }

    impl Signer for FakeSigner {
        fn sign(&self, release: &Path, signature: &Path) -> Result<()> {
            self.calls.set(self.calls.get() + 1);
            if self.fail {
                return Err(Error::Signing {
                    message: "no secret key".to_string(),
                });
            }
            let body = fs::read_to_string(release)?;
            fs::write(signature, format!("SIGNED {}", body.len()))?;
            Ok(())
        }
    }

    fn when() -> DateTime<Utc> {
        DateTime::from_timestamp(1425290400, 0).unwrap()
    }

    fn build_output(temp: &TempDir, marker: &str) -> ArtifactSet {
        let out = temp.path().join("build-deb");
        fs::create_dir_all(&out).unwrap();
        fs::write(out.join("python-oq-hazardlib_0.14.0-1_amd64.deb"), marker).unwrap();
        fs::write(out.join("python-oq-hazardlib_0.14.0-1.dsc"), "dsc").unwrap();
        fs::write(out.join("python-oq-hazardlib_0.14.0-1.tar.gz"), "tar").unwrap();
        fs::write(out.join("build.log"), "ignored").unwrap();
        ArtifactSet::collect(&out, "python-oq-hazardlib", "0.14.0-1").unwrap()
    }

    #[test]
    fn test_collect_orders_and_filters() {
        let temp = TempDir::new().unwrap();
        let set = build_output(&temp, "deb");
        let names: Vec<_> = set
            .files
            .iter()
            .map(|f| f.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(
            names,
            vec![
                "python-oq-hazardlib_0.14.0-1.dsc",
                "python-oq-hazardlib_0.14.0-1.tar.gz",
                "python-oq-hazardlib_0.14.0-1_amd64.deb",
            ]
        );
    }

    #[test]
    fn test_publish_writes_complete_entry() {
        let temp = TempDir::new().unwrap();
        let set = build_output(&temp, "deb");
        let signer = FakeSigner::default();
        let root = temp.path().join("repo");
        let publisher = Publisher::new(&root, "trusty", "master", &FakeIndexer).signed_by(&signer);

        let entry = publisher.publish(&set, "abcdef1", when()).unwrap();

        assert_eq!(entry, root.join("trusty/master/python-oq-hazardlib.abcdef1"));
        for name in INDEX_FILES.iter().chain(&["Release", "Release.gpg"]) {
            assert!(entry.join(name).is_file(), "missing {}", name);
        }
        assert!(entry.join("python-oq-hazardlib_0.14.0-1_amd64.deb").is_file());
        assert!(!entry.join("build.log").exists());
        assert_eq!(signer.calls.get(), 1);

        let mut unzipped = String::new();
        GzDecoder::new(File::open(entry.join("Packages.gz")).unwrap())
            .read_to_string(&mut unzipped)
            .unwrap();
        assert_eq!(unzipped, fs::read_to_string(entry.join("Packages")).unwrap());

        let release = fs::read_to_string(entry.join("Release")).unwrap();
        let packages = fs::read(entry.join("Packages")).unwrap();
        let expected = hex::encode(Sha256::digest(&packages));
        assert!(release.contains(&format!(" {} {:>16} Packages\n", expected, packages.len())));
        assert!(release.contains("Date: Mon, 02 Mar 2015 10:00:00 UTC"));
        assert!(release.contains("Origin: python-oq-hazardlib"));
    }

    #[test]
    fn test_republish_replaces_entry() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("repo");
        let publisher = Publisher::new(&root, "trusty", "master", &FakeIndexer);

        let first = build_output(&temp, "first");
        let entry = publisher.publish(&first, "abcdef1", when()).unwrap();
        let deb = entry.join("python-oq-hazardlib_0.14.0-1_amd64.deb");
        assert_eq!(fs::read_to_string(&deb).unwrap(), "first");

        let second = build_output(&temp, "second");
        let again = publisher.publish(&second, "abcdef1", when()).unwrap();
        assert_eq!(again, entry);
        assert_eq!(fs::read_to_string(&deb).unwrap(), "second");
        assert!(!entry.join("Release.gpg").exists());

        let leftovers: Vec<_> = fs::read_dir(publisher.line_dir())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(leftovers, vec!["python-oq-hazardlib.abcdef1"]);
    }

    #[test]
    fn test_failed_signing_keeps_previous_entry() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("repo");
        let plain = Publisher::new(&root, "trusty", "master", &FakeIndexer);
        let entry = plain.publish(&build_output(&temp, "good"), "abcdef1", when()).unwrap();

        let signer = FakeSigner {
            fail: true,
            ..FakeSigner::default()
        };
        let signed = Publisher::new(&root, "trusty", "master", &FakeIndexer).signed_by(&signer);
        let err = signed
            .publish(&build_output(&temp, "bad"), "abcdef1", when())
            .unwrap_err();

        assert!(matches!(err, Error::Signing { .. }));
        let deb = entry.join("python-oq-hazardlib_0.14.0-1_amd64.deb");
        assert_eq!(fs::read_to_string(deb).unwrap(), "good");
        assert_eq!(fs::read_dir(signed.line_dir()).unwrap().count(), 1);
    }

    #[test]
    fn test_publish_nothing_is_an_error() {
        let temp = TempDir::new().unwrap();
        let set = ArtifactSet::collect(temp.path(), "pkg", "1.0.0").unwrap();
        let publisher = Publisher::new(temp.path().join("repo"), "trusty", "master", &FakeIndexer);
        assert!(matches!(
            publisher.publish(&set, "abcdef1", when()),
            Err(Error::Publish { .. })
        ));
    }

    #[test]
    fn test_find_build_exact_and_missing() {
        let temp = TempDir::new().unwrap();
        let line = temp.path();
        fs::create_dir(line.join("oq-libs.1111111")).unwrap();

        assert_eq!(
            find_build(line, "oq-libs", "1111111", false).unwrap(),
            line.join("oq-libs.1111111")
        );
        assert!(matches!(
            find_build(line, "oq-libs", "2222222", false),
            Err(Error::BuildNotFound { .. })
        ));
    }

    #[test]
    fn test_find_build_latest_fallback() {
        let temp = TempDir::new().unwrap();
        let line = temp.path();
        fs::create_dir(line.join("oq-libs.1111111")).unwrap();
        std::thread::sleep(Duration::from_millis(20));
        fs::create_dir(line.join("oq-libs.3333333")).unwrap();
        fs::create_dir(line.join("other.9999999")).unwrap();

        assert_eq!(
            find_build(line, "oq-libs", "2222222", true).unwrap(),
            line.join("oq-libs.3333333")
        );
        assert!(find_build(line, "absent", "2222222", true).is_err());
    }
}
