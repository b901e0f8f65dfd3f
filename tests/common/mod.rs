//! Shared test utilities for the CLI end-to-end tests.
//!
//! ```rust,ignore
//! mod common;
//! use common::prelude::*;
//!
//! #[test]
//! fn test_example() {
//!     let fixture = TestFixture::new().with_project(configs::MINIMAL);
//!     fixture.command().arg("version").assert().success();
//! }
//! ```

use assert_fs::prelude::*;
use std::path::{Path, PathBuf};

/// Re-export commonly used test dependencies for convenience.
pub mod prelude {
    pub use assert_cmd::cargo::cargo_bin_cmd;
    pub use assert_fs::prelude::*;
    pub use predicates::prelude::*;

    #[allow(unused_imports)]
    pub use super::configs;
    pub use super::TestFixture;
}

/// Configuration and project file snippets.
#[allow(dead_code)]
pub mod configs {
    /// Smallest valid configuration.
    pub const MINIMAL: &str = r#"
package: python-oq-hazardlib
version_file: openquake/hazardlib/__init__.py
series: trusty
repositories:
  canonical: git://github.com/gem
container:
  template: ubuntu-lxc-{series}-eph
"#;

    /// A configuration with a devtest sequence.
    pub const WITH_DEVTEST: &str = r#"
package: python-oq-hazardlib
version_file: openquake/hazardlib/__init__.py
series: trusty
repositories:
  canonical: git://github.com/gem
container:
  template: ubuntu-lxc-{series}-eph
tasks:
  devtest:
    steps: ["cd {package} && nosetests"]
"#;

    /// A step referencing a placeholder that does not exist.
    pub const UNKNOWN_PLACEHOLDER: &str = r#"
package: python-oq-hazardlib
version_file: openquake/hazardlib/__init__.py
series: trusty
repositories:
  canonical: git://github.com/gem
container:
  template: ubuntu-lxc-{series}-eph
tasks:
  devtest:
    steps: ["make {target}"]
"#;

    pub const INVALID_YAML: &str = "package: [unclosed";

    pub const LITERAL: &str = "# -*- coding: utf-8 -*-\n__version__ = '3.2.0'\n";

    pub const CHANGELOG: &str = "python-oq-hazardlib (3.2.0-1) trusty; urgency=low\n\n  * Release 3.2.0\n\n -- Jane Doe <jane@example.org>  Mon, 02 Mar 2015 10:00:00 +0100\n";
}

/// A temporary project directory with a `.stagehand.yaml`.
pub struct TestFixture {
    temp_dir: assert_fs::TempDir,
}

impl TestFixture {
    pub fn new() -> Self {
        Self {
            temp_dir: assert_fs::TempDir::new().expect("Failed to create temp directory"),
        }
    }

    /// Write `.stagehand.yaml` with the given content.
    pub fn with_config(self, content: &str) -> Self {
        self.temp_dir
            .child(".stagehand.yaml")
            .write_str(content)
            .expect("Failed to write config file");
        self
    }

    /// Configuration plus an aligned version literal and changelog.
    #[allow(dead_code)]
    pub fn with_project(self, config: &str) -> Self {
        self.with_config(config)
            .with_file("openquake/hazardlib/__init__.py", configs::LITERAL)
            .with_file("debian/changelog", configs::CHANGELOG)
    }

    pub fn with_file(self, path: &str, content: &str) -> Self {
        self.temp_dir
            .child(path)
            .write_str(content)
            .expect("Failed to write file");
        self
    }

    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    #[allow(dead_code)]
    pub fn config_path(&self) -> PathBuf {
        self.temp_dir.path().join(".stagehand.yaml")
    }

    /// A `stagehand` command running in the fixture directory, with colour
    /// off so output can be matched literally.
    pub fn command(&self) -> assert_cmd::Command {
        let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("stagehand");
        cmd.current_dir(self.path())
            .env("NO_COLOR", "1")
            .env_remove("RUST_LOG")
            .env_remove("STAGEHAND_CONFIG");
        cmd
    }
}

impl Default for TestFixture {
    fn default() -> Self {
        Self::new()
    }
}
