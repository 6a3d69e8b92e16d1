//! Bootstrap script synthesis.
//!
//! The script is the instance's launch data: it exports the storage bucket,
//! installs the container runtime, materialises every payload file under the
//! install root, and finally runs the restore, build, and run scripts in that
//! order. The output is a pure function of the bucket identifier and the
//! payload tree. The instance is replaced whenever this value changes, so the
//! rendering must stay byte-for-byte deterministic.

use std::borrow::Cow;
use std::fmt;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use sha2::{Digest, Sha256};
use shell_escape::unix::escape;
use tracing::{debug, warn};

use crate::file_tree::{FileTree, parent_of};

/// Default directory the payload is materialised beneath.
pub const DEFAULT_INSTALL_ROOT: &str = "/opt";

/// Default environment variable carrying the bucket name.
pub const DEFAULT_BUCKET_ENV_VAR: &str = "MC_BUCKET";

/// Default directory (relative to the install root) holding the trailer
/// scripts.
pub const DEFAULT_SCRIPT_DIR: &str = "server-code";

/// Scripts run at the end of the bootstrap, in order.
pub const TRAILER_SCRIPTS: [&str; 3] = ["restore.sh", "build_minecraft.sh", "run_minecraft.sh"];

const BASE_PACKAGES: [&str; 3] = [
    "yum update -y",
    "yum -y install docker",
    "service docker start",
];

/// Rendering options for [`BootstrapSynthesizer`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BootstrapOptions {
    /// Directory the payload is written beneath.
    pub install_root: String,
    /// Environment variable exported with the bucket name.
    pub bucket_env_var: String,
    /// Directory under the install root holding the trailer scripts.
    pub script_dir: String,
    /// Emit `set -euo pipefail` so a failing step stops the bootstrap.
    pub halt_on_step_failure: bool,
}

impl Default for BootstrapOptions {
    fn default() -> Self {
        Self {
            install_root: DEFAULT_INSTALL_ROOT.to_owned(),
            bucket_env_var: DEFAULT_BUCKET_ENV_VAR.to_owned(),
            script_dir: DEFAULT_SCRIPT_DIR.to_owned(),
            halt_on_step_failure: false,
        }
    }
}

/// Immutable, rendered bootstrap script.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct BootstrapScript(String);

impl BootstrapScript {
    /// Script text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    /// Length of the script in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the script is empty. Never true for synthesized scripts.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Lowercase hex SHA-256 of the script text.
    #[must_use]
    pub fn digest(&self) -> String {
        digest(&self.0)
    }

    /// Consumes the script, returning the text.
    #[must_use]
    pub fn into_string(self) -> String {
        self.0
    }
}

impl AsRef<str> for BootstrapScript {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl fmt::Display for BootstrapScript {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lowercase hex SHA-256 of `text`.
#[must_use]
pub fn digest(text: &str) -> String {
    format!("{:x}", Sha256::digest(text.as_bytes()))
}

/// Renders [`BootstrapScript`]s.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct BootstrapSynthesizer {
    options: BootstrapOptions,
}

impl BootstrapSynthesizer {
    /// Creates a synthesizer with the given options.
    #[must_use]
    pub const fn new(options: BootstrapOptions) -> Self {
        Self { options }
    }

    /// Renders the bootstrap script for `bucket` and the payload `files`.
    #[must_use]
    pub fn synthesize(&self, bucket: &str, files: &FileTree) -> BootstrapScript {
        let mut script = String::new();
        self.push_preamble(&mut script, bucket);
        for (path, content) in files {
            self.push_file(&mut script, path, content);
        }
        self.push_trailer(&mut script);

        let rendered = BootstrapScript(script);
        debug!(
            bucket,
            files = files.len(),
            bytes = rendered.len(),
            sha256 = %rendered.digest(),
            "synthesized bootstrap script"
        );
        rendered
    }

    fn push_preamble(&self, script: &mut String, bucket: &str) {
        script.push_str("#!/bin/bash\n");
        if self.options.halt_on_step_failure {
            script.push_str("set -euo pipefail\n");
        }
        script.push('\n');
        push_echo(script, "Initializing..");
        push_echo(
            script,
            &format!("Setting main Minecraft S3 bucket to: {bucket}"),
        );
        script.push('\n');
        script.push_str(&format!(
            "export {}={}\n\n",
            shell_word(&self.options.bucket_env_var),
            quote(bucket)
        ));
        for command in BASE_PACKAGES {
            script.push_str(command);
            script.push('\n');
        }
    }

    fn push_file(&self, script: &mut String, path: &str, content: &[u8]) {
        let target_dir = parent_of(path).map_or_else(
            || self.install_root().to_owned(),
            |parent| self.install_path(parent),
        );

        script.push('\n');
        push_echo(script, &format!("Writing script: {path}"));
        script.push_str(&format!("mkdir -p {}\n", quote(&target_dir)));
        script.push_str(&format!(
            "echo '{}' | base64 -d > {}\n",
            STANDARD.encode(content),
            quote(&self.install_path(path))
        ));
    }

    fn push_trailer(&self, script: &mut String) {
        script.push('\n');
        for name in TRAILER_SCRIPTS {
            let path = self.install_path(&format!("{}/{name}", self.options.script_dir));
            script.push_str(&format!("bash {}\n", quote(&path)));
        }
    }

    fn install_root(&self) -> &str {
        self.options.install_root.trim_end_matches('/')
    }

    fn install_path(&self, relative: &str) -> String {
        format!("{}/{relative}", self.install_root())
    }
}

/// Renders the script for `bucket` and `files` with default options.
#[must_use]
pub fn synthesize(bucket: &str, files: &FileTree) -> BootstrapScript {
    BootstrapSynthesizer::default().synthesize(bucket, files)
}

/// Whether `name` is a portable shell variable name.
#[must_use]
pub fn is_shell_word(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|first| first.is_ascii_alphabetic() || first == '_')
        && chars.all(|ch| ch.is_ascii_alphanumeric() || ch == '_')
}

/// Maps `name` onto a shell variable name; every character outside
/// `[A-Za-z0-9_]` becomes `_`.
fn shell_word(name: &str) -> Cow<'_, str> {
    if is_shell_word(name) {
        return Cow::Borrowed(name);
    }
    let mut word: String = name
        .chars()
        .map(|ch| if ch.is_ascii_alphanumeric() { ch } else { '_' })
        .collect();
    if word.chars().next().is_none_or(|first| first.is_ascii_digit()) {
        word.insert(0, '_');
    }
    warn!(requested = name, exported = %word, "bucket variable is not a shell word");
    Cow::Owned(word)
}

fn quote(word: &str) -> Cow<'_, str> {
    escape(Cow::Borrowed(word))
}

fn push_echo(script: &mut String, message: &str) {
    script.push_str(&format!("echo {}\n", quote(message)));
}
