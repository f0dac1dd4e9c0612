//! Access manifest (C1): the policy blob handed to every pip, named by the
//! `BXL_FAM_PATH` environment variable (§4.1, §6).
//!
//! The wire format is a length-prefixed `bincode` encoding of
//! [`ManifestWire`]. spec.md leaves the blob format opaque to this crate;
//! DESIGN.md records the decision to make it concrete with `bincode` so the
//! manifest can round-trip through `serde` the same way the rest of this
//! lineage's trace headers do.

use std::collections::HashSet;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ObserverError;

pub const FAM_PATH_ENV: &str = "BXL_FAM_PATH";
pub const DETOURS_PATH_ENV: &str = "BXL_DETOURS_PATH";
pub const ROOT_PID_ENV: &str = "BXL_ROOT_PID";
pub const PTRACE_MQ_NAME_ENV: &str = "BXL_PTRACE_MQ_NAME";
pub const PTRACE_FORCED_ENV: &str = "BXL_PTRACE_FORCED";
pub const LD_PRELOAD_ENV: &str = "LD_PRELOAD";

bitflags::bitflags! {
    /// Process-tree-wide behavior switches (§3 `AccessManifest.flags`).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub struct ManifestFlags: u32 {
        const MONITOR_CHILDREN        = 1 << 0;
        const PTRACE_ENABLED          = 1 << 1;
        const PTRACE_UNCONDITIONAL    = 1 << 2;
        const FAIL_ON_UNEXPECTED      = 1 << 3;
        const REPORT_FILE_ACCESSES_ONLY = 1 << 4;
    }
}

/// Per-scope access policy, the leaf value of the manifest's prefix trie
/// (§3 `ScopePolicy`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopePolicy {
    pub allow_read: bool,
    pub allow_write: bool,
    pub allow_probe: bool,
    pub report_explicitly: bool,
    pub is_writeable_mount: bool,
}

impl ScopePolicy {
    /// The conservative default applied when no scope in the trie prefixes
    /// a path: read and probe only, always reported, so unexpected
    /// accesses are visible to the supervisor rather than silently denied.
    pub const fn fallback() -> Self {
        ScopePolicy {
            allow_read: true,
            allow_write: false,
            allow_probe: true,
            report_explicitly: true,
            is_writeable_mount: false,
        }
    }
}

/// One node of the policy trie, keyed by path component.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct ScopeNode {
    policy: Option<ScopePolicy>,
    children: std::collections::BTreeMap<String, ScopeNode>,
}

/// Prefix-trie over absolute paths (§3 `policyTree`). Lookup returns the
/// policy of the deepest prefixing scope, per §4.5 step 1.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PolicyTrie {
    root: ScopeNode,
}

impl PolicyTrie {
    pub fn new() -> Self {
        PolicyTrie::default()
    }

    /// Inserts a scope for `path` (must be absolute, already normalized).
    pub fn insert(&mut self, path: &str, policy: ScopePolicy) {
        let mut node = &mut self.root;
        for component in path.split('/').filter(|c| !c.is_empty()) {
            node = node.children.entry(component.to_string()).or_default();
        }
        node.policy = Some(policy);
    }

    /// Walks `path` component by component, remembering the last scope
    /// that had a policy attached, returning it (or the process-wide
    /// fallback if none matched).
    pub fn lookup(&self, path: &str) -> ScopePolicy {
        let mut node = &self.root;
        let mut deepest = node.policy;
        for component in path.split('/').filter(|c| !c.is_empty()) {
            match node.children.get(component) {
                Some(child) => {
                    node = child;
                    if node.policy.is_some() {
                        deepest = node.policy;
                    }
                }
                None => break,
            }
        }
        deepest.unwrap_or_else(ScopePolicy::fallback)
    }
}

/// The `bincode`-encoded wire struct carried in the manifest file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestWire {
    pub pip_id: u64,
    pub pid_of_root_process: i32,
    pub report_pipe_path: String,
    pub preload_library_path: String,
    pub flags: ManifestFlags,
    pub scopes: Vec<(String, ScopePolicy)>,
    pub forced_ptrace_names: Vec<String>,
    pub ptrace_mq_name: Option<String>,
}

/// The parsed, immutable-after-load manifest (§3 `AccessManifest`).
#[derive(Debug, Clone)]
pub struct AccessManifest {
    pub pip_id: u64,
    pub pid_of_root_process: i32,
    pub report_pipe_path: PathBuf,
    pub preload_library_path: PathBuf,
    pub flags: ManifestFlags,
    policy_tree: PolicyTrie,
    forced_ptrace_names: HashSet<String>,
    pub ptrace_mq_name: Option<String>,
}

impl AccessManifest {
    /// Parses the blob at `path`. Any failure here is a Fatal configuration
    /// error (§4.1, §7): a child running without a manifest would produce
    /// no reports and silently corrupt the build's cache.
    pub fn load(path: &Path) -> Result<Self, ObserverError> {
        let bytes = fs::read(path).map_err(|source| ObserverError::ManifestIo {
            path: path.to_path_buf(),
            source,
        })?;
        let wire: ManifestWire =
            bincode::deserialize(&bytes).map_err(|source| ObserverError::ManifestDecode {
                path: path.to_path_buf(),
                source,
            })?;

        let mut policy_tree = PolicyTrie::new();
        for (scope_path, policy) in wire.scopes {
            policy_tree.insert(&scope_path, policy);
        }

        Ok(AccessManifest {
            pip_id: wire.pip_id,
            pid_of_root_process: wire.pid_of_root_process,
            report_pipe_path: PathBuf::from(wire.report_pipe_path),
            preload_library_path: PathBuf::from(wire.preload_library_path),
            flags: wire.flags,
            policy_tree,
            forced_ptrace_names: wire.forced_ptrace_names.into_iter().collect(),
            ptrace_mq_name: wire.ptrace_mq_name,
        })
    }

    /// Reads `BXL_FAM_PATH` and loads the manifest it names.
    pub fn load_from_env() -> Result<Self, ObserverError> {
        let path = env::var(FAM_PATH_ENV).map_err(|_| ObserverError::MissingEnvVar(FAM_PATH_ENV))?;
        Self::load(Path::new(&path))
    }

    pub fn lookup(&self, absolute_path: &str) -> ScopePolicy {
        self.policy_tree.lookup(absolute_path)
    }

    pub fn is_monitoring_children(&self) -> bool {
        self.flags.contains(ManifestFlags::MONITOR_CHILDREN)
    }

    pub fn is_ptrace_enabled(&self) -> bool {
        self.flags.contains(ManifestFlags::PTRACE_ENABLED)
    }

    pub fn is_ptrace_unconditional(&self) -> bool {
        self.flags.contains(ManifestFlags::PTRACE_UNCONDITIONAL)
    }

    pub fn fail_on_unexpected_access(&self) -> bool {
        self.flags.contains(ManifestFlags::FAIL_ON_UNEXPECTED)
    }

    pub fn report_file_accesses_only(&self) -> bool {
        self.flags.contains(ManifestFlags::REPORT_FILE_ACCESSES_ONLY)
    }

    pub fn should_force_ptrace(&self, basename: &str) -> bool {
        self.forced_ptrace_names.contains(basename)
    }

    pub fn forced_ptrace_names(&self) -> impl Iterator<Item = &str> {
        self.forced_ptrace_names.iter().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_wire() -> ManifestWire {
        ManifestWire {
            pip_id: 42,
            pid_of_root_process: 100,
            report_pipe_path: "/tmp/fam.pipe".into(),
            preload_library_path: "/opt/fam/libfam_observer.so".into(),
            flags: ManifestFlags::MONITOR_CHILDREN | ManifestFlags::PTRACE_ENABLED,
            scopes: vec![
                (
                    "/out".into(),
                    ScopePolicy {
                        allow_read: true,
                        allow_write: true,
                        allow_probe: true,
                        report_explicitly: true,
                        is_writeable_mount: true,
                    },
                ),
                (
                    "/etc".into(),
                    ScopePolicy {
                        allow_read: true,
                        allow_write: false,
                        allow_probe: true,
                        report_explicitly: false,
                        is_writeable_mount: false,
                    },
                ),
            ],
            forced_ptrace_names: vec!["static_tool".into()],
            ptrace_mq_name: Some("/bxl-ptrace".into()),
        }
    }

    #[test]
    fn round_trips_through_bincode() {
        let wire = sample_wire();
        let bytes = bincode::serialize(&wire).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("manifest.bin");
        fs::write(&path, &bytes).unwrap();

        let manifest = AccessManifest::load(&path).unwrap();
        assert_eq!(manifest.pip_id, 42);
        assert!(manifest.is_monitoring_children());
        assert!(manifest.is_ptrace_enabled());
        assert!(!manifest.is_ptrace_unconditional());
    }

    #[test]
    fn lookup_returns_deepest_prefixing_scope() {
        let wire = sample_wire();
        let bytes = bincode::serialize(&wire).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("manifest.bin");
        fs::write(&path, &bytes).unwrap();
        let manifest = AccessManifest::load(&path).unwrap();

        let out_policy = manifest.lookup("/out/bin/tool");
        assert!(out_policy.allow_write);
        assert!(out_policy.is_writeable_mount);

        let etc_policy = manifest.lookup("/etc/hosts");
        assert!(etc_policy.allow_read);
        assert!(!etc_policy.allow_write);

        // No scope prefixes /home, so the conservative fallback applies.
        let fallback = manifest.lookup("/home/user/file");
        assert_eq!(fallback, ScopePolicy::fallback());
    }

    #[test]
    fn should_force_ptrace_checks_basename_set() {
        let wire = sample_wire();
        let bytes = bincode::serialize(&wire).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("manifest.bin");
        fs::write(&path, &bytes).unwrap();
        let manifest = AccessManifest::load(&path).unwrap();

        assert!(manifest.should_force_ptrace("static_tool"));
        assert!(!manifest.should_force_ptrace("dynamic_tool"));
    }

    #[test]
    fn missing_env_var_is_reported_as_missing() {
        // Guard against state leaking from a parallel test run in this process.
        std::env::remove_var(FAM_PATH_ENV);
        let result = AccessManifest::load_from_env();
        assert!(matches!(result, Err(ObserverError::MissingEnvVar(FAM_PATH_ENV))));
    }
}
