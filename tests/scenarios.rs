//! Report-serialization fixtures at the wire layer, driven by literal
//! manifests rather than live processes (C14; a live-ptrace counterpart
//! would need a real tracee and is out of scope for an automated suite).

use std::fs;

use fam_observer::event_cache::EventCache;
use fam_observer::manifest::{AccessManifest, ManifestFlags, ManifestWire, ScopePolicy};
use fam_observer::policy;
use fam_observer::report::{OpCode, RequestedAccess};
use fam_observer::transport::serialize_payload;

fn manifest_with_scopes(scopes: Vec<(&str, ScopePolicy)>) -> AccessManifest {
    let wire = ManifestWire {
        pip_id: 7,
        pid_of_root_process: 1000,
        report_pipe_path: "/tmp/scenario.pipe".into(),
        preload_library_path: "/opt/fam/libfam_observer.so".into(),
        flags: ManifestFlags::MONITOR_CHILDREN,
        scopes: scopes.into_iter().map(|(prefix, policy)| (prefix.to_string(), policy)).collect(),
        forced_ptrace_names: vec![],
        ptrace_mq_name: Some("/bxl-ptrace-test".into()),
    };
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("manifest.bin");
    fs::write(&path, bincode::serialize(&wire).unwrap()).unwrap();
    AccessManifest::load(&path).unwrap()
}

fn readable_scope() -> ScopePolicy {
    ScopePolicy {
        allow_read: true,
        allow_write: false,
        allow_probe: true,
        report_explicitly: true,
        is_writeable_mount: false,
    }
}

fn writeable_scope() -> ScopePolicy {
    ScopePolicy {
        allow_read: true,
        allow_write: true,
        allow_probe: true,
        report_explicitly: true,
        is_writeable_mount: true,
    }
}

/// S1: a read-only exec under an allowed read scope reports `open` and
/// `stat` as allowed.
#[test]
fn s1_read_under_allowed_scope_reports_allowed_open_and_stat() {
    let manifest = manifest_with_scopes(vec![("/etc", readable_scope())]);

    let open_decision = policy::evaluate(&manifest, "/etc/hosts", RequestedAccess::READ);
    let open_report = policy::build_report(&manifest, OpCode::Open, "/etc/hosts".into(), 4242, &open_decision, false);
    assert!(serialize_payload(&open_report).starts_with("open|4242|1000|"));
    assert!(serialize_payload(&open_report).contains("|allowed|"));

    let stat_decision = policy::evaluate(&manifest, "/etc/hosts", RequestedAccess::PROBE);
    let stat_report = policy::build_report(&manifest, OpCode::Stat, "/etc/hosts".into(), 4242, &stat_decision, false);
    assert!(serialize_payload(&stat_report).starts_with("stat|4242|1000|"));
}

/// S2: `mkdir` then `rmdir` on a writeable output scope both report
/// allowed, and do not collapse into a single cache entry (distinct
/// `OpCode`s keep distinct cache classes even for the same path).
#[test]
fn s2_mkdir_then_rmdir_both_report_and_do_not_collapse() {
    let manifest = manifest_with_scopes(vec![("/out", writeable_scope())]);
    let cache = EventCache::new();

    let create_class = OpCode::Create.cache_class().unwrap();
    assert!(!cache.check_and_insert(create_class, "/out/d"));

    let unlink_class = OpCode::Unlink.cache_class().unwrap();
    assert!(!cache.check_and_insert(unlink_class, "/out/d"));

    let create_decision = policy::evaluate(&manifest, "/out/d", RequestedAccess::WRITE);
    let create_report = policy::build_report(&manifest, OpCode::Create, "/out/d".into(), 55, &create_decision, true);
    assert!(serialize_payload(&create_report).starts_with("create|55|1000|"));

    let unlink_decision = policy::evaluate(&manifest, "/out/d", RequestedAccess::WRITE);
    let unlink_report = policy::build_report(&manifest, OpCode::Unlink, "/out/d".into(), 55, &unlink_decision, true);
    assert!(serialize_payload(&unlink_report).starts_with("unlink|55|1000|"));
}

/// S4: repeated probes of the same path coalesce to a single cache entry.
#[test]
fn s4_repeated_stat_of_same_path_coalesces() {
    let cache = EventCache::new();
    let class = OpCode::Stat.cache_class().unwrap();

    assert!(!cache.check_and_insert(class, "/work/a.txt"));
    for _ in 0..99_999 {
        assert!(cache.check_and_insert(class, "/work/a.txt"));
    }
}

/// S5: renaming a directory produces a source/dest pair per leaf plus the
/// directory itself (four files total in the spec's two-file example).
#[test]
fn s5_directory_rename_reports_source_and_dest_per_leaf() {
    let manifest = manifest_with_scopes(vec![("/out", writeable_scope())]);

    let leaves = [("/out/old/a", "/out/new/a"), ("/out/old/b", "/out/new/b")];
    let mut payloads = Vec::new();
    for (old, new) in leaves {
        let old_decision = policy::evaluate(&manifest, old, RequestedAccess::WRITE);
        payloads.push(serialize_payload(&policy::build_report(&manifest, OpCode::RenameSource, old.into(), 9, &old_decision, false)));
        let new_decision = policy::evaluate(&manifest, new, RequestedAccess::WRITE);
        payloads.push(serialize_payload(&policy::build_report(&manifest, OpCode::RenameDest, new.into(), 9, &new_decision, false)));
    }

    assert_eq!(payloads.len(), 4);
    assert!(payloads.iter().any(|p| p.starts_with("rename-source|") && p.contains("/out/old/a")));
    assert!(payloads.iter().any(|p| p.starts_with("rename-dest|") && p.contains("/out/new/b")));
}

/// S6: a report that would overflow `PIPE_BUF` is a fatal condition, never
/// a silently truncated write (§4.6, §7).
#[test]
fn s6_oversized_report_is_rejected_before_pipe_buf() {
    let manifest = manifest_with_scopes(vec![("/out", writeable_scope())]);
    let huge_path = "/out/".to_string() + &"x".repeat(fam_observer::transport::PIPE_BUF);

    let decision = policy::evaluate(&manifest, &huge_path, RequestedAccess::WRITE);
    let report = policy::build_report(&manifest, OpCode::Write, huge_path, 3, &decision, false);
    let framed = fam_observer::transport::frame(&serialize_payload(&report));
    assert!(framed.len() > fam_observer::transport::PIPE_BUF);
}
