//! Applying plans to a re-rooted host with a mock trust store.

mod common;

use std::fs;
use std::path::Path;

use certdeploy::apply::Applier;
use certdeploy::config::BundleConfig;
use certdeploy::converge::{ConvergencePass, PassOutcome};
use certdeploy::plan::ResourceRef;
use certdeploy::platform::{PlatformId, PlatformPolicy};
use common::{bundles_map, write_source, MockTrustStore, NAME, TRUST_DIR};

fn plan(sources: &Path, platform: &str, bundle: BundleConfig) -> PassOutcome {
    let policy = PlatformPolicy::builtin().with_family("Devuan", common::reconfiguring_family());
    ConvergencePass::new(policy, PlatformId::new(platform), sources.to_string_lossy())
        .run(&bundles_map(&[(NAME, bundle)]))
}

fn with_intermediate() -> BundleConfig {
    BundleConfig {
        install_intermediate: true,
        ..BundleConfig::default()
    }
}

fn seed_sources(sources: &Path) {
    write_source(sources, NAME, "www.website.com.crt", "CERT");
    write_source(sources, NAME, "www.website.com.key", "KEY");
    write_source(sources, NAME, "www.website.com.intermediate.crt", "INTERMEDIATE");
}

fn host(root: &Path, path: &str) -> std::path::PathBuf {
    root.join(path.trim_start_matches('/'))
}

#[test]
fn install_places_files_and_rebuilds_once() {
    let dir = common::temp_dir();
    let sources = dir.path().join("sources");
    let root = dir.path().join("host");
    seed_sources(&sources);

    let store = MockTrustStore::new();
    let outcome = plan(&sources, "Debian", with_intermediate());
    let report = Applier::new(&store).with_root(&root).apply(&outcome.plan).unwrap();

    assert_eq!(fs::read_to_string(host(&root, "/etc/ssl/certs/www.website.com.crt")).unwrap(), "CERT");
    assert_eq!(fs::read_to_string(host(&root, "/etc/ssl/private/www.website.com.key")).unwrap(), "KEY");
    let copy = host(&root, &format!("{TRUST_DIR}/www.website.com.intermediate.crt"));
    assert_eq!(fs::read_to_string(&copy).unwrap(), "INTERMEDIATE");
    assert_eq!(
        fs::read_to_string(host(&root, "/etc/ca-certificates.conf")).unwrap(),
        "certdeploy/www.website.com.intermediate.crt\n"
    );

    assert_eq!(store.calls(), vec!["rebuild: update-ca-certificates"]);
    assert_eq!(report.actions_run, vec![ResourceRef::exec("update-ca-certificates")]);
}

#[cfg(unix)]
#[test]
fn key_mode_applied() {
    use std::os::unix::fs::PermissionsExt;

    let dir = common::temp_dir();
    let sources = dir.path().join("sources");
    let root = dir.path().join("host");
    seed_sources(&sources);

    let store = MockTrustStore::new();
    let outcome = plan(&sources, "Debian", BundleConfig::default());
    Applier::new(&store).with_root(&root).apply(&outcome.plan).unwrap();

    let mode = |p: &str| fs::metadata(host(&root, p)).unwrap().permissions().mode() & 0o777;
    assert_eq!(mode("/etc/ssl/private/www.website.com.key"), 0o600);
    assert_eq!(mode("/etc/ssl/certs/www.website.com.crt"), 0o644);
}

#[test]
fn second_apply_changes_nothing() {
    let dir = common::temp_dir();
    let sources = dir.path().join("sources");
    let root = dir.path().join("host");
    seed_sources(&sources);

    let store = MockTrustStore::new();
    let outcome = plan(&sources, "Debian", with_intermediate());
    let applier = Applier::new(&store).with_root(&root);
    applier.apply(&outcome.plan).unwrap();
    let again = applier.apply(&outcome.plan).unwrap();

    assert!(again.changed.is_empty(), "{:?}", again.changed);
    assert!(again.actions_run.is_empty());
    assert_eq!(store.calls().len(), 1);
}

#[test]
fn uninstall_works_without_sources() {
    let dir = common::temp_dir();
    let sources = dir.path().join("sources");
    let root = dir.path().join("host");
    seed_sources(&sources);

    let store = MockTrustStore::new();
    let applier = Applier::new(&store).with_root(&root);
    applier
        .apply(&plan(&sources, "Debian", with_intermediate()).plan)
        .unwrap();

    fs::remove_dir_all(&sources).unwrap();
    let report = applier
        .apply(&plan(&sources, "Debian", BundleConfig::uninstall()).plan)
        .unwrap();

    assert!(!host(&root, "/etc/ssl/certs/www.website.com.crt").exists());
    assert!(!host(&root, "/etc/ssl/private/www.website.com.key").exists());
    assert!(!host(&root, &format!("{TRUST_DIR}/www.website.com.intermediate.crt")).exists());
    assert_eq!(fs::read_to_string(host(&root, "/etc/ca-certificates.conf")).unwrap(), "");
    assert!(report.is_changed(&ResourceRef::line(
        "/etc/ca-certificates.conf",
        "certdeploy/www.website.com.intermediate.crt"
    )));
    assert_eq!(store.calls().len(), 2);
}

#[test]
fn no_trust_change_no_rebuild() {
    let dir = common::temp_dir();
    let sources = dir.path().join("sources");
    let root = dir.path().join("host");
    seed_sources(&sources);

    let store = MockTrustStore::new();
    let outcome = plan(&sources, "Debian", BundleConfig::default());
    assert!(!outcome.plan.actions.is_empty());
    let report = Applier::new(&store).with_root(&root).apply(&outcome.plan).unwrap();

    assert!(report.is_changed(&ResourceRef::file("/etc/ssl/certs/www.website.com.crt")));
    assert!(report.actions_run.is_empty());
    assert!(store.calls().is_empty());
}

#[test]
fn reconfigure_runs_before_rebuild() {
    let dir = common::temp_dir();
    let sources = dir.path().join("sources");
    let root = dir.path().join("host");
    seed_sources(&sources);

    let store = MockTrustStore::new();
    let outcome = plan(&sources, "Devuan", with_intermediate());
    Applier::new(&store).with_root(&root).apply(&outcome.plan).unwrap();

    assert_eq!(
        store.calls(),
        vec![
            "reconfigure: dpkg-reconfigure -fnoninteractive ca-certificates",
            "rebuild: update-ca-certificates",
        ]
    );
}

#[test]
fn dry_run_touches_nothing() {
    let dir = common::temp_dir();
    let sources = dir.path().join("sources");
    let root = dir.path().join("host");
    seed_sources(&sources);

    let store = MockTrustStore::new();
    let outcome = plan(&sources, "Debian", with_intermediate());
    let report = Applier::new(&store)
        .with_root(&root)
        .dry_run(true)
        .apply(&outcome.plan)
        .unwrap();

    assert!(report.is_changed(&ResourceRef::file("/etc/ssl/certs/www.website.com.crt")));
    assert_eq!(report.actions_run.len(), 1);
    assert!(store.calls().is_empty());
    assert!(!root.exists());
}

#[test]
fn missing_source_fails_install() {
    let dir = common::temp_dir();
    let sources = dir.path().join("sources");
    let root = dir.path().join("host");

    let store = MockTrustStore::new();
    let outcome = plan(&sources, "Debian", BundleConfig::default());
    let err = Applier::new(&store)
        .with_root(&root)
        .apply(&outcome.plan)
        .unwrap_err();
    assert!(format!("{err:#}").contains("read source"), "{err:#}");
}

#[test]
fn failed_bundle_does_not_block_rebuild_for_others() {
    let dir = common::temp_dir();
    let sources = dir.path().join("sources");
    let root = dir.path().join("host");
    write_source(&sources, "a.example.com", "a.example.com.crt", "A");
    write_source(&sources, "a.example.com", "a.example.com.key", "AK");
    write_source(&sources, "a.example.com", "a.example.com.intermediate.crt", "AI");

    let outcome = ConvergencePass::new(
        PlatformPolicy::builtin(),
        PlatformId::new("Debian"),
        sources.to_string_lossy(),
    )
    .run(&bundles_map(&[
        ("a.example.com", with_intermediate()),
        ("b.example.com", with_intermediate()),
    ]));
    let store = MockTrustStore::new();
    let applier = Applier::new(&store).with_root(&root);

    let err = applier.apply(&outcome.plan).unwrap_err();
    assert!(format!("{err:#}").contains("read source"), "{err:#}");

    // a is fully in place and the trust store was rebuilt for it.
    assert_eq!(fs::read_to_string(host(&root, "/etc/ssl/certs/a.example.com.crt")).unwrap(), "A");
    assert_eq!(
        fs::read_to_string(host(&root, "/etc/ca-certificates.conf")).unwrap(),
        "certdeploy/a.example.com.intermediate.crt\n"
    );
    assert_eq!(store.calls(), vec!["rebuild: update-ca-certificates"]);

    // b's list entry depends on its missing copy and was never written.
    assert!(!host(&root, &format!("{TRUST_DIR}/b.example.com.intermediate.crt")).exists());

    write_source(&sources, "b.example.com", "b.example.com.crt", "B");
    write_source(&sources, "b.example.com", "b.example.com.key", "BK");
    write_source(&sources, "b.example.com", "b.example.com.intermediate.crt", "BI");
    let report = applier.apply(&outcome.plan).unwrap();

    assert!(report.is_changed(&ResourceRef::line(
        "/etc/ca-certificates.conf",
        "certdeploy/b.example.com.intermediate.crt"
    )));
    assert!(!report.is_changed(&ResourceRef::file("/etc/ssl/certs/a.example.com.crt")));
    assert_eq!(store.calls().len(), 2);
}

#[test]
fn dependents_of_a_failure_are_skipped() {
    let dir = common::temp_dir();
    let sources = dir.path().join("sources");
    let root = dir.path().join("host");

    let store = MockTrustStore::new();
    let outcome = plan(&sources, "Debian", with_intermediate());
    let err = Applier::new(&store)
        .with_root(&root)
        .apply(&outcome.plan)
        .unwrap_err();

    assert!(format!("{err:#}").contains("errors during apply"), "{err:#}");
    // The list line requires the registered copy, whose source is missing.
    assert!(!host(&root, "/etc/ca-certificates.conf").exists());
    assert!(host(&root, TRUST_DIR).is_dir());
    assert!(store.calls().is_empty());
}
