//! Uninstall: every slot absent, trust store still refreshed.

mod common;

use certdeploy::config::BundleConfig;
use certdeploy::plan::{ActionKind, EdgeKind, Ensure, ResourceRef};
use common::{plan_one, LIST_FILE, REBUILD, TRUST_DIR};

#[test]
fn all_slots_absent() {
    let outcome = plan_one(BundleConfig::uninstall());
    let plan = &outcome.plan;

    for path in [
        "/etc/ssl/certs/www.website.com.crt".to_string(),
        "/etc/ssl/private/www.website.com.key".to_string(),
        "/etc/ssl/certs/www.website.com.pem".to_string(),
        format!("{TRUST_DIR}/www.website.com.intermediate.crt"),
        format!("{TRUST_DIR}/www.website.com.ca.crt"),
    ] {
        let op = plan.file(&path).unwrap_or_else(|| panic!("no operation for {path}"));
        assert_eq!(op.ensure, Ensure::Absent, "{path}");
        assert!(op.source.is_none(), "{path}");
    }
    assert!(outcome.entries.is_empty());
}

#[test]
fn uninstall_notifies_rebuild() {
    let outcome = plan_one(BundleConfig::uninstall());
    let plan = &outcome.plan;
    let rebuild = ResourceRef::exec(REBUILD);

    for slot in ["intermediate", "ca"] {
        let copy = ResourceRef::file(format!("{TRUST_DIR}/www.website.com.{slot}.crt"));
        let line = ResourceRef::line(LIST_FILE, format!("certdeploy/www.website.com.{slot}.crt"));
        assert!(plan.has_edge(&copy, &rebuild, EdgeKind::Notifies), "{slot} copy");
        assert!(plan.has_edge(&line, &rebuild, EdgeKind::Notifies), "{slot} line");
        assert_eq!(plan.operation(&line).unwrap().ensure, Ensure::Absent);
        // The list entry goes before the file it names.
        assert!(plan.has_edge(&copy, &line, EdgeKind::Requires), "{slot} order");
    }
    assert_eq!(plan.action(ActionKind::Rebuild).unwrap().resource, rebuild);
}

#[test]
fn enable_then_disable_flips_same_paths() {
    let mut bundle = BundleConfig {
        install_pem: true,
        install_intermediate: true,
        install_ca: true,
        ..BundleConfig::default()
    };
    let installed = plan_one(bundle.clone());

    bundle = BundleConfig {
        install_cert: false,
        install_key: false,
        install_pem: false,
        install_intermediate: false,
        install_ca: false,
        ..bundle
    };
    let removed = plan_one(bundle);

    let installed_files: Vec<_> = installed.plan.operations.iter().map(|op| &op.resource).collect();
    let removed_files: Vec<_> = removed.plan.operations.iter().map(|op| &op.resource).collect();
    assert_eq!(installed_files, removed_files);

    for op in &removed.plan.operations {
        if op.certificate.is_some() {
            assert_eq!(op.ensure, Ensure::Absent, "{}", op.resource);
            assert!(op.source.is_none(), "{}", op.resource);
        }
    }
}
