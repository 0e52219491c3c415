//! Integration tests for the two-pass analyzer, exercising real manifest
//! trees on disk rather than hand-built `RawScriptConfig`s, since the thing
//! actually worth testing here is how `raw::walk`, `cycles::detect`, and
//! `validate` cooperate across real file I/O.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use crate::error::DiagnosticKind;
use crate::manifest::ManifestReader;
use crate::reference::ScriptReference;

use super::Analyzer;

fn write_manifest(dir: &Path, contents: &str) {
    fs::create_dir_all(dir).unwrap();
    fs::write(dir.join("package.json"), contents).unwrap();
}

fn analyzer() -> Analyzer {
    Analyzer::new(Arc::new(ManifestReader::new()))
}

#[test]
fn single_script_with_no_dependencies_analyzes_cleanly() {
    let tmp = tempfile::tempdir().unwrap();
    write_manifest(
        tmp.path(),
        r#"{"scripts": {"build": "wireit"}, "wireit": {"build": {"command": "tsc", "files": ["a.ts"]}}}"#,
    );

    let report = analyzer()
        .analyze(ScriptReference::new(tmp.path(), "build"), Vec::new())
        .unwrap();

    assert_eq!(report.root.command.as_deref(), Some("tsc"));
    assert!(report.root.dependencies.is_empty());
    assert!(report.warnings.is_empty());
    assert!(report
        .root
        .files
        .as_ref()
        .unwrap()
        .iter()
        .any(|g| g.pattern == "a.ts"));
}

#[test]
fn dependencies_are_sorted_by_package_dir_then_name() {
    let tmp = tempfile::tempdir().unwrap();
    write_manifest(
        tmp.path(),
        r#"{
            "scripts": {"all": "wireit", "zeta": "wireit", "alpha": "wireit"},
            "wireit": {
                "all": {"dependencies": ["zeta", "alpha"]},
                "zeta": {"command": "echo zeta"},
                "alpha": {"command": "echo alpha"}
            }
        }"#,
    );

    let report = analyzer()
        .analyze(ScriptReference::new(tmp.path(), "all"), Vec::new())
        .unwrap();

    let names: Vec<&str> = report
        .root
        .dependencies
        .iter()
        .map(|d| d.config.reference.script_name())
        .collect();
    assert_eq!(names, vec!["alpha", "zeta"]);
}

#[test]
fn direct_cycle_is_rejected_with_every_hop_named() {
    let tmp = tempfile::tempdir().unwrap();
    write_manifest(
        tmp.path(),
        r#"{
            "scripts": {"a": "wireit", "b": "wireit"},
            "wireit": {
                "a": {"command": "x", "dependencies": ["b"]},
                "b": {"command": "y", "dependencies": ["a"]}
            }
        }"#,
    );

    let diags = analyzer()
        .analyze(ScriptReference::new(tmp.path(), "a"), Vec::new())
        .unwrap_err();

    assert_eq!(diags.len(), 1);
    assert_eq!(diags[0].kind, DiagnosticKind::Cycle);
    assert!(diags[0].message.contains('a') && diags[0].message.contains('b'));
}

#[test]
fn self_dependency_is_a_cycle_of_one() {
    let tmp = tempfile::tempdir().unwrap();
    write_manifest(
        tmp.path(),
        r#"{
            "scripts": {"a": "wireit"},
            "wireit": {"a": {"command": "x", "dependencies": ["a"]}}
        }"#,
    );

    let diags = analyzer()
        .analyze(ScriptReference::new(tmp.path(), "a"), Vec::new())
        .unwrap_err();

    assert_eq!(diags[0].kind, DiagnosticKind::Cycle);
}

#[test]
fn duplicate_dependency_is_rejected() {
    let tmp = tempfile::tempdir().unwrap();
    write_manifest(
        tmp.path(),
        r#"{
            "scripts": {"all": "wireit", "a": "wireit"},
            "wireit": {
                "all": {"dependencies": ["a", "a"]},
                "a": {"command": "echo a"}
            }
        }"#,
    );

    let diags = analyzer()
        .analyze(ScriptReference::new(tmp.path(), "all"), Vec::new())
        .unwrap_err();

    assert!(diags.iter().any(|d| d.kind == DiagnosticKind::DuplicateDependency));
}

#[test]
fn cross_package_dependency_resolves_into_the_other_manifest() {
    let tmp = tempfile::tempdir().unwrap();
    let root_dir = tmp.path().join("root");
    let other_dir = tmp.path().join("other");
    write_manifest(
        &root_dir,
        r#"{"scripts": {"build": "wireit"}, "wireit": {"build": {"dependencies": ["../other:compile"]}}}"#,
    );
    write_manifest(
        &other_dir,
        r#"{"scripts": {"compile": "wireit"}, "wireit": {"compile": {"command": "echo compiling"}}}"#,
    );

    let report = analyzer()
        .analyze(ScriptReference::new(&root_dir, "build"), Vec::new())
        .unwrap();

    assert_eq!(report.root.dependencies.len(), 1);
    let dep = &report.root.dependencies[0];
    assert_eq!(dep.config.reference.script_name(), "compile");
    assert_eq!(dep.config.command.as_deref(), Some("echo compiling"));
}

#[test]
fn cross_package_dependency_on_missing_manifest_is_reported() {
    let tmp = tempfile::tempdir().unwrap();
    let root_dir = tmp.path().join("root");
    write_manifest(
        &root_dir,
        r#"{"scripts": {"build": "wireit"}, "wireit": {"build": {"dependencies": ["../nope:compile"]}}}"#,
    );

    let diags = analyzer()
        .analyze(ScriptReference::new(&root_dir, "build"), Vec::new())
        .unwrap_err();

    assert!(diags
        .iter()
        .any(|d| d.kind == DiagnosticKind::DependencyOnMissingPackageJson));
}

#[test]
fn dependency_on_script_missing_from_target_manifest_is_reported() {
    let tmp = tempfile::tempdir().unwrap();
    let root_dir = tmp.path().join("root");
    let other_dir = tmp.path().join("other");
    write_manifest(
        &root_dir,
        r#"{"scripts": {"build": "wireit"}, "wireit": {"build": {"dependencies": ["../other:nonexistent"]}}}"#,
    );
    write_manifest(&other_dir, r#"{"scripts": {"compile": "wireit"}}"#);

    let diags = analyzer()
        .analyze(ScriptReference::new(&root_dir, "build"), Vec::new())
        .unwrap_err();

    assert!(diags
        .iter()
        .any(|d| d.kind == DiagnosticKind::DependencyOnMissingScript));
}

#[test]
fn cross_package_dependency_resolving_to_own_package_is_rejected() {
    let tmp = tempfile::tempdir().unwrap();
    write_manifest(
        tmp.path(),
        r#"{"scripts": {"build": "wireit"}, "wireit": {"build": {"dependencies": ["./:build"]}}}"#,
    );

    let diags = analyzer()
        .analyze(ScriptReference::new(tmp.path(), "build"), Vec::new())
        .unwrap_err();

    assert_eq!(diags[0].kind, DiagnosticKind::InvalidConfigSyntax);
}

#[test]
fn wireit_config_but_command_not_literal_wireit_is_a_warning_not_an_error() {
    let tmp = tempfile::tempdir().unwrap();
    write_manifest(
        tmp.path(),
        r#"{"scripts": {"build": "tsc --build"}, "wireit": {"build": {"command": "tsc"}}}"#,
    );

    let report = analyzer()
        .analyze(ScriptReference::new(tmp.path(), "build"), Vec::new())
        .unwrap();

    assert!(report
        .warnings
        .iter()
        .any(|w| w.kind == DiagnosticKind::ScriptNotWireit));
}

#[test]
fn invalid_clean_value_is_rejected() {
    let tmp = tempfile::tempdir().unwrap();
    write_manifest(
        tmp.path(),
        r#"{"scripts": {"build": "wireit"}, "wireit": {"build": {"command": "x", "clean": "sometimes"}}}"#,
    );

    let diags = analyzer()
        .analyze(ScriptReference::new(tmp.path(), "build"), Vec::new())
        .unwrap_err();

    assert_eq!(diags[0].kind, DiagnosticKind::InvalidConfigSyntax);
}

#[test]
fn config_with_neither_command_nor_dependencies_is_rejected() {
    let tmp = tempfile::tempdir().unwrap();
    write_manifest(
        tmp.path(),
        r#"{"scripts": {"build": "wireit"}, "wireit": {"build": {}}}"#,
    );

    let diags = analyzer()
        .analyze(ScriptReference::new(tmp.path(), "build"), Vec::new())
        .unwrap_err();

    assert_eq!(diags[0].kind, DiagnosticKind::InvalidConfigSyntax);
}

#[test]
fn package_lock_in_an_ancestor_directory_is_an_implicit_input() {
    let tmp = tempfile::tempdir().unwrap();
    fs::write(tmp.path().join("package-lock.json"), "{}").unwrap();
    let pkg_dir = tmp.path().join("packages").join("app");
    write_manifest(
        &pkg_dir,
        r#"{"scripts": {"build": "wireit"}, "wireit": {"build": {"command": "x", "files": ["a.ts"]}}}"#,
    );

    let report = analyzer()
        .analyze(ScriptReference::new(&pkg_dir, "build"), Vec::new())
        .unwrap();

    let files = report.root.files.as_ref().unwrap();
    assert!(files.iter().any(|g| g.pattern == "a.ts"));
    assert!(files
        .iter()
        .any(|g| g.pattern.ends_with("package-lock.json")));
}

#[test]
fn empty_package_locks_array_disables_ancestor_expansion() {
    let tmp = tempfile::tempdir().unwrap();
    fs::write(tmp.path().join("package-lock.json"), "{}").unwrap();
    let pkg_dir = tmp.path().join("packages").join("app");
    write_manifest(
        &pkg_dir,
        r#"{"scripts": {"build": "wireit"}, "wireit": {"build": {"command": "x", "files": ["a.ts"], "packageLocks": []}}}"#,
    );

    let report = analyzer()
        .analyze(ScriptReference::new(&pkg_dir, "build"), Vec::new())
        .unwrap();

    let files = report.root.files.as_ref().unwrap();
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].pattern, "a.ts");
}

#[test]
fn missing_manifest_for_the_root_script_is_reported() {
    let tmp = tempfile::tempdir().unwrap();
    let diags = analyzer()
        .analyze(ScriptReference::new(tmp.path(), "build"), Vec::new())
        .unwrap_err();
    assert_eq!(diags[0].kind, DiagnosticKind::MissingPackageJson);
}

#[test]
fn script_not_found_in_scripts_table_is_reported() {
    let tmp = tempfile::tempdir().unwrap();
    write_manifest(tmp.path(), r#"{"scripts": {"other": "echo hi"}}"#);
    let diags = analyzer()
        .analyze(ScriptReference::new(tmp.path(), "build"), Vec::new())
        .unwrap_err();
    assert_eq!(diags[0].kind, DiagnosticKind::ScriptNotFound);
}

#[test]
fn script_without_a_wireit_section_is_reported() {
    let tmp = tempfile::tempdir().unwrap();
    write_manifest(tmp.path(), r#"{"scripts": {"build": "tsc"}}"#);
    let diags = analyzer()
        .analyze(ScriptReference::new(tmp.path(), "build"), Vec::new())
        .unwrap_err();
    assert_eq!(diags[0].kind, DiagnosticKind::ScriptNotWireit);
}

#[test]
fn wireit_config_without_matching_script_entry_is_reported() {
    let tmp = tempfile::tempdir().unwrap();
    write_manifest(
        tmp.path(),
        r#"{"scripts": {"other": "echo hi"}, "wireit": {"build": {"command": "x"}}}"#,
    );
    let diags = analyzer()
        .analyze(ScriptReference::new(tmp.path(), "build"), Vec::new())
        .unwrap_err();
    assert_eq!(diags[0].kind, DiagnosticKind::WireitConfigButNoScript);
}

#[test]
fn no_command_grouper_aggregates_its_dependencies() {
    let tmp = tempfile::tempdir().unwrap();
    write_manifest(
        tmp.path(),
        r#"{
            "scripts": {"all": "wireit", "build": "wireit", "test": "wireit"},
            "wireit": {
                "all": {"dependencies": ["build", "test"]},
                "build": {"command": "echo build"},
                "test": {"command": "echo test"}
            }
        }"#,
    );

    let report = analyzer()
        .analyze(ScriptReference::new(tmp.path(), "all"), Vec::new())
        .unwrap();

    assert!(report.root.command.is_none());
    assert_eq!(report.root.dependencies.len(), 2);
    assert!(matches!(report.root.kind, crate::config::ScriptKind::NoCommand));
}

#[test]
fn manifest_files_collects_every_manifest_touched() {
    let tmp = tempfile::tempdir().unwrap();
    let root_dir = tmp.path().join("root");
    let other_dir = tmp.path().join("other");
    write_manifest(
        &root_dir,
        r#"{"scripts": {"build": "wireit"}, "wireit": {"build": {"dependencies": ["../other:compile"]}}}"#,
    );
    write_manifest(
        &other_dir,
        r#"{"scripts": {"compile": "wireit"}, "wireit": {"compile": {"command": "echo compiling"}}}"#,
    );

    let report = analyzer()
        .analyze(ScriptReference::new(&root_dir, "build"), Vec::new())
        .unwrap();

    assert_eq!(report.manifest_files.len(), 2);
}

#[test]
fn service_with_ready_when_pattern_is_validated() {
    let tmp = tempfile::tempdir().unwrap();
    write_manifest(
        tmp.path(),
        r#"{
            "scripts": {"serve": "wireit"},
            "wireit": {
                "serve": {
                    "command": "node server.js",
                    "service": {"readyWhen": {"lineMatches": "listening on port \\d+"}}
                }
            }
        }"#,
    );

    let report = analyzer()
        .analyze(ScriptReference::new(tmp.path(), "serve"), Vec::new())
        .unwrap();

    match &report.root.kind {
        crate::config::ScriptKind::Service { ready_when: Some(rw) } => {
            assert!(rw.line_matches.is_match("listening on port 3000"));
        }
        other => panic!("expected a service with a ready_when pattern, got {other:?}"),
    }
}

#[test]
fn invalid_ready_when_regex_is_rejected() {
    let tmp = tempfile::tempdir().unwrap();
    write_manifest(
        tmp.path(),
        r#"{
            "scripts": {"serve": "wireit"},
            "wireit": {
                "serve": {
                    "command": "node server.js",
                    "service": {"readyWhen": {"lineMatches": "(unclosed"}}
                }
            }
        }"#,
    );

    let diags = analyzer()
        .analyze(ScriptReference::new(tmp.path(), "serve"), Vec::new())
        .unwrap_err();
    assert_eq!(diags[0].kind, DiagnosticKind::InvalidConfigSyntax);
}

#[test]
fn cascade_false_dependency_is_parsed_from_the_object_form() {
    let tmp = tempfile::tempdir().unwrap();
    write_manifest(
        tmp.path(),
        r#"{
            "scripts": {"all": "wireit", "a": "wireit"},
            "wireit": {
                "all": {"dependencies": [{"script": "a", "cascade": false}]},
                "a": {"command": "echo a"}
            }
        }"#,
    );

    let report = analyzer()
        .analyze(ScriptReference::new(tmp.path(), "all"), Vec::new())
        .unwrap();

    assert_eq!(report.root.dependencies.len(), 1);
    assert_eq!(report.root.dependencies[0].cascade.0, false);
}
