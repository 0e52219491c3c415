//! Validation rules applied while upgrading one manifest's `wireit` section
//! into a [`RawScriptConfig`], plus the duplicate-dependency check that runs
//! once the whole flat table has been built (pass 2b).
//!
//! Dependency strings use the same two forms `cargo`'s `Dependency`
//! parses a registry spec into "bare name" vs. "name + source": a plain
//! string names a script in the same manifest; a string beginning with `.`
//! is a path to another package's directory, joined to the script name with
//! a final `:` (`"../other-package:build"`).

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::config::{Cascade, CleanPolicy, GlobPattern, ReadyWhen, ScriptKind};
use crate::error::{Diagnostic, DiagnosticKind, SourcePosition};
use crate::manifest::{Manifest, DEFAULT_PACKAGE_LOCKS};
use crate::reference::ScriptReference;

use super::raw::{RawDependency, RawScriptConfig};

pub(super) fn parse_wireit_config(
    manifest: &Manifest,
    name: &str,
    value: &Value,
) -> Result<RawScriptConfig, Diagnostic> {
    let position = manifest.position();
    let invalid = |message: String| {
        Diagnostic::error(DiagnosticKind::InvalidConfigSyntax, message).at(position.clone())
    };

    let object = value
        .as_object()
        .ok_or_else(|| invalid(format!("wireit config for \"{name}\" must be an object")))?;

    let command = match object.get("command") {
        Some(Value::String(s)) => Some(s.clone()),
        Some(_) => return Err(invalid(format!("\"{name}\".command must be a string"))),
        None => None,
    };

    let dependencies = match object.get("dependencies") {
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| parse_dependency(manifest, name, item, &position))
            .collect::<Result<Vec<_>, _>>()?,
        Some(_) => {
            return Err(invalid(format!(
                "\"{name}\".dependencies must be an array"
            )))
        }
        None => Vec::new(),
    };

    if command.is_none() && dependencies.is_empty() {
        return Err(Diagnostic::error(
            DiagnosticKind::InvalidConfigSyntax,
            format!("\"{name}\" has neither a command nor dependencies"),
        )
        .at(position));
    }

    let files = match object.get("files") {
        Some(Value::Array(items)) => Some(parse_glob_list(items, name, "files", &position)?),
        Some(_) => return Err(invalid(format!("\"{name}\".files must be an array"))),
        None => None,
    };

    let output = match object.get("output") {
        Some(Value::Array(items)) => Some(parse_glob_list(items, name, "output", &position)?),
        Some(_) => return Err(invalid(format!("\"{name}\".output must be an array"))),
        None => None,
    };

    let clean = match object.get("clean") {
        Some(Value::Bool(true)) | None => CleanPolicy::Always,
        Some(Value::Bool(false)) => CleanPolicy::Never,
        Some(Value::String(s)) if s == "if-file-deleted" => CleanPolicy::IfFileDeleted,
        Some(_) => {
            return Err(invalid(format!(
                "\"{name}\".clean must be `true`, `false`, or \"if-file-deleted\""
            )))
        }
    };

    let package_locks = match object.get("packageLocks") {
        Some(Value::Array(items)) => {
            let mut names = Vec::with_capacity(items.len());
            for item in items {
                let s = item.as_str().ok_or_else(|| {
                    invalid(format!("\"{name}\".packageLocks entries must be strings"))
                })?;
                if s.is_empty() || Path::new(s).parent().map_or(false, |p| p != Path::new("")) {
                    return Err(invalid(format!(
                        "\"{name}\".packageLocks entries must be bare file names, not paths: \"{s}\""
                    )));
                }
                names.push(s.to_string());
            }
            names
        }
        Some(_) => {
            return Err(invalid(format!(
                "\"{name}\".packageLocks must be an array of file names"
            )))
        }
        None => DEFAULT_PACKAGE_LOCKS.iter().map(|s| s.to_string()).collect(),
    };

    let files = files.map(|explicit| {
        let mut expanded = explicit;
        expanded.extend(find_ancestor_locks(manifest.package_dir.as_path(), &package_locks));
        expanded
    });

    let env = match object.get("env") {
        Some(Value::Object(map)) => {
            let mut env = BTreeMap::new();
            for (key, val) in map {
                let val = val.as_str().ok_or_else(|| {
                    invalid(format!("\"{name}\".env.{key} must be a string"))
                })?;
                env.insert(key.clone(), val.to_string());
            }
            env
        }
        Some(_) => return Err(invalid(format!("\"{name}\".env must be an object"))),
        None => BTreeMap::new(),
    };

    let kind = match object.get("service") {
        Some(Value::Bool(false)) | None => ScriptKind::OneShot,
        Some(service_value) => {
            if command.is_none() {
                return Err(invalid(format!(
                    "\"{name}\" is a service but has no command"
                )));
            }
            let ready_when = match service_value {
                Value::Bool(true) => None,
                Value::Object(service) => match service.get("readyWhen") {
                    Some(Value::Object(rw)) => match rw.get("lineMatches") {
                        Some(Value::String(pattern)) => {
                            let compiled = regex::Regex::new(pattern).map_err(|e| {
                                invalid(format!(
                                    "\"{name}\".service.readyWhen.lineMatches is not a valid regex: {e}"
                                ))
                            })?;
                            Some(ReadyWhen {
                                line_matches: compiled,
                            })
                        }
                        Some(_) => {
                            return Err(invalid(format!(
                                "\"{name}\".service.readyWhen.lineMatches must be a string"
                            )))
                        }
                        None => None,
                    },
                    Some(_) => {
                        return Err(invalid(format!(
                            "\"{name}\".service.readyWhen must be an object"
                        )))
                    }
                    None => None,
                },
                _ => {
                    return Err(invalid(format!(
                        "\"{name}\".service must be `true` or an object"
                    )))
                }
            };
            ScriptKind::Service { ready_when }
        }
    };

    let kind = if command.is_none() {
        ScriptKind::NoCommand
    } else {
        kind
    };

    Ok(RawScriptConfig {
        reference: ScriptReference::new(manifest.package_dir.clone(), name),
        kind,
        command,
        dependencies,
        declaring_file: manifest.path.clone(),
        files,
        output,
        clean,
        env,
        extra_args: Vec::new(),
        position,
    })
}

fn parse_dependency(
    manifest: &Manifest,
    name: &str,
    item: &Value,
    position: &SourcePosition,
) -> Result<RawDependency, Diagnostic> {
    let invalid = |message: String| {
        Diagnostic::error(DiagnosticKind::InvalidConfigSyntax, message).at(position.clone())
    };

    let (spec, cascade) = match item {
        Value::String(s) => (s.clone(), Cascade(true)),
        Value::Object(obj) => {
            let spec = obj
                .get("script")
                .and_then(Value::as_str)
                .ok_or_else(|| {
                    invalid(format!(
                        "\"{name}\" has a dependency object missing a \"script\" field"
                    ))
                })?
                .to_string();
            let cascade = match obj.get("cascade") {
                Some(Value::Bool(b)) => Cascade(*b),
                Some(_) => {
                    return Err(invalid(format!(
                        "\"{name}\" dependency \"{spec}\".cascade must be a boolean"
                    )))
                }
                None => Cascade(true),
            };
            (spec, cascade)
        }
        _ => {
            return Err(invalid(format!(
                "\"{name}\" has a dependency that is neither a string nor an object"
            )))
        }
    };

    let reference = resolve_dependency_reference(manifest, name, &spec, position)?;
    Ok(RawDependency {
        reference,
        position: position.clone(),
        cascade,
    })
}

/// Resolves a dependency spec string to a [`ScriptReference`]. Specs
/// beginning with `.` are cross-package: everything up to the last `:` is a
/// path to the other package's directory (relative to `manifest`'s own
/// directory), and everything after is the script name there. Specs not
/// beginning with `.` name a script in the same manifest.
fn resolve_dependency_reference(
    manifest: &Manifest,
    name: &str,
    spec: &str,
    position: &SourcePosition,
) -> Result<ScriptReference, Diagnostic> {
    let invalid = |message: String| {
        Diagnostic::error(DiagnosticKind::InvalidConfigSyntax, message).at(position.clone())
    };

    if !spec.starts_with('.') {
        if spec.is_empty() {
            return Err(invalid(format!(
                "\"{name}\" has an empty dependency name"
            )));
        }
        return Ok(ScriptReference::new(manifest.package_dir.clone(), spec));
    }

    let idx = spec.find(':').ok_or_else(|| {
        invalid(format!(
            "\"{name}\" dependency \"{spec}\" looks like a cross-package reference \
             (it starts with \".\") but has no \":script\" suffix"
        ))
    })?;
    let (path_part, script_part) = spec.split_at(idx);
    let script_part = &script_part[1..];
    if path_part.is_empty() || script_part.is_empty() {
        return Err(invalid(format!(
            "\"{name}\" dependency \"{spec}\" must have a non-empty path and script name on either side of the \":\""
        )));
    }

    let resolved_dir = normalize_lexically(&manifest.package_dir.join(path_part));
    if resolved_dir == manifest.package_dir {
        return Err(invalid(format!(
            "\"{name}\" dependency \"{spec}\" resolves to its own package; \
             cross-package syntax is only for a *different* package"
        )));
    }
    Ok(ScriptReference::new(resolved_dir, script_part))
}

/// Lexically collapses `.` and `..` components without touching the file
/// system (the target package may not exist yet at analysis time).
fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        use std::path::Component::*;
        match component {
            CurDir => {}
            ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

fn parse_glob_list(
    items: &[Value],
    name: &str,
    field: &str,
    position: &SourcePosition,
) -> Result<Vec<GlobPattern>, Diagnostic> {
    items
        .iter()
        .map(|item| {
            item.as_str().map(GlobPattern::parse).ok_or_else(|| {
                Diagnostic::error(
                    DiagnosticKind::InvalidConfigSyntax,
                    format!("\"{name}\".{field} entries must be strings"),
                )
                .at(position.clone())
            })
        })
        .collect()
}

/// Walks upward from `package_dir` through every ancestor directory, adding a
/// file-path glob for each ancestor that actually contains one of `names`.
/// This is how an edit to a lockfile several directories up (a monorepo root
/// `package-lock.json`, say) is picked up as an implicit input without the
/// user listing it explicitly.
fn find_ancestor_locks(package_dir: &Path, names: &[String]) -> Vec<GlobPattern> {
    let mut found = Vec::new();
    let mut dir = Some(package_dir);
    while let Some(current) = dir {
        for name in names {
            let candidate = current.join(name);
            if candidate.is_file() {
                found.push(GlobPattern {
                    pattern: candidate.display().to_string(),
                    exclude: false,
                });
            }
        }
        dir = current.parent();
    }
    found
}

/// Pass 2b: rejects a manifest that lists the same resolved dependency twice
/// under the same script, pointing at both occurrences.
pub(super) fn duplicate_dependencies(
    table: &HashMap<ScriptReference, Result<RawScriptConfig, Diagnostic>>,
) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();
    for raw in table.values().filter_map(|r| r.as_ref().ok()) {
        let mut seen: HashMap<&ScriptReference, &SourcePosition> = HashMap::new();
        for dep in &raw.dependencies {
            if let Some(first_position) = seen.get(&dep.reference) {
                diagnostics.push(
                    Diagnostic::error(
                        DiagnosticKind::DuplicateDependency,
                        format!(
                            "\"{}\" depends on \"{}\" more than once",
                            raw.reference, dep.reference
                        ),
                    )
                    .at(dep.position.clone())
                    .with_related("first listed here", (*first_position).clone()),
                );
            } else {
                seen.insert(&dep.reference, &dep.position);
            }
        }
    }
    diagnostics
}
