// Copyright (C) 2025 Ryan Daum <ryan.daum@gmail.com> This program is free
// software: you can redistribute it and/or modify it under the terms of the GNU
// General Public License as published by the Free Software Foundation, version
// 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

use crate::{KernelSettings, OksError};
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

// realpath() is the one genuinely process-wide thing the kernel touches;
// multiple kernels share it
static CANONICAL_CACHE: Lazy<Mutex<HashMap<PathBuf, PathBuf>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

/// `realpath` with a process-wide cache.
pub fn canonical_path(path: &Path) -> std::io::Result<PathBuf> {
    if let Some(hit) = CANONICAL_CACHE.lock().unwrap().get(path) {
        return Ok(hit.clone());
    }
    let real = std::fs::canonicalize(path)?;
    CANONICAL_CACHE
        .lock()
        .unwrap()
        .insert(path.to_path_buf(), real.clone());
    Ok(real)
}

/// Drop cached entries; reload after files moved on disk needs fresh
/// answers.
pub fn flush_canonical_cache() {
    CANONICAL_CACHE.lock().unwrap().clear();
}

/// Substitute `$(NAME)` references against the process environment. Unknown
/// variables substitute to the empty string.
pub fn substitute_env(token: &str) -> String {
    let mut out = String::with_capacity(token.len());
    let mut rest = token;
    while let Some(start) = rest.find("$(") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find(')') {
            Some(end) => {
                let name = &after[..end];
                if let Ok(v) = std::env::var(name) {
                    out.push_str(&v);
                }
                rest = &after[end + 1..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

/// Resolve a file reference to an absolute, canonical path: as absolute →
/// relative to the working directory → relative to each search-path entry →
/// relative to the including file's directory. In strict-repository mode
/// only the repository path is tried. The error lists every path tested.
pub fn resolve_file_path(
    settings: &KernelSettings,
    short_name: &str,
    including_dir: Option<&Path>,
) -> Result<PathBuf, OksError> {
    let name = substitute_env(short_name);
    let mut tried = Vec::new();

    let mut try_path = |candidate: PathBuf, tried: &mut Vec<PathBuf>| -> Option<PathBuf> {
        if candidate.is_file() {
            canonical_path(&candidate).ok()
        } else {
            tried.push(candidate);
            None
        }
    };

    if settings.strict_repository_paths {
        if let Some(repo) = &settings.repository_root {
            let candidate = repo.join(&name);
            if let Some(hit) = try_path(candidate, &mut tried) {
                return Ok(hit);
            }
        }
        return Err(OksError::CannotResolvePath { name, tried });
    }

    let as_path = PathBuf::from(&name);
    if as_path.is_absolute() {
        if let Some(hit) = try_path(as_path, &mut tried) {
            return Ok(hit);
        }
        return Err(OksError::CannotResolvePath { name, tried });
    }

    // relative to the working directory
    if let Some(hit) = try_path(as_path.clone(), &mut tried) {
        return Ok(hit);
    }

    for entry in &settings.search_path {
        if let Some(hit) = try_path(entry.join(&as_path), &mut tried) {
            return Ok(hit);
        }
    }

    if let Some(repo) = &settings.repository_root {
        if let Some(hit) = try_path(repo.join(&as_path), &mut tried) {
            return Ok(hit);
        }
    }

    if let Some(dir) = including_dir {
        if let Some(hit) = try_path(dir.join(&as_path), &mut tried) {
            return Ok(hit);
        }
    }

    Err(OksError::CannotResolvePath { name, tried })
}

/// Repository-backed files may only include repository-relative paths.
pub fn validate_repository_include(file: &Path, include: &str) -> Result<(), OksError> {
    let p = Path::new(include);
    let has_dots = p
        .components()
        .any(|c| matches!(c, std::path::Component::CurDir | std::path::Component::ParentDir));
    if p.is_absolute() || has_dots {
        return Err(OksError::BadRepositoryInclude {
            file: file.to_path_buf(),
            path: include.to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_substitution() {
        // SAFETY: test process, no concurrent env readers we care about
        unsafe { std::env::set_var("OKS_TEST_SUBST_DIR", "/db") };
        assert_eq!(substitute_env("$(OKS_TEST_SUBST_DIR)/x.xml"), "/db/x.xml");
        assert_eq!(substitute_env("plain"), "plain");
        assert_eq!(substitute_env("$(OKS_TEST_NOT_SET_ANYWHERE)/x"), "/x");
        assert_eq!(substitute_env("$(unterminated"), "$(unterminated");
    }

    #[test]
    fn repository_includes_must_be_relative() {
        let f = Path::new("/repo/a.xml");
        assert!(validate_repository_include(f, "sub/b.xml").is_ok());
        assert!(validate_repository_include(f, "/abs/b.xml").is_err());
        assert!(validate_repository_include(f, "../b.xml").is_err());
        assert!(validate_repository_include(f, "./b.xml").is_err());
    }

    #[test]
    fn unresolvable_paths_report_every_candidate() {
        let settings = KernelSettings {
            search_path: vec![PathBuf::from("/nowhere-a"), PathBuf::from("/nowhere-b")],
            ..KernelSettings::default()
        };
        let err = resolve_file_path(&settings, "missing.xml", Some(Path::new("/nowhere-c")))
            .unwrap_err();
        let OksError::CannotResolvePath { tried, .. } = err else {
            panic!("wrong error");
        };
        // cwd + two search entries + including dir
        assert_eq!(tried.len(), 4);
    }
}
