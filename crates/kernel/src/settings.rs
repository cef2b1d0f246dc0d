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

use std::path::PathBuf;

/// Per-kernel switches. Seeded from the process environment by
/// [`KernelSettings::from_env`]; every kernel instance carries its own copy,
/// so kernels with different settings can coexist in one process.
#[derive(Debug, Clone, Default)]
pub struct KernelSettings {
    pub verbose: bool,
    pub silence: bool,
    pub allow_duplicated_classes: bool,
    pub allow_duplicated_objects: bool,
    pub test_duplicated_objects_via_inheritance: bool,
    pub skip_string_range: bool,
    /// 0 means "derive from the CPU count at load time".
    pub threads_pool_size: usize,
    pub search_path: Vec<PathBuf>,
    pub repository_root: Option<PathBuf>,
    pub repository_mapping_dir: Option<PathBuf>,
    pub user_repository_root: Option<PathBuf>,
    /// Strict mode: resolve against the repository only.
    pub strict_repository_paths: bool,
}

impl KernelSettings {
    pub fn from_env() -> KernelSettings {
        let flag = |name: &str| std::env::var_os(name).is_some();
        let path_list = |name: &str| -> Vec<PathBuf> {
            std::env::var(name)
                .map(|v| {
                    v.split(':')
                        .filter(|t| !t.is_empty())
                        .map(|t| PathBuf::from(crate::path::substitute_env(t)))
                        .collect()
                })
                .unwrap_or_default()
        };
        let path = |name: &str| -> Option<PathBuf> {
            std::env::var(name)
                .ok()
                .filter(|v| !v.is_empty())
                .map(|v| PathBuf::from(crate::path::substitute_env(&v)))
        };

        let mut search_path = path_list("OKS_DB_ROOT");
        if search_path.is_empty() {
            search_path = path_list("TDAQ_DB_PATH");
        }

        KernelSettings {
            verbose: flag("OKS_KERNEL_VERBOSE"),
            silence: flag("OKS_KERNEL_SILENCE"),
            allow_duplicated_classes: flag("OKS_KERNEL_ALLOW_DUPLICATED_CLASSES"),
            allow_duplicated_objects: flag("OKS_KERNEL_ALLOW_DUPLICATED_OBJECTS"),
            test_duplicated_objects_via_inheritance: flag(
                "OKS_KERNEL_TEST_DUPLICATED_OBJECTS_VIA_INHERITANCE",
            ),
            skip_string_range: flag("OKS_KERNEL_SKIP_STRING_RANGE"),
            threads_pool_size: std::env::var("OKS_KERNEL_THREADS_POOL_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(0),
            search_path,
            repository_root: path("TDAQ_DB_REPOSITORY"),
            repository_mapping_dir: path("OKS_REPOSITORY_MAPPING_DIR"),
            user_repository_root: path("TDAQ_DB_USER_REPOSITORY"),
            strict_repository_paths: false,
        }
    }

    /// The worker count the data-file pipeline runs with. An explicit
    /// setting wins; otherwise the online CPU count.
    pub fn effective_pool_size(&self) -> usize {
        if self.threads_pool_size > 0 {
            return self.threads_pool_size;
        }
        gdt_cpus::num_logical_cores().unwrap_or(1).max(1)
    }
}
