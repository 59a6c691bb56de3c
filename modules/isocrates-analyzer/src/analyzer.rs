//! Repo Analyzer: walks a cloned repository and produces a file manifest,
//! a module map (with a derived import graph), and a list of detected
//! crates (independent sub-projects).

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use isocrates_common::{ModuleInfo, SizeLabel};
use regex::Regex;
use serde::{Deserialize, Serialize};

const SKIP_DIRS: &[&str] = &[
    ".git",
    "node_modules",
    "vendor",
    "__pycache__",
    ".venv",
    "venv",
    "dist",
    "build",
    ".next",
    ".nuxt",
    "target",
    ".tox",
    "egg-info",
];

const SOURCE_EXTS: &[&str] = &[
    ".py", ".js", ".ts", ".tsx", ".jsx", ".go", ".rs", ".java", ".rb", ".c", ".cpp", ".h", ".hpp",
    ".cs", ".swift", ".kt", ".md", ".yaml", ".yml", ".json", ".toml", ".sh", ".sql", ".html",
    ".css", ".scss", ".vue", ".svelte",
];

const SKIP_NAMES: &[&str] = &[
    "package-lock.json",
    "yarn.lock",
    "pnpm-lock.yaml",
    "uv.lock",
    "Cargo.lock",
    "poetry.lock",
];

/// Package manifest files that indicate a module or sub-project boundary.
const MODULE_MARKERS: &[&str] = &[
    "package.json",
    "Cargo.toml",
    "go.mod",
    "pyproject.toml",
    "setup.py",
    "pom.xml",
    "build.gradle",
    "Gemfile",
    "composer.json",
    "CMakeLists.txt",
    "Package.swift",
];

/// Subset of MODULE_MARKERS used for crate detection — excludes
/// language-internal markers (`__init__.py`, `mod.rs`) that indicate
/// modules within a project rather than independent projects.
const CRATE_MARKERS: &[&str] = &[
    "package.json",
    "Cargo.toml",
    "go.mod",
    "pyproject.toml",
    "setup.py",
    "pom.xml",
    "build.gradle",
    "Gemfile",
    "composer.json",
];

const ENTRY_POINT_PATTERNS: &[&str] =
    &["main.", "app.", "index.", "__init__.py", "mod.rs", "lib.rs"];

const MAX_FILE_SIZE: u64 = 512_000;
const MODULE_MARKER_MAX_ANCESTORS: usize = 4;
const MODULE_MIN_FILES: usize = 3;

fn import_patterns() -> &'static HashMap<&'static str, Vec<Regex>> {
    static PATTERNS: OnceLock<HashMap<&'static str, Vec<Regex>>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        let mut m: HashMap<&'static str, Vec<Regex>> = HashMap::new();
        m.insert(
            ".py",
            vec![
                Regex::new(r"^\s*from\s+([\w.]+)\s+import").unwrap(),
                Regex::new(r"^\s*import\s+([\w.]+)").unwrap(),
            ],
        );
        m.insert(
            ".ts",
            vec![
                Regex::new(r#"from\s+['"]([^'"]+)['"]"#).unwrap(),
                Regex::new(r#"require\(\s*['"]([^'"]+)['"]\s*\)"#).unwrap(),
            ],
        );
        m.insert(".tsx", vec![Regex::new(r#"from\s+['"]([^'"]+)['"]"#).unwrap()]);
        m.insert(
            ".js",
            vec![
                Regex::new(r#"from\s+['"]([^'"]+)['"]"#).unwrap(),
                Regex::new(r#"require\(\s*['"]([^'"]+)['"]\s*\)"#).unwrap(),
            ],
        );
        m.insert(".jsx", vec![Regex::new(r#"from\s+['"]([^'"]+)['"]"#).unwrap()]);
        m.insert(".go", vec![Regex::new(r#"^\s*"([^"]+)""#).unwrap()]);
        m.insert(
            ".rs",
            vec![
                Regex::new(r"^\s*use\s+([\w:]+)").unwrap(),
                Regex::new(r"^\s*mod\s+(\w+)").unwrap(),
            ],
        );
        m
    })
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrateMarker {
    pub path: String,
    pub marker: String,
    pub name: String,
}

/// Complete static analysis result for a repository.
#[derive(Debug, Clone)]
pub struct RepoAnalysis {
    pub file_manifest: Vec<(String, u64)>,
    pub token_estimate: u64,
    pub file_count: usize,
    pub total_bytes: u64,
    pub size_label: SizeLabel,
    /// Sorted by byte count, descending.
    pub top_dirs: Vec<(String, u64)>,
    pub module_map: BTreeMap<String, ModuleInfo>,
    pub module_count: usize,
    pub crates: Vec<CrateMarker>,
}

/// Walk `repo_path` and return a complete static analysis.
pub fn analyze_repository(repo_path: &Path) -> RepoAnalysis {
    let (mut file_manifest, total_bytes, top_dirs_map) = walk_files(repo_path);
    file_manifest.sort_by(|a, b| a.0.cmp(&b.0));
    let token_estimate = total_bytes / 4;
    let size_label = SizeLabel::from_token_estimate(token_estimate);

    let module_map = build_module_map(&file_manifest, repo_path);
    let crates = detect_crates(repo_path);

    let mut top_dirs: Vec<(String, u64)> = top_dirs_map.into_iter().collect();
    top_dirs.sort_by(|a, b| b.1.cmp(&a.1));

    RepoAnalysis {
        file_count: file_manifest.len(),
        file_manifest,
        token_estimate,
        total_bytes,
        size_label,
        top_dirs,
        module_count: module_map.len(),
        module_map,
        crates,
    }
}

fn walk_files(repo_path: &Path) -> (Vec<(String, u64)>, u64, HashMap<String, u64>) {
    let skip_dirs: HashSet<&str> = SKIP_DIRS.iter().copied().collect();
    let skip_names: HashSet<&str> = SKIP_NAMES.iter().copied().collect();
    let source_exts: HashSet<&str> = SOURCE_EXTS.iter().copied().collect();

    let mut file_manifest = Vec::new();
    let mut total_bytes = 0u64;
    let mut top_dirs: HashMap<String, u64> = HashMap::new();
    let mut stack = vec![repo_path.to_path_buf()];

    while let Some(dir) = stack.pop() {
        let entries = match std::fs::read_dir(&dir) {
            Ok(e) => e,
            Err(e) => {
                tracing::warn!(dir = %dir.display(), error = %e, "failed to read directory, skipping");
                continue;
            }
        };
        for entry in entries.flatten() {
            let path = entry.path();
            let file_type = match entry.file_type() {
                Ok(t) => t,
                Err(_) => continue,
            };
            if file_type.is_dir() {
                let name = entry.file_name().to_string_lossy().to_string();
                if skip_dirs.contains(name.as_str()) {
                    continue;
                }
                stack.push(path);
                continue;
            }
            if !file_type.is_file() {
                continue;
            }
            let fname = entry.file_name().to_string_lossy().to_string();
            if skip_names.contains(fname.as_str()) {
                continue;
            }
            let ext = match path.extension().and_then(|e| e.to_str()) {
                Some(e) => format!(".{}", e.to_lowercase()),
                None => continue,
            };
            if !source_exts.contains(ext.as_str()) {
                continue;
            }
            let size = match entry.metadata() {
                Ok(m) => m.len(),
                Err(_) => continue,
            };
            if size > MAX_FILE_SIZE {
                continue;
            }
            let rel = match path.strip_prefix(repo_path) {
                Ok(r) => r,
                Err(_) => continue,
            };
            let rel_str = rel.to_string_lossy().replace('\\', "/");
            let top_dir = {
                let first = rel_str.split('/').next().unwrap_or(&rel_str).to_string();
                if first == rel_str { ".".to_string() } else { first }
            };
            *top_dirs.entry(top_dir).or_insert(0) += size;
            total_bytes += size;
            file_manifest.push((rel_str, size));
        }
    }

    (file_manifest, total_bytes, top_dirs)
}

fn find_module_for_dir(
    rel_dir: &str,
    repo_path: &Path,
    cache: &mut HashMap<String, Option<String>>,
) -> Option<String> {
    if let Some(cached) = cache.get(rel_dir) {
        return cached.clone();
    }

    let parts: Vec<&str> = if rel_dir == "." {
        Vec::new()
    } else {
        rel_dir.split('/').collect()
    };

    let top_depth = parts.len();
    let min_depth = top_depth.saturating_sub(MODULE_MARKER_MAX_ANCESTORS);
    let mut depth = top_depth as isize;
    while depth >= min_depth as isize {
        let d = depth as usize;
        let ancestor = if d == 0 {
            ".".to_string()
        } else {
            parts[..d].join("/")
        };

        if let Some(cached) = cache.get(&ancestor) {
            cache.insert(rel_dir.to_string(), cached.clone());
            return cached.clone();
        }

        let abs_ancestor = if ancestor == "." {
            repo_path.to_path_buf()
        } else {
            repo_path.join(&ancestor)
        };
        for marker in MODULE_MARKERS {
            if abs_ancestor.join(marker).exists() {
                let mod_name = ancestor.clone();
                cache.insert(ancestor, Some(mod_name.clone()));
                cache.insert(rel_dir.to_string(), Some(mod_name.clone()));
                return Some(mod_name);
            }
        }
        depth -= 1;
    }

    cache.insert(rel_dir.to_string(), None);
    None
}

fn detect_module_boundaries(
    file_manifest: &[(String, u64)],
    repo_path: &Path,
) -> HashMap<String, String> {
    let mut cache: HashMap<String, Option<String>> = HashMap::new();
    let mut result = HashMap::new();

    for (fpath, _) in file_manifest {
        let rel_dir = match fpath.rfind('/') {
            Some(idx) => &fpath[..idx],
            None => ".",
        };
        let rel_dir = if rel_dir.is_empty() { "." } else { rel_dir };

        if let Some(module) = find_module_for_dir(rel_dir, repo_path, &mut cache) {
            result.insert(fpath.clone(), module);
        } else {
            let parts: Vec<&str> = fpath.split('/').collect();
            let fallback = if parts.len() >= 2 {
                format!("{}/{}", parts[0], parts[1])
            } else {
                ".".to_string()
            };
            result.insert(fpath.clone(), fallback);
        }
    }

    result
}

fn build_module_map(
    file_manifest: &[(String, u64)],
    repo_path: &Path,
) -> BTreeMap<String, ModuleInfo> {
    let boundaries = detect_module_boundaries(file_manifest, repo_path);

    let mut raw_groups: BTreeMap<String, Vec<(String, u64)>> = BTreeMap::new();
    for (fpath, fsize) in file_manifest {
        let module_name = boundaries.get(fpath).cloned().unwrap_or_else(|| ".".to_string());
        raw_groups.entry(module_name).or_default().push((fpath.clone(), *fsize));
    }

    let mut merged: BTreeMap<String, Vec<(String, u64)>> = BTreeMap::new();
    for (mod_name, files) in raw_groups {
        if files.len() < MODULE_MIN_FILES && mod_name != "." {
            let parent = if let Some(idx) = mod_name.find('/') {
                mod_name[..idx].to_string()
            } else {
                ".".to_string()
            };
            merged.entry(parent).or_default().extend(files);
        } else {
            merged.entry(mod_name).or_default().extend(files);
        }
    }

    let mut modules: BTreeMap<String, ModuleInfo> = BTreeMap::new();
    for (mod_name, files) in merged {
        let total_bytes: u64 = files.iter().map(|(_, s)| s).sum();
        let mut languages: BTreeMap<String, u32> = BTreeMap::new();
        let mut entry_points = Vec::new();

        for (fpath, _) in &files {
            if let Some(idx) = fpath.rfind('.') {
                let ext = &fpath[idx..];
                *languages.entry(ext.to_string()).or_insert(0) += 1;
            }
            let fname = fpath.rsplit('/').next().unwrap_or(fpath);
            let is_entry = ENTRY_POINT_PATTERNS.iter().any(|p| {
                let trimmed = p.trim_end_matches('.');
                fname.starts_with(trimmed) || fname == *p
            });
            if is_entry {
                entry_points.push(fpath.clone());
            }
        }

        let top_dir = if let Some(idx) = mod_name.find('/') {
            mod_name[..idx].to_string()
        } else {
            mod_name.clone()
        };

        modules.insert(
            mod_name.clone(),
            ModuleInfo {
                name: mod_name,
                top_level_dir: top_dir,
                files,
                token_estimate: total_bytes / 4,
                imports_from: Default::default(),
                imported_by: Default::default(),
                entry_points,
                language_histogram: languages,
            },
        );
    }

    build_import_graph(&mut modules, repo_path);
    modules
}

fn build_import_graph(modules: &mut BTreeMap<String, ModuleInfo>, repo_path: &Path) {
    let module_names: Vec<String> = modules.keys().cloned().collect();
    let patterns = import_patterns();

    // Collect edges first since we can't mutate two entries of the map at once.
    let mut edges: Vec<(String, String)> = Vec::new();

    for (mod_name, mod_info) in modules.iter() {
        for (fpath, _) in &mod_info.files {
            let ext = match fpath.rfind('.') {
                Some(idx) => fpath[idx..].to_lowercase(),
                None => continue,
            };
            let Some(regexes) = patterns.get(ext.as_str()) else {
                continue;
            };

            let full_path = repo_path.join(fpath);
            let Ok(content) = std::fs::read_to_string(&full_path) else {
                continue;
            };
            for line in content.lines().take(100) {
                for pattern in regexes {
                    let Some(caps) = pattern.captures(line) else {
                        continue;
                    };
                    let Some(import_path) = caps.get(1) else {
                        continue;
                    };
                    let import_path = import_path.as_str();
                    let import_as_path = import_path.replace('.', "/");

                    for target_mod in &module_names {
                        if target_mod == mod_name {
                            continue;
                        }
                        if import_as_path.starts_with(target_mod.as_str())
                            || import_path.starts_with(target_mod.as_str())
                            || import_as_path.contains(target_mod.as_str())
                        {
                            edges.push((mod_name.clone(), target_mod.clone()));
                            break;
                        }
                    }
                }
            }
        }
    }

    for (from, to) in edges {
        if let Some(m) = modules.get_mut(&from) {
            m.imports_from.insert(to.clone());
        }
        if let Some(m) = modules.get_mut(&to) {
            m.imported_by.insert(from);
        }
    }
}

/// Detect independent sub-projects within a repository. The root project
/// marker is excluded since it represents the repo itself. When a deeper
/// marker's ancestor is also a crate, the deeper one is dropped as an
/// internal module rather than a separate crate.
pub fn detect_crates(repo_path: &Path) -> Vec<CrateMarker> {
    let skip_dirs: HashSet<&str> = SKIP_DIRS.iter().copied().collect();
    let mut crate_paths: HashSet<String> = HashSet::new();
    let mut stack: Vec<PathBuf> = vec![repo_path.to_path_buf()];

    while let Some(dir) = stack.pop() {
        let entries = match std::fs::read_dir(&dir) {
            Ok(e) => e,
            Err(_) => continue,
        };
        let rel_root = dir
            .strip_prefix(repo_path)
            .map(|p| p.to_string_lossy().replace('\\', "/"))
            .unwrap_or_default();
        let rel_root = if rel_root.is_empty() { ".".to_string() } else { rel_root };

        let mut subdirs = Vec::new();
        let mut has_marker = false;
        for entry in entries.flatten() {
            let file_type = match entry.file_type() {
                Ok(t) => t,
                Err(_) => continue,
            };
            let name = entry.file_name().to_string_lossy().to_string();
            if file_type.is_dir() {
                if !skip_dirs.contains(name.as_str()) {
                    subdirs.push(entry.path());
                }
            } else if file_type.is_file() && CRATE_MARKERS.contains(&name.as_str()) {
                has_marker = true;
            }
        }
        if has_marker && rel_root != "." {
            crate_paths.insert(rel_root);
        }
        stack.extend(subdirs);
    }

    if crate_paths.is_empty() {
        return Vec::new();
    }

    let mut sorted_paths: Vec<String> = crate_paths.into_iter().collect();
    sorted_paths.sort_by_key(|p| p.matches('/').count());

    let mut kept: Vec<String> = Vec::new();
    for cp in sorted_paths {
        let is_submodule = kept.iter().any(|ancestor| cp.starts_with(&format!("{ancestor}/")));
        if !is_submodule {
            kept.push(cp);
        }
    }

    kept.into_iter()
        .map(|cp| {
            let marker = CRATE_MARKERS
                .iter()
                .find(|m| repo_path.join(&cp).join(m).exists())
                .map(|m| m.to_string())
                .unwrap_or_default();
            let name = cp.rsplit('/').next().unwrap_or(&cp).to_string();
            CrateMarker { path: cp, marker, name }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn small_repo_yields_small_size_label() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("main.rs"), "fn main() {}").unwrap();
        let analysis = analyze_repository(dir.path());
        assert_eq!(analysis.size_label, SizeLabel::Small);
        assert_eq!(analysis.file_count, 1);
    }

    #[test]
    fn skips_vendored_directories() {
        let dir = tempdir().unwrap();
        fs::create_dir(dir.path().join("node_modules")).unwrap();
        fs::write(dir.path().join("node_modules/pkg.js"), "module.exports = {}").unwrap();
        fs::write(dir.path().join("index.js"), "console.log(1)").unwrap();
        let analysis = analyze_repository(dir.path());
        assert_eq!(analysis.file_count, 1);
        assert_eq!(analysis.file_manifest[0].0, "index.js");
    }

    #[test]
    fn skips_lockfiles_by_name() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("Cargo.lock"), "# lockfile").unwrap();
        fs::write(dir.path().join("Cargo.toml"), "[package]\nname=\"x\"").unwrap();
        let analysis = analyze_repository(dir.path());
        assert!(analysis.file_manifest.iter().all(|(p, _)| p != "Cargo.lock"));
    }

    #[test]
    fn skips_oversized_files() {
        let dir = tempdir().unwrap();
        let big_content = "x".repeat(MAX_FILE_SIZE as usize + 1);
        fs::write(dir.path().join("generated.json"), big_content).unwrap();
        let analysis = analyze_repository(dir.path());
        assert!(analysis.file_manifest.is_empty());
    }

    #[test]
    fn detects_module_boundary_from_nearest_marker() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("crates/alpha/src")).unwrap();
        fs::write(dir.path().join("crates/alpha/Cargo.toml"), "[package]\nname=\"a\"").unwrap();
        for i in 0..3 {
            fs::write(dir.path().join(format!("crates/alpha/src/f{i}.rs")), "fn f() {}").unwrap();
        }
        let analysis = analyze_repository(dir.path());
        assert!(analysis.module_map.contains_key("crates/alpha"));
    }

    #[test]
    fn small_modules_merge_into_parent() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("crates/alpha/src")).unwrap();
        fs::write(dir.path().join("crates/alpha/Cargo.toml"), "[package]\nname=\"a\"").unwrap();
        // only 1 file — below MODULE_MIN_FILES, merges into parent "crates"
        fs::write(dir.path().join("crates/alpha/src/only.rs"), "fn f() {}").unwrap();
        let analysis = analyze_repository(dir.path());
        assert!(!analysis.module_map.contains_key("crates/alpha"));
    }

    #[test]
    fn detect_crates_excludes_root_and_dedups_nested() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("Cargo.toml"), "[workspace]").unwrap();
        fs::create_dir_all(dir.path().join("crates/a")).unwrap();
        fs::write(dir.path().join("crates/a/Cargo.toml"), "[package]\nname=\"a\"").unwrap();
        fs::create_dir_all(dir.path().join("crates/a/nested")).unwrap();
        fs::write(dir.path().join("crates/a/nested/Cargo.toml"), "[package]\nname=\"n\"").unwrap();

        let crates = detect_crates(dir.path());
        let paths: Vec<&str> = crates.iter().map(|c| c.path.as_str()).collect();
        assert_eq!(paths, vec!["crates/a"]);
    }
}
