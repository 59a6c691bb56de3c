//! Partitioner: splits a repository's module graph into 3-7 coherent
//! documentation areas via weighted Label Propagation, with directory-based
//! and force-split fallbacks. Deterministic under a fixed shuffle seed.

use std::collections::{BTreeMap, HashMap, HashSet};

use isocrates_common::DocumentationArea;

use crate::analyzer::RepoAnalysis;

const BUDGET_MULTIPLIER: u64 = 2;
const MIN_MODULE_COUNT: usize = 4;
const DEFAULT_MIN_AREAS: usize = 3;
const DEFAULT_MAX_AREAS: usize = 7;
const LPA_SEED: u64 = 42;
const LPA_MAX_ITERATIONS: usize = 50;

/// Decide whether and how to split a repository into documentation areas.
/// Returns a single-element list when splitting is not warranted — callers
/// never branch on "was it partitioned".
pub fn partition_for_documentation(
    analysis: &RepoAnalysis,
    context_budget: u64,
) -> Vec<DocumentationArea> {
    partition_with_bounds(analysis, context_budget, DEFAULT_MIN_AREAS, DEFAULT_MAX_AREAS)
}

pub fn partition_with_bounds(
    analysis: &RepoAnalysis,
    context_budget: u64,
    min_areas: usize,
    max_areas: usize,
) -> Vec<DocumentationArea> {
    let module_map = &analysis.module_map;

    if analysis.token_estimate < BUDGET_MULTIPLIER * context_budget
        || analysis.module_count < MIN_MODULE_COUNT
    {
        return vec![single_area(analysis)];
    }

    tracing::info!(
        tokens = analysis.token_estimate,
        modules = analysis.module_count,
        context_budget,
        "partitioning repository"
    );

    let adj = build_adjacency(module_map);

    let mut groups = if has_edges(&adj) {
        let labels = label_propagation(&adj, module_map);
        let mut groups = labels_to_groups(labels);
        if groups.len() < 2 {
            let labels = group_by_directory(module_map);
            groups = labels_to_groups(labels);
        }
        groups
    } else {
        let labels = group_by_directory(module_map);
        labels_to_groups(labels)
    };

    if groups.len() < 2 {
        groups = force_split_by_size(module_map, max_areas);
    }

    let min_area_tokens = context_budget / max_areas as u64;
    let max_area_tokens = context_budget * 2;
    groups = merge_small_groups(groups, &adj, module_map, min_area_tokens);
    groups = split_large_groups(groups, module_map, max_area_tokens, max_areas);
    groups = enforce_bounds(groups, module_map, min_areas, max_areas);

    let areas = assemble_areas(groups, module_map);
    tracing::info!(
        area_count = areas.len(),
        names = ?areas.iter().map(|a| a.name.as_str()).collect::<Vec<_>>(),
        "partitioned into areas"
    );
    areas
}

type ModuleMap = BTreeMap<String, isocrates_common::ModuleInfo>;

fn build_adjacency(module_map: &ModuleMap) -> HashMap<String, HashSet<String>> {
    let mut adj: HashMap<String, HashSet<String>> =
        module_map.keys().map(|n| (n.clone(), HashSet::new())).collect();
    for (name, info) in module_map {
        let targets: HashSet<&String> = info.imports_from.iter().chain(info.imported_by.iter()).collect();
        for target in targets {
            if adj.contains_key(target) {
                adj.get_mut(name).unwrap().insert(target.clone());
                adj.get_mut(target).unwrap().insert(name.clone());
            }
        }
    }
    adj
}

fn has_edges(adj: &HashMap<String, HashSet<String>>) -> bool {
    adj.values().any(|n| !n.is_empty())
}

/// A small deterministic PRNG (xorshift64*) seeded with a fixed constant, so
/// the shuffle order — and therefore the partition result — is stable across
/// runs given the same module set.
struct Xorshift64 {
    state: u64,
}

impl Xorshift64 {
    fn new(seed: u64) -> Self {
        Self { state: seed.max(1) }
    }

    fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.state = x;
        x
    }

    /// Fisher-Yates shuffle.
    fn shuffle<T>(&mut self, items: &mut [T]) {
        for i in (1..items.len()).rev() {
            let j = (self.next_u64() % (i as u64 + 1)) as usize;
            items.swap(i, j);
        }
    }
}

fn label_propagation(adj: &HashMap<String, HashSet<String>>, module_map: &ModuleMap) -> HashMap<String, u64> {
    let mut rng = Xorshift64::new(LPA_SEED);
    let sorted_names: Vec<String> = module_map.keys().cloned().collect();
    let mut labels: HashMap<String, u64> =
        sorted_names.iter().enumerate().map(|(i, n)| (n.clone(), i as u64)).collect();
    let mut nodes = sorted_names.clone();

    for _ in 0..LPA_MAX_ITERATIONS {
        rng.shuffle(&mut nodes);
        let mut changed = false;
        for node in &nodes {
            let Some(neighbors) = adj.get(node) else { continue };
            if neighbors.is_empty() {
                continue;
            }
            let mut votes: HashMap<u64, u64> = HashMap::new();
            for nb in neighbors {
                let lbl = labels[nb];
                let weight = module_map[nb].token_estimate.max(1);
                *votes.entry(lbl).or_insert(0) += weight;
            }
            // Highest weight, ties broken by smallest label.
            let best = *votes
                .iter()
                .max_by(|(la, va), (lb, vb)| va.cmp(vb).then(lb.cmp(la)))
                .map(|(l, _)| l)
                .unwrap();
            if labels[node] != best {
                labels.insert(node.clone(), best);
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }

    labels
}

fn group_by_directory(module_map: &ModuleMap) -> HashMap<String, u64> {
    let mut dir_to_label: HashMap<String, u64> = HashMap::new();
    let mut labels = HashMap::new();
    let mut next_label = 0u64;
    for name in module_map.keys() {
        let top = &module_map[name].top_level_dir;
        let label = *dir_to_label.entry(top.clone()).or_insert_with(|| {
            let l = next_label;
            next_label += 1;
            l
        });
        labels.insert(name.clone(), label);
    }
    labels
}

fn force_split_by_size(module_map: &ModuleMap, target_groups: usize) -> BTreeMap<u64, Vec<String>> {
    let mut sorted_names: Vec<String> = module_map.keys().cloned().collect();
    sorted_names.sort_by(|a, b| module_map[b].token_estimate.cmp(&module_map[a].token_estimate));
    let k = target_groups.min(sorted_names.len()).max(1);
    let mut buckets: Vec<Vec<String>> = vec![Vec::new(); k];
    let mut sizes = vec![0u64; k];
    for name in sorted_names {
        let smallest = (0..k).min_by_key(|&i| sizes[i]).unwrap();
        sizes[smallest] += module_map[&name].token_estimate;
        buckets[smallest].push(name);
    }
    buckets
        .into_iter()
        .enumerate()
        .filter(|(_, b)| !b.is_empty())
        .map(|(i, b)| (i as u64, b))
        .collect()
}

fn labels_to_groups(labels: HashMap<String, u64>) -> BTreeMap<u64, Vec<String>> {
    let mut groups: BTreeMap<u64, Vec<String>> = BTreeMap::new();
    for (name, lbl) in labels {
        groups.entry(lbl).or_default().push(name);
    }
    groups
}

fn find_group(module_name: &str, groups: &BTreeMap<u64, Vec<String>>) -> Option<u64> {
    groups
        .iter()
        .find(|(_, members)| members.iter().any(|m| m == module_name))
        .map(|(gid, _)| *gid)
}

fn group_tokens(modules: &[String], module_map: &ModuleMap) -> u64 {
    modules.iter().map(|m| module_map[m].token_estimate).sum()
}

fn merge_small_groups(
    mut groups: BTreeMap<u64, Vec<String>>,
    adj: &HashMap<String, HashSet<String>>,
    module_map: &ModuleMap,
    min_tokens: u64,
) -> BTreeMap<u64, Vec<String>> {
    loop {
        let mut sorted_gids: Vec<u64> = groups.keys().copied().collect();
        sorted_gids.sort_by_key(|g| group_tokens(&groups[g], module_map));

        let mut merged_one = false;
        for gid in sorted_gids {
            if group_tokens(&groups[&gid], module_map) >= min_tokens {
                continue;
            }
            if groups.len() <= 2 {
                break;
            }
            let mut edge_counts: HashMap<u64, u64> = HashMap::new();
            for m in &groups[&gid] {
                if let Some(neighbors) = adj.get(m) {
                    for nb in neighbors {
                        if let Some(nb_gid) = find_group(nb, &groups) {
                            if nb_gid != gid {
                                *edge_counts.entry(nb_gid).or_insert(0) += 1;
                            }
                        }
                    }
                }
            }
            let target = if !edge_counts.is_empty() {
                *edge_counts.iter().max_by_key(|(_, c)| **c).unwrap().0
            } else {
                *groups
                    .keys()
                    .filter(|g| **g != gid)
                    .min_by_key(|g| group_tokens(&groups[g], module_map))
                    .unwrap()
            };
            let removed = groups.remove(&gid).unwrap();
            groups.get_mut(&target).unwrap().extend(removed);
            merged_one = true;
            break;
        }
        if !merged_one {
            break;
        }
    }
    groups
}

fn split_large_groups(
    mut groups: BTreeMap<u64, Vec<String>>,
    module_map: &ModuleMap,
    max_tokens: u64,
    max_areas: usize,
) -> BTreeMap<u64, Vec<String>> {
    let mut next_id = groups.keys().copied().max().map(|m| m + 1).unwrap_or(0);
    loop {
        if groups.len() >= max_areas {
            break;
        }
        let mut did_split = false;
        let gids: Vec<u64> = groups.keys().copied().collect();
        for gid in gids {
            let modules = &groups[&gid];
            if group_tokens(modules, module_map) <= max_tokens || modules.len() < 2 {
                continue;
            }
            let mut sorted_mods = modules.clone();
            sorted_mods.sort_by(|a, b| module_map[b].token_estimate.cmp(&module_map[a].token_estimate));
            let mid = sorted_mods.len() / 2;
            let second_half = sorted_mods.split_off(mid);
            groups.insert(gid, sorted_mods);
            groups.insert(next_id, second_half);
            next_id += 1;
            did_split = true;
            break;
        }
        if !did_split {
            break;
        }
    }
    groups
}

fn enforce_bounds(
    mut groups: BTreeMap<u64, Vec<String>>,
    module_map: &ModuleMap,
    min_areas: usize,
    max_areas: usize,
) -> BTreeMap<u64, Vec<String>> {
    while groups.len() > max_areas {
        let mut sorted_gids: Vec<u64> = groups.keys().copied().collect();
        sorted_gids.sort_by_key(|g| group_tokens(&groups[g], module_map));
        let smallest = sorted_gids[0];
        let second = sorted_gids[1];
        let removed = groups.remove(&smallest).unwrap();
        groups.get_mut(&second).unwrap().extend(removed);
    }

    let mut next_id = groups.keys().copied().max().map(|m| m + 1).unwrap_or(0);
    while groups.len() < min_areas {
        let largest = *groups
            .iter()
            .max_by_key(|(_, m)| group_tokens(m, module_map))
            .map(|(g, _)| g)
            .unwrap();
        if groups[&largest].len() < 2 {
            break;
        }
        let mut sorted_mods = groups[&largest].clone();
        sorted_mods.sort_by(|a, b| module_map[b].token_estimate.cmp(&module_map[a].token_estimate));
        let mid = sorted_mods.len() / 2;
        let second_half = sorted_mods.split_off(mid);
        groups.insert(largest, sorted_mods);
        groups.insert(next_id, second_half);
        next_id += 1;
    }

    groups
}

fn title_case(s: &str) -> String {
    s.split_whitespace()
        .map(|w| {
            let mut c = w.chars();
            match c.next() {
                Some(f) => f.to_uppercase().collect::<String>() + c.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn name_area(modules: &[String], module_map: &ModuleMap) -> String {
    if modules.len() == 1 {
        return title_case(&modules[0].replace('/', " - "));
    }

    let mut dir_counts: HashMap<String, u32> = HashMap::new();
    for m in modules {
        *dir_counts.entry(module_map[m].top_level_dir.clone()).or_insert(0) += 1;
    }
    let primary = dir_counts.iter().max_by_key(|(_, c)| **c).map(|(d, _)| d.clone()).unwrap();

    if dir_counts.len() == 1 {
        return title_case(&primary.replace('/', " - "));
    }

    let mut others: Vec<&String> = dir_counts.keys().filter(|d| **d != primary).collect();
    others.sort_by(|a, b| dir_counts[*b].cmp(&dir_counts[*a]));
    let others: Vec<String> = others.into_iter().take(2).map(|d| title_case(d)).collect();

    format!("{} & {}", title_case(&primary), others.join(", "))
}

fn assemble_areas(groups: BTreeMap<u64, Vec<String>>, module_map: &ModuleMap) -> Vec<DocumentationArea> {
    let mut entries: Vec<(u64, Vec<String>)> = groups.into_iter().collect();
    entries.sort_by(|a, b| group_tokens(&b.1, module_map).cmp(&group_tokens(&a.1, module_map)));

    entries
        .into_iter()
        .map(|(_, module_names)| {
            let mut all_files = Vec::new();
            let mut total_tokens = 0u64;
            for m in &module_names {
                let info = &module_map[m];
                all_files.extend(info.files.clone());
                total_tokens += info.token_estimate;
            }
            let mut sorted_names = module_names.clone();
            sorted_names.sort();
            DocumentationArea {
                name: name_area(&module_names, module_map),
                module_names: sorted_names,
                files: all_files,
                token_estimate: total_tokens,
            }
        })
        .collect()
}

fn single_area(analysis: &RepoAnalysis) -> DocumentationArea {
    let mut all_modules: Vec<String> = analysis.module_map.keys().cloned().collect();
    all_modules.sort();
    let all_files: Vec<(String, u64)> =
        analysis.module_map.values().flat_map(|m| m.files.clone()).collect();

    let name = if analysis.module_count == 1 {
        analysis.module_map.keys().next().cloned().unwrap_or_default()
    } else if let Some((dir, _)) = analysis.top_dirs.first() {
        title_case(dir)
    } else {
        "Project".to_string()
    };

    DocumentationArea {
        name,
        module_names: all_modules,
        files: all_files,
        token_estimate: analysis.token_estimate,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::CrateMarker;
    use isocrates_common::{ModuleInfo, SizeLabel};
    use std::collections::{BTreeMap as StdBTreeMap, BTreeSet};

    fn module(name: &str, top_dir: &str, tokens: u64) -> ModuleInfo {
        ModuleInfo {
            name: name.to_string(),
            top_level_dir: top_dir.to_string(),
            files: vec![(format!("{name}/f.rs"), tokens * 4)],
            token_estimate: tokens,
            imports_from: BTreeSet::new(),
            imported_by: BTreeSet::new(),
            entry_points: Vec::new(),
            language_histogram: StdBTreeMap::new(),
        }
    }

    fn analysis_with_modules(modules: Vec<ModuleInfo>) -> RepoAnalysis {
        let module_map: ModuleMap = modules.into_iter().map(|m| (m.name.clone(), m)).collect();
        let token_estimate = module_map.values().map(|m| m.token_estimate).sum();
        RepoAnalysis {
            file_manifest: Vec::new(),
            token_estimate,
            file_count: 0,
            total_bytes: token_estimate * 4,
            size_label: SizeLabel::from_token_estimate(token_estimate),
            top_dirs: Vec::new(),
            module_count: module_map.len(),
            module_map,
            crates: Vec::<CrateMarker>::new(),
        }
    }

    #[test]
    fn below_module_count_threshold_returns_single_area() {
        let modules = vec![module("a", "a", 100_000), module("b", "b", 100_000), module("c", "c", 100_000)];
        let analysis = analysis_with_modules(modules);
        let areas = partition_for_documentation(&analysis, 1_000);
        assert_eq!(areas.len(), 1);
    }

    #[test]
    fn below_budget_multiplier_returns_single_area() {
        let modules: Vec<ModuleInfo> =
            (0..50).map(|i| module(&format!("m{i}"), &format!("m{i}"), 10)).collect();
        let analysis = analysis_with_modules(modules);
        let areas = partition_for_documentation(&analysis, 10_000);
        assert_eq!(areas.len(), 1);
    }

    #[test]
    fn force_split_when_fully_connected_collapses_to_one_community() {
        let mut modules: StdBTreeMap<String, ModuleInfo> = StdBTreeMap::new();
        for i in 0..6 {
            modules.insert(format!("m{i}"), module(&format!("m{i}"), "shared", 1000));
        }
        let names: Vec<String> = modules.keys().cloned().collect();
        for name in &names {
            for other in &names {
                if other != name {
                    modules.get_mut(name).unwrap().imports_from.insert(other.clone());
                }
            }
        }
        let token_estimate: u64 = modules.values().map(|m| m.token_estimate).sum();
        let analysis = RepoAnalysis {
            file_manifest: Vec::new(),
            token_estimate,
            file_count: 0,
            total_bytes: token_estimate * 4,
            size_label: SizeLabel::from_token_estimate(token_estimate),
            top_dirs: Vec::new(),
            module_count: modules.len(),
            module_map: modules,
            crates: Vec::new(),
        };
        // token_estimate = 6000, budget=750 -> 6000 >= 2*750=1500, module_count=6>=4
        let areas = partition_for_documentation(&analysis, 750);
        assert!(areas.len() >= DEFAULT_MIN_AREAS);
        assert!(areas.len() <= DEFAULT_MAX_AREAS);
    }

    #[test]
    fn partitioning_is_deterministic_across_runs() {
        let modules: Vec<ModuleInfo> =
            (0..10).map(|i| module(&format!("m{i}"), &format!("dir{}", i % 3), 5_000)).collect();
        let analysis = analysis_with_modules(modules);
        let a1 = partition_for_documentation(&analysis, 1_000);
        let a2 = partition_for_documentation(&analysis, 1_000);
        let names1: Vec<&str> = a1.iter().map(|a| a.name.as_str()).collect();
        let names2: Vec<&str> = a2.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names1, names2);
    }
}
