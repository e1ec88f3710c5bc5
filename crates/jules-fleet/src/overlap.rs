//! File-overlap clustering: a pure function, no I/O. Given a batch of
//! issues with their target files, groups issues that touch a common file
//! into clusters via union-find.

use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone)]
pub struct IssueFiles {
    pub number: u64,
    pub target_files: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct Cluster {
    pub issues: Vec<u64>,
    pub shared_files: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct OverlapReport {
    pub clean: Vec<u64>,
    pub overlaps: Vec<u64>,
    pub clusters: Vec<Cluster>,
}

struct UnionFind {
    parent: Vec<usize>,
}

impl UnionFind {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
        }
    }

    fn find(&mut self, x: usize) -> usize {
        if self.parent[x] != x {
            self.parent[x] = self.find(self.parent[x]);
        }
        self.parent[x]
    }

    fn union(&mut self, a: usize, b: usize) {
        let ra = self.find(a);
        let rb = self.find(b);
        if ra != rb {
            self.parent[ra] = rb;
        }
    }
}

/// Clusters issues that share at least one target file. A file shared by
/// only one issue does not count as an overlap.
pub fn cluster_overlaps(issues: &[IssueFiles]) -> OverlapReport {
    let mut file_to_issues: HashMap<&str, Vec<usize>> = HashMap::new();
    for (idx, issue) in issues.iter().enumerate() {
        for file in &issue.target_files {
            file_to_issues.entry(file.as_str()).or_default().push(idx);
        }
    }

    let overlapping_files: Vec<(&str, &Vec<usize>)> = file_to_issues
        .iter()
        .filter(|(_, idxs)| idxs.len() >= 2)
        .map(|(f, idxs)| (*f, idxs))
        .collect();

    let mut uf = UnionFind::new(issues.len());
    for (_, idxs) in &overlapping_files {
        for pair in idxs.windows(2) {
            uf.union(pair[0], pair[1]);
        }
    }

    let overlapping_idx: HashSet<usize> = overlapping_files
        .iter()
        .flat_map(|(_, idxs)| idxs.iter().copied())
        .collect();

    let mut groups: HashMap<usize, Vec<usize>> = HashMap::new();
    for &idx in &overlapping_idx {
        let root = uf.find(idx);
        groups.entry(root).or_default().push(idx);
    }

    let mut clusters: Vec<Cluster> = groups
        .into_values()
        .map(|mut idxs| {
            idxs.sort_unstable();
            let issue_numbers: Vec<u64> = idxs.iter().map(|&i| issues[i].number).collect();
            let shared_files: Vec<String> = overlapping_files
                .iter()
                .filter(|(_, file_idxs)| file_idxs.iter().any(|i| idxs.contains(i)))
                .map(|(f, _)| f.to_string())
                .collect();
            Cluster {
                issues: issue_numbers,
                shared_files,
            }
        })
        .collect();
    clusters.sort_by_key(|c| c.issues.first().copied().unwrap_or(0));

    let clean: Vec<u64> = issues
        .iter()
        .enumerate()
        .filter(|(idx, _)| !overlapping_idx.contains(idx))
        .map(|(_, issue)| issue.number)
        .collect();
    let mut overlaps: Vec<u64> = overlapping_idx.iter().map(|&i| issues[i].number).collect();
    overlaps.sort_unstable();

    OverlapReport {
        clean,
        overlaps,
        clusters,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn issue(number: u64, files: &[&str]) -> IssueFiles {
        IssueFiles {
            number,
            target_files: files.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn disjoint_issues_are_all_clean() {
        let issues = vec![issue(1, &["a.rs"]), issue(2, &["b.rs"])];
        let report = cluster_overlaps(&issues);
        assert_eq!(report.clean, vec![1, 2]);
        assert!(report.clusters.is_empty());
    }

    #[test]
    fn two_issues_sharing_a_file_form_one_cluster() {
        let issues = vec![issue(1, &["a.rs"]), issue(2, &["a.rs"])];
        let report = cluster_overlaps(&issues);
        assert!(report.clean.is_empty());
        assert_eq!(report.clusters.len(), 1);
        assert_eq!(report.clusters[0].issues, vec![1, 2]);
        assert_eq!(report.clusters[0].shared_files, vec!["a.rs".to_string()]);
    }

    #[test]
    fn transitive_overlap_merges_three_issues_into_one_cluster() {
        let issues = vec![
            issue(1, &["a.rs"]),
            issue(2, &["a.rs", "b.rs"]),
            issue(3, &["b.rs"]),
        ];
        let report = cluster_overlaps(&issues);
        assert_eq!(report.clusters.len(), 1);
        let mut members = report.clusters[0].issues.clone();
        members.sort_unstable();
        assert_eq!(members, vec![1, 2, 3]);
    }
}
