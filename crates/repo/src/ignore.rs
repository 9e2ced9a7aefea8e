#![forbid(unsafe_code)]
//! Snapshot ignore rules: a compile-time default set unioned with user
//! patterns from `.stateignore` at the workspace root.
//!
//! Pattern grammar, one per line: `#` comments, `name` or `*.glob`
//! matched against the basename, patterns containing `/` matched against
//! the workspace-relative path, `dir/` restricting a pattern to
//! directories, `!pattern` re-including something an earlier rule
//! excluded.

use std::path::Path;

/// Always ignored when snapshotting. VCS directories, build caches, OS
/// noise, editor state, and credential-shaped files that must never end
/// up content-addressed.
pub const DEFAULT_IGNORE: &[&str] = &[
    // Version control (including our own state directory)
    ".state",
    ".git",
    ".svn",
    ".hg",
    // Build artifacts and caches
    "__pycache__",
    "node_modules",
    ".DS_Store",
    "Thumbs.db",
    // Environment and secrets
    ".env",
    ".env.*",
    // Credentials and keys
    "*.pem",
    "*.key",
    "*.p12",
    "*.pfx",
    "credentials.json",
    "service-account.json",
    // IDE and editor
    ".idea",
    ".vscode",
];

#[derive(Clone, Debug, Default)]
pub struct IgnoreSet {
    names: Vec<String>,
    dir_only: Vec<String>,
    negate: Vec<String>,
}

impl IgnoreSet {
    pub fn defaults() -> Self {
        Self {
            names: DEFAULT_IGNORE.iter().map(|s| s.to_string()).collect(),
            dir_only: Vec::new(),
            negate: Vec::new(),
        }
    }

    /// Defaults plus the `.stateignore` file at `root`, when present.
    pub fn load(root: &Path) -> Self {
        let mut set = Self::defaults();
        let Ok(contents) = std::fs::read_to_string(root.join(crate::layout::IGNORE_FILE_NAME))
        else {
            return set;
        };
        for line in contents.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if let Some(pattern) = line.strip_prefix('!') {
                let pattern = pattern.trim_end_matches('/');
                if !pattern.is_empty() {
                    set.negate.push(pattern.to_string());
                }
            } else if let Some(pattern) = line.strip_suffix('/') {
                set.dir_only.push(pattern.to_string());
            } else {
                set.names.push(line.to_string());
            }
        }
        set
    }

    /// Should the entry named `name` at workspace-relative `rel_path` be
    /// skipped? Negation wins over any exclusion it matches.
    pub fn is_ignored(&self, name: &str, rel_path: &str, is_dir: bool) -> bool {
        let mut matched = self.names.iter().any(|p| pattern_matches(p, name, rel_path));
        if !matched && is_dir {
            matched = self.dir_only.iter().any(|p| pattern_matches(p, name, rel_path));
        }
        if !matched {
            return false;
        }
        !self.negate.iter().any(|p| pattern_matches(p, name, rel_path))
    }
}

/// Patterns with a `/` are matched against the relative path, bare
/// patterns against the basename.
fn pattern_matches(pattern: &str, name: &str, rel_path: &str) -> bool {
    let target = if pattern.contains('/') { rel_path } else { name };
    if target == pattern {
        return true;
    }
    if pattern.contains(['*', '?']) {
        return wildcard_match(pattern, target);
    }
    false
}

/// Minimal `*`/`?` matcher with iterative star backtracking.
fn wildcard_match(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();
    let (mut pi, mut ti) = (0usize, 0usize);
    let mut star: Option<usize> = None;
    let mut mark = 0usize;

    while ti < t.len() {
        if pi < p.len() && (p[pi] == '?' || p[pi] == t[ti]) {
            pi += 1;
            ti += 1;
        } else if pi < p.len() && p[pi] == '*' {
            star = Some(pi);
            mark = ti;
            pi += 1;
        } else if let Some(star_at) = star {
            pi = star_at + 1;
            mark += 1;
            ti = mark;
        } else {
            return false;
        }
    }
    while pi < p.len() && p[pi] == '*' {
        pi += 1;
    }
    pi == p.len()
}
