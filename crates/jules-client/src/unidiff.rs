//! Pure parser for unified diff text into per-file change summaries. No I/O;
//! a straightforward line-by-line scanner that tracks the current file
//! header and coalesces hunks into one entry per path.

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeType {
    Created,
    Modified,
    Deleted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileChange {
    pub path: String,
    pub change_type: ChangeType,
    pub additions: usize,
    pub deletions: usize,
    pub content: String,
}

/// Splits on `diff --git ` section boundaries and summarizes each section.
/// Sections with no extractable path are skipped.
pub fn parse_unidiff(patch: &str) -> Vec<FileChange> {
    let mut sections = Vec::new();
    let mut current: Option<Vec<&str>> = None;
    for line in patch.lines() {
        if line.starts_with("diff --git ") {
            if let Some(lines) = current.take() {
                sections.push(lines);
            }
            current = Some(vec![line]);
        } else if let Some(lines) = current.as_mut() {
            lines.push(line);
        }
    }
    if let Some(lines) = current.take() {
        sections.push(lines);
    }

    sections
        .into_iter()
        .filter_map(|lines| parse_section(&lines))
        .collect()
}

fn parse_section(lines: &[&str]) -> Option<FileChange> {
    let mut path = None;
    let mut change_type = ChangeType::Modified;
    let mut additions = 0usize;
    let mut deletions = 0usize;
    let mut added_lines = Vec::new();
    let mut in_hunk = false;

    for line in lines {
        if let Some(rest) = line.strip_prefix("--- ") {
            if rest.trim() == "/dev/null" {
                change_type = ChangeType::Created;
            } else if path.is_none() {
                path = strip_ab_prefix(rest.trim());
            }
        } else if let Some(rest) = line.strip_prefix("+++ ") {
            if rest.trim() == "/dev/null" {
                change_type = ChangeType::Deleted;
            } else if path.is_none() {
                path = strip_ab_prefix(rest.trim());
            }
        } else if line.starts_with("@@") {
            in_hunk = true;
        } else if in_hunk && line.starts_with('+') && !line.starts_with("+++") {
            additions += 1;
            added_lines.push(&line[1..]);
        } else if in_hunk && line.starts_with('-') && !line.starts_with("---") {
            deletions += 1;
        }
    }

    // `diff --git a/path b/path` carries the path even when no `---`/`+++`
    // line was extractable (e.g. a pure mode-change section).
    if path.is_none() {
        path = lines
            .first()
            .and_then(|l| l.strip_prefix("diff --git "))
            .and_then(parse_diff_git_line);
    }

    let path = path?;
    let content = match change_type {
        ChangeType::Created | ChangeType::Modified => added_lines.join("\n"),
        ChangeType::Deleted => String::new(),
    };

    Some(FileChange {
        path,
        change_type,
        additions,
        deletions,
        content,
    })
}

fn strip_ab_prefix(raw: &str) -> Option<String> {
    // `--- a/path` / `+++ b/path`; diff paths may also carry a trailing tab
    // timestamp, which we don't care about.
    let raw = raw.split('\t').next().unwrap_or(raw);
    let stripped = raw.strip_prefix("a/").or_else(|| raw.strip_prefix("b/")).unwrap_or(raw);
    Some(stripped.to_string())
}

fn parse_diff_git_line(rest: &str) -> Option<String> {
    let mut parts = rest.split(' ');
    let a = parts.next()?;
    strip_ab_prefix(a)
}
