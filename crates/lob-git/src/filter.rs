//! Include/exclude path filtering with shell-style globs.

use glob::Pattern;

use crate::error::GitError;

/// Ordered include/exclude glob filter over working-tree-relative paths.
///
/// A path passes when the include list is empty or any include pattern
/// matches, AND no exclude pattern matches. A pattern matches the path
/// itself or any leading directory of it, so a bare `folder1` selects the
/// whole tree below `folder1/`.
pub struct PathFilter {
    includes: Vec<Pattern>,
    excludes: Vec<Pattern>,
}

impl PathFilter {
    /// Build a filter from glob pattern strings.
    pub fn new(includes: &[String], excludes: &[String]) -> Result<Self, GitError> {
        let compile = |patterns: &[String]| -> Result<Vec<Pattern>, GitError> {
            patterns
                .iter()
                .map(|p| {
                    Pattern::new(p).map_err(|source| GitError::Pattern {
                        pattern: p.clone(),
                        source,
                    })
                })
                .collect()
        };
        Ok(Self {
            includes: compile(includes)?,
            excludes: compile(excludes)?,
        })
    }

    /// A filter that passes everything.
    pub fn all() -> Self {
        Self {
            includes: Vec::new(),
            excludes: Vec::new(),
        }
    }

    /// Whether a working-tree-relative path passes the filter.
    pub fn allows(&self, path: &str) -> bool {
        let path = normalize(path);
        let included =
            self.includes.is_empty() || self.includes.iter().any(|p| matches_prefix(p, path));
        included && !self.excludes.iter().any(|p| matches_prefix(p, path))
    }
}

/// Strip a leading `./` so both `ls-tree` and diff-header paths compare in
/// one shape.
fn normalize(path: &str) -> &str {
    path.strip_prefix("./").unwrap_or(path)
}

/// Match the full path or any directory prefix of it.
fn matches_prefix(pattern: &Pattern, path: &str) -> bool {
    if pattern.matches(path) {
        return true;
    }
    let mut end = 0;
    for component in path.split('/') {
        if end > 0 {
            end += 1;
        }
        end += component.len();
        if pattern.matches(&path[..end]) {
            return true;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter(includes: &[&str], excludes: &[&str]) -> PathFilter {
        let inc: Vec<String> = includes.iter().map(|s| s.to_string()).collect();
        let exc: Vec<String> = excludes.iter().map(|s| s.to_string()).collect();
        PathFilter::new(&inc, &exc).unwrap()
    }

    #[test]
    fn test_empty_filter_allows_everything() {
        let f = PathFilter::all();
        assert!(f.allows("folder1/test.dat"));
        assert!(f.allows("anything"));
    }

    #[test]
    fn test_include_directory_selects_subtree() {
        let f = filter(&["folder1", "folder with spaces"], &[]);
        assert!(f.allows("folder1/test.dat"));
        assert!(f.allows("folder with spaces/foo.bmp"));
        assert!(!f.allows("folder2/nested1/file1.jpg"));
    }

    #[test]
    fn test_include_wildcards() {
        let f = filter(&["folder*/*/*.jpg", "folder*/*.jpg"], &[]);
        assert!(f.allows("folder1/simple.jpg"));
        assert!(f.allows("folder2/nested1/file1.jpg"));
        assert!(f.allows("folder2/nested2/file5.jpg"));
        assert!(!f.allows("folder1/advanced.png"));
        assert!(!f.allows("folder2/nested1/file3.mov"));
    }

    #[test]
    fn test_exclude_wildcard_tail() {
        let f = filter(&[], &["folder1/test*"]);
        assert!(!f.allows("folder1/test.dat"));
        assert!(!f.allows("folder1/test2.dat"));
        assert!(f.allows("folder1/simple.jpg"));
        assert!(f.allows("folder2/nested1/file1.jpg"));
    }

    #[test]
    fn test_include_and_exclude_combined() {
        let f = filter(&["folder2"], &["*/*/*.mov"]);
        assert!(f.allows("folder2/nested1/file1.jpg"));
        assert!(f.allows("folder2/nested2/file4.tiff"));
        assert!(!f.allows("folder2/nested1/file3.mov"));
        assert!(!f.allows("folder1/simple.jpg"));
    }

    #[test]
    fn test_leading_dot_slash_normalized() {
        let f = filter(&["folder1"], &[]);
        assert!(f.allows("./folder1/test.dat"));
    }
}
