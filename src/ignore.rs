//! Ignore rules applied during scanning.
//!
//! The scanner only needs a predicate over relative paths; [`IgnoreMatcher`]
//! is the glob-based implementation used by the CLI. Exclude patterns of the
//! form `**/name/**` also prune the directory `name` itself, so ignored
//! trees are never descended into.

use globset::{Glob, GlobSet, GlobSetBuilder};

use crate::error::ScanError;

/// Capability deciding which paths the scanner skips.
pub trait IgnorePredicate: Send + Sync {
    /// `relative_path` is `/`-separated. `is_dir` is true for directories.
    fn is_ignored(&self, relative_path: &str, is_dir: bool) -> bool;
}

impl<F> IgnorePredicate for F
where
    F: Fn(&str, bool) -> bool + Send + Sync,
{
    fn is_ignored(&self, relative_path: &str, is_dir: bool) -> bool {
        self(relative_path, is_dir)
    }
}

/// Directories and artifacts that are never worth indexing.
pub const DEFAULT_EXCLUDES: &[&str] = &[
    "**/.git/**",
    "**/.svn/**",
    "**/.hg/**",
    "**/node_modules/**",
    "**/target/**",
    "**/dist/**",
    "**/build/**",
    "**/.venv/**",
    "**/__pycache__/**",
    "**/.next/**",
    "**/coverage/**",
    "**/*.min.js",
    "**/*.lock",
];

/// Source extensions indexed when no include globs are configured.
pub const DEFAULT_INCLUDES: &[&str] = &[
    "**/*.rs", "**/*.ts", "**/*.tsx", "**/*.js", "**/*.jsx", "**/*.mjs", "**/*.py",
    "**/*.java", "**/*.kt", "**/*.scala", "**/*.go", "**/*.c", "**/*.h", "**/*.cc",
    "**/*.cpp", "**/*.hpp", "**/*.cs", "**/*.php", "**/*.rb", "**/*.swift", "**/*.m",
    "**/*.mm", "**/*.md", "**/*.markdown", "**/*.ipynb",
];

/// Include/exclude glob matcher.
#[derive(Debug, Clone)]
pub struct IgnoreMatcher {
    include: GlobSet,
    exclude: GlobSet,
    exclude_dirs: GlobSet,
}

impl IgnoreMatcher {
    /// Build a matcher. [`DEFAULT_EXCLUDES`] are always applied; an empty
    /// include list falls back to [`DEFAULT_INCLUDES`].
    pub fn new(include_globs: &[String], exclude_globs: &[String]) -> Result<Self, ScanError> {
        let includes: Vec<String> = if include_globs.is_empty() {
            DEFAULT_INCLUDES.iter().map(|s| s.to_string()).collect()
        } else {
            include_globs.to_vec()
        };

        let mut excludes: Vec<String> = DEFAULT_EXCLUDES.iter().map(|s| s.to_string()).collect();
        excludes.extend(exclude_globs.iter().cloned());

        let dir_patterns: Vec<String> = excludes
            .iter()
            .filter_map(|p| p.strip_suffix("/**").map(str::to_string))
            .collect();

        Ok(Self {
            include: build_globset(&includes)?,
            exclude: build_globset(&excludes)?,
            exclude_dirs: build_globset(&dir_patterns)?,
        })
    }

    /// Matcher with only the default rules.
    pub fn with_defaults() -> Result<Self, ScanError> {
        Self::new(&[], &[])
    }
}

impl IgnorePredicate for IgnoreMatcher {
    fn is_ignored(&self, relative_path: &str, is_dir: bool) -> bool {
        if is_dir {
            return self.exclude_dirs.is_match(relative_path);
        }
        self.exclude.is_match(relative_path) || !self.include.is_match(relative_path)
    }
}

fn build_globset(patterns: &[String]) -> Result<GlobSet, ScanError> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern).map_err(|source| ScanError::Pattern {
            pattern: pattern.clone(),
            source,
        })?;
        builder.add(glob);
    }
    builder.build().map_err(|source| ScanError::Pattern {
        pattern: patterns.join(", "),
        source,
    })
}
