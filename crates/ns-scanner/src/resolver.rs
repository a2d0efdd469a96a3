//! Target resolution.
//!
//! A command-line target is either a file or a directory. [`TargetResolver`]
//! lists a directory once, without descending, and splits its entries into
//! files and subdirectories. [`TargetResolver::expand`] repeats that
//! breadth-first when recursive scanning is enabled.
//!
//! Paths that do not exist are passed through as files so the scan reports
//! them as unreadable instead of silently dropping them.

use std::collections::{HashSet, VecDeque};
use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use ignore::WalkBuilder;
use tracing::{debug, warn};

use crate::error::ScanError;

/// The immediate contents of one target.
#[derive(Debug, Default)]
pub struct ResolvedTarget {
    /// Files to scan, sorted.
    pub files: Vec<Utf8PathBuf>,
    /// Subdirectories found, sorted. Only descended into when recursive.
    pub directories: Vec<Utf8PathBuf>,
    /// Entries that could not be resolved, in listing order.
    pub failures: Vec<ScanError>,
}

/// Turns command-line targets into absolute file paths.
///
/// # Examples
///
/// ```no_run
/// use camino::Utf8Path;
/// use ns_scanner::TargetResolver;
///
/// let resolver = TargetResolver::new();
/// let target = resolver.resolve(Utf8Path::new("./images"))?;
/// println!("{} files, {} subdirectories", target.files.len(), target.directories.len());
/// # Ok::<(), ns_scanner::ScanError>(())
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct TargetResolver {
    follow_links: bool,
}

impl TargetResolver {
    /// Creates a resolver that does not follow symbolic links.
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self {
            follow_links: false,
        }
    }

    /// Configures whether symbolic links to directories are followed.
    #[must_use]
    pub const fn with_follow_links(mut self, follow: bool) -> Self {
        self.follow_links = follow;
        self
    }

    /// Lists `root` one level deep.
    ///
    /// A root that is not a directory (or does not exist) resolves to itself
    /// as the only file. An entry that cannot be resolved (a name that is not
    /// UTF-8, a dangling or looping link) is recorded in
    /// [`ResolvedTarget::failures`] without affecting its siblings, as is a
    /// directory that cannot be listed at all.
    ///
    /// # Errors
    ///
    /// Fails only when `root` itself cannot be made absolute.
    pub fn resolve(&self, root: &Utf8Path) -> Result<ResolvedTarget, ScanError> {
        let root = absolutize(root)?;

        if !root.is_dir() {
            return Ok(ResolvedTarget {
                files: vec![root],
                ..ResolvedTarget::default()
            });
        }

        let mut target = ResolvedTarget::default();
        for result in self.build_walker(&root) {
            let entry = match result {
                Ok(entry) => entry,
                Err(source) => {
                    let path = error_path(&source).unwrap_or_else(|| root.clone());
                    target.failures.push(ScanError::Resolve { path, source });
                    continue;
                }
            };

            // The walker yields the root itself at depth 0.
            if entry.depth() == 0 {
                continue;
            }

            let Some(path) = Utf8Path::from_path(entry.path()) else {
                target
                    .failures
                    .push(ScanError::NonUtf8Path(entry.path().to_owned()));
                continue;
            };

            if entry.file_type().is_some_and(|ft| ft.is_dir()) {
                target.directories.push(path.to_owned());
            } else {
                target.files.push(path.to_owned());
            }
        }

        target.files.sort();
        target.directories.sort();
        debug!(
            root = %root,
            files = target.files.len(),
            directories = target.directories.len(),
            failures = target.failures.len(),
            "Resolved directory"
        );
        Ok(target)
    }

    /// Resolves every root and returns the files to scan, in order.
    ///
    /// With `recursive` set, discovered subdirectories are expanded
    /// breadth-first after the files of the directory that contains them.
    /// Each entry or directory that cannot be resolved shows up as an `Err`
    /// after the files of its directory, and expansion carries on.
    ///
    /// A directory reached twice (through links) is only expanded once.
    pub fn expand(
        &self,
        roots: &[Utf8PathBuf],
        recursive: bool,
    ) -> Vec<Result<Utf8PathBuf, ScanError>> {
        let mut expanded = Vec::new();
        let mut visited = HashSet::new();
        let mut pending: VecDeque<Utf8PathBuf> = roots.iter().cloned().collect();

        while let Some(next) = pending.pop_front() {
            if next.is_dir() {
                let key = fs::canonicalize(next.as_std_path())
                    .unwrap_or_else(|_| next.clone().into_std_path_buf());
                if !visited.insert(key) {
                    debug!(path = %next, "Directory already expanded, skipping");
                    continue;
                }
            }

            match self.resolve(&next) {
                Ok(target) => {
                    expanded.extend(target.files.into_iter().map(Ok));
                    for failure in target.failures {
                        warn!(error = %failure, "Failed to resolve entry");
                        expanded.push(Err(failure));
                    }
                    if recursive {
                        pending.extend(target.directories);
                    }
                }
                Err(e) => {
                    warn!(path = %next, error = %e, "Failed to resolve target");
                    expanded.push(Err(e));
                }
            }
        }

        expanded
    }

    fn build_walker(&self, root: &Utf8Path) -> ignore::Walk {
        WalkBuilder::new(root)
            // Every entry counts, hidden or ignored
            .standard_filters(false)
            .follow_links(self.follow_links)
            .max_depth(Some(1))
            .build()
    }
}

/// Path of the entry a walker error is about, when it names one.
fn error_path(err: &ignore::Error) -> Option<Utf8PathBuf> {
    match err {
        ignore::Error::WithPath { path, .. } => Utf8PathBuf::from_path_buf(path.clone()).ok(),
        ignore::Error::Loop { child, .. } => Utf8PathBuf::from_path_buf(child.clone()).ok(),
        ignore::Error::WithDepth { err, .. } | ignore::Error::WithLineNumber { err, .. } => {
            error_path(err)
        }
        ignore::Error::Partial(errs) => errs.iter().find_map(error_path),
        _ => None,
    }
}

fn absolutize(path: &Utf8Path) -> Result<Utf8PathBuf, ScanError> {
    if path.is_absolute() {
        return Ok(path.to_owned());
    }
    let cwd = std::env::current_dir().map_err(|e| ScanError::unreadable(path, e))?;
    let cwd = Utf8PathBuf::from_path_buf(cwd).map_err(ScanError::NonUtf8Path)?;
    Ok(cwd.join(path))
}
