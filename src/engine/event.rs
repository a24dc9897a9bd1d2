//! Per-pass event aggregation.
//!
//! A `ConfigChanEvent` is the only thing the commit gate looks at. Every
//! fragment is registered as pending (failed) before any task runs, so a
//! task that never reports keeps the pass from committing.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};

use tempfile::TempPath;

/// Stages a fragment goes through inside a pass, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FetchStep {
    Download,
    Render,
    Validate,
}

impl FetchStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            FetchStep::Download => "download",
            FetchStep::Render => "render",
            FetchStep::Validate => "validate",
        }
    }
}

impl fmt::Display for FetchStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A fragment's downloaded, rendered and validated copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TmpFile {
    /// Fragment key, `<repo>/<file>`.
    pub name: String,
    pub path: PathBuf,
}

/// Outcomes of one repository's fragments within a pass.
#[derive(Debug, Default)]
pub struct RepoFileEvent {
    pub success: HashMap<String, bool>,
    pub errors: HashMap<String, String>,
    pub tmp_files: HashMap<String, TempPath>,
    /// Outcome of every step a fragment reached. Never read by the commit gate.
    pub steps: HashMap<String, BTreeMap<FetchStep, bool>>,
    timeouts: HashSet<String>,
}

impl RepoFileEvent {
    fn absorb(&mut self, other: RepoFileEvent) {
        for (key, ok) in other.success {
            if ok {
                self.errors.remove(&key);
                self.timeouts.remove(&key);
            }
            self.success.insert(key, ok);
        }
        self.errors.extend(other.errors);
        self.tmp_files.extend(other.tmp_files);
        self.timeouts.extend(other.timeouts);
        for (key, steps) in other.steps {
            self.steps.entry(key).or_default().extend(steps);
        }
    }
}

/// Everything one reconciliation pass learned about a manager's fragments.
#[derive(Debug)]
pub struct ConfigChanEvent {
    /// Declared merged primary file.
    pub config_file: PathBuf,
    pub repos: HashMap<String, RepoFileEvent>,
}

impl ConfigChanEvent {
    pub fn new(config_file: impl Into<PathBuf>) -> Self {
        Self {
            config_file: config_file.into(),
            repos: HashMap::new(),
        }
    }

    fn repo(&mut self, repo: &str) -> &mut RepoFileEvent {
        self.repos.entry(repo.to_string()).or_default()
    }

    /// Register a fragment as not yet successful.
    pub fn expect(&mut self, repo: &str, key: &str) {
        let entry = self.repo(repo);
        entry.success.entry(key.to_string()).or_insert(false);
    }

    /// Record the latest step outcome for a fragment. The last write wins.
    pub fn set_success(&mut self, repo: &str, key: &str, ok: bool) {
        let entry = self.repo(repo);
        entry.success.insert(key.to_string(), ok);
        if ok {
            entry.errors.remove(key);
            entry.timeouts.remove(key);
        }
    }

    pub fn set_failure(&mut self, repo: &str, key: &str, error: impl Into<String>, timed_out: bool) {
        let entry = self.repo(repo);
        entry.success.insert(key.to_string(), false);
        entry.errors.insert(key.to_string(), error.into());
        entry.tmp_files.remove(key);
        if timed_out {
            entry.timeouts.insert(key.to_string());
        } else {
            entry.timeouts.remove(key);
        }
    }

    /// Record one step's outcome; earlier steps keep their entries.
    pub fn set_step(&mut self, repo: &str, key: &str, step: FetchStep, ok: bool) {
        self.repo(repo).steps.entry(key.to_string()).or_default().insert(step, ok);
    }

    /// Last step a fragment reached and how it went.
    pub fn last_step(&self, key: &str) -> Option<(FetchStep, bool)> {
        self.repos
            .values()
            .find_map(|r| r.steps.get(key))
            .and_then(|steps| steps.iter().next_back().map(|(step, ok)| (*step, *ok)))
    }

    pub fn set_tmp_file(&mut self, repo: &str, key: &str, path: TempPath) {
        self.repo(repo).tmp_files.insert(key.to_string(), path);
    }

    /// Fold a batch's event into this one.
    pub fn absorb(&mut self, other: ConfigChanEvent) {
        for (repo, event) in other.repos {
            self.repo(&repo).absorb(event);
        }
    }

    /// Number of (succeeded, failed) fragments. Scans every entry.
    pub fn tally(&self) -> (usize, usize) {
        self.repos
            .values()
            .flat_map(|r| r.success.values())
            .fold((0, 0), |(ok, failed), &success| {
                if success {
                    (ok + 1, failed)
                } else {
                    (ok, failed + 1)
                }
            })
    }

    /// True only if every registered fragment in every repo succeeded.
    pub fn can_commit(&self) -> bool {
        let (_, failed) = self.tally();
        failed == 0
    }

    pub fn repo_ok(&self, repo: &str) -> bool {
        self.repos
            .get(repo)
            .map(|r| r.success.values().all(|ok| *ok))
            .unwrap_or(false)
    }

    /// Failed fragment keys with their error, sorted by key.
    pub fn failures(&self) -> Vec<(String, String)> {
        let mut failures: Vec<_> = self
            .repos
            .values()
            .flat_map(|r| {
                r.success.iter().filter(|(_, ok)| !**ok).map(move |(key, _)| {
                    let error = r.errors.get(key).cloned().unwrap_or_else(|| "no result".to_string());
                    (key.clone(), error)
                })
            })
            .collect();
        failures.sort();
        failures
    }

    /// At least one fragment failed, and every failure was a retrieval timeout.
    pub fn only_timeouts(&self) -> bool {
        let mut any = false;
        let mut all = true;
        for repo in self.repos.values() {
            for (key, ok) in &repo.success {
                if !ok {
                    any = true;
                    all &= repo.timeouts.contains(key);
                }
            }
        }
        any && all
    }

    /// Temp files of successful fragments, sorted by name.
    pub fn tmp_files(&self) -> Vec<TmpFile> {
        let mut files: Vec<TmpFile> = self
            .repos
            .values()
            .flat_map(|r| {
                r.tmp_files
                    .iter()
                    .filter(move |(key, _)| r.success.get(*key).copied().unwrap_or(false))
                    .map(|(key, path)| TmpFile {
                        name: key.clone(),
                        path: path.to_path_buf(),
                    })
            })
            .collect();
        files.sort_by(|a, b| a.name.cmp(&b.name));
        files
    }

    /// Per-repo success maps in key order, for logging.
    pub fn summary(&self) -> BTreeMap<&str, BTreeMap<&str, bool>> {
        self.repos
            .iter()
            .map(|(repo, event)| {
                (
                    repo.as_str(),
                    event.success.iter().map(|(k, v)| (k.as_str(), *v)).collect(),
                )
            })
            .collect()
    }
}

/// Look up a fragment in a name-sorted temp file sequence.
pub fn find_tmp_file<'a>(files: &'a [TmpFile], name: &str) -> Option<&'a Path> {
    files
        .binary_search_by(|f| f.name.as_str().cmp(name))
        .ok()
        .map(|i| files[i].path.as_path())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn temp_with(content: &str) -> TempPath {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file.into_temp_path()
    }

    #[test]
    fn test_pending_fragment_blocks_commit() {
        let mut event = ConfigChanEvent::new("/dest/prometheus.yml");
        event.expect("repo1", "repo1/a.yml");
        event.expect("repo1", "repo1/b.yml");
        event.set_success("repo1", "repo1/a.yml", true);

        assert!(!event.can_commit());
        assert_eq!(event.tally(), (1, 1));
        assert_eq!(event.failures(), vec![("repo1/b.yml".to_string(), "no result".to_string())]);

        event.set_success("repo1", "repo1/b.yml", true);
        assert!(event.can_commit());
    }

    #[test]
    fn test_last_recorded_state_wins() {
        let mut event = ConfigChanEvent::new("/dest/p.yml");
        event.set_success("r", "r/a.yml", true);
        event.set_failure("r", "r/a.yml", "invalid butler footer", false);
        assert!(!event.can_commit());
        assert!(!event.repo_ok("r"));
    }

    #[test]
    fn test_tmp_files_sorted_and_successful_only() {
        let mut event = ConfigChanEvent::new("/dest/p.yml");
        for name in ["r2/z.yml", "r1/b.yml", "r1/a.yml"] {
            let repo = name.split('/').next().unwrap();
            event.set_tmp_file(repo, name, temp_with(name));
            event.set_success(repo, name, true);
        }
        event.set_success("r2", "r2/z.yml", false);

        let names: Vec<_> = event.tmp_files().into_iter().map(|f| f.name).collect();
        assert_eq!(names, vec!["r1/a.yml", "r1/b.yml"]);

        let files = event.tmp_files();
        assert!(find_tmp_file(&files, "r1/b.yml").is_some());
        assert!(find_tmp_file(&files, "r2/z.yml").is_none());
    }

    #[test]
    fn test_only_timeouts() {
        let mut event = ConfigChanEvent::new("/dest/p.yml");
        event.set_success("r", "r/a.yml", true);
        assert!(!event.only_timeouts());

        event.set_failure("r", "r/b.yml", "timed out", true);
        assert!(event.only_timeouts());

        event.set_failure("r", "r/c.yml", "unexpected status 404", false);
        assert!(!event.only_timeouts());
    }

    #[test]
    fn test_absorb_batches() {
        let mut event = ConfigChanEvent::new("/dest/p.yml");
        event.expect("r", "r/a.yml");
        event.expect("r", "r/extra.yml");

        let mut primary = ConfigChanEvent::new("/dest/p.yml");
        primary.set_success("r", "r/a.yml", true);
        let mut additional = ConfigChanEvent::new("/dest/p.yml");
        additional.set_failure("r", "r/extra.yml", "boom", false);

        event.absorb(primary);
        assert!(!event.can_commit());
        event.absorb(additional);
        assert_eq!(event.tally(), (1, 1));
        assert_eq!(event.failures()[0].1, "boom");
    }

    #[test]
    fn test_steps_recorded_separately_from_gate() {
        let mut event = ConfigChanEvent::new("/dest/p.yml");
        event.expect("r", "r/a.yml");
        event.set_step("r", "r/a.yml", FetchStep::Download, true);
        event.set_step("r", "r/a.yml", FetchStep::Render, true);
        assert!(!event.can_commit());

        event.set_step("r", "r/a.yml", FetchStep::Validate, false);
        event.set_failure("r", "r/a.yml", "invalid butler header", false);

        assert_eq!(event.last_step("r/a.yml"), Some((FetchStep::Validate, false)));
        let steps = &event.repos["r"].steps["r/a.yml"];
        assert_eq!(steps.get(&FetchStep::Download), Some(&true));
        assert_eq!(steps.get(&FetchStep::Render), Some(&true));
        assert!(event.last_step("r/missing.yml").is_none());
    }

    #[test]
    fn test_dropping_event_removes_temp_files() {
        let tmp = temp_with("x");
        let path = tmp.to_path_buf();
        let mut event = ConfigChanEvent::new("/dest/p.yml");
        event.set_tmp_file("r", "r/a.yml", tmp);
        assert!(path.exists());
        drop(event);
        assert!(!path.exists());
    }
}
