//! Persistence of projects, recorded test cases and execution history.
//!
//! Layout under the projects root:
//!
//! ```text
//! <root>/<project>/project_info.json
//! <root>/<project>/<test_case>.json                  recorded steps + script
//! <root>/<project>/results/<test_case>.<ext>         raw script (executed)
//! <root>/<project>/results/<test_case>_<stamp>.json  one record per run
//! ```
//!
//! Looking up a project that does not exist is always `NotFound`. Only saving
//! a recorded test case creates directories for an unknown project, and
//! `create_project` later adopts them.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::clock::{Clock, SystemClock, lenient_timestamp};
use crate::error::{Error, Result};
use crate::recording::TestCase;
use crate::runner::ExecutionResult;

const PROJECT_INFO_FILE: &str = "project_info.json";
const RESULTS_DIR: &str = "results";

/// Project metadata record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectInfo {
    pub project_id: String,
    pub project_name: String,
    #[serde(default)]
    pub description: String,
    #[serde(deserialize_with = "lenient_timestamp")]
    pub created_at: DateTime<Utc>,
    #[serde(deserialize_with = "lenient_timestamp")]
    pub updated_at: DateTime<Utc>,
}

/// Listing entry for a recorded test case
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCaseSummary {
    pub project_id: String,
    pub test_case_id: String,
    /// Size of the raw script in bytes
    pub script_size: u64,
    /// Number of extracted steps (0 when no step record exists)
    pub step_count: usize,
    pub recorded_at: DateTime<Utc>,
}

/// Storage collaborator for the recorder and the orchestrator
pub trait ProjectStore: Send + Sync {
    fn create_project(&self, project_id: &str, name: &str, description: &str) -> Result<ProjectInfo>;
    fn get_project(&self, project_id: &str) -> Result<ProjectInfo>;
    fn update_project(
        &self,
        project_id: &str,
        name: Option<&str>,
        description: Option<&str>,
    ) -> Result<ProjectInfo>;
    fn delete_project(&self, project_id: &str) -> Result<()>;
    fn list_projects(&self) -> Result<Vec<ProjectInfo>>;

    /// Where the raw script for a test case lives (whether or not it exists)
    fn script_path(&self, project_id: &str, test_case_id: &str) -> Result<PathBuf>;
    /// Create the directory scripts and results are written to
    fn ensure_results_dir(&self, project_id: &str) -> Result<PathBuf>;
    fn read_script(&self, project_id: &str, test_case_id: &str) -> Result<String>;

    /// Persist a test case: its script and its step record
    fn save_test_case(&self, test_case: &TestCase) -> Result<()>;
    fn load_test_case(&self, project_id: &str, test_case_id: &str) -> Result<TestCase>;
    /// Test cases with a script, sorted by id
    fn list_test_cases(&self, project_id: &str) -> Result<Vec<TestCaseSummary>>;
    fn delete_test_case(&self, project_id: &str, test_case_id: &str) -> Result<()>;

    /// Append a run record to the history; never overwrites an earlier one.
    /// Fails with `NotFound` when the project does not exist.
    fn append_result(&self, result: &ExecutionResult) -> Result<PathBuf>;
    /// Run history, oldest first, optionally for one test case only
    fn list_results(&self, project_id: &str, test_case_id: Option<&str>) -> Result<Vec<ExecutionResult>>;
}

/// [`ProjectStore`] over a directory tree
#[derive(Clone)]
pub struct FsProjectStore {
    root: PathBuf,
    script_ext: String,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for FsProjectStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FsProjectStore")
            .field("root", &self.root)
            .field("script_ext", &self.script_ext)
            .finish()
    }
}

impl FsProjectStore {
    pub fn new(root: impl Into<PathBuf>, script_ext: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            script_ext: script_ext.into(),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn project_dir(&self, project_id: &str) -> Result<PathBuf> {
        validate_id(project_id)?;
        Ok(self.root.join(project_id))
    }

    fn results_dir(&self, project_id: &str) -> Result<PathBuf> {
        Ok(self.project_dir(project_id)?.join(RESULTS_DIR))
    }

    fn record_path(&self, project_id: &str, test_case_id: &str) -> Result<PathBuf> {
        validate_id(test_case_id)?;
        Ok(self.project_dir(project_id)?.join(format!("{}.json", test_case_id)))
    }

    fn write_project_info(&self, info: &ProjectInfo) -> Result<()> {
        let path = self.project_dir(&info.project_id)?.join(PROJECT_INFO_FILE);
        write_json(&path, info)
    }
}

impl ProjectStore for FsProjectStore {
    fn create_project(&self, project_id: &str, name: &str, description: &str) -> Result<ProjectInfo> {
        let dir = self.project_dir(project_id)?;
        // A directory without metadata (left by a recording) is adopted
        if dir.join(PROJECT_INFO_FILE).exists() {
            return Err(Error::already_exists("project", project_id));
        }
        fs::create_dir_all(dir.join(RESULTS_DIR))?;

        let now = self.clock.now();
        let info = ProjectInfo {
            project_id: project_id.to_string(),
            project_name: name.to_string(),
            description: description.to_string(),
            created_at: now,
            updated_at: now,
        };
        self.write_project_info(&info)?;

        tracing::info!("Created project {}", project_id);
        Ok(info)
    }

    fn get_project(&self, project_id: &str) -> Result<ProjectInfo> {
        let path = self.project_dir(project_id)?.join(PROJECT_INFO_FILE);
        if !path.exists() {
            return Err(Error::not_found("project", project_id));
        }
        read_json(&path)
    }

    fn update_project(
        &self,
        project_id: &str,
        name: Option<&str>,
        description: Option<&str>,
    ) -> Result<ProjectInfo> {
        let mut info = self.get_project(project_id)?;
        if let Some(name) = name {
            info.project_name = name.to_string();
        }
        if let Some(description) = description {
            info.description = description.to_string();
        }
        info.updated_at = self.clock.now();
        self.write_project_info(&info)?;

        tracing::info!("Updated project {}", project_id);
        Ok(info)
    }

    fn delete_project(&self, project_id: &str) -> Result<()> {
        let dir = self.project_dir(project_id)?;
        if !dir.join(PROJECT_INFO_FILE).exists() {
            return Err(Error::not_found("project", project_id));
        }
        fs::remove_dir_all(&dir)?;
        tracing::info!("Deleted project {}", project_id);
        Ok(())
    }

    fn list_projects(&self) -> Result<Vec<ProjectInfo>> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }

        let mut projects = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let path = entry?.path().join(PROJECT_INFO_FILE);
            if !path.exists() {
                continue;
            }
            match read_json::<ProjectInfo>(&path) {
                Ok(info) => projects.push(info),
                Err(e) => tracing::warn!("Skipping unreadable {}: {}", path.display(), e),
            }
        }
        projects.sort_by(|a, b| a.project_id.cmp(&b.project_id));
        Ok(projects)
    }

    fn script_path(&self, project_id: &str, test_case_id: &str) -> Result<PathBuf> {
        validate_id(test_case_id)?;
        Ok(self
            .results_dir(project_id)?
            .join(format!("{}.{}", test_case_id, self.script_ext)))
    }

    fn ensure_results_dir(&self, project_id: &str) -> Result<PathBuf> {
        let dir = self.results_dir(project_id)?;
        fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    fn read_script(&self, project_id: &str, test_case_id: &str) -> Result<String> {
        let path = self.script_path(project_id, test_case_id)?;
        if !path.is_file() {
            return Err(Error::not_found("script", format!("{}/{}", project_id, test_case_id)));
        }
        Ok(fs::read_to_string(path)?)
    }

    fn save_test_case(&self, test_case: &TestCase) -> Result<()> {
        self.ensure_results_dir(&test_case.project_id)?;

        let script = self.script_path(&test_case.project_id, &test_case.test_case_id)?;
        let unchanged = fs::read_to_string(&script)
            .map(|existing| existing == test_case.raw_script)
            .unwrap_or(false);
        if !unchanged {
            write_atomic(&script, test_case.raw_script.as_bytes())?;
        }

        let record = self.record_path(&test_case.project_id, &test_case.test_case_id)?;
        write_json(&record, test_case)?;

        tracing::info!(
            "Saved test case {}/{} ({} steps) to {}",
            test_case.project_id,
            test_case.test_case_id,
            test_case.steps.len(),
            record.display()
        );
        Ok(())
    }

    fn load_test_case(&self, project_id: &str, test_case_id: &str) -> Result<TestCase> {
        let record = self.record_path(project_id, test_case_id)?;
        if !record.exists() {
            return Err(Error::not_found("test case", format!("{}/{}", project_id, test_case_id)));
        }
        read_json(&record)
    }

    fn list_test_cases(&self, project_id: &str) -> Result<Vec<TestCaseSummary>> {
        let dir = self.results_dir(project_id)?;
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut cases = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().map(|e| e != self.script_ext.as_str()).unwrap_or(true) {
                continue;
            }
            let Some(test_case_id) = path.file_stem().map(|s| s.to_string_lossy().into_owned()) else {
                continue;
            };

            let metadata = entry.metadata()?;
            let modified: DateTime<Utc> = metadata
                .modified()
                .map(DateTime::from)
                .unwrap_or_else(|_| self.clock.now());

            let (step_count, recorded_at) = match self.load_test_case(project_id, &test_case_id) {
                Ok(test_case) => (test_case.steps.len(), test_case.recorded_at),
                Err(_) => (0, modified),
            };

            cases.push(TestCaseSummary {
                project_id: project_id.to_string(),
                test_case_id,
                script_size: metadata.len(),
                step_count,
                recorded_at,
            });
        }
        cases.sort_by(|a, b| a.test_case_id.cmp(&b.test_case_id));
        Ok(cases)
    }

    fn delete_test_case(&self, project_id: &str, test_case_id: &str) -> Result<()> {
        let script = self.script_path(project_id, test_case_id)?;
        let record = self.record_path(project_id, test_case_id)?;
        if !script.exists() && !record.exists() {
            return Err(Error::not_found("test case", format!("{}/{}", project_id, test_case_id)));
        }
        for path in [script, record] {
            if path.exists() {
                fs::remove_file(&path)?;
            }
        }
        tracing::info!("Deleted test case {}/{}", project_id, test_case_id);
        Ok(())
    }

    fn append_result(&self, result: &ExecutionResult) -> Result<PathBuf> {
        self.get_project(&result.project_id)?;
        validate_id(&result.test_case_id)?;
        let dir = self.ensure_results_dir(&result.project_id)?;

        let stamp = result.executed_at.format("%Y%m%d_%H%M%S_%6f");
        let mut path = dir.join(format!("{}_{}.json", result.test_case_id, stamp));
        let mut attempt = 1;
        while path.exists() {
            path = dir.join(format!("{}_{}_{}.json", result.test_case_id, stamp, attempt));
            attempt += 1;
        }

        write_json(&path, result)?;
        tracing::debug!("Recorded result at {}", path.display());
        Ok(path)
    }

    fn list_results(&self, project_id: &str, test_case_id: Option<&str>) -> Result<Vec<ExecutionResult>> {
        let dir = self.results_dir(project_id)?;
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut results = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.extension().map(|e| e != "json").unwrap_or(true) {
                continue;
            }
            match read_json::<ExecutionResult>(&path) {
                Ok(result) => {
                    if test_case_id.is_none_or(|id| id == result.test_case_id) {
                        results.push(result);
                    }
                }
                Err(e) => tracing::warn!("Skipping unreadable result {}: {}", path.display(), e),
            }
        }
        results.sort_by(|a, b| a.executed_at.cmp(&b.executed_at));
        Ok(results)
    }
}

/// Identifiers become path components
fn validate_id(id: &str) -> Result<()> {
    let bad = id.is_empty()
        || id == "."
        || id == ".."
        || id.contains(['/', '\\'])
        || id.chars().any(char::is_control);
    if bad {
        return Err(Error::InvalidId(id.to_string()));
    }
    Ok(())
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let content = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let content = serde_json::to_string_pretty(value)?;
    write_atomic(path, content.as_bytes())
}

/// Write through a sibling temp file so readers never see a partial file
fn write_atomic(path: &Path, content: &[u8]) -> Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    fs::write(&tmp, content)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::diagnosis::{FailureCategory, FailureDiagnosis};
    use crate::recording::{Step, StepAction};
    use chrono::{Duration, TimeZone};
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn at(second: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, second).unwrap()
    }

    fn store(dir: &TempDir) -> FsProjectStore {
        FsProjectStore::new(dir.path(), "py").with_clock(Arc::new(FixedClock(at(0))))
    }

    fn test_case(project: &str, id: &str) -> TestCase {
        TestCase {
            project_id: project.to_string(),
            test_case_id: id.to_string(),
            steps: vec![
                Step::new(StepAction::Navigate { url: "https://x".to_string() }, at(1)),
                Step::new(
                    StepAction::Fill {
                        selector: "\"name\"".to_string(),
                        value: "Bob".to_string(),
                    },
                    at(2),
                ),
            ],
            recorded_at: at(3),
            raw_script: "page.goto(\"https://x\")\npage.get_by_placeholder(\"name\").fill(\"Bob\")\n".to_string(),
        }
    }

    #[test]
    fn test_project_crud() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        let created = store.create_project("shop", "Shop", "checkout flows").unwrap();
        assert_eq!(store.get_project("shop").unwrap(), created);
        assert!(matches!(
            store.create_project("shop", "Again", ""),
            Err(Error::AlreadyExists { .. })
        ));

        let updated = store.update_project("shop", Some("Webshop"), None).unwrap();
        assert_eq!(updated.project_name, "Webshop");
        assert_eq!(updated.description, "checkout flows");

        store.create_project("blog", "Blog", "").unwrap();
        let ids: Vec<String> = store.list_projects().unwrap().into_iter().map(|p| p.project_id).collect();
        assert_eq!(ids, vec!["blog", "shop"]);

        store.delete_project("shop").unwrap();
        assert!(store.get_project("shop").unwrap_err().is_not_found());
    }

    #[test]
    fn test_missing_project_is_not_found() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        assert!(store.get_project("ghost").unwrap_err().is_not_found());
        assert!(store.update_project("ghost", Some("x"), None).unwrap_err().is_not_found());
        assert!(!dir.path().join("ghost").exists());
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let original = test_case("shop", "login");

        store.save_test_case(&original).unwrap();
        let loaded = store.load_test_case("shop", "login").unwrap();

        assert_eq!(loaded.steps, original.steps);
        assert_eq!(loaded.raw_script, original.raw_script);
        assert_eq!(store.read_script("shop", "login").unwrap(), original.raw_script);
    }

    #[test]
    fn test_list_test_cases_includes_bare_scripts() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store.save_test_case(&test_case("shop", "login")).unwrap();

        let results = store.ensure_results_dir("shop").unwrap();
        fs::write(results.join("checkout.py"), "print('hi')\n").unwrap();
        fs::write(results.join("notes.txt"), "ignored").unwrap();

        let cases = store.list_test_cases("shop").unwrap();
        let ids: Vec<&str> = cases.iter().map(|c| c.test_case_id.as_str()).collect();
        assert_eq!(ids, vec!["checkout", "login"]);
        assert_eq!(cases[0].step_count, 0);
        assert_eq!(cases[1].step_count, 2);
        assert_eq!(cases[1].recorded_at, at(3));
    }

    #[test]
    fn test_delete_test_case() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store.save_test_case(&test_case("shop", "login")).unwrap();

        store.delete_test_case("shop", "login").unwrap();
        assert!(store.read_script("shop", "login").unwrap_err().is_not_found());
        assert!(store.delete_test_case("shop", "login").unwrap_err().is_not_found());
    }

    #[test]
    fn test_results_append_and_never_overwrite() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store.create_project("shop", "Shop", "").unwrap();
        let first = ExecutionResult::success("shop", "login", "ok".to_string(), at(5));
        let failed = ExecutionResult::failure(
            "shop",
            "login",
            "boom",
            FailureDiagnosis::for_category(FailureCategory::UnknownError),
            at(5),
        );
        let other = ExecutionResult::success("shop", "checkout", String::new(), at(5) + Duration::seconds(1));

        let a = store.append_result(&first).unwrap();
        let b = store.append_result(&failed).unwrap();
        store.append_result(&other).unwrap();
        assert_ne!(a, b);

        assert_eq!(store.list_results("shop", None).unwrap().len(), 3);
        let login = store.list_results("shop", Some("login")).unwrap();
        assert_eq!(login.len(), 2);
        assert!(login.iter().any(|r| r.diagnosis.is_some()));
    }

    #[test]
    fn test_append_result_for_unknown_project_creates_nothing() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let result = ExecutionResult::failure(
            "ghost",
            "nothing",
            "Script not found",
            FailureDiagnosis::for_category(FailureCategory::ScriptNotFound),
            at(1),
        );

        assert!(store.append_result(&result).unwrap_err().is_not_found());
        assert!(!dir.path().join("ghost").exists());
        store.create_project("ghost", "Ghost", "").unwrap();
    }

    #[test]
    fn test_create_project_adopts_recorded_directory() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store.save_test_case(&test_case("shop", "login")).unwrap();
        assert!(store.get_project("shop").unwrap_err().is_not_found());

        let info = store.create_project("shop", "Shop", "").unwrap();
        assert_eq!(info.project_id, "shop");
        assert_eq!(store.list_test_cases("shop").unwrap().len(), 1);
        assert!(matches!(
            store.create_project("shop", "Again", ""),
            Err(Error::AlreadyExists { .. })
        ));
    }

    #[test]
    fn test_project_info_with_naive_timestamps_loads() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        fs::create_dir_all(dir.path().join("legacy")).unwrap();
        fs::write(
            dir.path().join("legacy").join(PROJECT_INFO_FILE),
            r#"{"project_id": "legacy", "project_name": "Legacy", "description": "",
                "created_at": "2024-05-01T10:00:00.000000", "updated_at": "2024-05-01T10:00:05"}"#,
        )
        .unwrap();

        let info = store.get_project("legacy").unwrap();
        assert_eq!(info.created_at, at(0));
        assert_eq!(info.updated_at, at(5));
    }

    #[test]
    fn test_rejects_path_like_ids() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        for id in ["", "..", "a/b", "a\\b"] {
            assert!(matches!(store.get_project(id), Err(Error::InvalidId(_))), "{:?}", id);
        }
        assert!(matches!(store.script_path("shop", "../x"), Err(Error::InvalidId(_))));
    }
}
