use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};
use tracing::debug;
use walkdir::WalkDir;

use crate::constants::{
    CODE_EXTENSIONS, CODE_PROBE_SAMPLE_LIMIT, PROJECT_MANIFESTS, RESEARCH_KEYWORDS,
};

/// Classification of the session's likely workload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentKind {
    ExistingProject,
    CodeEditing,
    WebResearch,
    Collaboration,
    General,
}

/// Detected user intent with its component requirements.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserIntent {
    pub kind: IntentKind,
    pub confidence: f32,
    pub required: Vec<String>,
    pub optional: Vec<String>,
    pub description: String,
}

/// Components loaded unconditionally during the essentials phase.
pub const ESSENTIAL_COMPONENTS: &[&str] = &[
    "config",
    "logger",
    "database",
    "guardian",
    "code_editor",
    "command_log",
    "agent_control",
    "agent_monitor",
];

/// Detect what the user is likely to do next by inspecting the workspace
///
/// A fixed, ordered set of heuristic probes each yields a candidate intent
/// with a confidence score; the highest-confidence candidate wins, with
/// earlier probes winning ties. Probes never fail: any I/O error downgrades
/// the probe to "no signal". With no signal at all, the general intent is
/// returned at confidence 0.5.
pub struct IntentDetector {
    workspace_dir: PathBuf,
}

impl IntentDetector {
    pub fn new(workspace_dir: impl Into<PathBuf>) -> Self {
        Self {
            workspace_dir: workspace_dir.into(),
        }
    }

    pub fn workspace_dir(&self) -> &Path {
        &self.workspace_dir
    }

    /// Evaluate all probes and return the winning intent.
    pub fn detect(&self) -> UserIntent {
        let candidates = [
            self.probe_existing_project(),
            self.probe_code_editing(),
            self.probe_web_research(),
            self.probe_collaboration(),
        ];

        let mut best: Option<UserIntent> = None;
        for candidate in candidates.into_iter().flatten() {
            match &best {
                Some(current) if candidate.confidence <= current.confidence => {}
                _ => best = Some(candidate),
            }
        }

        best.unwrap_or_else(Self::general_intent)
    }

    /// Recommended components for the detected intent: required plus
    /// optional, first occurrence wins, order preserved.
    pub fn recommended(&self) -> Vec<String> {
        let intent = self.detect();
        let mut seen = std::collections::HashSet::new();
        intent
            .required
            .into_iter()
            .chain(intent.optional)
            .filter(|name| seen.insert(name.clone()))
            .collect()
    }

    /// Components that are always loaded, regardless of intent.
    pub fn essential(&self) -> Vec<String> {
        names(ESSENTIAL_COMPONENTS)
    }

    /// Whether the detected intent calls for a component.
    pub fn should_load(&self, component: &str) -> bool {
        let intent = self.detect();
        intent.required.iter().any(|c| c == component)
            || intent.optional.iter().any(|c| c == component)
    }

    fn general_intent() -> UserIntent {
        UserIntent {
            kind: IntentKind::General,
            confidence: 0.5,
            required: names(ESSENTIAL_COMPONENTS),
            optional: Vec::new(),
            description: "General usage - load essential components only".to_string(),
        }
    }

    /// Continuing work on an existing project: VCS metadata, a project
    /// manifest, or files touched in the last 24 hours.
    fn probe_existing_project(&self) -> Option<UserIntent> {
        let has_vcs = self.workspace_dir.join(".git").exists();
        let has_manifest = PROJECT_MANIFESTS
            .iter()
            .any(|name| self.workspace_dir.join(name).exists());
        let has_recent = self.has_recent_files();

        if !(has_vcs || has_manifest || has_recent) {
            return None;
        }

        Some(UserIntent {
            kind: IntentKind::ExistingProject,
            confidence: if has_vcs { 0.8 } else { 0.6 },
            required: names(ESSENTIAL_COMPONENTS),
            optional: names(&["versioning", "backup", "knowledge_graph"]),
            description: "Continuing work on existing project".to_string(),
        })
    }

    /// Code editing: at least one recognizably-code file at the workspace root.
    fn probe_code_editing(&self) -> Option<UserIntent> {
        let mut code_files = 0usize;

        let entries = match std::fs::read_dir(&self.workspace_dir) {
            Ok(entries) => entries,
            Err(e) => {
                debug!("code probe could not read workspace: {}", e);
                return None;
            }
        };

        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let is_code = path
                .extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| CODE_EXTENSIONS.contains(&ext))
                .unwrap_or(false);
            if is_code {
                code_files += 1;
                if code_files >= CODE_PROBE_SAMPLE_LIMIT {
                    break;
                }
            }
        }

        if code_files == 0 {
            return None;
        }

        Some(UserIntent {
            kind: IntentKind::CodeEditing,
            confidence: 0.7,
            required: names(&[
                "config",
                "logger",
                "database",
                "code_editor",
                "command_log",
                "agent_control",
                "guardian",
            ]),
            optional: names(&["sandbox", "agent_monitor"]),
            description: "Code editing and execution".to_string(),
        })
    }

    /// Web research: a filename at the workspace root mentioning research,
    /// searching, or crawling.
    fn probe_web_research(&self) -> Option<UserIntent> {
        let entries = match std::fs::read_dir(&self.workspace_dir) {
            Ok(entries) => entries,
            Err(e) => {
                debug!("research probe could not read workspace: {}", e);
                return None;
            }
        };

        let found = entries.flatten().any(|entry| {
            let name = entry.file_name().to_string_lossy().to_lowercase();
            RESEARCH_KEYWORDS.iter().any(|kw| name.contains(kw))
        });

        if !found {
            return None;
        }

        Some(UserIntent {
            kind: IntentKind::WebResearch,
            confidence: 0.6,
            required: names(&[
                "config",
                "logger",
                "database",
                "agent_control",
                "guardian",
                "network",
                "command_log",
            ]),
            optional: names(&["web_search", "browser", "knowledge_graph"]),
            description: "Web research and data gathering".to_string(),
        })
    }

    /// Collaboration: the workspace VCS has a remote configured.
    fn probe_collaboration(&self) -> Option<UserIntent> {
        if !self.has_vcs_remote() {
            return None;
        }

        Some(UserIntent {
            kind: IntentKind::Collaboration,
            confidence: 0.7,
            required: names(&[
                "config",
                "logger",
                "database",
                "code_editor",
                "command_log",
                "agent_control",
                "guardian",
                "versioning",
            ]),
            optional: names(&["backup", "resource_catalog"]),
            description: "Collaborative development".to_string(),
        })
    }

    fn has_recent_files(&self) -> bool {
        let day = Duration::from_secs(24 * 60 * 60);
        let now = SystemTime::now();

        for entry in WalkDir::new(&self.workspace_dir)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            if !entry.file_type().is_file() {
                continue;
            }
            let Ok(metadata) = entry.metadata() else {
                continue;
            };
            let Ok(modified) = metadata.modified() else {
                continue;
            };
            if now
                .duration_since(modified)
                .map(|age| age < day)
                .unwrap_or(false)
            {
                return true;
            }
        }

        false
    }

    fn has_vcs_remote(&self) -> bool {
        let config_path = self.workspace_dir.join(".git").join("config");
        match std::fs::read_to_string(config_path) {
            Ok(content) => content.to_lowercase().contains("remote"),
            Err(_) => false,
        }
    }
}

fn names(list: &[&str]) -> Vec<String> {
    list.iter().map(|n| n.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn detector(dir: &TempDir) -> IntentDetector {
        IntentDetector::new(dir.path())
    }

    #[test]
    fn test_empty_workspace_yields_general() {
        let dir = TempDir::new().unwrap();
        let intent = detector(&dir).detect();

        assert_eq!(intent.kind, IntentKind::General);
        assert_eq!(intent.confidence, 0.5);
        assert_eq!(intent.required, names(ESSENTIAL_COMPONENTS));
        assert!(intent.optional.is_empty());
    }

    #[test]
    fn test_vcs_metadata_wins_as_existing_project() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join(".git")).unwrap();

        let intent = detector(&dir).detect();
        assert_eq!(intent.kind, IntentKind::ExistingProject);
        assert_eq!(intent.confidence, 0.8);

        let recommended = detector(&dir).recommended();
        assert!(recommended.contains(&"versioning".to_string()));
        assert!(recommended.contains(&"backup".to_string()));
        for essential in ESSENTIAL_COMPONENTS {
            assert!(recommended.contains(&essential.to_string()));
        }
    }

    #[test]
    fn test_manifest_without_vcs_scores_lower() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("Cargo.toml"), "[package]").unwrap();
        // The fresh manifest also counts as a recent file; either way the
        // probe fires at manifest confidence.
        let intent = detector(&dir).detect();

        // A fresh code-free workspace with a manifest: existing project at 0.6.
        assert_eq!(intent.kind, IntentKind::ExistingProject);
        assert_eq!(intent.confidence, 0.6);
    }

    #[test]
    fn test_code_files_beat_recent_files() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("main.rs"), "fn main() {}").unwrap();

        // Recent-file probe fires at 0.6, code probe at 0.7; code wins.
        let intent = detector(&dir).detect();
        assert_eq!(intent.kind, IntentKind::CodeEditing);
        assert_eq!(intent.confidence, 0.7);
        assert!(intent.optional.contains(&"sandbox".to_string()));
    }

    #[test]
    fn test_vcs_outranks_code_files() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join(".git")).unwrap();
        fs::write(dir.path().join("main.py"), "print('hi')").unwrap();

        let intent = detector(&dir).detect();
        assert_eq!(intent.kind, IntentKind::ExistingProject);
    }

    #[test]
    fn test_research_keyword_filename() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("web_scrape_notes.txt"), "notes").unwrap();

        // The fresh file also fires the recent-files probe at 0.6; the
        // research probe ties at 0.6 and the earlier probe wins the tie.
        let intent = detector(&dir).detect();
        assert_eq!(intent.kind, IntentKind::ExistingProject);

        // With nothing recent, the research probe stands alone.
        let old_dir = TempDir::new().unwrap();
        let file = old_dir.path().join("research.txt");
        fs::write(&file, "notes").unwrap();
        let old = SystemTime::now() - Duration::from_secs(3 * 24 * 60 * 60);
        let times = fs::File::open(&file)
            .and_then(|f| f.set_modified(old).map(|_| f))
            .is_ok();
        if times {
            let intent = detector(&old_dir).detect();
            assert_eq!(intent.kind, IntentKind::WebResearch);
            assert_eq!(intent.confidence, 0.6);
        }
    }

    #[test]
    fn test_collaboration_needs_vcs_remote() {
        let dir = TempDir::new().unwrap();
        let git = dir.path().join(".git");
        fs::create_dir(&git).unwrap();
        fs::write(git.join("config"), "[remote \"origin\"]\n\turl = x").unwrap();

        // Existing-project fires at 0.8 and outranks collaboration at 0.7;
        // but the collaboration probe must have fired.
        let det = detector(&dir);
        assert!(det.probe_collaboration().is_some());
        let intent = det.detect();
        assert_eq!(intent.kind, IntentKind::ExistingProject);
    }

    #[test]
    fn test_should_load_follows_intent() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join(".git")).unwrap();

        let det = detector(&dir);
        assert!(det.should_load("versioning"));
        assert!(det.should_load("database"));
        assert!(!det.should_load("browser"));
    }

    #[test]
    fn test_probes_survive_missing_workspace() {
        let det = IntentDetector::new("/definitely/not/a/real/path");
        let intent = det.detect();
        assert_eq!(intent.kind, IntentKind::General);
    }
}
