use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Identifier of a pipeline stage. The set is fixed; `stages.rs` holds the
/// order, WIP limits, and transition table for each id.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StageId {
    Briefings,
    Ready,
    Development,
    Review,
    Testing,
    Deployment,
    Done,
    Blocked,
}

impl StageId {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Briefings => "briefings",
            Self::Ready => "ready",
            Self::Development => "development",
            Self::Review => "review",
            Self::Testing => "testing",
            Self::Deployment => "deployment",
            Self::Done => "done",
            Self::Blocked => "blocked",
        }
    }
}

impl std::fmt::Display for StageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StageId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "briefings" => Ok(Self::Briefings),
            "ready" => Ok(Self::Ready),
            "development" => Ok(Self::Development),
            "review" => Ok(Self::Review),
            "testing" => Ok(Self::Testing),
            "deployment" => Ok(Self::Deployment),
            "done" => Ok(Self::Done),
            "blocked" => Ok(Self::Blocked),
            _ => Err(format!("Invalid stage: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ItemType {
    Feature,
    Bug,
    Chore,
    Spike,
}

impl ItemType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Feature => "feature",
            Self::Bug => "bug",
            Self::Chore => "chore",
            Self::Spike => "spike",
        }
    }
}

impl FromStr for ItemType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "feature" => Ok(Self::Feature),
            "bug" => Ok(Self::Bug),
            "chore" => Ok(Self::Chore),
            "spike" => Ok(Self::Spike),
            _ => Err(format!("Invalid item type: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Medium,
    High,
    Critical,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            "critical" => Ok(Self::Critical),
            _ => Err(format!("Invalid priority: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MissionState {
    Active,
    Completed,
    Archived,
}

impl MissionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Archived => "archived",
        }
    }
}

impl FromStr for MissionState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "completed" => Ok(Self::Completed),
            "archived" => Ok(Self::Archived),
            _ => Err(format!("Invalid mission state: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ActivityLevel {
    Info,
    Warn,
    Error,
}

impl ActivityLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

impl FromStr for ActivityLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "info" => Ok(Self::Info),
            "warn" => Ok(Self::Warn),
            "error" => Ok(Self::Error),
            _ => Err(format!("Invalid activity level: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: i64,
    pub name: String,
    pub created_at: String,
}

/// A unit of work moving through the pipeline.
///
/// `dependencies` and `work_log` are assembled from their own tables on
/// read. Archived items are never surfaced, so no archive flag appears here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkItem {
    pub id: i64,
    pub project_id: i64,
    pub title: String,
    pub description: String,
    pub item_type: ItemType,
    pub priority: Priority,
    pub stage: StageId,
    pub assigned_agent: Option<String>,
    pub rejection_count: i64,
    #[serde(default)]
    pub dependencies: Vec<i64>,
    #[serde(default)]
    pub work_log: Vec<WorkLogEntry>,
    pub created_at: String,
    pub updated_at: String,
    pub completed_at: Option<String>,
}

impl WorkItem {
    /// SHA-256 over the content fields, hex encoded. Two reads with equal
    /// digests describe the same item content regardless of read time, which
    /// is what the change feed compares to detect in-place updates.
    /// Timestamps and the stage are deliberately excluded: the stage has its
    /// own event type and timestamps are not content.
    pub fn content_digest(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.title.as_bytes());
        hasher.update([0x1f]);
        hasher.update(self.description.as_bytes());
        hasher.update([0x1f]);
        hasher.update(self.item_type.as_str().as_bytes());
        hasher.update([0x1f]);
        hasher.update(self.priority.as_str().as_bytes());
        hasher.update([0x1f]);
        hasher.update(self.assigned_agent.as_deref().unwrap_or("").as_bytes());
        hasher.update([0x1f]);
        hasher.update(self.rejection_count.to_string().as_bytes());
        hasher.update([0x1f]);
        hasher.update(self.completed_at.as_deref().unwrap_or("").as_bytes());
        hasher.update([0x1f]);
        for dep in &self.dependencies {
            hasher.update(dep.to_string().as_bytes());
            hasher.update([0x2c]);
        }
        format!("{:x}", hasher.finalize())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkLogEntry {
    pub id: i64,
    pub item_id: i64,
    pub agent: String,
    pub action: String,
    pub summary: String,
    pub created_at: String,
}

/// An exclusive hold on an item by one agent. At most one exists per item;
/// the store enforces this.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claim {
    pub item_id: i64,
    pub agent_name: String,
    pub claimed_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mission {
    pub id: i64,
    pub project_id: i64,
    pub name: String,
    pub state: MissionState,
    pub started_at: String,
    pub completed_at: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityEntry {
    pub id: i64,
    pub project_id: i64,
    pub agent: String,
    pub message: String,
    pub level: ActivityLevel,
    pub created_at: String,
}

/// Occupancy of one stage: the registry limit paired with the live count.
/// `available` is `None` for unlimited stages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WipStatus {
    pub stage: StageId,
    pub limit: Option<u32>,
    pub current: u32,
    pub available: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageStatus {
    pub id: StageId,
    pub name: String,
    pub order: i64,
    pub wip: WipStatus,
}

/// Full board for one project: every visible item, current claims, and the
/// project's current mission if one exists.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoardState {
    pub project: Project,
    pub stages: Vec<StageStatus>,
    pub items: Vec<WorkItem>,
    pub claims: Vec<Claim>,
    pub current_mission: Option<Mission>,
}

/// Result of a stage move: the updated item, where it came from, and the
/// occupancy of the stage it landed in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MoveOutcome {
    pub item: WorkItem,
    pub previous_stage: StageId,
    pub wip: WipStatus,
}

/// One poll's view of a project for the change feed. Unlike `BoardState`
/// this includes completed items (their arrival in `done` must be observable
/// as a move) and carries activity rows past the caller's cursor along with
/// the newest activity timestamp for seeding that cursor.
#[derive(Debug, Clone, Default)]
pub struct BoardSnapshot {
    pub items: Vec<WorkItem>,
    pub mission: Option<Mission>,
    pub activity: Vec<ActivityEntry>,
    pub latest_activity_ts: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_item() -> WorkItem {
        WorkItem {
            id: 1,
            project_id: 1,
            title: "Wire up the parser".to_string(),
            description: "Tokenize first".to_string(),
            item_type: ItemType::Feature,
            priority: Priority::Medium,
            stage: StageId::Ready,
            assigned_agent: None,
            rejection_count: 0,
            dependencies: vec![],
            work_log: vec![],
            created_at: "2025-01-01T00:00:00.000Z".to_string(),
            updated_at: "2025-01-01T00:00:00.000Z".to_string(),
            completed_at: None,
        }
    }

    #[test]
    fn test_stage_id_roundtrip() {
        for s in &[
            "briefings",
            "ready",
            "development",
            "review",
            "testing",
            "deployment",
            "done",
            "blocked",
        ] {
            let parsed: StageId = s.parse().unwrap();
            assert_eq!(parsed.as_str(), *s);
        }
        assert!("shipping".parse::<StageId>().is_err());
    }

    #[test]
    fn test_item_type_roundtrip() {
        for s in &["feature", "bug", "chore", "spike"] {
            let parsed: ItemType = s.parse().unwrap();
            assert_eq!(parsed.as_str(), *s);
        }
        assert!("epic".parse::<ItemType>().is_err());
    }

    #[test]
    fn test_priority_roundtrip() {
        for s in &["low", "medium", "high", "critical"] {
            let parsed: Priority = s.parse().unwrap();
            assert_eq!(parsed.as_str(), *s);
        }
        assert!("urgent".parse::<Priority>().is_err());
    }

    #[test]
    fn test_mission_state_roundtrip() {
        for s in &["active", "completed", "archived"] {
            let parsed: MissionState = s.parse().unwrap();
            assert_eq!(parsed.as_str(), *s);
        }
        assert!("paused".parse::<MissionState>().is_err());
    }

    #[test]
    fn test_activity_level_roundtrip() {
        for s in &["info", "warn", "error"] {
            let parsed: ActivityLevel = s.parse().unwrap();
            assert_eq!(parsed.as_str(), *s);
        }
        assert!("debug".parse::<ActivityLevel>().is_err());
    }

    #[test]
    fn test_serde_produces_lowercase_strings() {
        assert_eq!(
            serde_json::to_string(&StageId::Briefings).unwrap(),
            "\"briefings\""
        );
        assert_eq!(
            serde_json::to_string(&Priority::Critical).unwrap(),
            "\"critical\""
        );
        assert_eq!(
            serde_json::to_string(&MissionState::Completed).unwrap(),
            "\"completed\""
        );
    }

    #[test]
    fn test_digest_is_stable() {
        let a = sample_item();
        let b = sample_item();
        assert_eq!(a.content_digest(), b.content_digest());
    }

    #[test]
    fn test_digest_changes_with_content() {
        let a = sample_item();
        let mut b = sample_item();
        b.title = "Wire up the lexer".to_string();
        assert_ne!(a.content_digest(), b.content_digest());

        let mut c = sample_item();
        c.assigned_agent = Some("agent-nine".to_string());
        assert_ne!(a.content_digest(), c.content_digest());

        let mut d = sample_item();
        d.dependencies = vec![7];
        assert_ne!(a.content_digest(), d.content_digest());
    }

    #[test]
    fn test_digest_ignores_timestamps_and_stage() {
        let a = sample_item();
        let mut b = sample_item();
        b.updated_at = "2025-06-01T12:00:00.000Z".to_string();
        b.stage = StageId::Development;
        assert_eq!(a.content_digest(), b.content_digest());
    }
}
