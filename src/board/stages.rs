//! The stage registry and the transition table.
//!
//! Both are static data and the single source of truth: the `stages` table
//! in SQLite is seeded from [`STAGES`] at migration time so item rows can
//! carry a foreign key, and every transition decision anywhere in the crate
//! goes through [`is_valid_transition`]. Absent pairs are invalid; there is
//! no default-allow path.

use super::models::StageId;

/// One registry entry: display name, position on the board, and the WIP
/// limit (`None` means unlimited).
#[derive(Debug, Clone, Copy)]
pub struct StageSpec {
    pub id: StageId,
    pub name: &'static str,
    pub order: i64,
    pub wip_limit: Option<u32>,
}

pub const STAGES: [StageSpec; 8] = [
    StageSpec {
        id: StageId::Briefings,
        name: "Briefings",
        order: 0,
        wip_limit: None,
    },
    StageSpec {
        id: StageId::Ready,
        name: "Ready",
        order: 1,
        wip_limit: None,
    },
    StageSpec {
        id: StageId::Development,
        name: "Development",
        order: 2,
        wip_limit: Some(3),
    },
    StageSpec {
        id: StageId::Review,
        name: "Review",
        order: 3,
        wip_limit: Some(2),
    },
    StageSpec {
        id: StageId::Testing,
        name: "Testing",
        order: 4,
        wip_limit: Some(2),
    },
    StageSpec {
        id: StageId::Deployment,
        name: "Deployment",
        order: 5,
        wip_limit: Some(1),
    },
    StageSpec {
        id: StageId::Done,
        name: "Done",
        order: 6,
        wip_limit: None,
    },
    StageSpec {
        id: StageId::Blocked,
        name: "Blocked",
        order: 7,
        wip_limit: None,
    },
];

pub fn stage_spec(id: StageId) -> &'static StageSpec {
    match id {
        StageId::Briefings => &STAGES[0],
        StageId::Ready => &STAGES[1],
        StageId::Development => &STAGES[2],
        StageId::Review => &STAGES[3],
        StageId::Testing => &STAGES[4],
        StageId::Deployment => &STAGES[5],
        StageId::Done => &STAGES[6],
        StageId::Blocked => &STAGES[7],
    }
}

pub fn wip_limit(id: StageId) -> Option<u32> {
    stage_spec(id).wip_limit
}

/// The stages an item in `from` may move to. `done` is terminal and
/// `blocked` resumes only through `ready`.
pub fn valid_targets(from: StageId) -> &'static [StageId] {
    match from {
        StageId::Briefings => &[StageId::Ready],
        StageId::Ready => &[StageId::Development, StageId::Blocked],
        StageId::Development => &[StageId::Review, StageId::Ready, StageId::Blocked],
        StageId::Review => &[StageId::Testing, StageId::Development, StageId::Blocked],
        StageId::Testing => &[StageId::Deployment, StageId::Development, StageId::Blocked],
        StageId::Deployment => &[StageId::Done, StageId::Testing, StageId::Blocked],
        StageId::Done => &[],
        StageId::Blocked => &[StageId::Ready],
    }
}

/// Pure lookup into the transition table. Never panics, defined for every
/// pair of stages.
pub fn is_valid_transition(from: StageId, to: StageId) -> bool {
    valid_targets(from).contains(&to)
}

/// Backward moves that send work back for rework. Moving along one of these
/// edges increments the item's rejection count.
pub fn is_rework_transition(from: StageId, to: StageId) -> bool {
    matches!(
        (from, to),
        (StageId::Review, StageId::Development)
            | (StageId::Testing, StageId::Development)
            | (StageId::Deployment, StageId::Testing)
    )
}
