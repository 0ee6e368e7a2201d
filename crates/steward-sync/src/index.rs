//! Record location indices and divergent-move detection.
//!
//! An index maps each record id to the set of states holding a copy of it,
//! built from a tree listing (`<State>/<id>.md`). Comparing the indices of
//! the merge base and both sides finds records that two zones moved to
//! different states within one sync window.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;

use steward_core::types::TaskState;
use steward_vault::VaultStore;

use crate::error::SyncError;

const RECORD_SUFFIX: &str = ".md";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocationIndex {
    locations: BTreeMap<String, BTreeSet<TaskState>>,
}

impl LocationIndex {
    /// Build from vault-relative paths. Paths outside the state folders are
    /// ignored.
    pub fn from_paths<I, P>(paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: AsRef<str>,
    {
        let mut index = Self::default();
        for path in paths {
            if let Some((state, id)) = parse_record_path(path.as_ref()) {
                index.insert(id, state);
            }
        }
        index
    }

    /// Index of the working tree.
    pub fn scan(store: &VaultStore) -> Result<Self, SyncError> {
        let mut index = Self::default();
        for state in TaskState::ALL {
            let dir = store.state_dir(state);
            let entries = match fs::read_dir(&dir) {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            for entry in entries {
                let name = entry?.file_name().to_string_lossy().into_owned();
                if let Some(id) = record_id(&name) {
                    index.insert(id.to_string(), state);
                }
            }
        }
        Ok(index)
    }

    pub fn insert(&mut self, id: impl Into<String>, state: TaskState) {
        self.locations.entry(id.into()).or_default().insert(state);
    }

    pub fn states(&self, id: &str) -> Option<&BTreeSet<TaskState>> {
        self.locations.get(id)
    }

    /// Ids present in more than one state.
    pub fn duplicates(&self) -> Vec<(String, Vec<TaskState>)> {
        self.locations
            .iter()
            .filter(|(_, states)| states.len() > 1)
            .map(|(id, states)| (id.clone(), states.iter().copied().collect()))
            .collect()
    }
}

/// A record moved to different states by the two sides since their merge
/// base.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DivergentMove {
    pub id: String,
    pub base: Option<TaskState>,
    pub local: TaskState,
    pub remote: TaskState,
}

/// Ids whose location changed on both sides, to different places.
///
/// A record that only one side moved is an ordinary replicated move. Ids
/// held in several states on one side are reported with that side's most
/// advanced state; the duplicate itself is caught after the merge.
pub fn detect_divergent(
    base: &LocationIndex,
    local: &LocationIndex,
    remote: &LocationIndex,
) -> Vec<DivergentMove> {
    let mut moves = Vec::new();
    for (id, local_states) in &local.locations {
        let Some(remote_states) = remote.states(id) else {
            continue;
        };
        let base_states = base.states(id);
        let moved_locally = base_states != Some(local_states);
        let moved_remotely = base_states != Some(remote_states);
        if !(moved_locally && moved_remotely) || local_states == remote_states {
            continue;
        }
        let (Some(local_state), Some(remote_state)) =
            (local_states.last().copied(), remote_states.last().copied())
        else {
            continue;
        };
        moves.push(DivergentMove {
            id: id.clone(),
            base: base_states.and_then(|s| s.last().copied()),
            local: local_state,
            remote: remote_state,
        });
    }
    moves
}

/// `Needs_Action/EMAIL_1.md` -> `(NeedsAction, "EMAIL_1")`.
pub fn parse_record_path(path: &str) -> Option<(TaskState, String)> {
    let (folder, name) = path.split_once('/')?;
    if name.contains('/') {
        return None;
    }
    let state = TaskState::from_folder(folder)?;
    Some((state, record_id(name)?.to_string()))
}

/// Vault-relative path of a record file.
pub fn record_path(state: TaskState, id: &str) -> String {
    format!("{}/{}{}", state.folder(), id, RECORD_SUFFIX)
}

fn record_id(name: &str) -> Option<&str> {
    if name.starts_with('.') {
        return None;
    }
    name.strip_suffix(RECORD_SUFFIX).filter(|id| !id.is_empty())
}
