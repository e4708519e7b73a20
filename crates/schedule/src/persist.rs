//! On-disk schedule state: a single JSON file under the runner's state
//! directory, mode 0600.

use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ScheduleError;

pub const STATE_FILE: &str = "schedule_state.json";

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct PersistedState {
    pub jobs: Vec<PersistedJob>,
}

/// One serialized job. The token and handler are rehydrated by re-parsing
/// `token_raw` and `line` at load time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedJob {
    pub id: String,
    pub page_id: String,
    pub line: String,
    pub next_run: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run: Option<DateTime<Utc>>,
    pub enabled: bool,
    pub token_raw: String,
}

pub fn save(path: &Path, state: &PersistedState) -> Result<(), ScheduleError> {
    let json =
        serde_json::to_vec_pretty(state).map_err(|e| ScheduleError::Persist(e.to_string()))?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, json)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
    }
    Ok(())
}

pub fn load(path: &Path) -> Result<PersistedState, ScheduleError> {
    let bytes = fs::read(path)?;
    serde_json::from_slice(&bytes).map_err(|e| ScheduleError::Persist(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn round_trip_preserves_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(STATE_FILE);

        let state = PersistedState {
            jobs: vec![PersistedJob {
                id: "j1".to_string(),
                page_id: "notes.md".to_string(),
                line: "Notify @daily:9am standup".to_string(),
                next_run: Some(Utc.with_ymd_and_hms(2024, 1, 16, 9, 0, 0).unwrap()),
                last_run: None,
                enabled: true,
                token_raw: "daily:9am".to_string(),
            }],
        };

        save(&path, &state).unwrap();
        let loaded = load(&path).unwrap();
        assert_eq!(loaded.jobs.len(), 1);
        assert_eq!(loaded.jobs[0].id, "j1");
        assert_eq!(loaded.jobs[0].next_run, state.jobs[0].next_run);
        assert_eq!(loaded.jobs[0].token_raw, "daily:9am");
    }

    #[test]
    fn instants_serialize_as_rfc3339() {
        let job = PersistedJob {
            id: "j1".to_string(),
            page_id: "p".to_string(),
            line: "l".to_string(),
            next_run: Some(Utc.with_ymd_and_hms(2024, 1, 16, 9, 0, 0).unwrap()),
            last_run: None,
            enabled: true,
            token_raw: "daily:9am".to_string(),
        };
        let json = serde_json::to_string(&job).unwrap();
        assert!(json.contains("2024-01-16T09:00:00Z"), "got: {json}");
    }

    #[cfg(unix)]
    #[test]
    fn state_file_is_private() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(STATE_FILE);
        save(&path, &PersistedState::default()).unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
