use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::changelog::payload::{ChangelogPayload, ChangelogType, PayloadPatch};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangelogStatus {
    Pending,
    Done,
    Failed,
}

impl ChangelogStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangelogStatus::Pending => "PENDING",
            ChangelogStatus::Done => "DONE",
            ChangelogStatus::Failed => "FAILED",
        }
    }

    /// PENDING may finish as DONE or FAILED. Rewriting the current status is
    /// allowed; anything else is not.
    pub fn can_transition_to(&self, next: ChangelogStatus) -> bool {
        use ChangelogStatus::*;
        matches!(
            (self, next),
            (Pending, Done)
                | (Pending, Failed)
                | (Pending, Pending)
                | (Done, Done)
                | (Failed, Failed)
        )
    }
}

impl fmt::Display for ChangelogStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChangelogStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s {
            "PENDING" => Ok(ChangelogStatus::Pending),
            "DONE" => Ok(ChangelogStatus::Done),
            "FAILED" => Ok(ChangelogStatus::Failed),
            other => Err(anyhow::anyhow!("unknown changelog status {:?}", other)),
        }
    }
}

/// One recorded schema-change execution.
#[derive(Clone, Debug, PartialEq)]
pub struct ChangelogEntry {
    pub database_id: i64,
    pub payload: ChangelogPayload,

    pub prev_sync_history_id: Option<i64>,
    pub sync_history_id: Option<i64>,
    pub status: ChangelogStatus,

    // Output only, ignored on create.
    pub id: i64,
    pub creator_id: i64,
    /// Unix epoch milliseconds.
    pub created_time: i64,
}

impl ChangelogEntry {
    pub fn new(database_id: i64, status: ChangelogStatus, payload: ChangelogPayload) -> Self {
        Self {
            database_id,
            payload,
            prev_sync_history_id: None,
            sync_history_id: None,
            status,
            id: 0,
            creator_id: 0,
            created_time: 0,
        }
    }

    pub fn with_prev_sync_history_id(mut self, prev_sync_history_id: i64) -> Self {
        self.prev_sync_history_id = Some(prev_sync_history_id);
        self
    }
}

/// Optional predicates for `ChangelogStore::list`. All set fields are ANDed.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FindChangelog {
    pub id: Option<i64>,
    pub database_id: Option<i64>,

    pub type_list: Vec<ChangelogType>,
    /// Resource filter expression, e.g.
    /// `tableExists('db', 'public', 't1') || tableExists('db', 'public', 't2')`.
    pub resources_filter: Option<String>,

    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// A sparse update. Only the fields that are set change.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct UpdateChangelog {
    pub id: i64,

    pub sync_history_id: Option<i64>,
    /// Merged into the payload's `revision`; the rest of the payload is kept.
    pub revision_id: Option<i64>,
    pub status: Option<ChangelogStatus>,
}

impl UpdateChangelog {
    pub fn new(id: i64) -> Self {
        Self {
            id,
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.sync_history_id.is_none() && self.revision_id.is_none() && self.status.is_none()
    }

    pub(crate) fn payload_patch(&self) -> PayloadPatch {
        PayloadPatch {
            revision: self.revision_id,
        }
    }
}

/// Row shape of the `changelog` table as read by serde_rusqlite.
#[derive(Debug, Deserialize)]
pub(crate) struct ChangelogRow {
    pub id: i64,
    pub creator_id: i64,
    pub created_ts: i64,
    pub database_id: i64,
    pub status: String,
    pub prev_sync_history_id: Option<i64>,
    pub sync_history_id: Option<i64>,
    pub payload: String,
}

impl TryFrom<ChangelogRow> for ChangelogEntry {
    type Error = anyhow::Error;

    fn try_from(row: ChangelogRow) -> anyhow::Result<Self> {
        let payload = ChangelogPayload::decode(&row.payload).map_err(|e| {
            anyhow::anyhow!("failed to decode payload of changelog {}: {}", row.id, e)
        })?;
        Ok(ChangelogEntry {
            database_id: row.database_id,
            payload,
            prev_sync_history_id: row.prev_sync_history_id,
            sync_history_id: row.sync_history_id,
            status: row.status.parse()?,
            id: row.id,
            creator_id: row.creator_id,
            created_time: row.created_ts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ChangelogStatus::*;

    #[test]
    fn status_transitions() {
        assert!(Pending.can_transition_to(Done));
        assert!(Pending.can_transition_to(Failed));
        assert!(Done.can_transition_to(Done));
        assert!(!Done.can_transition_to(Pending));
        assert!(!Failed.can_transition_to(Pending));
        assert!(!Done.can_transition_to(Failed));
        assert!(!Failed.can_transition_to(Done));
    }

    #[test]
    fn status_parses_its_own_output() -> anyhow::Result<()> {
        for status in [Pending, Done, Failed] {
            assert_eq!(status.as_str().parse::<ChangelogStatus>()?, status);
        }
        assert!("pending".parse::<ChangelogStatus>().is_err());
        Ok(())
    }

    #[test]
    fn empty_update_is_detected() {
        let mut update = UpdateChangelog::new(1);
        assert!(update.is_empty());
        update.revision_id = Some(9);
        assert!(!update.is_empty());
        assert_eq!(update.payload_patch().revision, Some(9));
    }

    #[test]
    fn row_with_bad_payload_fails_to_decode() {
        let row = ChangelogRow {
            id: 3,
            creator_id: 1,
            created_ts: 0,
            database_id: 1,
            status: "DONE".to_string(),
            prev_sync_history_id: None,
            sync_history_id: None,
            payload: "{}".to_string(),
        };
        let err = ChangelogEntry::try_from(row).unwrap_err();
        assert!(err.to_string().contains("changelog 3"));
    }
}
