use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::Result as AnyResult;
use rusqlite::types::Value;
use rusqlite::{params, OptionalExtension, Transaction};

use crate::changelog::payload::PayloadPatch;
use crate::changelog::types::{
    ChangelogEntry, ChangelogRow, ChangelogStatus, FindChangelog, UpdateChangelog,
};
use crate::config::{MissingRowPolicy, StoreConfig};
use crate::db::query::{QueryBuilder, SqlFragment};
use crate::db::{CallContext, Db};
use crate::error::{ChangelogError, PersistenceContext, Result};
use crate::filter::{FilterCompiler, PredicateRegistry};

const PAYLOAD_COLUMN: &str = "changelog.payload";

const SELECT_CHANGELOG: &str = "SELECT
        changelog.id,
        changelog.creator_id,
        changelog.created_ts,
        changelog.database_id,
        changelog.status,
        changelog.prev_sync_history_id,
        changelog.sync_history_id,
        changelog.payload
    FROM changelog";

/// Persistence for changelog entries. Every operation runs in its own
/// transaction and commits before returning; the store keeps no other state.
#[derive(Clone)]
pub struct ChangelogStore {
    db: Db,
    filters: FilterCompiler,
    missing_row_policy: MissingRowPolicy,
    enforce_status_transitions: bool,
}

impl ChangelogStore {
    pub fn open(config: &StoreConfig) -> Result<Self> {
        let db = Db::open(config).persistence("open changelog store")?;
        Ok(Self {
            db,
            filters: FilterCompiler::default(),
            missing_row_policy: config.missing_row_policy,
            enforce_status_transitions: config.enforce_status_transitions,
        })
    }

    pub fn open_memory() -> Result<Self> {
        Self::open(&StoreConfig::memory())
    }

    /// Replaces the predicates available to resource filters.
    pub fn with_predicates(mut self, registry: PredicateRegistry) -> Self {
        self.filters = FilterCompiler::new(registry);
        self
    }

    /// Returns a handle sharing this store's pool whose operations are
    /// bounded by `context`: past its deadline, or once its cancel flag is
    /// set, a running statement is interrupted and rolled back, and new
    /// operations fail before touching the database. Either way the caller
    /// gets `ChangelogError::Persistence`.
    pub fn with_context(&self, context: CallContext) -> Self {
        Self {
            db: self.db.with_context(context),
            ..self.clone()
        }
    }

    pub fn close(self) {
        self.db.close();
    }

    /// Inserts `create` and returns its new id. Output-only fields of
    /// `create` are ignored.
    pub fn create(&self, create: &ChangelogEntry, creator_id: i64) -> Result<i64> {
        let payload = create.payload.encode().persistence("encode changelog payload")?;
        let created_ts = now_millis().persistence("read clock")?;

        let id = self
            .db
            .transaction(|txn| {
                Db::execute(
                    txn,
                    "INSERT INTO changelog (
                        creator_id,
                        created_ts,
                        database_id,
                        status,
                        prev_sync_history_id,
                        sync_history_id,
                        payload
                    ) VALUES (?, ?, ?, ?, ?, ?, ?)",
                    params![
                        creator_id,
                        created_ts,
                        create.database_id,
                        create.status.as_str(),
                        create.prev_sync_history_id,
                        create.sync_history_id,
                        payload,
                    ],
                )?;
                Ok(txn.last_insert_rowid())
            })
            .persistence(format!("create changelog for database {}", create.database_id))?;

        log::debug!("Created changelog {} for database {}", id, create.database_id);
        Ok(id)
    }

    /// Applies the fields set in `update`. The revision is merged into the
    /// stored payload; all other payload keys are kept.
    pub fn update(&self, update: &UpdateChangelog) -> Result<()> {
        if update.is_empty() {
            log::warn!("Rejected empty update for changelog {}", update.id);
            return Err(ChangelogError::InvalidArgument(format!(
                "update for changelog {} sets no fields",
                update.id
            )));
        }

        let mut set = Vec::new();
        if let Some(v) = update.sync_history_id {
            set.push(SqlFragment::new("sync_history_id = ?").bind(v));
        }
        if let Some(v) = merge_payload_patch(&update.payload_patch()) {
            set.push(v);
        }
        if let Some(v) = update.status {
            set.push(SqlFragment::new("status = ?").bind(v.as_str().to_string()));
        }

        let (assignments, mut values) = SqlFragment::join(set, ", ").into_parts();
        let sql = format!("UPDATE changelog SET {} WHERE id = ?", assignments);
        values.push(update.id.into());

        let op = format!("update changelog {}", update.id);
        let outcome = self
            .db
            .transaction(|txn| {
                if self.enforce_status_transitions {
                    if let Some(next) = update.status {
                        if let Some(current) = current_status(txn, update.id)? {
                            if !current.can_transition_to(next) {
                                return Ok(UpdateOutcome::Illegal(current, next));
                            }
                        }
                    }
                }
                let affected_rows = Db::execute(txn, &sql, rusqlite::params_from_iter(values))?;
                Ok(UpdateOutcome::Applied(affected_rows))
            })
            .persistence(op)?;

        match outcome {
            UpdateOutcome::Applied(0) => match self.missing_row_policy {
                MissingRowPolicy::NotFound => {
                    log::warn!("Update matched no changelog with id {}", update.id);
                    Err(ChangelogError::NotFound(update.id))
                }
                MissingRowPolicy::Ignore => Ok(()),
            },
            UpdateOutcome::Applied(_) => Ok(()),
            UpdateOutcome::Illegal(from, to) => {
                log::warn!("Rejected status change {} -> {} for changelog {}", from, to, update.id);
                Err(ChangelogError::IllegalTransition {
                    id: update.id,
                    from,
                    to,
                })
            }
        }
    }

    /// Lists entries matching every predicate set in `find`, newest first.
    pub fn list(&self, find: &FindChangelog) -> Result<Vec<ChangelogEntry>> {
        let mut query = QueryBuilder::new(SELECT_CHANGELOG);
        if let Some(v) = find.id {
            query.filter_eq("changelog.id", v);
        }
        if let Some(v) = find.database_id {
            query.filter_eq("changelog.database_id", v);
        }
        if let Some(v) = &find.resources_filter {
            if let Some(fragment) = self.filters.compile(v, PAYLOAD_COLUMN)? {
                query.filter(fragment);
            }
        }
        query
            .filter_in(
                "json_extract(changelog.payload, '$.type')",
                find.type_list.iter().map(|t| t.as_str().to_string()),
            )
            .order_by("changelog.id DESC")
            .limit(find.limit)
            .offset(find.offset);

        let (sql, values) = query.build().into_parts();
        let rows: Vec<ChangelogRow> = self
            .db
            .read_transaction(|txn| Db::query(txn, &sql, rusqlite::params_from_iter(values)))
            .persistence("list changelogs")?;

        rows.into_iter()
            .map(ChangelogEntry::try_from)
            .collect::<AnyResult<Vec<_>>>()
            .persistence("decode changelogs")
    }

    /// Returns the entry with `id`, or `None` if there is none.
    pub fn get(&self, id: i64) -> Result<Option<ChangelogEntry>> {
        let mut changelogs = self.list(&FindChangelog {
            id: Some(id),
            ..Default::default()
        })?;
        match changelogs.len() {
            0 => Ok(None),
            1 => Ok(changelogs.pop()),
            n => {
                log::error!("Found {} changelogs with id {}, expected 1", n, id);
                Err(ChangelogError::Integrity(format!(
                    "found {} changelogs with id {}, expected 1",
                    n, id
                )))
            }
        }
    }
}

enum UpdateOutcome {
    Applied(usize),
    Illegal(ChangelogStatus, ChangelogStatus),
}

/// Lowers a payload patch to a single `payload = json_set(...)` assignment.
/// Each set field wraps the document in one more `json_set`.
fn merge_payload_patch(patch: &PayloadPatch) -> Option<SqlFragment> {
    let mut document = String::from("payload");
    let mut values: Vec<Value> = Vec::new();
    if let Some(revision) = patch.revision {
        document = format!("json_set({}, '$.revision', ?)", document);
        values.push(revision.into());
    }
    if values.is_empty() {
        return None;
    }
    Some(SqlFragment::with_params(format!("payload = {}", document), values))
}

fn current_status(txn: &Transaction, id: i64) -> AnyResult<Option<ChangelogStatus>> {
    let status: Option<String> = txn
        .query_row("SELECT status FROM changelog WHERE id = ?", [id], |row| row.get(0))
        .optional()?;
    status.map(|s| s.parse()).transpose()
}

fn now_millis() -> AnyResult<i64> {
    Ok(SystemTime::now().duration_since(UNIX_EPOCH)?.as_millis() as i64)
}
