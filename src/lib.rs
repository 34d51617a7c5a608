pub mod changelog;
pub mod config;
pub mod db;
pub mod error;
pub mod filter;

pub use changelog::{
    ChangedResources, ChangelogEntry, ChangelogPayload, ChangelogStatus, ChangelogStore,
    ChangelogType, FindChangelog, UpdateChangelog,
};
pub use config::{MissingRowPolicy, StoreConfig};
pub use db::{CallContext, Db};
pub use error::{ChangelogError, Result};
pub use rusqlite;
