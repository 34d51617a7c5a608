pub use self::core::{CallContext, Db};
pub use self::query::{QueryBuilder, SqlFragment};

pub mod core;
pub mod query;
