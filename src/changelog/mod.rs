pub mod payload;
pub mod store;
pub mod types;

pub use payload::*;
pub use store::*;
pub use types::*;
