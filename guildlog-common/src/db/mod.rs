//! Database access: schema, snapshot loaders and distribution records

pub mod distributions;
pub mod init;
pub mod ledger;
pub mod migrations;
pub mod models;
pub mod snapshots;

pub use distributions::*;
pub use init::*;
pub use ledger::*;
pub use migrations::*;
pub use models::*;
pub use snapshots::*;
