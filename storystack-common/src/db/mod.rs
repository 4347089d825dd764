//! Database bootstrap and schema introspection

pub mod init;
pub mod schema;

pub use init::*;
pub use schema::*;
