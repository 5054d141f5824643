//! Persistence layer: libSQL-backed stores for credentials, messages, and
//! processing results.

pub mod credentials;
pub mod db;
pub mod messages;
pub mod migrations;
pub mod results;

pub use credentials::{Credential, CredentialStore, Model, Provider};
pub use db::Database;
pub use messages::{InboundMessage, MessageStore, ProcessableMessage, SenderProfile};
pub use results::{ProcessingResult, ProcessingStats, ResultStatus, ResultStore};
