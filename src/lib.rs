pub mod collaborators;
pub mod config;
pub mod confirmations;
pub mod domain;
pub mod email_client;
pub mod error;
pub mod field_mapper;
pub mod imports;
pub mod passwords;
pub mod sql;
pub mod startup;
pub mod status_ledger;
pub mod subscriptions;
pub mod telemetry;
pub mod users;
