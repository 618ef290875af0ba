pub mod cli;
pub mod clone;
pub mod command;
pub mod config;
pub mod connection;
pub mod engine;
pub mod gen;
pub mod guard;
pub mod ident;
pub mod ledger;
pub mod logger;
pub mod provision;
pub mod run;
pub mod sql;
pub mod validate;
