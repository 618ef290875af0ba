pub mod config_base;
pub mod mongodb;
pub mod output;
pub mod postgres;

pub use config_base::{Config, EngineKind};
pub use mongodb::MongoConfig;
pub use output::{Backup, LogPer, Output};
pub use postgres::PostgresConfig;
