pub mod connectors;
pub mod journal;
pub mod migrator;
pub mod plan;
pub mod scaffold;
pub mod scanner;
pub mod schema;
pub mod sql_generator;
