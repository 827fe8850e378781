//! CLI commands

mod agent;
mod locate;
mod migrate;
mod sign;
mod verify;

pub use agent::AgentCommand;
pub use locate::LocateCommand;
pub use migrate::MigrateCommand;
pub use sign::SignCommand;
pub use verify::VerifyCommand;
