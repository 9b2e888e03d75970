pub mod bridge;
pub mod consumer;
pub mod error;
pub mod method;
pub mod rule;
pub mod server;

pub use bridge::{Command, CommandBridge, CommandReply, MockApiResponse};
pub use error::{CliError, Error};
pub use method::MockMethod;
pub use rule::{MockResponse, QueryFilter, QueryParams, Rule, RuleTable, RuleTableStats};
pub use server::{DEFAULT_PORT, MockServer};
