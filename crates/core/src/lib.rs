pub mod config;
pub mod flow;
pub mod intent;
pub mod models;
pub mod router;
pub mod turn;

pub use config::{ConfigError, FlowCatalog, FlowDefinition, KeywordTable, RouterConfig};
pub use flow::{FlowEngine, Transition};
pub use intent::{normalize_optional, normalize_text, parse_flow_command};
pub use models::*;
pub use router::{KeywordRouter, RouteMatch};
pub use turn::SupportBot;
