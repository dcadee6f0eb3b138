pub mod config;
pub mod identity;

pub use config::{AuthzConfig, AuthzRule, BrokerConfig, DefaultPolicy};
pub use identity::{IdentityError, UserInfo};
