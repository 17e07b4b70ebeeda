pub mod auth;
pub mod calls;
pub mod config;
pub mod connection;
pub mod gateway;
pub mod monitor;
pub mod registry;
pub mod relay;
pub mod throttle;
pub mod turn;

pub use config::GatewayConfig;
pub use gateway::Gateway;
