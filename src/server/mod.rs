mod admin_routes;
pub mod config;
mod http_layers;
mod listening_routes;
pub mod metrics;
pub mod server;
pub(self) mod session;
pub mod state;

pub use config::ServerConfig;
pub use http_layers::*;
pub use server::{make_app, run_server};
pub use session::{HEADER_ADMIN_TOKEN_KEY, HEADER_USER_ID_KEY};
