pub mod chat;
pub mod relay;
pub mod router;
pub mod server;
pub mod sse;
pub mod state;
pub mod threads;

pub use relay::{RelayOutcome, StreamRelay};
pub use server::GatewayServer;
pub use state::{AppState, SharedState};
