pub mod aggregator;
pub mod channel;
pub mod cli;
pub mod config;
pub mod conn;
pub mod error;
pub mod message;
pub mod server;
pub mod state;

pub use config::ServerConfig;
pub use error::ServerError;
pub use message::Message;
pub use server::{Server, ShutdownHandle};
