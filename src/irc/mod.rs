pub mod codec;
pub mod command;
pub mod coordinator;
pub mod error;
pub mod event;
pub mod ident;
pub mod listener;
pub mod message;
pub mod metrics;
pub mod proxy;
pub mod room;
pub mod server;
pub mod session;
pub mod state;
pub mod tls;
pub mod transcript;
