//! Channel multiplexing, connection handshake, and the initiator lifecycle
//! over a TCP+POF transport.

mod channel;
mod config;
mod connection;
mod error;
mod initiator;
mod listener;

pub use channel::{Channel, NullReceiver, Receiver};
pub use config::{init_tracing, ClientConfig, ClientConfigBuilder, LogDestination, LogFormat};
pub use connection::Connection;
pub use error::{ClientError, ClientResult, ConnectionError, TimeoutError};
pub use initiator::{Initiator, InitiatorEvent};
pub use listener::{CacheEventListener, ListenerRegistry};
