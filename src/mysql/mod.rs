pub mod protocol;
pub mod packet;
pub mod framer;
pub mod resultset;
pub mod connection;
pub mod state_machine;
pub mod server;

#[cfg(test)]
pub(crate) mod mock_stream;

pub use connection::{AuthStatus, ConnState, Connection, Session};
pub use framer::PacketFramer;
pub use resultset::{ResultEncoder, ResultField};
pub use server::{MysqlServer, ShutdownHandle};
pub use state_machine::{CredentialStore, EventLoop, StateMachine};
pub use protocol::*;
pub use packet::*;
