pub mod channel;
pub mod client;
pub mod config;
pub mod error;
pub mod known_hosts;
pub mod reader;
pub mod transport;

pub use channel::{ChannelSink, ChannelSource, ShellChannel, ShellConnector};
pub use client::SshClient;
pub use config::{AuthMethod, HostKeyPolicy, SendRetry, SshConnectConfig};
pub use error::SshError;
pub use known_hosts::{KnownHostResult, KnownHosts};
pub use reader::{ChannelReader, OutputChunk, ReaderConfig, ReaderEvent, ReaderExit};
pub use transport::{SessionTransport, TransportState};
