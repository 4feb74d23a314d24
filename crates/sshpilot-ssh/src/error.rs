use thiserror::Error;

#[derive(Debug, Error)]
pub enum SshError {
    #[error("authentication failed: {0}")]
    Authentication(String),
    #[error("ssh protocol error: {0}")]
    Protocol(String),
    #[error("connection error: {0}")]
    Connection(String),
    #[error("channel write error: {0}")]
    ChannelWrite(String),
    #[error("channel read error: {0}")]
    Read(String),
    #[error("session already has an open channel")]
    AlreadyConnected,
}

impl SshError {
    pub fn from_setup(err: russh::Error) -> Self {
        match err {
            russh::Error::IO(io) => SshError::Connection(io.to_string()),
            other => SshError::Protocol(other.to_string()),
        }
    }

    /// Like `from_setup`, but a key refused by the client handler names the host.
    pub fn from_handshake(err: russh::Error, host: &str, port: u16) -> Self {
        match err {
            russh::Error::UnknownKey => {
                SshError::Protocol(format!("host key rejected for {host}:{port}"))
            }
            other => SshError::from_setup(other),
        }
    }
}

impl From<std::io::Error> for SshError {
    fn from(err: std::io::Error) -> Self {
        SshError::Connection(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_failures_are_connection_errors() {
        let err = SshError::from_setup(russh::Error::IO(std::io::Error::new(
            std::io::ErrorKind::ConnectionRefused,
            "refused",
        )));
        assert!(matches!(err, SshError::Connection(_)));
    }

    #[test]
    fn protocol_failures_keep_their_message() {
        let err = SshError::from_setup(russh::Error::Disconnect);
        assert!(matches!(err, SshError::Protocol(_)));
    }

    #[test]
    fn rejected_host_key_is_a_protocol_error() {
        let err = SshError::from_handshake(russh::Error::UnknownKey, "db1", 2222);
        match err {
            SshError::Protocol(message) => {
                assert_eq!(message, "host key rejected for db1:2222")
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(matches!(
            SshError::from_handshake(
                russh::Error::IO(std::io::Error::from(std::io::ErrorKind::TimedOut)),
                "db1",
                22
            ),
            SshError::Connection(_)
        ));
    }
}
