//! gRPC over unix domain sockets

use std::io;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tokio::net::UnixStream;
use tonic::transport::{Channel, Endpoint, Uri};
use tower::service_fn;

/// Failure to open a channel to a unix socket
#[derive(Error, Debug)]
pub enum ConnectError {
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error(transparent)]
    Transport(#[from] tonic::transport::Error),
}

/// Open a channel to the gRPC server listening on `path`.
///
/// The URI is never dialed; the connector always targets the socket.
pub async fn connect(path: &Path, timeout: Duration) -> Result<Channel, ConnectError> {
    let path = path.to_path_buf();
    let endpoint = Endpoint::from_static("http://[::]:50051").connect_timeout(timeout);

    let connect = endpoint.connect_with_connector(service_fn(move |_: Uri| {
        let path = path.clone();
        async move { UnixStream::connect(path).await }
    }));

    match tokio::time::timeout(timeout, connect).await {
        Ok(channel) => Ok(channel?),
        Err(_) => Err(ConnectError::Timeout(timeout)),
    }
}

/// Remove a socket file, treating an already missing file as success
pub fn remove_socket(path: &Path) -> io::Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remove_missing_socket_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        assert!(remove_socket(&dir.path().join("absent.sock")).is_ok());
    }

    #[test]
    fn test_remove_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stale.sock");
        std::fs::write(&path, b"").unwrap();

        remove_socket(&path).unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn test_remove_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(remove_socket(dir.path()).is_err());
    }

    #[tokio::test]
    async fn test_connect_without_listener_fails() {
        let dir = tempfile::tempdir().unwrap();
        let result = connect(&dir.path().join("nobody.sock"), Duration::from_secs(1)).await;
        assert!(result.is_err());
    }
}
