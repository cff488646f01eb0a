use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info};

use crate::endpoint::Endpoint;
use crate::error::{Result, TransportError};
use crate::traits::IpcStream;
#[cfg(unix)]
use crate::uds::UnixDomainSocket;

/// A bound listener for any supported [`Endpoint`].
pub enum IpcListener {
    Tcp(TcpListener),
    #[cfg(unix)]
    Unix(UnixDomainSocket),
}

impl IpcListener {
    /// Bind a listener on the given endpoint.
    pub async fn bind(endpoint: &Endpoint) -> Result<Self> {
        match endpoint {
            Endpoint::Tcp(addr) => {
                let listener =
                    TcpListener::bind(addr)
                        .await
                        .map_err(|source| TransportError::Bind {
                            endpoint: endpoint.to_string(),
                            source,
                        })?;
                info!(%endpoint, "listening on tcp socket");
                Ok(IpcListener::Tcp(listener))
            }
            #[cfg(unix)]
            Endpoint::Unix(path) => Ok(IpcListener::Unix(UnixDomainSocket::bind(path)?)),
            #[cfg(not(unix))]
            Endpoint::Unix(_) => Err(TransportError::Unsupported(endpoint.to_string())),
        }
    }

    /// Accept the next incoming connection.
    pub async fn accept(&self) -> Result<IpcStream> {
        match self {
            IpcListener::Tcp(listener) => {
                let (stream, addr) = listener.accept().await.map_err(TransportError::Accept)?;
                debug!(%addr, "accepted tcp connection");
                stream.set_nodelay(true)?;
                Ok(IpcStream::from_tcp(stream))
            }
            #[cfg(unix)]
            IpcListener::Unix(socket) => socket.accept().await,
        }
    }

    /// The endpoint this listener is actually bound to.
    ///
    /// For TCP this reflects the OS-assigned port when binding to port 0.
    pub fn local_endpoint(&self) -> Result<Endpoint> {
        match self {
            IpcListener::Tcp(listener) => Ok(Endpoint::Tcp(listener.local_addr()?.to_string())),
            #[cfg(unix)]
            IpcListener::Unix(socket) => Ok(Endpoint::Unix(socket.path().to_path_buf())),
        }
    }
}

/// Connect to a listening endpoint.
pub async fn connect(endpoint: &Endpoint) -> Result<IpcStream> {
    match endpoint {
        Endpoint::Tcp(addr) => {
            let stream = TcpStream::connect(addr)
                .await
                .map_err(|source| TransportError::Connect {
                    endpoint: endpoint.to_string(),
                    source,
                })?;
            stream.set_nodelay(true)?;
            debug!(%endpoint, "connected to tcp socket");
            Ok(IpcStream::from_tcp(stream))
        }
        #[cfg(unix)]
        Endpoint::Unix(path) => UnixDomainSocket::connect(path).await,
        #[cfg(not(unix))]
        Endpoint::Unix(_) => Err(TransportError::Unsupported(endpoint.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    use super::*;

    #[tokio::test]
    async fn tcp_bind_accept_connect() {
        let listener = IpcListener::bind(&Endpoint::Tcp("127.0.0.1:0".to_string()))
            .await
            .unwrap();
        let endpoint = listener.local_endpoint().unwrap();

        let client = tokio::spawn(async move {
            let mut stream = connect(&endpoint).await.unwrap();
            stream.write_all(b"over tcp").await.unwrap();
        });

        let mut server = listener.accept().await.unwrap();
        let mut buf = [0u8; 8];
        server.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"over tcp");
        assert!(server.peer_description().starts_with("tcp://127.0.0.1:"));
        client.await.unwrap();
    }

    #[tokio::test]
    async fn connect_refused_reports_endpoint() {
        let listener = IpcListener::bind(&Endpoint::Tcp("127.0.0.1:0".to_string()))
            .await
            .unwrap();
        let endpoint = listener.local_endpoint().unwrap();
        drop(listener);

        let err = connect(&endpoint).await.unwrap_err();
        assert!(matches!(err, TransportError::Connect { .. }));
        assert!(err.to_string().contains("127.0.0.1"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn unix_endpoint_round_trip() {
        let dir = std::env::temp_dir().join(format!("msgprims-listener-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let endpoint = Endpoint::Unix(dir.join("l.sock"));

        let listener = IpcListener::bind(&endpoint).await.unwrap();
        assert_eq!(listener.local_endpoint().unwrap(), endpoint);

        let target = endpoint.clone();
        let client = tokio::spawn(async move {
            let mut stream = connect(&target).await.unwrap();
            stream.write_all(b"uds").await.unwrap();
        });

        let mut server = listener.accept().await.unwrap();
        let mut buf = [0u8; 3];
        server.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"uds");
        client.await.unwrap();

        drop(listener);
        let _ = std::fs::remove_dir_all(&dir);
    }
}
