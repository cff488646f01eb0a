use msgprims_transport::Endpoint;
use tracing::info;

use crate::config::PeerConfig;
use crate::error::Result;
use crate::peer::{EventStream, Peer, PeerHandle};

/// Connect to a listening endpoint and start the connection task.
pub async fn connect(endpoint: &Endpoint, config: PeerConfig) -> Result<(PeerHandle, EventStream)> {
    let stream = msgprims_transport::connect(endpoint).await?;
    let (handle, events) = Peer::spawn(stream, config);
    info!(%endpoint, peer = handle.id(), "connected");
    Ok((handle, events))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PeerError;

    #[tokio::test]
    async fn connect_refused_is_transport_error() {
        let listener = msgprims_transport::IpcListener::bind(&Endpoint::Tcp("127.0.0.1:0".into()))
            .await
            .unwrap();
        let endpoint = listener.local_endpoint().unwrap();
        drop(listener);

        let err = connect(&endpoint, PeerConfig::default()).await.unwrap_err();
        assert!(matches!(err, PeerError::Transport(_)));
    }
}
