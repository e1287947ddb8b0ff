//! Native WebSocket transport using tokio-tungstenite.

use async_trait::async_trait;
use futures_channel::mpsc::unbounded;
use futures_util::{SinkExt, StreamExt};
use notifier_shared::{Credential, NotifyError};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use url::Url;

use super::{Connection, Connector};

/// Opens real WebSocket connections.
///
/// The upgrade request itself is unauthenticated; the credential travels in the
/// STOMP CONNECT frame or the auth message.
#[derive(Debug, Default, Clone, Copy)]
pub struct TungsteniteConnector;

#[async_trait]
impl Connector for TungsteniteConnector {
    async fn open(
        &self,
        endpoint: &Url,
        _credential: &Credential,
    ) -> Result<Connection, NotifyError> {
        let (ws_stream, _response) = connect_async(endpoint.as_str())
            .await
            .map_err(|e| NotifyError::transport(format!("connect to {endpoint}: {e}")))?;
        crate::log_info!("WebSocket connected to {}", endpoint);

        let (mut write, mut read) = ws_stream.split();
        let (outbound_tx, mut outbound_rx) = unbounded::<String>();
        let (inbound_tx, inbound_rx) = unbounded::<Result<String, NotifyError>>();

        // Read task: the only producer of inbound data.
        let inbound_for_read = inbound_tx.clone();
        let host = endpoint.host_str().unwrap_or_default().to_string();
        let reader = tokio::spawn(async move {
            while let Some(msg_result) = read.next().await {
                match msg_result {
                    Ok(Message::Text(text)) => {
                        if inbound_for_read
                            .unbounded_send(Ok(text.as_str().to_owned()))
                            .is_err()
                        {
                            break;
                        }
                    }
                    Ok(Message::Binary(bytes)) => match String::from_utf8(bytes.to_vec()) {
                        Ok(text) => {
                            if inbound_for_read.unbounded_send(Ok(text)).is_err() {
                                break;
                            }
                        }
                        Err(_) => crate::log_warn!("Dropping non UTF-8 binary message"),
                    },
                    Ok(Message::Close(frame)) => {
                        let reason = frame
                            .map(|f| format!("code {} {}", u16::from(f.code), f.reason.as_str()))
                            .unwrap_or_else(|| "no close frame".to_string());
                        crate::log_info!("WebSocket to {} received close: {}", host, reason);
                        let _ = inbound_for_read.unbounded_send(Err(NotifyError::transport(
                            format!("closed by server ({reason})"),
                        )));
                        break;
                    }
                    Ok(_) => {
                        // Ping/pong are answered by tungstenite.
                    }
                    Err(e) => {
                        crate::log_error!("WebSocket read error: {}", e);
                        let _ = inbound_for_read
                            .unbounded_send(Err(NotifyError::transport(e.to_string())));
                        break;
                    }
                }
            }
        });

        // Write task ends once the connection's sender is dropped or closed.
        tokio::spawn(async move {
            while let Some(text) = outbound_rx.next().await {
                if let Err(e) = write.send(Message::Text(text.into())).await {
                    crate::log_error!("Send failed: {}", e);
                    let _ = inbound_tx.unbounded_send(Err(NotifyError::transport(format!(
                        "send failed: {e}"
                    ))));
                    return;
                }
            }
            let _ = write.close().await;
        });

        Ok(Connection::new(outbound_tx, inbound_rx, vec![reader]))
    }
}
