use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::{
    client::IntoClientRequest,
    handshake::client::Request,
    http::HeaderValue,
    protocol::Message,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use super::{CLIENT_NAME, Node};
use crate::{
    common::errors::{Result, RiffyError},
    configs::RestVersion,
};

fn header(value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|e| RiffyError::Config(format!("invalid header value: {}", e)))
}

impl Node {
    pub(super) fn ws_request(&self) -> Result<Request> {
        let riffy = self.riffy()?;
        let user_id = riffy.client_id().ok_or(RiffyError::NotInitialized)?;

        let mut request = self.config.ws_url(self.version()).into_client_request()?;
        let headers = request.headers_mut();
        headers.insert("Authorization", header(&self.config.password)?);
        headers.insert("User-Id", header(&user_id.to_string())?);
        headers.insert("Client-Name", header(CLIENT_NAME)?);

        match self.version() {
            RestVersion::V4 => {
                if let Some(session) = self.rest.session_id() {
                    headers.insert("Session-Id", header(&session)?);
                }
            }
            RestVersion::V3 => {
                if let Some(key) = &self.config.resume_key {
                    headers.insert("Resume-Key", header(key)?);
                }
            }
        }
        Ok(request)
    }
}

/// Drives one socket until it closes or `token` is cancelled. A cancelled
/// socket exits quietly; everything else ends in `handle_close`.
pub(super) async fn run(node: Arc<Node>, token: CancellationToken) {
    let request = match node.ws_request() {
        Ok(request) => request,
        Err(e) => {
            node.handle_error(e).await;
            node.handle_close(1006, "could not build handshake").await;
            return;
        }
    };

    let connected = tokio::select! {
        _ = token.cancelled() => return,
        res = tokio_tungstenite::connect_async(request) => res,
    };
    let (stream, _) = match connected {
        Ok(pair) => pair,
        Err(e) => {
            node.handle_error(e.into()).await;
            node.handle_close(1006, "connection failed").await;
            return;
        }
    };

    let (mut write, mut read) = stream.split();
    node.handle_open().await;

    let (code, reason) = loop {
        tokio::select! {
            _ = token.cancelled() => {
                debug!("[{}] Socket cancelled", node.name);
                let _ = write.send(Message::Close(None)).await;
                return;
            }
            msg = read.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    trace!("[{}] <- {}", node.name, text.as_str());
                    node.handle_message(text.as_str()).await;
                }
                Some(Ok(Message::Close(frame))) => {
                    break frame
                        .map(|f| (u16::from(f.code), f.reason.to_string()))
                        .unwrap_or((1005, String::new()));
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    node.handle_error(e.into()).await;
                    break (1006, "abnormal closure".to_string());
                }
                None => break (1006, "stream ended".to_string()),
            }
        }
    };

    node.handle_close(code, &reason).await;
}
