//! Streaming recognition connector over tokio-tungstenite.
//!
//! One task per upstream session. It owns both halves of the socket, writes
//! whatever the relay queues and reports every inbound frame as a notice.

use futures_util::{SinkExt, Stream, StreamExt};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::InvalidHeaderValue;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{self, Message};
use tracing::{debug, error, info, warn};
use url::Url;

use super::relay::{NoticeKind, NoticeSender, SttConnector, UpstreamCommand, UpstreamHandle};

const SUBSCRIPTION_KEY_HEADER: &str = "Api-Subscription-Key";

/// Close code reported when the connection dropped without a close frame.
const ABNORMAL_CLOSURE: u16 = 1006;
/// Close code reported when the peer closed without giving one.
const NO_STATUS_RECEIVED: u16 = 1005;

/// How long to wait for the peer's close frame after we close.
const CLOSE_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
enum UpstreamError {
    #[error("invalid subscription key: {0}")]
    InvalidKey(#[from] InvalidHeaderValue),

    #[error("{0}")]
    Transport(#[from] tungstenite::Error),
}

#[derive(Debug, Clone)]
pub struct SarvamConnector {
    api_key: String,
    close_grace: Duration,
}

impl SarvamConnector {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            close_grace: CLOSE_GRACE,
        }
    }
}

impl SttConnector for SarvamConnector {
    fn connect(&self, url: Url, notices: NoticeSender) -> UpstreamHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        let api_key = self.api_key.clone();
        let grace = self.close_grace;

        tokio::spawn(async move {
            let (code, reason) = match run_session(&url, &api_key, rx, &notices, grace).await {
                Ok(closed) => closed,
                Err(err) => {
                    error!(error = %err, "Recognition connection failed");
                    notices.notify(NoticeKind::Error(err.to_string()));
                    (ABNORMAL_CLOSURE, err.to_string())
                }
            };
            notices.notify(NoticeKind::Closed { code, reason });
        });

        UpstreamHandle::new(tx)
    }
}

async fn run_session(
    url: &Url,
    api_key: &str,
    mut commands: mpsc::UnboundedReceiver<UpstreamCommand>,
    notices: &NoticeSender,
    grace: Duration,
) -> Result<(u16, String), UpstreamError> {
    let mut request = url.as_str().into_client_request()?;
    request
        .headers_mut()
        .insert(SUBSCRIPTION_KEY_HEADER, HeaderValue::from_str(api_key)?);

    let (stream, _) = connect_async(request).await?;
    info!(host = url.host_str().unwrap_or_default(), "Connected to recognition service");
    notices.notify(NoticeKind::Opened);

    let (mut writer, mut reader) = stream.split();

    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(UpstreamCommand::Send(text)) => {
                    if let Err(err) = writer.send(Message::Text(text)).await {
                        warn!(error = %err, "Failed to write to recognition service");
                        notices.notify(NoticeKind::Error(err.to_string()));
                        return Ok((ABNORMAL_CLOSURE, err.to_string()));
                    }
                }
                // Explicit close, or the owning connection went away
                Some(UpstreamCommand::Close) | None => {
                    debug!("Closing recognition session");
                    if let Err(err) = writer.send(Message::Close(None)).await {
                        debug!(error = %err, "Close frame not sent");
                    }
                    let frame = drain_until_closed(&mut reader, notices, grace).await;
                    return Ok(close_status(frame));
                }
            },
            message = reader.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    notices.notify(NoticeKind::Message(text));
                }
                Some(Ok(Message::Binary(bytes))) => {
                    notices.notify(NoticeKind::Message(String::from_utf8_lossy(&bytes).into_owned()));
                }
                Some(Ok(Message::Close(frame))) => return Ok(close_status(frame)),
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    warn!(error = %err, "Recognition socket error");
                    notices.notify(NoticeKind::Error(err.to_string()));
                    return Ok((ABNORMAL_CLOSURE, err.to_string()));
                }
                None => return Ok((ABNORMAL_CLOSURE, String::new())),
            },
        }
    }
}

/// Keep reading after our close until the peer's close frame arrives.
async fn drain_until_closed<S>(
    reader: &mut S,
    notices: &NoticeSender,
    grace: Duration,
) -> Option<CloseFrame<'static>>
where
    S: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
{
    let deadline = tokio::time::sleep(grace);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = &mut deadline => {
                debug!("Peer did not confirm close in time");
                return None;
            }
            message = reader.next() => match message {
                // Late transcripts still count
                Some(Ok(Message::Text(text))) => {
                    notices.notify(NoticeKind::Message(text));
                }
                Some(Ok(Message::Close(frame))) => return frame,
                Some(Ok(_)) => {}
                Some(Err(_)) | None => return None,
            },
        }
    }
}

fn close_status(frame: Option<CloseFrame<'_>>) -> (u16, String) {
    match frame {
        Some(frame) => (u16::from(frame.code), frame.reason.into_owned()),
        None => (NO_STATUS_RECEIVED, String::new()),
    }
}
