//! Stateless IPC helpers
//!
//! JSON send/receive/request-response over any connected [`Channel`], plus
//! the constructors for both ends of a pipe.

use std::time::Duration;

use interprocess::local_socket::traits::tokio::Listener as ListenerTrait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;

use crate::common::{paths, Error, Result};

use super::channel::Channel;
use super::deadline::bounded;
use super::protocol;
use super::transport::{self, Listener, Stream};

/// Pause between connection attempts while the server is not listening yet
const CONNECT_RETRY_INTERVAL: Duration = Duration::from_millis(50);

/// Serialize `value` and send it as one line
pub async fn send_json<S, T>(
    channel: &mut Channel<S>,
    value: &T,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite,
    T: Serialize + ?Sized,
{
    channel.ensure_connected()?;
    let line = protocol::encode(value)?;
    bounded(timeout, cancel, channel.write_line(&line)).await
}

/// Receive one line and deserialize it
pub async fn receive_json<S, T>(
    channel: &mut Channel<S>,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<T>
where
    S: AsyncRead + AsyncWrite,
    T: DeserializeOwned,
{
    channel.ensure_connected()?;
    let line = bounded(timeout, cancel, channel.read_line()).await?;
    protocol::decode(&line)
}

/// Send `request` and wait for the reply
///
/// Both halves share a single deadline: `timeout` bounds the whole
/// exchange, not each direction.
pub async fn request_response<S, Req, Resp>(
    channel: &mut Channel<S>,
    request: &Req,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<Resp>
where
    S: AsyncRead + AsyncWrite,
    Req: Serialize + ?Sized,
    Resp: DeserializeOwned,
{
    channel.ensure_connected()?;
    let line = protocol::encode(request)?;
    let reply = bounded(timeout, cancel, async {
        channel.write_line(&line).await?;
        channel.read_line().await
    })
    .await?;
    protocol::decode(&reply)
}

/// Connect to the server side of pipe `pipe_name`
///
/// Keeps retrying while nobody is listening yet, until the deadline. A
/// stream opened by an attempt that loses the race against the deadline
/// is dropped with the attempt, so nothing leaks on failure.
pub async fn connect(
    pipe_name: &str,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<Channel<Stream>> {
    paths::validate_pipe_name(pipe_name)?;

    let stream = bounded(timeout, cancel, async {
        loop {
            match transport::connect(pipe_name).await {
                Ok(stream) => return Ok(stream),
                Err(e) if transport::is_not_ready(&e) => {
                    tracing::trace!(pipe = pipe_name, "Pipe not ready: {}", e);
                    tokio::time::sleep(CONNECT_RETRY_INTERVAL).await;
                }
                Err(e) => return Err(Error::Io(e)),
            }
        }
    })
    .await?;

    tracing::debug!(pipe = pipe_name, "Connected to pipe");
    Ok(Channel::new(stream))
}

/// Create the server side of pipe `pipe_name`
pub fn create_server(pipe_name: &str) -> Result<Listener> {
    paths::validate_pipe_name(pipe_name)?;
    Ok(transport::create_listener(pipe_name)?)
}

/// Wait for a client on `listener`
pub async fn accept(
    listener: &Listener,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<Channel<Stream>> {
    let stream = bounded(timeout, cancel, async {
        listener.accept().await.map_err(Error::from)
    })
    .await?;
    Ok(Channel::new(stream))
}

/// Check that a channel is present and connected
pub fn validate<S>(channel: Option<&mut Channel<S>>) -> Result<&mut Channel<S>>
where
    S: AsyncRead + AsyncWrite,
{
    let channel = channel.ok_or(Error::NotConnected)?;
    channel.ensure_connected()?;
    Ok(channel)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipc::protocol::{Envelope, Message};
    use serde::Deserialize;
    use tokio::io::{duplex, DuplexStream};

    const TIMEOUT: Duration = Duration::from_secs(5);

    fn pair() -> (Channel<DuplexStream>, Channel<DuplexStream>) {
        let (a, b) = duplex(64 * 1024);
        (Channel::new(a), Channel::new(b))
    }

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct Lookup {
        id: i64,
        message: String,
        keys: Vec<String>,
        include_deleted: bool,
    }

    #[tokio::test]
    async fn test_json_round_trip() {
        let cancel = CancellationToken::new();
        let (mut left, mut right) = pair();

        let sent = Message::new(12, "ping with \"quotes\" and ünïcödé");
        send_json(&mut left, &sent, TIMEOUT, &cancel).await.unwrap();
        let received: Message = receive_json(&mut right, TIMEOUT, &cancel).await.unwrap();
        assert_eq!(received, sent);

        let lookup = Lookup {
            id: -1,
            message: "lookup".to_string(),
            keys: vec!["a".to_string(), "b".to_string()],
            include_deleted: true,
        };
        send_json(&mut right, &lookup, TIMEOUT, &cancel).await.unwrap();
        let back: Lookup = receive_json(&mut left, TIMEOUT, &cancel).await.unwrap();
        assert_eq!(back, lookup);
    }

    #[tokio::test]
    async fn test_request_response_with_responding_peer() {
        let cancel = CancellationToken::new();
        let (mut client, mut server) = pair();

        let peer = tokio::spawn(async move {
            let cancel = CancellationToken::new();
            let request: Message = receive_json(&mut server, TIMEOUT, &cancel).await.unwrap();
            let reply = Message::new(request.id(), request.message().to_uppercase());
            send_json(&mut server, &reply, TIMEOUT, &cancel).await.unwrap();
        });

        let reply: Message = request_response(
            &mut client,
            &Message::new(5, "shout"),
            Duration::from_secs(2),
            &cancel,
        )
        .await
        .unwrap();
        assert_eq!(reply, Message::new(5, "SHOUT"));
        peer.await.unwrap();
    }

    #[tokio::test]
    async fn test_request_response_shares_one_deadline() {
        let cancel = CancellationToken::new();
        let (mut client, mut server) = pair();

        tokio::spawn(async move {
            let cancel = CancellationToken::new();
            let request: Message = receive_json(&mut server, TIMEOUT, &cancel).await.unwrap();
            tokio::time::sleep(Duration::from_millis(300)).await;
            let _ = send_json(&mut server, &request, TIMEOUT, &cancel).await;
        });

        let err = request_response::<_, _, Message>(
            &mut client,
            &Message::new(1, "slow"),
            Duration::from_millis(100),
            &cancel,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::Timeout(100)));
    }

    #[tokio::test]
    async fn test_receive_times_out_on_silent_peer() {
        let cancel = CancellationToken::new();
        let (mut left, _right) = pair();
        let err = receive_json::<_, Message>(&mut left, Duration::from_millis(50), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout(50)));
        assert!(left.is_connected());
    }

    #[tokio::test]
    async fn test_receive_cancelled() {
        let cancel = CancellationToken::new();
        let (mut left, _right) = pair();
        cancel.cancel();
        let err = receive_json::<_, Message>(&mut left, TIMEOUT, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled));
    }

    #[tokio::test]
    async fn test_null_is_empty_payload() {
        let cancel = CancellationToken::new();
        let (mut left, mut right) = pair();
        left.write_line("null").await.unwrap();
        let err = receive_json::<_, Message>(&mut right, TIMEOUT, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::EmptyPayload));
    }

    #[tokio::test]
    async fn test_disconnected_channel_rejected() {
        let cancel = CancellationToken::new();
        let (mut left, right) = pair();
        drop(right);

        let err = receive_json::<_, Message>(&mut left, TIMEOUT, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::EmptyPayload));

        let err = send_json(&mut left, &Message::new(1, "x"), TIMEOUT, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotConnected));
        assert!(matches!(
            validate(Some(&mut left)).unwrap_err(),
            Error::NotConnected
        ));
    }

    #[tokio::test]
    async fn test_validate() {
        let (mut left, _right) = pair();
        assert!(validate(Some(&mut left)).is_ok());
        assert!(matches!(
            validate::<DuplexStream>(None).unwrap_err(),
            Error::NotConnected
        ));
    }

    #[tokio::test]
    async fn test_connect_rejects_bad_names() {
        let cancel = CancellationToken::new();
        let err = connect("", TIMEOUT, &cancel).await.unwrap_err();
        assert!(matches!(err, Error::InvalidArgument { .. }));
    }
}
