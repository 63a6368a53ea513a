use std::io::{Error, ErrorKind};
use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use bytes::{BufMut, BytesMut};
use futures_util::future::{select, Either};
use futures_util::pin_mut;
use log::{debug, warn};
use tokio::io::{copy, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::config::SessionConfig;
use crate::connect::Connect;
use crate::dns;
use crate::error::{ConnectError, PolicyError, ProtocolError, Result, StreamError};
use crate::policy;
use crate::protocol::{self, TargetDescriptor};
use crate::upstream::{self, UpstreamDescriptor, UpstreamKind};

const READ_BUFFER_SIZE: usize = 8192;

pub fn parse_early_data(data: Option<String>) -> std::result::Result<Option<Vec<u8>>, ProtocolError> {
    let Some(data) = data else {
        return Ok(None);
    };
    if data.is_empty() {
        return Ok(None);
    }
    // clients are loose about the alphabet, normalize to base64url
    let normalized = data.replace('+', "-").replace('/', "_").replace('=', "");
    URL_SAFE_NO_PAD
        .decode(normalized)
        .map(Some)
        .map_err(|e| ProtocolError::EarlyData(e.to_string()))
}

enum Attempt {
    Direct,
    Upstream(UpstreamDescriptor),
}

impl Attempt {
    fn strategy(&self) -> &'static str {
        match self {
            Attempt::Direct => "direct",
            Attempt::Upstream(desc) => match desc.kind {
                UpstreamKind::Direct => "relay",
                UpstreamKind::Socks5 => "socks5",
                UpstreamKind::HttpConnect => "http-connect",
            },
        }
    }
}

pub async fn run_tunnel<S, C>(
    mut client: S,
    config: Arc<SessionConfig>,
    connector: &C,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
    C: Connect,
{
    let mut first = vec![0u8; READ_BUFFER_SIZE];
    let n = client
        .read(&mut first)
        .await
        .map_err(StreamError::from)?;
    if n == 0 {
        return Err(ProtocolError::Truncated(0).into());
    }

    let handshake = protocol::parse_header(&first[..n], &config.user_id)?;
    let target = &handshake.target;

    policy::ensure_host_allowed(&target.host)?;

    let payload = &first[target.payload_offset..n];
    // written exactly once, on the first reply chunk
    let mut reply = Some(protocol::reply_header(handshake.version));

    if target.is_udp {
        // only dns queries are supported over udp
        if target.port != 53 {
            return Err(PolicyError::UdpUnsupported(target.port).into());
        }
        if let Err(err) = dns::relay(&mut client, connector, &mut reply, payload).await {
            warn!("dns relay for {} ended: {err}", target.host);
        }
        let _ = client.shutdown().await;
        return Ok(());
    }

    let mut attempts = vec![Attempt::Direct];
    if let Some(desc) = config.fallback_proxy.as_deref().and_then(upstream::parse) {
        attempts.push(Attempt::Upstream(desc));
    }

    let total = attempts.len();
    for (index, attempt) in attempts.into_iter().enumerate() {
        let last = index + 1 == total;

        let mut remote = match open_remote(connector, &attempt, target, payload, &config).await {
            Ok(remote) => remote,
            Err(err) => {
                if last {
                    return Err(err.into());
                }
                debug!("{err}; trying next strategy");
                continue;
            }
        };

        let window = (!last).then_some(config.first_reply_window);
        match pump(&mut client, &mut remote, &mut reply, window, connector).await? {
            PumpEnd::Streamed => {
                let _ = client.shutdown().await;
                return Ok(());
            }
            PumpEnd::NoReply => {
                // release the remote slot before the next attempt dials
                drop(remote);
                if last {
                    return Err(ConnectError::new(
                        attempt.strategy(),
                        &target.host,
                        target.port,
                        Error::new(ErrorKind::UnexpectedEof, "remote produced no reply"),
                    )
                    .into());
                }
                debug!(
                    "no reply from {} path to {}:{}; trying next strategy",
                    attempt.strategy(),
                    target.host,
                    target.port
                );
            }
        }
    }

    Err(ConnectError::new(
        "direct",
        &target.host,
        target.port,
        Error::new(ErrorKind::NotConnected, "no connection strategy available"),
    )
    .into())
}

async fn open_remote<C: Connect>(
    connector: &C,
    attempt: &Attempt,
    target: &TargetDescriptor,
    payload: &[u8],
    config: &SessionConfig,
) -> std::result::Result<C::Stream, ConnectError> {
    let strategy = attempt.strategy();
    let (host, port) = match attempt {
        Attempt::Direct => (target.host.as_str(), target.port),
        Attempt::Upstream(desc) => (desc.host.as_str(), desc.port),
    };

    let mut remote = connector
        .connect(host, port)
        .await
        .map_err(|e| ConnectError::new(strategy, host, port, e))?;

    if let Attempt::Upstream(desc) = attempt {
        match desc.kind {
            UpstreamKind::Direct => {}
            UpstreamKind::Socks5 => {
                crate::socks5::establish(
                    &mut remote,
                    target,
                    desc.credentials(),
                    config.socks5_passthrough,
                )
                .await
                .map_err(|e| ConnectError::new(strategy, host, port, e))?;
            }
            UpstreamKind::HttpConnect => {
                crate::http::establish(&mut remote, target, desc.credentials())
                    .await
                    .map_err(|e| ConnectError::new(strategy, host, port, e))?;
            }
        }
    }

    remote
        .write_all(payload)
        .await
        .map_err(|e| ConnectError::new(strategy, host, port, e))?;

    Ok(remote)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PumpEnd {
    Streamed,
    // the remote went away or stayed silent before its first byte
    NoReply,
}

pub(crate) async fn pump<S, R, C>(
    client: &mut S,
    remote: &mut R,
    reply: &mut Option<[u8; 2]>,
    first_reply_window: Option<Duration>,
    connector: &C,
) -> Result<PumpEnd>
where
    S: AsyncRead + AsyncWrite + Unpin,
    R: AsyncRead + AsyncWrite + Unpin,
    C: Connect,
{
    let (mut client_read, mut client_write) = tokio::io::split(client);
    let (mut remote_read, mut remote_write) = tokio::io::split(remote);

    let downlink = async {
        let mut buf = vec![0u8; READ_BUFFER_SIZE];

        let n = match first_reply_window {
            Some(window) => {
                let read = remote_read.read(&mut buf);
                pin_mut!(read);
                let deadline = connector.sleep(window);
                pin_mut!(deadline);
                match select(read, deadline).await {
                    Either::Left((n, _)) => n.map_err(StreamError::from)?,
                    Either::Right(((), _)) => return Ok(PumpEnd::NoReply),
                }
            }
            None => remote_read.read(&mut buf).await.map_err(StreamError::from)?,
        };
        if n == 0 {
            return Ok(PumpEnd::NoReply);
        }

        // the reply header rides on the first chunk, in the same write
        match reply.take() {
            Some(header) => {
                let mut chunk = BytesMut::with_capacity(header.len() + n);
                chunk.put_slice(&header);
                chunk.put_slice(&buf[..n]);
                client_write
                    .write_all(&chunk)
                    .await
                    .map_err(StreamError::from)?;
            }
            None => client_write
                .write_all(&buf[..n])
                .await
                .map_err(StreamError::from)?,
        }

        loop {
            let n = remote_read.read(&mut buf).await.map_err(StreamError::from)?;
            if n == 0 {
                return Ok(PumpEnd::Streamed);
            }
            client_write
                .write_all(&buf[..n])
                .await
                .map_err(StreamError::from)?;
        }
    };

    let uplink = async {
        copy(&mut client_read, &mut remote_write)
            .await
            .map_err(StreamError::from)?;
        let _ = remote_write.shutdown().await;
        Ok::<(), crate::error::TunnelError>(())
    };

    pin_mut!(downlink);
    pin_mut!(uplink);

    match select(downlink, uplink).await {
        Either::Left((end, _)) => end,
        Either::Right((result, _)) => {
            result?;
            // the client finished sending; the session ends with it
            Ok(PumpEnd::Streamed)
        }
    }
}
