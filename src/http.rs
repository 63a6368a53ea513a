use std::io::Result;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::protocol::TargetDescriptor;

// the proxy's status line is not awaited before payload follows; a refusal
// surfaces on the tunneled stream instead of a parsed 4xx/5xx
pub async fn establish<S>(
    stream: &mut S,
    target: &TargetDescriptor,
    credentials: Option<(&str, &str)>,
) -> Result<()>
where
    S: AsyncWrite + Unpin,
{
    let authority = authority(&target.host, target.port);

    let mut request = format!("CONNECT {authority} HTTP/1.1\r\nHost: {authority}\r\n");
    if let Some((username, password)) = credentials {
        let token = STANDARD.encode(format!("{username}:{password}"));
        request.push_str(&format!("Proxy-Authorization: Basic {token}\r\n"));
    }
    request.push_str("\r\n");

    stream.write_all(request.as_bytes()).await?;
    stream.flush().await?;
    Ok(())
}

// IPv6 literals need brackets in the request target and Host header
fn authority(host: &str, port: u16) -> String {
    if host.contains(':') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    }
}
