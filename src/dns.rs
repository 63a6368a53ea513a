use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

use crate::connect::Connect;
use crate::error::{ConnectError, Result};
use crate::proxy::pump;

pub const RESOLVER_HOST: &str = "1.1.1.1";
pub const RESOLVER_PORT: u16 = 53;

// the client's UDP framing (2-byte length prefix per datagram) matches
// DNS-over-TCP framing, so bytes pass through both ways unchanged
pub(crate) async fn relay<S, C>(
    client: &mut S,
    connector: &C,
    reply: &mut Option<[u8; 2]>,
    query: &[u8],
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
    C: Connect,
{
    let mut resolver = connector
        .connect(RESOLVER_HOST, RESOLVER_PORT)
        .await
        .map_err(|e| ConnectError::new("dns", RESOLVER_HOST, RESOLVER_PORT, e))?;

    resolver
        .write_all(query)
        .await
        .map_err(|e| ConnectError::new("dns", RESOLVER_HOST, RESOLVER_PORT, e))?;

    pump(client, &mut resolver, reply, None, connector).await?;
    Ok(())
}
