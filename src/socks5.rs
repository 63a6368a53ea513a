use std::io::{Error, ErrorKind, Result};
use std::net::{Ipv4Addr, Ipv6Addr};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::protocol::TargetDescriptor;

const SOCKS_VERSION: u8 = 0x05;
const AUTH_VERSION: u8 = 0x01;

const METHOD_NO_AUTH: u8 = 0x00;
const METHOD_USERPASS: u8 = 0x02;
const METHOD_NO_ACCEPTABLE: u8 = 0xff;

const CMD_CONNECT: u8 = 0x01;

const ATYP_IPV4: u8 = 0x01;
const ATYP_DOMAIN: u8 = 0x03;
const ATYP_IPV6: u8 = 0x04;

// with `passthrough` the CONNECT exchange is skipped and application bytes
// follow method selection directly; the upstream must already know the target
pub async fn establish<S>(
    stream: &mut S,
    target: &TargetDescriptor,
    credentials: Option<(&str, &str)>,
    passthrough: bool,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let methods: &[u8] = if credentials.is_some() {
        &[METHOD_NO_AUTH, METHOD_USERPASS]
    } else {
        &[METHOD_NO_AUTH]
    };

    let mut greeting = vec![SOCKS_VERSION, methods.len() as u8];
    greeting.extend_from_slice(methods);
    stream.write_all(&greeting).await?;

    let mut selection = [0u8; 2];
    stream.read_exact(&mut selection).await?;
    if selection[0] != SOCKS_VERSION {
        return Err(protocol_error(format!(
            "unexpected SOCKS version {}",
            selection[0]
        )));
    }

    match selection[1] {
        METHOD_NO_AUTH => {}
        METHOD_USERPASS => {
            let (username, password) = credentials.ok_or_else(|| {
                protocol_error("server requires username/password but none configured")
            })?;
            authenticate(stream, username, password).await?;
        }
        METHOD_NO_ACCEPTABLE => {
            return Err(protocol_error("no acceptable authentication method"));
        }
        other => {
            return Err(protocol_error(format!(
                "unsupported authentication method {other:#04x}"
            )));
        }
    }

    if !passthrough {
        connect_request(stream, target).await?;
    }

    Ok(())
}

async fn authenticate<S>(stream: &mut S, username: &str, password: &str) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    if username.len() > 255 || password.len() > 255 {
        return Err(protocol_error("username or password longer than 255 bytes"));
    }

    let mut request = vec![AUTH_VERSION, username.len() as u8];
    request.extend_from_slice(username.as_bytes());
    request.push(password.len() as u8);
    request.extend_from_slice(password.as_bytes());
    stream.write_all(&request).await?;

    let mut response = [0u8; 2];
    stream.read_exact(&mut response).await?;
    if response[0] != AUTH_VERSION {
        return Err(protocol_error(format!(
            "unexpected auth version {}",
            response[0]
        )));
    }
    if response[1] != 0x00 {
        return Err(Error::new(
            ErrorKind::PermissionDenied,
            "proxy rejected credentials",
        ));
    }
    Ok(())
}

async fn connect_request<S>(stream: &mut S, target: &TargetDescriptor) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut request = vec![SOCKS_VERSION, CMD_CONNECT, 0x00];
    encode_address(&mut request, &target.host)?;
    request.extend_from_slice(&target.port.to_be_bytes());
    stream.write_all(&request).await?;

    let mut reply = [0u8; 4];
    stream.read_exact(&mut reply).await?;
    if reply[0] != SOCKS_VERSION {
        return Err(protocol_error(format!(
            "unexpected SOCKS version {}",
            reply[0]
        )));
    }
    if reply[1] != 0x00 {
        return Err(Error::new(
            ErrorKind::ConnectionRefused,
            format!("CONNECT rejected: {}", reply_reason(reply[1])),
        ));
    }

    // bound address, unused
    let addr_len = match reply[3] {
        ATYP_IPV4 => 4,
        ATYP_IPV6 => 16,
        ATYP_DOMAIN => {
            let mut len = [0u8; 1];
            stream.read_exact(&mut len).await?;
            len[0] as usize
        }
        other => {
            return Err(protocol_error(format!(
                "unexpected address type {other} in reply"
            )));
        }
    };
    let mut bound = vec![0u8; addr_len + 2];
    stream.read_exact(&mut bound).await?;

    Ok(())
}

fn encode_address(request: &mut Vec<u8>, host: &str) -> Result<()> {
    if let Ok(ip) = host.parse::<Ipv4Addr>() {
        request.push(ATYP_IPV4);
        request.extend_from_slice(&ip.octets());
    } else if let Ok(ip) = host.parse::<Ipv6Addr>() {
        request.push(ATYP_IPV6);
        request.extend_from_slice(&ip.octets());
    } else {
        if host.len() > 255 {
            return Err(protocol_error("hostname longer than 255 bytes"));
        }
        request.push(ATYP_DOMAIN);
        request.push(host.len() as u8);
        request.extend_from_slice(host.as_bytes());
    }
    Ok(())
}

fn reply_reason(code: u8) -> &'static str {
    match code {
        0x01 => "general server failure",
        0x02 => "connection not allowed by ruleset",
        0x03 => "network unreachable",
        0x04 => "host unreachable",
        0x05 => "connection refused",
        0x06 => "TTL expired",
        0x07 => "command not supported",
        0x08 => "address type not supported",
        _ => "unknown failure",
    }
}

fn protocol_error(message: impl Into<String>) -> Error {
    Error::new(ErrorKind::InvalidData, message.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::AddressType;
    use tokio::io::duplex;

    fn target(host: &str, port: u16) -> TargetDescriptor {
        TargetDescriptor {
            addr_type: AddressType::Domain,
            host: host.to_string(),
            port,
            is_udp: false,
            payload_offset: 0,
        }
    }

    #[tokio::test]
    async fn no_auth_connect() {
        let (mut client, mut server) = duplex(1024);
        let target = target("example.com", 443);

        let proxy = async {
            let mut greeting = [0u8; 3];
            server.read_exact(&mut greeting).await.unwrap();
            assert_eq!(greeting, [0x05, 0x01, 0x00]);
            server.write_all(&[0x05, 0x00]).await.unwrap();

            let mut head = [0u8; 4];
            server.read_exact(&mut head).await.unwrap();
            assert_eq!(head, [0x05, 0x01, 0x00, 0x03]);
            let mut len = [0u8; 1];
            server.read_exact(&mut len).await.unwrap();
            let mut name = vec![0u8; len[0] as usize + 2];
            server.read_exact(&mut name).await.unwrap();
            assert_eq!(&name[..len[0] as usize], b"example.com");
            assert_eq!(&name[len[0] as usize..], &443u16.to_be_bytes());

            // success, bound to 0.0.0.0:0
            server
                .write_all(&[0x05, 0x00, 0x00, 0x01, 0, 0, 0, 0, 0, 0])
                .await
                .unwrap();
        };

        let (result, ()) = tokio::join!(establish(&mut client, &target, None, false), proxy);
        result.unwrap();
    }

    #[tokio::test]
    async fn username_password_subnegotiation() {
        let (mut client, mut server) = duplex(1024);
        let target = target("example.com", 80);

        let proxy = async {
            let mut greeting = [0u8; 4];
            server.read_exact(&mut greeting).await.unwrap();
            assert_eq!(greeting, [0x05, 0x02, 0x00, 0x02]);
            server.write_all(&[0x05, 0x02]).await.unwrap();

            let mut auth = [0u8; 2 + 5 + 1 + 6];
            server.read_exact(&mut auth).await.unwrap();
            assert_eq!(auth[0], 0x01);
            assert_eq!(&auth[2..7], b"alice");
            assert_eq!(&auth[8..], b"secret");
            server.write_all(&[0x01, 0x00]).await.unwrap();

            let mut head = [0u8; 4];
            server.read_exact(&mut head).await.unwrap();
            let mut len = [0u8; 1];
            server.read_exact(&mut len).await.unwrap();
            let mut rest = vec![0u8; len[0] as usize + 2];
            server.read_exact(&mut rest).await.unwrap();
            server
                .write_all(&[0x05, 0x00, 0x00, 0x01, 0, 0, 0, 0, 0, 0])
                .await
                .unwrap();
        };

        let (result, ()) = tokio::join!(
            establish(&mut client, &target, Some(("alice", "secret")), false),
            proxy
        );
        result.unwrap();
    }

    #[tokio::test]
    async fn rejected_connect_surfaces_reason() {
        let (mut client, mut server) = duplex(1024);
        let target = target("example.com", 443);

        let proxy = async {
            let mut greeting = [0u8; 3];
            server.read_exact(&mut greeting).await.unwrap();
            server.write_all(&[0x05, 0x00]).await.unwrap();

            let mut head = [0u8; 4];
            server.read_exact(&mut head).await.unwrap();
            let mut len = [0u8; 1];
            server.read_exact(&mut len).await.unwrap();
            let mut rest = vec![0u8; len[0] as usize + 2];
            server.read_exact(&mut rest).await.unwrap();

            // host unreachable
            server
                .write_all(&[0x05, 0x04, 0x00, 0x01, 0, 0, 0, 0, 0, 0])
                .await
                .unwrap();
        };

        let (result, ()) = tokio::join!(establish(&mut client, &target, None, false), proxy);
        let err = result.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConnectionRefused);
        assert!(err.to_string().contains("host unreachable"));
    }

    #[tokio::test]
    async fn no_acceptable_method_fails() {
        let (mut client, mut server) = duplex(1024);
        let target = target("example.com", 443);

        let proxy = async {
            let mut greeting = [0u8; 3];
            server.read_exact(&mut greeting).await.unwrap();
            server.write_all(&[0x05, 0xff]).await.unwrap();
        };

        let (result, ()) = tokio::join!(establish(&mut client, &target, None, false), proxy);
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn passthrough_skips_connect_exchange() {
        let (mut client, mut server) = duplex(1024);
        let target = target("example.com", 443);

        let proxy = async {
            let mut greeting = [0u8; 3];
            server.read_exact(&mut greeting).await.unwrap();
            server.write_all(&[0x05, 0x00]).await.unwrap();
        };

        let (result, ()) = tokio::join!(establish(&mut client, &target, None, true), proxy);
        result.unwrap();

        // whatever goes out next is application payload, not a CONNECT frame
        client.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        server.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");
    }

    #[tokio::test]
    async fn ipv4_target_encoded_raw() {
        let (mut client, mut server) = duplex(1024);
        let target = TargetDescriptor {
            addr_type: AddressType::Ipv4,
            host: "10.0.0.1".to_string(),
            port: 8080,
            is_udp: false,
            payload_offset: 0,
        };

        let proxy = async {
            let mut greeting = [0u8; 3];
            server.read_exact(&mut greeting).await.unwrap();
            server.write_all(&[0x05, 0x00]).await.unwrap();

            let mut request = [0u8; 4 + 4 + 2];
            server.read_exact(&mut request).await.unwrap();
            assert_eq!(&request[..4], &[0x05, 0x01, 0x00, 0x01]);
            assert_eq!(&request[4..8], &[10, 0, 0, 1]);
            assert_eq!(&request[8..], &8080u16.to_be_bytes());
            server
                .write_all(&[0x05, 0x00, 0x00, 0x01, 0, 0, 0, 0, 0, 0])
                .await
                .unwrap();
        };

        let (result, ()) = tokio::join!(establish(&mut client, &target, None, false), proxy);
        result.unwrap();
    }
}
