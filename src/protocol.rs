use std::net::Ipv4Addr;

use uuid::Uuid;

use crate::error::ProtocolError;

pub const MIN_HEADER_LEN: usize = 24;

pub const COMMAND_TCP: u8 = 1;
pub const COMMAND_UDP: u8 = 2;

pub const ADDRESS_TYPE_IPV4: u8 = 1;
pub const ADDRESS_TYPE_DOMAIN: u8 = 2;
pub const ADDRESS_TYPE_IPV6: u8 = 3;

pub const STATUS_OK: u8 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressType {
    Ipv4,
    Domain,
    Ipv6,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetDescriptor {
    pub addr_type: AddressType,
    pub host: String,
    pub port: u16,
    pub is_udp: bool,
    // index of the first payload byte in the chunk the header came from
    pub payload_offset: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    pub version: u8,
    pub target: TargetDescriptor,
}

// version echo plus status byte
pub fn reply_header(version: u8) -> [u8; 2] {
    [version, STATUS_OK]
}

// pure decode over the first client chunk, no I/O
pub fn parse_header(chunk: &[u8], user_id: &Uuid) -> Result<Handshake, ProtocolError> {
    if chunk.len() < MIN_HEADER_LEN {
        return Err(ProtocolError::Truncated(chunk.len()));
    }

    let mut reader = Reader::new(chunk);

    let version = reader.take_u8()?;

    let mut id = [0u8; 16];
    id.copy_from_slice(reader.take(16)?);
    if Uuid::from_bytes(id) != *user_id {
        return Err(ProtocolError::UserIdMismatch);
    }

    // options block, ignored
    let options_len = reader.take_u8()? as usize;
    reader.take(options_len)?;

    let command = reader.take_u8()?;
    let is_udp = match command {
        COMMAND_TCP => false,
        COMMAND_UDP => true,
        other => return Err(ProtocolError::UnknownCommand(other)),
    };

    let port = reader.take_u16()?;

    let (addr_type, host) = match reader.take_u8()? {
        ADDRESS_TYPE_IPV4 => {
            let raw = reader.take(4)?;
            let ip = Ipv4Addr::new(raw[0], raw[1], raw[2], raw[3]);
            (AddressType::Ipv4, ip.to_string())
        }
        ADDRESS_TYPE_DOMAIN => {
            let len = reader.take_u8()? as usize;
            let raw = reader.take(len)?;
            let host = std::str::from_utf8(raw)
                .map_err(|_| ProtocolError::InvalidHostname)?
                .to_string();
            (AddressType::Domain, host)
        }
        ADDRESS_TYPE_IPV6 => {
            let raw = reader.take(16)?;
            (AddressType::Ipv6, format_ipv6_groups(raw))
        }
        other => return Err(ProtocolError::UnknownAddressType(other)),
    };

    if host.is_empty() {
        return Err(ProtocolError::EmptyHostname);
    }

    Ok(Handshake {
        version,
        target: TargetDescriptor {
            addr_type,
            host,
            port,
            is_udp,
            payload_offset: reader.position(),
        },
    })
}

// eight colon-separated lowercase hex groups, no zero compression
fn format_ipv6_groups(raw: &[u8]) -> String {
    let groups: Vec<String> = raw
        .chunks(2)
        .map(|pair| format!("{:x}", u16::from_be_bytes([pair[0], pair[1]])))
        .collect();
    groups.join(":")
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn position(&self) -> usize {
        self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], ProtocolError> {
        let end = self
            .pos
            .checked_add(n)
            .ok_or(ProtocolError::Truncated(self.buf.len()))?;
        if end > self.buf.len() {
            return Err(ProtocolError::Truncated(self.buf.len()));
        }
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn take_u8(&mut self) -> Result<u8, ProtocolError> {
        Ok(self.take(1)?[0])
    }

    fn take_u16(&mut self) -> Result<u16, ProtocolError> {
        let raw = self.take(2)?;
        Ok(u16::from_be_bytes([raw[0], raw[1]]))
    }
}
