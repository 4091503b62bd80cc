use mysql_common::constants::CapabilityFlags;
use winnow::binary::{le_u16, le_u32, le_u8};
use winnow::prelude::*;
use winnow::token::{literal, take, take_until};

/// `HandshakeResponse` represents the client's reply to the server's initial
/// handshake packet.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct HandshakeResponse {
    pub client_flag: CapabilityFlags,
    pub max_packet_len: u32,
    pub collation: u16,
    pub username: Option<Vec<u8>>,
    pub auth_response: Vec<u8>,
    pub auth_plugin: Vec<u8>,
    pub database: Option<Vec<u8>>,
}

impl HandshakeResponse {
    pub fn username_str(&self) -> Option<&str> {
        self.username
            .as_deref()
            .and_then(|user| std::str::from_utf8(user).ok())
    }

    pub fn uses_password(&self) -> bool {
        !self.auth_response.is_empty()
    }
}

pub fn read_length_encoded_number(i: &[u8]) -> IResult<&[u8], u64> {
    let (i, b) = le_u8.parse_peek(i)?;
    let r_size: usize = match b {
        0xfb => return Ok((i, 0)),
        0xfc => 2,
        0xfd => 3,
        0xfe => 8,
        _ => return Ok((i, b as u64)),
    };
    let mut bytes = [0u8; 8];
    let (i, b) = take(r_size).parse_peek(i)?;
    bytes[..r_size].copy_from_slice(b);
    Ok((i, u64::from_le_bytes(bytes)))
}

pub fn read_length_encoded_string(i: &[u8]) -> IResult<&[u8], &[u8]> {
    let (input, len) = read_length_encoded_number(i)?;
    take(len).parse_peek(input)
}

/// Parses a client handshake response, both the Protocol::41 and the legacy
/// Protocol::320 layouts.
pub fn client_handshake_response(i: &[u8]) -> IResult<&[u8], HandshakeResponse> {
    let (i, capability_flags) = le_u16.parse_peek(i)?;
    let capabilities = CapabilityFlags::from_bits_truncate(capability_flags as u32);
    if capabilities.contains(CapabilityFlags::CLIENT_PROTOCOL_41) {
        // HandshakeResponse41
        let (i, cap2) = le_u16.parse_peek(i)?;
        let cap = (cap2 as u32) << 16 | capability_flags as u32;
        let capabilities = CapabilityFlags::from_bits_truncate(cap);

        let (i, max_packet_len) = le_u32.parse_peek(i)?;
        let (i, collation) = take(1u8).parse_peek(i)?;
        let (i, _) = take(23u8).parse_peek(i)?;

        let (i, username) = {
            let (i, user) = take_until(1.., "\0").parse_peek(i)?;
            let (i, _) = literal(b"\0").parse_peek(i)?;
            (i, Some(user.to_owned()))
        };
        let (i, auth_response) =
            if capabilities.contains(CapabilityFlags::CLIENT_PLUGIN_AUTH_LENENC_CLIENT_DATA) {
                let (i, size) = read_length_encoded_number(i)?;
                take(size).parse_peek(i)?
            } else if capabilities.contains(CapabilityFlags::CLIENT_SECURE_CONNECTION) {
                let (i, size) = le_u8.parse_peek(i)?;
                take(size).parse_peek(i)?
            } else {
                take_until(1.., "\0").parse_peek(i)?
            };

        let (i, db) =
            if capabilities.contains(CapabilityFlags::CLIENT_CONNECT_WITH_DB) && !i.is_empty() {
                let (i, db) = take_until(1.., "\0").parse_peek(i)?;
                let (i, _) = literal(b"\0").parse_peek(i)?;
                (i, Some(db))
            } else {
                (i, None)
            };

        let (i, auth_plugin) =
            if capabilities.contains(CapabilityFlags::CLIENT_PLUGIN_AUTH) && !i.is_empty() {
                let (i, auth_plugin) = take_until(1.., "\0").parse_peek(i)?;
                let (i, _) = literal("\0").parse_peek(i)?;
                (i, auth_plugin)
            } else {
                (i, &b""[..])
            };

        Ok((
            i,
            HandshakeResponse {
                client_flag: capabilities,
                max_packet_len,
                collation: u16::from(collation[0]),
                username,
                auth_response: auth_response.to_vec(),
                auth_plugin: auth_plugin.to_vec(),
                database: db.map(|c| c.to_vec()),
            },
        ))
    } else {
        // HandshakeResponse320
        let (i, max_packet_len_v1) = le_u16.parse_peek(i)?;
        let (i, max_packet_len_v2) = le_u8.parse_peek(i)?;
        let max_packet_len = (max_packet_len_v2 as u32) << 16 | max_packet_len_v1 as u32;
        let (i, username) = take_until(1.., "\0").parse_peek(i)?;
        let (i, _) = literal(b"\0").parse_peek(i)?;

        // The remaining bytes are the scrambled password (and, with
        // CLIENT_CONNECT_WITH_DB, a database name), both nul-terminated.
        let (rest, auth_response) = if i.contains(&0) {
            let (i, auth) = take_until(0.., "\0").parse_peek(i)?;
            let (i, _) = literal(b"\0").parse_peek(i)?;
            (i, auth)
        } else {
            (&b""[..], i)
        };

        Ok((
            rest,
            HandshakeResponse {
                client_flag: capabilities,
                max_packet_len,
                collation: 0,
                username: Some(username.to_vec()),
                auth_response: auth_response.to_vec(),
                auth_plugin: vec![],
                database: None,
            },
        ))
    }
}

/// The server's initial handshake packet, as needed by the startup login
/// probe to authenticate against the protected server.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct HandshakeInit {
    pub protocol_version: u8,
    pub server_version: Vec<u8>,
    pub connection_id: u32,
    pub scramble: Vec<u8>,
    pub capabilities: CapabilityFlags,
    pub auth_plugin: Vec<u8>,
}

pub fn server_handshake_init(i: &[u8]) -> IResult<&[u8], HandshakeInit> {
    let (i, protocol_version) = le_u8.parse_peek(i)?;
    let (i, server_version) = take_until(1.., "\0").parse_peek(i)?;
    let (i, _) = literal(b"\0").parse_peek(i)?;
    let (i, connection_id) = le_u32.parse_peek(i)?;
    let (i, scramble_part_1) = take(8u8).parse_peek(i)?;
    let (i, _filler) = take(1u8).parse_peek(i)?;
    let (i, cap_low) = le_u16.parse_peek(i)?;

    let mut scramble = scramble_part_1.to_vec();
    if i.is_empty() {
        return Ok((
            i,
            HandshakeInit {
                protocol_version,
                server_version: server_version.to_vec(),
                connection_id,
                scramble,
                capabilities: CapabilityFlags::from_bits_truncate(cap_low as u32),
                auth_plugin: vec![],
            },
        ));
    }

    let (i, _charset) = le_u8.parse_peek(i)?;
    let (i, _status) = le_u16.parse_peek(i)?;
    let (i, cap_high) = le_u16.parse_peek(i)?;
    let capabilities = CapabilityFlags::from_bits_truncate((cap_high as u32) << 16 | cap_low as u32);
    let (i, _auth_data_len) = le_u8.parse_peek(i)?;
    let (i, _reserved) = take(10u8).parse_peek(i)?;

    let i = if capabilities.contains(CapabilityFlags::CLIENT_SECURE_CONNECTION) {
        let (i, scramble_part_2) = take(12u8).parse_peek(i)?;
        scramble.extend_from_slice(scramble_part_2);
        // Trailing nul after part 2.
        match literal::<_, _, winnow::error::InputError<&[u8]>>(b"\0").parse_peek(i) {
            Ok((i, _)) => i,
            Err(_) => i,
        }
    } else {
        i
    };

    let (i, auth_plugin) = if capabilities.contains(CapabilityFlags::CLIENT_PLUGIN_AUTH)
        && !i.is_empty()
    {
        let (i, auth_plugin) = take_until(1.., "\0").parse_peek(i)?;
        let (i, _) = literal(b"\0").parse_peek(i)?;
        (i, auth_plugin)
    } else {
        (i, &b""[..])
    };

    Ok((
        i,
        HandshakeInit {
            protocol_version,
            server_version: server_version.to_vec(),
            connection_id,
            scramble,
            capabilities,
            auth_plugin: auth_plugin.to_vec(),
        },
    ))
}

const CLIENT_COMPRESS_LOW_BYTE: u8 = 0x20;

/// Clears the CLIENT_COMPRESS capability bit in a client handshake-response
/// payload. Both the 4.1 and 3.20 layouts begin with the little-endian
/// capability word, so the bit lives in byte 0 either way.
pub fn clear_client_compress_flag(payload: &mut [u8]) -> bool {
    if payload.is_empty() {
        return false;
    }
    payload[0] &= !CLIENT_COMPRESS_LOW_BYTE;
    true
}

/// Clears the CLIENT_COMPRESS capability bit in the server's handshake-init
/// payload: protocol version byte, nul-terminated version string, 4-byte
/// connection id, 8-byte scramble part, filler, then the low capability
/// byte.
pub fn clear_server_compress_flag(payload: &mut [u8]) -> bool {
    let mut i = 1;
    while i < payload.len() && payload[i] != 0 {
        i += 1;
    }
    let cap_pos = i + 1 + 4 + 8 + 1;
    if cap_pos >= payload.len() {
        return false;
    }
    payload[cap_pos] &= !CLIENT_COMPRESS_LOW_BYTE;
    true
}
