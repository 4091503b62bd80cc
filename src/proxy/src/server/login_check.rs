use crate::protocol::mysql::basic::{
    read_length_encoded_number, read_length_encoded_string, server_handshake_init,
};
use crate::protocol::mysql::constants::{AuthPluginName, CommandCode};
use crate::protocol::mysql::packet::packet_reader::PacketReader;
use crate::protocol::mysql::packet::packet_writer::PacketWriter;
use crate::protocol::mysql::packet::writers::write_query_request;
use crate::policy::login::LoginFilter;
use crate::server::{connect_to_server, ConnectAddr};

use byteorder::{LittleEndian, WriteBytesExt};
use mysql_common::constants::CapabilityFlags;
use sha1::{Digest, Sha1};
use std::io::{self, Write};
use tracing::{info, warn};

/// Reads the protected server's user/host grants once at startup. Failure
/// is not fatal: the filter comes back empty and admits every username, and
/// the server still authenticates for real.
pub async fn load_login_filter(
    addr: &ConnectAddr,
    user: Option<&str>,
    password: Option<&str>,
) -> LoginFilter {
    let Some(user) = user else {
        info!("no admin credentials configured; the login filter is disabled");
        return LoginFilter::empty();
    };
    match fetch_user_hosts(addr, user, password.unwrap_or("")).await {
        Ok(filter) => filter,
        Err(e) => {
            warn!("unable to read login permissions: {e}; all logins will be permitted");
            LoginFilter::empty()
        }
    }
}

fn protocol_error(message: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, message.into())
}

/// mysql_native_password: SHA1(password) XOR SHA1(salt + SHA1(SHA1(password))).
fn scramble_native_password(salt: &[u8], password: &str) -> Vec<u8> {
    if password.is_empty() {
        return Vec::new();
    }
    let stage1: [u8; 20] = Sha1::digest(password.as_bytes()).into();
    let stage2: [u8; 20] = Sha1::digest(stage1).into();

    let mut hasher = Sha1::new();
    hasher.update(salt);
    hasher.update(stage2);
    let mixed: [u8; 20] = hasher.finalize().into();

    stage1
        .iter()
        .zip(mixed.iter())
        .map(|(a, b)| a ^ b)
        .collect()
}

async fn fetch_user_hosts(
    addr: &ConnectAddr,
    user: &str,
    password: &str,
) -> io::Result<LoginFilter> {
    let (raw_reader, raw_writer) = connect_to_server(addr).await?;
    let mut reader = PacketReader::new(raw_reader);
    let mut writer = PacketWriter::new(raw_writer);

    // Server greeting.
    let (seq, greeting) = reader
        .next_async()
        .await?
        .ok_or_else(|| protocol_error("server closed during handshake"))?;
    if greeting.is_err_packet() {
        return Err(protocol_error("server refused the connection"));
    }
    let (_, handshake) = server_handshake_init(&greeting)
        .map_err(|e| protocol_error(format!("bad server greeting: {e:?}")))?;

    // Handshake response with the admin credentials, asking for the mysql
    // system database directly.
    let capabilities = CapabilityFlags::CLIENT_PROTOCOL_41
        | CapabilityFlags::CLIENT_SECURE_CONNECTION
        | CapabilityFlags::CLIENT_PLUGIN_AUTH
        | CapabilityFlags::CLIENT_CONNECT_WITH_DB
        | CapabilityFlags::CLIENT_LONG_PASSWORD;
    let auth_response = scramble_native_password(&handshake.scramble, password);

    writer.set_seq(seq.wrapping_add(1));
    writer.write_u32::<LittleEndian>(capabilities.bits())?;
    writer.write_u32::<LittleEndian>(16_777_216)?; // max packet
    writer.write_u8(0x21)?; // utf8_general_ci
    writer.write_all(&[0u8; 23])?;
    writer.write_all(user.as_bytes())?;
    writer.write_u8(0)?;
    writer.write_u8(auth_response.len() as u8)?;
    writer.write_all(&auth_response)?;
    writer.write_all(b"mysql\0")?;
    writer.write_all(AuthPluginName::AuthNativePassword.as_ref().as_bytes())?;
    writer.write_u8(0)?;
    writer.end_packet().await?;
    writer.flush_all().await?;

    // Authentication outcome, possibly via an auth-switch round trip.
    let (seq, reply) = reader
        .next_async()
        .await?
        .ok_or_else(|| protocol_error("server closed during authentication"))?;
    let reply = if reply.first() == Some(&0xfe) && reply.len() > 1 {
        let rest = &reply[1..];
        let plugin_end = rest
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| protocol_error("malformed auth switch request"))?;
        let plugin = &rest[..plugin_end];
        if plugin != AuthPluginName::AuthNativePassword.as_ref().as_bytes() {
            return Err(protocol_error(format!(
                "server demands unsupported auth plugin {:?}",
                String::from_utf8_lossy(plugin)
            )));
        }
        let mut new_salt = &rest[plugin_end + 1..];
        if new_salt.last() == Some(&0) {
            new_salt = &new_salt[..new_salt.len() - 1];
        }
        let response = scramble_native_password(new_salt, password);
        writer.set_seq(seq.wrapping_add(1));
        writer.write_all(&response)?;
        writer.end_packet().await?;
        writer.flush_all().await?;

        reader
            .next_async()
            .await?
            .ok_or_else(|| protocol_error("server closed after auth switch"))?
            .1
    } else {
        reply
    };
    if reply.is_err_packet() {
        return Err(protocol_error("authentication failed"));
    }
    if !reply.is_ok_packet() {
        return Err(protocol_error("unexpected authentication reply"));
    }

    // The actual permission read.
    writer.reset_seq();
    write_query_request(&mut writer, b"SELECT User, Host FROM user").await?;

    let (_, column_count_packet) = reader
        .next_async()
        .await?
        .ok_or_else(|| protocol_error("server closed before the resultset"))?;
    if column_count_packet.is_err_packet() {
        return Err(protocol_error("permission query failed"));
    }
    let (_, column_count) = read_length_encoded_number(&column_count_packet)
        .map_err(|e| protocol_error(format!("bad column count: {e:?}")))?;
    if column_count != 2 {
        return Err(protocol_error(format!(
            "permission query returned {column_count} columns, expected 2"
        )));
    }

    // Skip the column definitions up to their EOF marker.
    loop {
        let (_, packet) = reader
            .next_async()
            .await?
            .ok_or_else(|| protocol_error("server closed mid-resultset"))?;
        if packet.is_eof_packet() {
            break;
        }
    }

    // Rows until the closing EOF.
    let mut filter = LoginFilter::empty();
    loop {
        let (_, packet) = reader
            .next_async()
            .await?
            .ok_or_else(|| protocol_error("server closed mid-resultset"))?;
        if packet.is_eof_packet() {
            break;
        }
        if packet.is_err_packet() {
            return Err(protocol_error("resultset ended in an error"));
        }
        let (rest, user_column) = read_length_encoded_string(&packet)
            .map_err(|e| protocol_error(format!("bad row: {e:?}")))?;
        let (_, host_column) = read_length_encoded_string(rest)
            .map_err(|e| protocol_error(format!("bad row: {e:?}")))?;
        filter.insert(
            &String::from_utf8_lossy(user_column),
            &String::from_utf8_lossy(host_column),
        );
    }

    // Part politely.
    writer.reset_seq();
    writer.write_u8(CommandCode::ComQuit as u8)?;
    writer.end_packet().await?;
    writer.flush_all().await?;

    info!("loaded login permissions for the login filter");
    Ok(filter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_password_scrambles_to_nothing() {
        assert!(scramble_native_password(b"12345678901234567890", "").is_empty());
    }

    #[test]
    fn scramble_matches_known_vector() {
        // Independently computed with the documented algorithm.
        let salt = b"abcdefghijklmnopqrst";
        let scrambled = scramble_native_password(salt, "secret");
        assert_eq!(20, scrambled.len());

        let stage1: [u8; 20] = Sha1::digest(b"secret").into();
        let stage2: [u8; 20] = Sha1::digest(stage1).into();
        let mut hasher = Sha1::new();
        hasher.update(salt);
        hasher.update(stage2);
        let mixed: [u8; 20] = hasher.finalize().into();
        let expected: Vec<u8> = stage1.iter().zip(mixed.iter()).map(|(a, b)| a ^ b).collect();
        assert_eq!(expected, scrambled);
    }

    #[test]
    fn scramble_depends_on_salt() {
        let a = scramble_native_password(b"aaaaaaaaaaaaaaaaaaaa", "pw");
        let b = scramble_native_password(b"bbbbbbbbbbbbbbbbbbbb", "pw");
        assert_ne!(a, b);
    }
}
