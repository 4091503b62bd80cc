use crate::analysis::risk::QueryType;
use crate::protocol::mysql::basic::{clear_client_compress_flag, client_handshake_response};
use crate::protocol::mysql::constants::CommandCode;
use crate::protocol::mysql::error_codes::ErrorKind;
use crate::protocol::mysql::packet::packet_reader::PacketReader;
use crate::protocol::mysql::packet::packet_writer::PacketWriter;
use crate::protocol::mysql::packet::writers::{
    write_empty_set_reply, write_err_reply, write_generic_err_reply, write_ok_reply,
};
use crate::protocol::mysql::packet::Packet;
use crate::server::session::{QueryTypeCell, SharedClientWriter};
use crate::server::{FirewallContext, QueryAction};

use num_traits::FromPrimitive;
use std::io::{self, Write};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, warn};

/// How the guard half treats each client command.
enum CommandClass {
    /// Forward to the server untouched.
    Safe,
    /// Never forward; reply with an empty result set as if it succeeded.
    Absorb,
    /// Server-internal commands that no client should ever send.
    Reject,
    /// Absorb and let the socket close naturally.
    Quit,
    /// SQL text: the analysis pipeline decides.
    Query,
}

fn classify_command(code: CommandCode) -> CommandClass {
    match code {
        CommandCode::ComInitDB
        | CommandCode::ComStmtPrepare
        | CommandCode::ComStmtClose
        | CommandCode::ComStmtExecute
        | CommandCode::ComStmtReset
        | CommandCode::ComStmtFetch
        | CommandCode::ComStmtSendLongData
        | CommandCode::ComSetOption
        | CommandCode::ComChangeUser
        | CommandCode::ComRefresh
        | CommandCode::ComBinlogDump
        | CommandCode::ComRegisterSlave
        | CommandCode::ComTableDump
        | CommandCode::ComPing
        | CommandCode::ComFieldList
        | CommandCode::ComProcessInfo
        | CommandCode::ComStatistics
        | CommandCode::ComDebug => CommandClass::Safe,

        CommandCode::ComCreateDB
        | CommandCode::ComDropDB
        | CommandCode::ComProcessKill
        | CommandCode::ComShutdown => CommandClass::Absorb,

        CommandCode::ComSleep
        | CommandCode::ComConnect
        | CommandCode::ComTime
        | CommandCode::ComDelayedInsert
        | CommandCode::ComConnectOut => CommandClass::Reject,

        CommandCode::ComQuit => CommandClass::Quit,

        CommandCode::ComQuery => CommandClass::Query,

        _ => CommandClass::Safe,
    }
}

/// The client-to-server half: validates the login handshake, then reads
/// one command at a time, forwarding the harmless ones and substituting
/// replies for everything dangerous.
pub async fn guard_loop<CR, SW, CW>(
    ctx: Arc<FirewallContext>,
    mut client_reader: PacketReader<CR>,
    mut server_writer: PacketWriter<SW>,
    client_writer: SharedClientWriter<CW>,
    client_host: String,
    last_query: QueryTypeCell,
) -> io::Result<()>
where
    CR: AsyncRead + Send + Unpin,
    SW: AsyncWrite + Send + Unpin,
    CW: AsyncWrite + Send + Unpin,
{
    let mut handshake_seen = false;
    loop {
        let Some((seq, mut packet)) = client_reader.next_async().await? else {
            return Ok(());
        };

        if !handshake_seen {
            handshake_seen = true;
            handle_handshake_response(
                &ctx,
                seq,
                &mut packet,
                &mut server_writer,
                &client_writer,
                &client_host,
            )
            .await?;
            continue;
        }

        // A non-zero sequence after the handshake is authentication
        // continuation traffic (e.g. an auth-switch response), not a
        // command; pass it along unchanged. It may legally be empty.
        if seq != 0 {
            forward(&mut server_writer, seq, &packet).await?;
            continue;
        }

        if packet.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "empty command packet",
            ));
        }

        let Some(code) = CommandCode::from_u8(packet[0]) else {
            warn!("unknown command byte {:#04x}", packet[0]);
            let mut writer = client_writer.lock().await;
            writer.set_seq(seq.wrapping_add(1));
            write_generic_err_reply(&mut writer).await?;
            continue;
        };

        match classify_command(code) {
            CommandClass::Safe => {
                forward(&mut server_writer, 0, &packet).await?;
            }
            CommandClass::Absorb => {
                debug!("absorbed {code:?}");
                let mut writer = client_writer.lock().await;
                writer.set_seq(seq.wrapping_add(1));
                write_empty_set_reply(&mut writer).await?;
            }
            CommandClass::Reject => {
                warn!("client sent server-internal command {code:?}");
                let mut writer = client_writer.lock().await;
                writer.set_seq(seq.wrapping_add(1));
                write_err_reply(ErrorKind::ErUnknownComError, b"", &mut writer).await?;
            }
            CommandClass::Quit => {
                return Ok(());
            }
            CommandClass::Query => {
                handle_query(
                    &ctx,
                    seq,
                    &packet,
                    &mut server_writer,
                    &client_writer,
                    &last_query,
                )
                .await?;
            }
        }
    }
}

/// Re-frames a payload toward the server. The writer re-splits anything
/// over the payload limit, so a multi-frame command goes out with the same
/// fragment boundaries and sequence numbers it arrived with.
async fn forward<W: AsyncWrite + Unpin>(
    writer: &mut PacketWriter<W>,
    first_seq: u8,
    packet: &Packet,
) -> io::Result<()> {
    writer.set_seq(first_seq);
    writer.write_all(packet)?;
    writer.end_packet().await?;
    writer.flush_all().await
}

async fn handle_query<SW, CW>(
    ctx: &FirewallContext,
    seq: u8,
    packet: &Packet,
    server_writer: &mut PacketWriter<SW>,
    client_writer: &SharedClientWriter<CW>,
    last_query: &QueryTypeCell,
) -> io::Result<()>
where
    SW: AsyncWrite + Send + Unpin,
    CW: AsyncWrite + Send + Unpin,
{
    let sql = String::from_utf8_lossy(&packet[1..]);
    let decision = ctx.analyze(&sql);

    match decision.action {
        QueryAction::Forward => {
            // Tell the blocker half what kind of reply to fake if the
            // server answers this with an error.
            last_query.store(decision.query_type);
            forward(server_writer, 0, packet).await
        }
        QueryAction::Block => {
            let mut writer = client_writer.lock().await;
            writer.set_seq(seq.wrapping_add(1));
            match decision.query_type {
                QueryType::Select
                | QueryType::Show
                | QueryType::Describe
                | QueryType::Explain => write_empty_set_reply(&mut writer).await,
                QueryType::Insert
                | QueryType::Update
                | QueryType::Delete
                | QueryType::Set
                | QueryType::Transaction
                | QueryType::Lock
                | QueryType::Use => write_ok_reply(&mut writer).await,
                QueryType::Unknown => write_generic_err_reply(&mut writer).await,
            }
        }
    }
}

/// First packet of the session: the client's handshake response. The
/// username must be present and allowed to connect from this address, and
/// the compression capability is cleared before the packet moves on.
async fn handle_handshake_response<SW, CW>(
    ctx: &FirewallContext,
    seq: u8,
    packet: &mut Packet,
    server_writer: &mut PacketWriter<SW>,
    client_writer: &SharedClientWriter<CW>,
    client_host: &str,
) -> io::Result<()>
where
    SW: AsyncWrite + Send + Unpin,
    CW: AsyncWrite + Send + Unpin,
{
    let parsed = client_handshake_response(packet).map(|(_, response)| response);
    let response = match parsed {
        Ok(response) => response,
        Err(_) => {
            let mut writer = client_writer.lock().await;
            writer.set_seq(seq.wrapping_add(1));
            write_generic_err_reply(&mut writer).await?;
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "malformed handshake response",
            ));
        }
    };

    let username = match response.username_str() {
        Some(name) if !name.is_empty() => name.to_string(),
        _ => {
            let mut writer = client_writer.lock().await;
            writer.set_seq(seq.wrapping_add(1));
            write_generic_err_reply(&mut writer).await?;
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "handshake response carries no username",
            ));
        }
    };

    if !ctx.login_filter.permits(&username, client_host) {
        let message = format!(
            "Access denied for user '{}'@'{}' (using password: {})",
            username,
            client_host,
            if response.uses_password() { "YES" } else { "NO" }
        );
        warn!("{message}");
        let mut writer = client_writer.lock().await;
        writer.set_seq(seq.wrapping_add(1));
        write_err_reply(
            ErrorKind::ErAccessDeniedError,
            message.as_bytes(),
            &mut writer,
        )
        .await?;
        return Err(io::Error::new(io::ErrorKind::PermissionDenied, message));
    }

    // We do not speak the compressed protocol, so neither may the peers.
    clear_client_compress_flag(packet.as_mut());
    forward(server_writer, seq, packet).await
}
