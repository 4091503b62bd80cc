use crate::analysis::risk::QueryType;
use crate::protocol::mysql::basic::clear_server_compress_flag;
use crate::protocol::mysql::packet::packet_reader::PacketReader;
use crate::protocol::mysql::packet::writers::{
    write_empty_set_reply, write_generic_err_reply, write_ok_reply,
};
use crate::server::session::{QueryTypeCell, SharedClientWriter};

use std::io::{self, Write};
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::warn;

/// Offset of the human-readable message inside a protocol-4.1 error
/// payload: marker, errno, '#', five SQLSTATE characters.
const ERROR_MESSAGE_OFFSET: usize = 1 + 2 + 1 + 5;

/// The server-to-client half: clears the compression capability from the
/// server's greeting and makes sure the server's error messages never reach
/// the client, substituting a reply shaped like a boring success for
/// whatever command went out last.
pub async fn blocker_loop<SR, CW>(
    mut server_reader: PacketReader<SR>,
    client_writer: SharedClientWriter<CW>,
    last_query: QueryTypeCell,
) -> io::Result<()>
where
    SR: AsyncRead + Send + Unpin,
    CW: AsyncWrite + Send + Unpin,
{
    let mut handshake_seen = false;
    loop {
        let Some((seq, mut packet)) = server_reader.next_async().await? else {
            return Ok(());
        };

        let mut writer = client_writer.lock().await;

        if !handshake_seen {
            handshake_seen = true;
            // The greeting advertises the server's capabilities; we do not
            // forward compressed traffic, so the client must not ask for it.
            if !clear_server_compress_flag(packet.as_mut()) {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "server greeting too short to carry capabilities",
                ));
            }
            writer.set_seq(seq);
            writer.write_all(&packet)?;
            writer.end_packet().await?;
            writer.flush_all().await?;
            continue;
        }

        if packet.is_err_packet() {
            let message = packet
                .get(ERROR_MESSAGE_OFFSET..)
                .map(String::from_utf8_lossy)
                .unwrap_or_default();
            warn!("blocked MySQL error message: {message}");

            writer.set_seq(seq);
            match last_query.load() {
                QueryType::Select
                | QueryType::Show
                | QueryType::Describe
                | QueryType::Explain => write_empty_set_reply(&mut writer).await?,
                QueryType::Insert
                | QueryType::Update
                | QueryType::Delete
                | QueryType::Set
                | QueryType::Transaction
                | QueryType::Lock
                | QueryType::Use => write_ok_reply(&mut writer).await?,
                QueryType::Unknown => write_generic_err_reply(&mut writer).await?,
            }
            continue;
        }

        writer.set_seq(seq);
        writer.write_all(&packet)?;
        writer.end_packet().await?;
        writer.flush_all().await?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::mysql::packet::packet_writer::PacketWriter;
    use std::io::Cursor;
    use std::sync::Arc;

    fn packet_bytes(seq: u8, payload: &[u8]) -> Vec<u8> {
        let mut bytes = vec![
            payload.len() as u8,
            (payload.len() >> 8) as u8,
            (payload.len() >> 16) as u8,
            seq,
        ];
        bytes.extend_from_slice(payload);
        bytes
    }

    fn server_greeting(seq: u8) -> Vec<u8> {
        let mut payload = vec![0x0a];
        payload.extend_from_slice(b"8.0.34\0");
        payload.extend_from_slice(&[0x08, 0x00, 0x00, 0x00]);
        payload.extend_from_slice(&[0x41; 8]);
        payload.push(0x00);
        payload.extend_from_slice(&[0xff, 0xf7]); // capabilities incl. compress
        payload.push(0x21);
        payload.extend_from_slice(&[0x02, 0x00]);
        payload.extend_from_slice(&[0xff, 0xc1]);
        payload.push(21);
        payload.extend_from_slice(&[0x00; 10]);
        packet_bytes(seq, &payload)
    }

    async fn blocker_outputs(input: Vec<u8>, last: QueryType) -> Vec<u8> {
        let writer: SharedClientWriter<Vec<u8>> =
            Arc::new(tokio::sync::Mutex::new(PacketWriter::new(Vec::new())));
        let cell = QueryTypeCell::new();
        cell.store(last);
        let _ = blocker_loop(
            PacketReader::new(Cursor::new(input)),
            Arc::clone(&writer),
            cell,
        )
        .await;
        let guard = writer.lock().await;
        guard.inner_writer.clone()
    }

    #[tokio::test]
    async fn greeting_compression_bit_is_cleared() {
        let input = server_greeting(0);
        let output = blocker_outputs(input.clone(), QueryType::Unknown).await;
        assert_eq!(input.len(), output.len());
        // Find the capability byte: after version string and fixed fields.
        let cap_pos = 4 + 1 + 7 + 4 + 8 + 1;
        assert_eq!(0xff, input[cap_pos]);
        assert_eq!(0xdf, output[cap_pos]);
        // Everything else survives byte-for-byte.
        assert_eq!(&input[..cap_pos], &output[..cap_pos]);
        assert_eq!(&input[cap_pos + 1..], &output[cap_pos + 1..]);
    }

    #[tokio::test]
    async fn error_after_select_becomes_empty_set() {
        let mut input = server_greeting(0);
        let mut error_payload = vec![0xff, 0x28, 0x04, b'#'];
        error_payload.extend_from_slice(b"42000");
        error_payload.extend_from_slice(b"Table 'shop.items' doesn't exist");
        input.extend_from_slice(&packet_bytes(1, &error_payload));

        let output = blocker_outputs(input, QueryType::Select).await;
        let after_greeting = &output[server_greeting(0).len()..];
        // Empty result set, first packet seq 1.
        assert_eq!(&[0x01, 0x00, 0x00, 0x01, 0x01], &after_greeting[..5]);
        // The server's message text is gone.
        let needle = b"doesn't exist";
        assert!(!output.windows(needle.len()).any(|w| w == needle));
    }

    #[tokio::test]
    async fn error_after_update_becomes_ok() {
        let mut input = server_greeting(0);
        let error_payload = [0xff, 0x28, 0x04, b'#', b'4', b'2', b'0', b'0', b'0'];
        input.extend_from_slice(&packet_bytes(1, &error_payload));

        let output = blocker_outputs(input, QueryType::Update).await;
        let after_greeting = &output[server_greeting(0).len()..];
        assert_eq!(
            &[0x07, 0x00, 0x00, 0x01, 0x00, 0x01, 0x01],
            &after_greeting[..7]
        );
    }

    #[tokio::test]
    async fn error_with_unknown_type_becomes_generic_error() {
        let mut input = server_greeting(0);
        let mut error_payload = vec![0xff, 0x51, 0x04, b'#'];
        error_payload.extend_from_slice(b"3D000");
        error_payload.extend_from_slice(b"No database selected");
        input.extend_from_slice(&packet_bytes(1, &error_payload));

        let output = blocker_outputs(input, QueryType::Unknown).await;
        let after_greeting = &output[server_greeting(0).len()..];
        assert_eq!(0xff, after_greeting[4]);
        // Rewritten to the generic error number and state.
        assert_eq!(&[0x28, 0x04], &after_greeting[5..7]);
        assert_eq!(b"42000", &after_greeting[8..13]);
        let needle = b"No database";
        assert!(!output.windows(needle.len()).any(|w| w == needle));
    }

    #[tokio::test]
    async fn ordinary_results_are_forwarded_unchanged() {
        let mut input = server_greeting(0);
        let ok_payload = [0x00, 0x01, 0x01, 0x02, 0x00, 0x00, 0x00];
        input.extend_from_slice(&packet_bytes(1, &ok_payload));

        let output = blocker_outputs(input.clone(), QueryType::Select).await;
        assert_eq!(input.len(), output.len());
        assert_eq!(&input[input.len() - 7..], &output[output.len() - 7..]);
    }
}
