use crate::protocol::mysql::packet::packet_reader::PacketReader;
use crate::protocol::mysql::packet::packet_writer::PacketWriter;
use crate::server::blocker::blocker_loop;
use crate::server::guard::guard_loop;
use crate::server::FirewallContext;

use crate::analysis::risk::QueryType;
use std::io;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::debug;

/// The statement class of the last query the guard half forwarded. The
/// blocker half reads it to pick the shape of a substituted server error,
/// which is the only state the two halves share.
#[derive(Clone, Default)]
pub struct QueryTypeCell(Arc<AtomicU8>);

impl QueryTypeCell {
    pub fn new() -> Self {
        QueryTypeCell::default()
    }

    pub fn store(&self, qt: QueryType) {
        self.0.store(qt as u8, Ordering::Relaxed);
    }

    pub fn load(&self) -> QueryType {
        QueryType::from_u8(self.0.load(Ordering::Relaxed))
    }
}

/// The guard half writes synthetic replies to the client, and the blocker
/// half writes everything else to the same socket; the mutex keeps whole
/// packets whole.
pub type SharedClientWriter<W> = Arc<tokio::sync::Mutex<PacketWriter<W>>>;

/// Drives one client connection to completion: the guard half inspects
/// client-to-server traffic while the blocker half rewrites
/// server-to-client traffic. Whichever half finishes first (EOF, framing
/// error, write failure) takes the whole session down with it.
pub async fn run_session<CR, CW, SR, SW>(
    ctx: Arc<FirewallContext>,
    client_reader: CR,
    client_writer: CW,
    client_host: String,
    server_reader: SR,
    server_writer: SW,
) -> io::Result<()>
where
    CR: AsyncRead + Send + Unpin + 'static,
    CW: AsyncWrite + Send + Unpin + 'static,
    SR: AsyncRead + Send + Unpin + 'static,
    SW: AsyncWrite + Send + Unpin + 'static,
{
    let client_writer: SharedClientWriter<CW> =
        Arc::new(tokio::sync::Mutex::new(PacketWriter::new(client_writer)));
    let last_query = QueryTypeCell::new();

    let mut guard = tokio::spawn(guard_loop(
        Arc::clone(&ctx),
        PacketReader::new(client_reader),
        PacketWriter::new(server_writer),
        Arc::clone(&client_writer),
        client_host,
        last_query.clone(),
    ));
    let mut blocker = tokio::spawn(blocker_loop(
        PacketReader::new(server_reader),
        client_writer,
        last_query,
    ));

    // Either half ending ends the session; dropping the aborted half's
    // reader and writer closes its sockets, which unblocks the peer.
    let result = tokio::select! {
        guard_result = &mut guard => {
            blocker.abort();
            guard_result
        }
        blocker_result = &mut blocker => {
            guard.abort();
            blocker_result
        }
    };

    match result {
        Ok(session_result) => {
            if let Err(ref e) = session_result {
                debug!("session ended: {e}");
            }
            session_result
        }
        Err(join_error) if join_error.is_cancelled() => Ok(()),
        Err(join_error) => Err(io::Error::new(io::ErrorKind::Other, join_error)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::tests::context_with_prior;
    use tokio::io::{split, AsyncReadExt, AsyncWriteExt};

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

    fn server_greeting() -> Vec<u8> {
        let mut payload = vec![0x0a];
        payload.extend_from_slice(b"8.0.34\0");
        payload.extend_from_slice(&[0x08, 0x00, 0x00, 0x00]);
        payload.extend_from_slice(&[0x41; 8]);
        payload.push(0x00);
        payload.extend_from_slice(&[0xff, 0xf7]); // capabilities, compress set
        payload.push(0x21);
        payload.extend_from_slice(&[0x02, 0x00]);
        payload.extend_from_slice(&[0xff, 0xc1]);
        payload.push(21);
        payload.extend_from_slice(&[0x00; 10]);
        packet_bytes(0, &payload)
    }

    fn handshake_response() -> Vec<u8> {
        let mut payload = vec![0x8d, 0xa2, 0x00, 0x00];
        payload.extend_from_slice(&[0x00, 0x00, 0x00, 0x01]);
        payload.push(0x21);
        payload.extend_from_slice(&[0x00; 23]);
        payload.extend_from_slice(b"app\0");
        payload.push(0x00);
        payload.extend_from_slice(b"shop\0");
        packet_bytes(1, &payload)
    }

    fn query_packet(sql: &str) -> Vec<u8> {
        let mut payload = vec![0x03];
        payload.extend_from_slice(sql.as_bytes());
        packet_bytes(0, &payload)
    }

    async fn read_exactly<R: tokio::io::AsyncRead + Unpin>(reader: &mut R, n: usize) -> Vec<u8> {
        let mut buf = vec![0u8; n];
        reader.read_exact(&mut buf).await.unwrap();
        buf
    }

    #[tokio::test]
    async fn forwarded_query_round_trip() {
        let (client_side, firewall_client) = tokio::io::duplex(1 << 16);
        let (server_side, firewall_server) = tokio::io::duplex(1 << 16);
        let (fc_read, fc_write) = split(firewall_client);
        let (fs_read, fs_write) = split(firewall_server);

        let ctx = Arc::new(context_with_prior(0.05));
        let session = tokio::spawn(run_session(
            ctx,
            fc_read,
            fc_write,
            "127.0.0.1".to_string(),
            fs_read,
            fs_write,
        ));

        let (mut client_read, mut client_write) = split(client_side);
        let (mut server_read, mut server_write) = split(server_side);

        // Server greets; the client must see the compression bit cleared.
        let greeting = server_greeting();
        server_write.write_all(&greeting).await.unwrap();
        let seen = read_exactly(&mut client_read, greeting.len()).await;
        let cap_pos = 4 + 1 + 7 + 4 + 8 + 1;
        assert_eq!(0xdf, seen[cap_pos]);

        // Client logs in; the server sees the forwarded response.
        let login = handshake_response();
        client_write.write_all(&login).await.unwrap();
        let forwarded = read_exactly(&mut server_read, login.len()).await;
        assert_eq!(login.len(), forwarded.len());

        // Server accepts.
        let auth_ok = packet_bytes(2, &[0x00, 0x00, 0x00, 0x02, 0x00, 0x00, 0x00]);
        server_write.write_all(&auth_ok).await.unwrap();
        let _ = read_exactly(&mut client_read, auth_ok.len()).await;

        // A harmless query is forwarded verbatim.
        let query = query_packet("SELECT * FROM items WHERE id = 5");
        client_write.write_all(&query).await.unwrap();
        let forwarded = read_exactly(&mut server_read, query.len()).await;
        assert_eq!(query, forwarded);

        // The server errors; the client instead receives an empty result
        // set and never the error text.
        let mut error_payload = vec![0xff, 0x7a, 0x04, b'#'];
        error_payload.extend_from_slice(b"42S02");
        error_payload.extend_from_slice(b"Table 'shop.items' doesn't exist");
        let error_packet = packet_bytes(1, &error_payload);
        server_write.write_all(&error_packet).await.unwrap();

        // Empty result set: 5 + 26 + 9 + 9 bytes, four packets.
        let reply = read_exactly(&mut client_read, 49).await;
        assert_eq!(&[0x01, 0x00, 0x00, 0x01, 0x01], &reply[..5]);
        let needle = b"doesn't exist";
        assert!(!reply.windows(needle.len()).any(|w| w == needle));

        session.abort();
        let _ = session.await;
    }

    #[tokio::test]
    async fn blocked_query_never_reaches_the_server() {
        let (client_side, firewall_client) = tokio::io::duplex(1 << 16);
        let (server_side, firewall_server) = tokio::io::duplex(1 << 16);
        let (fc_read, fc_write) = split(firewall_client);
        let (fs_read, fs_write) = split(firewall_server);

        let ctx = Arc::new(context_with_prior(0.95));
        let session = tokio::spawn(run_session(
            ctx,
            fc_read,
            fc_write,
            "127.0.0.1".to_string(),
            fs_read,
            fs_write,
        ));

        let (mut client_read, mut client_write) = split(client_side);
        let (mut server_read, mut server_write) = split(server_side);

        let greeting = server_greeting();
        server_write.write_all(&greeting).await.unwrap();
        let _ = read_exactly(&mut client_read, greeting.len()).await;

        let login = handshake_response();
        client_write.write_all(&login).await.unwrap();
        let _ = read_exactly(&mut server_read, login.len()).await;

        // The injection-shaped query gets a synthetic empty set; the reply
        // arrives without the server being consulted at all.
        let query = query_packet("SELECT * FROM users WHERE name = '' OR 1=1 -- '");
        client_write.write_all(&query).await.unwrap();
        let reply = read_exactly(&mut client_read, 49).await;
        assert_eq!(&[0x01, 0x00, 0x00, 0x01, 0x01], &reply[..5]);

        // A blocked UPDATE gets a synthetic OK.
        let update = query_packet("UPDATE accounts SET bal=0 WHERE 1 IN (1)");
        client_write.write_all(&update).await.unwrap();
        let reply = read_exactly(&mut client_read, 11).await;
        assert_eq!(
            vec![0x07, 0x00, 0x00, 0x01, 0x00, 0x01, 0x01, 0x02, 0x00, 0x00, 0x00],
            reply
        );

        session.abort();
        let _ = session.await;
    }
}
