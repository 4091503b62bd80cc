use crate::protocol::mysql::constants::{
    CommandCode, FIELD_CHARSET, FIELD_DECIMALS, STATUS_AUTO_COMMIT, TYPE_VAR_STRING,
};
use crate::protocol::mysql::error_codes::ErrorKind;
use crate::protocol::mysql::packet::packet_writer::PacketWriter;

use byteorder::{LittleEndian, WriteBytesExt};
use mysql_common::io::WriteMysqlExt;
use std::io::{self, Write};
use tokio::io::AsyncWrite;

/// Synthetic OK acknowledgement: affected rows 1, insert id 1, autocommit,
/// no warnings, no message. Sent in place of data-modifying commands that
/// were blocked, so the client sees a perfectly ordinary success.
///
/// The caller positions the sequence number first.
pub async fn write_ok_reply<W: AsyncWrite + Unpin>(w: &mut PacketWriter<W>) -> io::Result<()> {
    w.write_u8(0x00)?;
    w.write_lenenc_int(1)?;
    w.write_lenenc_int(1)?;
    w.write_u16::<LittleEndian>(STATUS_AUTO_COMMIT)?;
    w.write_all(&[0x00, 0x00])?; // no warnings
    w.end_packet().await?;
    w.flush_all().await
}

/// Synthetic empty result set: a field-count packet announcing one column,
/// a single anonymous VAR_STRING field descriptor, and two EOF markers with
/// no row packets between them. Indistinguishable from a legitimate query
/// that matched nothing.
///
/// The caller positions the sequence number of the first packet; the writer
/// numbers the remaining three consecutively.
pub async fn write_empty_set_reply<W: AsyncWrite + Unpin>(
    w: &mut PacketWriter<W>,
) -> io::Result<()> {
    // Field count.
    w.write_lenenc_int(1)?;
    w.end_packet().await?;

    // Field descriptor: catalog "def", everything else anonymous.
    w.write_lenenc_str(b"def")?;
    w.write_lenenc_str(b"")?; // database
    w.write_lenenc_str(b"")?; // table
    w.write_lenenc_str(b"")?; // original table
    w.write_lenenc_str(b"")?; // name
    w.write_lenenc_str(b"")?; // original name
    w.write_u8(0x0c)?; // length of fixed fields
    w.write_all(&FIELD_CHARSET)?;
    w.write_u32::<LittleEndian>(0)?; // column length
    w.write_u8(TYPE_VAR_STRING)?;
    w.write_all(&[0x00, 0x00])?; // field flags
    w.write_u8(FIELD_DECIMALS)?;
    w.write_all(&[0x00, 0x00])?; // filler
    w.end_packet().await?;

    write_eof(w).await?;
    write_eof(w).await?;
    w.flush_all().await
}

async fn write_eof<W: AsyncWrite + Unpin>(w: &mut PacketWriter<W>) -> io::Result<()> {
    w.write_u8(0xfe)?;
    w.write_all(&[0x00, 0x00])?; // warning count
    w.write_u16::<LittleEndian>(STATUS_AUTO_COMMIT)?;
    w.end_packet().await
}

/// Synthetic error packet: `0xFF`, error number, `#`, SQLSTATE, message.
pub async fn write_err_reply<W: AsyncWrite + Unpin>(
    err: ErrorKind,
    msg: &[u8],
    w: &mut PacketWriter<W>,
) -> io::Result<()> {
    w.write_u8(0xff)?;
    w.write_u16::<LittleEndian>(err as u16)?;
    w.write_u8(b'#')?;
    w.write_all(err.sqlstate())?;
    w.write_all(msg)?;
    w.end_packet().await?;
    w.flush_all().await
}

/// The generic reply for invalid or unclassifiable queries: error 0x0428
/// with SQL state 42000 and no message text.
pub async fn write_generic_err_reply<W: AsyncWrite + Unpin>(
    w: &mut PacketWriter<W>,
) -> io::Result<()> {
    write_err_reply(ErrorKind::ErSyntaxError, b"", w).await
}

pub async fn write_query_request<W: AsyncWrite + Unpin>(
    w: &mut PacketWriter<W>,
    data: &[u8],
) -> io::Result<()> {
    let query_com = CommandCode::ComQuery as u8;
    w.write_u8(query_com)?;
    w.write_all(data)?;
    w.end_packet().await?;
    w.flush_all().await
}
