use crate::protocol::mysql::constants;
use byteorder::{ByteOrder, LittleEndian};

use std::io;
use std::io::prelude::*;
use std::io::IoSlice;

use tokio::io::{AsyncWrite, AsyncWriteExt};

/// Buffers one outgoing packet payload and frames it on [`end_packet`],
/// splitting at the 16M - 1 payload boundary and numbering the frames from
/// the current sequence value.
///
/// [`end_packet`]: PacketWriter::end_packet
pub struct PacketWriter<W> {
    buf: Vec<u8>,
    seq: u8,
    pub inner_writer: W,
}

impl<W> PacketWriter<W> {
    pub fn new(write: W) -> Self {
        Self {
            buf: Vec::new(),
            seq: 0,
            inner_writer: write,
        }
    }

    fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    fn take_buffer(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.buf)
    }

    pub fn set_seq(&mut self, seq: u8) {
        self.seq = seq;
    }

    fn increase_seq(&mut self) {
        self.seq = self.seq.wrapping_add(1);
    }

    pub fn reset_seq(&mut self) {
        self.seq = 0;
    }

    pub fn seq(&self) -> u8 {
        self.seq
    }
}

impl<W> Write for PacketWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let len = buf.len();
        self.buf.extend_from_slice(buf);
        Ok(len)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<W: AsyncWrite + Unpin> PacketWriter<W> {
    pub async fn end_packet(&mut self) -> io::Result<()> {
        let mut header = [0; constants::PACKET_HEADER_LEN];
        if !self.is_empty() {
            let raw_packet = self.take_buffer();
            // split the raw buffer at the boundary of size MAX_PAYLOAD_LEN
            let chunks = raw_packet.chunks(constants::MAX_PAYLOAD_LEN);
            for chunk in chunks {
                // prepare the header
                LittleEndian::write_u24(&mut header, chunk.len() as u32);
                header[3] = self.seq();
                self.increase_seq();
                // write out the header and payload.
                //
                // depends on the AsyncWrite provided, this may trigger
                // real system call or not (for examples, if AsyncWrite is buffered stream)
                let written = self
                    .inner_writer
                    .write_vectored(&[IoSlice::new(&header), IoSlice::new(chunk)])
                    .await?;

                // if write buffer is not drained, fall back to write_all
                if written != constants::PACKET_HEADER_LEN + chunk.len() {
                    let remaining: Vec<u8> = header
                        .iter()
                        .chain(chunk.iter())
                        .skip(written)
                        .cloned()
                        .collect();
                    self.inner_writer.write_all(&remaining).await?
                }
            }
            Ok(())
        } else {
            // Packet with empty payload (e.g. an empty auth response).
            LittleEndian::write_u24(&mut header, 0);
            header[3] = self.seq();
            self.increase_seq();
            let _size = self
                .inner_writer
                .write_vectored(&[IoSlice::new(&header), IoSlice::new(&[])])
                .await?;
            Ok(())
        }
    }

    pub async fn flush_all(&mut self) -> io::Result<()> {
        self.inner_writer.flush().await
    }

    pub async fn shutdown(&mut self) -> io::Result<()> {
        self.inner_writer.shutdown().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn frames_payload_with_header_and_seq() {
        let mut writer = PacketWriter::new(Vec::new());
        writer.set_seq(1);
        writer.write_all(&[0xAA, 0xBB]).unwrap();
        writer.end_packet().await.unwrap();
        assert_eq!(vec![0x02, 0x00, 0x00, 0x01, 0xAA, 0xBB], writer.inner_writer);
        assert_eq!(2, writer.seq());
    }

    #[tokio::test]
    async fn splits_oversized_payload() {
        let mut writer = PacketWriter::new(Vec::new());
        let payload = vec![0x55u8; constants::MAX_PAYLOAD_LEN + 1];
        writer.write_all(&payload).unwrap();
        writer.end_packet().await.unwrap();

        let out = &writer.inner_writer;
        // First frame: max length, seq 0.
        assert_eq!(&[0xff, 0xff, 0xff, 0x00], &out[..4]);
        // Second frame: 1 byte, seq 1.
        let tail = &out[4 + constants::MAX_PAYLOAD_LEN..];
        assert_eq!(&[0x01, 0x00, 0x00, 0x01, 0x55], tail);
    }
}
