pub mod packet_reader;
pub mod packet_writer;
pub mod writers;

use crate::protocol::mysql::constants;
use crate::protocol::mysql::constants::HeaderInfo;
use std::ops::Deref;

/// `Packet` represents one logical packet of the MySQL wire protocol. The
/// maximum size of a single frame is 16M - 1; larger commands arrive split
/// across frames and are reassembled by [`packet`].
/// [MySQL Packet](https://dev.mysql.com/doc/dev/mysql-server/latest/page_protocol_basic_packets.html)
#[derive(Clone, Debug)]
pub struct Packet(Vec<u8>);

impl Packet {
    pub fn from_vec(vec: Vec<u8>) -> Self {
        Packet(vec)
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.0
    }
}

#[inline]
pub fn full_packet(i: &[u8]) -> nom::IResult<&[u8], (u8, &[u8])> {
    let (i, _) = nom::bytes::complete::tag(&[0xff, 0xff, 0xff])(i)?;
    let (i, seq) = nom::bytes::complete::take(1u8)(i)?;
    let (i, bytes) = nom::bytes::complete::take(constants::MAX_PAYLOAD_LEN)(i)?;
    Ok((i, (seq[0], bytes)))
}

#[inline]
pub fn one_packet(i: &[u8]) -> nom::IResult<&[u8], (u8, &[u8])> {
    let (i, length) = nom::number::complete::le_u24(i)?;
    let (i, seq) = nom::bytes::complete::take(1u8)(i)?;
    let (i, bytes) = nom::bytes::complete::take(length)(i)?;
    Ok((i, (seq[0], bytes)))
}

impl Packet {
    fn extend(&mut self, bytes: &[u8]) {
        self.0.extend(bytes);
    }

    /// See [MySQL EOF_Packet](https://dev.mysql.com/doc/dev/mysql-server/latest/page_protocol_basic_eof_packet.html)
    pub fn is_eof_packet(&self) -> bool {
        let pkt_len = self.0.len();
        !self.0.is_empty() && self.0[0] == (HeaderInfo::EOFHeader as u8) && pkt_len <= 5
    }

    pub fn is_ok_packet(&self) -> bool {
        !self.0.is_empty() && self.0[0] == (HeaderInfo::OKHeader as u8)
    }

    pub fn is_err_packet(&self) -> bool {
        !self.0.is_empty() && self.0[0] == (HeaderInfo::ErrHeader as u8)
    }

    pub fn is_local_in_file_packet(&self) -> bool {
        !self.0.is_empty() && self.0[0] == (HeaderInfo::LocalInFileHeader as u8)
    }
}

impl AsRef<[u8]> for Packet {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl AsMut<[u8]> for Packet {
    fn as_mut(&mut self) -> &mut [u8] {
        &mut self.0
    }
}

impl Deref for Packet {
    type Target = [u8];
    fn deref(&self) -> &Self::Target {
        self.as_ref()
    }
}

#[inline]
fn framing_failure(i: &[u8]) -> nom::Err<nom::error::Error<&[u8]>> {
    nom::Err::Failure(nom::error::Error::new(i, nom::error::ErrorKind::Verify))
}

/// Parses one logical packet, coalescing max-size continuation frames.
///
/// Frames of a split command must carry consecutive sequence numbers; a gap
/// means the peer's framing is corrupt, which surfaces as a hard
/// `nom::Err::Failure` so the session is torn down instead of forwarding
/// garbage.
pub fn packet(i: &[u8]) -> nom::IResult<&[u8], (u8, Packet)> {
    let mut rest = i;
    let mut assembled: Option<Packet> = None;
    let mut last_seq: Option<u8> = None;

    loop {
        match full_packet(rest) {
            Ok((next, (seq, bytes))) => {
                if let Some(prev) = last_seq {
                    if seq != prev.wrapping_add(1) {
                        return Err(framing_failure(rest));
                    }
                }
                match assembled.as_mut() {
                    Some(pkt) => pkt.extend(bytes),
                    None => assembled = Some(Packet(Vec::from(bytes))),
                }
                last_seq = Some(seq);
                rest = next;
            }
            Err(nom::Err::Failure(e)) => return Err(nom::Err::Failure(e)),
            Err(_) => break,
        }
    }

    let (rest, (seq, bytes)) = one_packet(rest)?;
    if let Some(prev) = last_seq {
        if seq != prev.wrapping_add(1) {
            return Err(framing_failure(rest));
        }
    }
    let pkt = match assembled {
        Some(mut pkt) => {
            pkt.extend(bytes);
            pkt
        }
        None => Packet(Vec::from(bytes)),
    };
    Ok((rest, (seq, pkt)))
}
