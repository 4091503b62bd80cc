use num_derive::{FromPrimitive, ToPrimitive};
use strum_macros::AsRefStr;

// see: https://dev.mysql.com/doc/dev/mysql-server/latest/page_protocol_basic_packets.html
// max packet payload length.
pub const MAX_PAYLOAD_LEN: usize = 16_777_215;

pub const PACKET_HEADER_LEN: usize = 4;

/// auth-plugin-data-part-1: the first 8 bytes of the scramble sent in the
/// initial handshake. 1 byte padding follows it on the wire.
pub const AUTH_PLUGIN_DATA_PART_1_LENGTH: usize = 8;
/// The full scramble length (auth-plugin-data-part-1 + auth-plugin-data-part-2).
pub const SCRAMBLE_SIZE: usize = 20;

/// Column type byte used in the synthetic empty-result-set field descriptor.
pub const TYPE_VAR_STRING: u8 = 0xfd;

/// Charset byte pair used in the synthetic field descriptor (observed from a
/// stock MySQL server with Wireshark).
pub const FIELD_CHARSET: [u8; 2] = [0xc0, 0x00];

/// Decimals byte in the synthetic field descriptor.
pub const FIELD_DECIMALS: u8 = 0x1f;

pub const STATUS_AUTO_COMMIT: u16 = 0x0002;

#[derive(Debug, PartialEq, AsRefStr)]
pub enum AuthPluginName {
    #[strum(serialize = "mysql_old_password")]
    AuthMySQlOldPassword,
    #[strum(serialize = "caching_sha2_password")]
    AuthCachingSha2Password,
    #[strum(serialize = "mysql_native_password")]
    AuthNativePassword,
    #[strum(serialize = "auth_unknown_plugin")]
    UnKnowPluginName,
}

#[derive(Debug, PartialEq, ToPrimitive, FromPrimitive)]
#[repr(u8)]
pub enum HeaderInfo {
    OKHeader = 0x00,
    ErrHeader = 0xff,
    EOFHeader = 0xfe,
    LocalInFileHeader = 0xfb,
}

#[derive(Debug, PartialEq, Eq, Clone, Copy, FromPrimitive, ToPrimitive)]
#[repr(u8)]
pub enum CommandCode {
    ComSleep = 0,
    ComQuit,
    ComInitDB,
    ComQuery,
    ComFieldList,
    ComCreateDB,
    ComDropDB,
    ComRefresh,
    ComShutdown,
    ComStatistics,
    ComProcessInfo,
    ComConnect,
    ComProcessKill,
    ComDebug,
    ComPing,
    ComTime,
    ComDelayedInsert,
    ComChangeUser,
    ComBinlogDump,
    ComTableDump,
    ComConnectOut,
    ComRegisterSlave,
    ComStmtPrepare,
    ComStmtExecute,
    ComStmtSendLongData,
    ComStmtClose,
    ComStmtReset,
    ComSetOption,
    ComStmtFetch,
    ComDaemon,
    ComBinlogDumpGtid,
    ComResetConnection,
    ComEnd,
}
