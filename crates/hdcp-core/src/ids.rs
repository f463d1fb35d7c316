//! Protocol message identifiers, transport types and fixed field lengths.

use serde::{Deserialize, Serialize};

/// Transport a link runs over.
///
/// `DisplayPort` moves each message field through its own register window and
/// carries no identity byte. `Iia` is the in-band framing where every message
/// starts with its identity byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LinkType {
    DisplayPort,
    Iia,
}

impl LinkType {
    /// Whether messages on this transport are prefixed by their id byte.
    pub fn has_id_prefix(self) -> bool {
        matches!(self, LinkType::Iia)
    }
}

/// HDCP 2.2 protocol message identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageId {
    Null = 1,
    AkeInit = 2,
    AkeSendCert = 3,
    AkeNoStoredKm = 4,
    AkeStoredKm = 5,
    AkeSendRrx = 6,
    AkeSendHPrime = 7,
    AkeSendPairingInfo = 8,
    LcInit = 9,
    LcSendLPrime = 10,
    SkeSendEks = 11,
    RepeaterAuthSendReceiverIdList = 12,
    RttReady = 13,
    RttChallenge = 14,
    RepeaterAuthSendAck = 15,
    RepeaterAuthStreamManage = 16,
    RepeaterAuthStreamReady = 17,
    ReceiverAuthStatus = 18,
    AkeTransmitterInfo = 19,
    AkeReceiverInfo = 20,
}

impl MessageId {
    /// All message ids in protocol order.
    pub const ALL: [MessageId; 20] = [
        MessageId::Null,
        MessageId::AkeInit,
        MessageId::AkeSendCert,
        MessageId::AkeNoStoredKm,
        MessageId::AkeStoredKm,
        MessageId::AkeSendRrx,
        MessageId::AkeSendHPrime,
        MessageId::AkeSendPairingInfo,
        MessageId::LcInit,
        MessageId::LcSendLPrime,
        MessageId::SkeSendEks,
        MessageId::RepeaterAuthSendReceiverIdList,
        MessageId::RttReady,
        MessageId::RttChallenge,
        MessageId::RepeaterAuthSendAck,
        MessageId::RepeaterAuthStreamManage,
        MessageId::RepeaterAuthStreamReady,
        MessageId::ReceiverAuthStatus,
        MessageId::AkeTransmitterInfo,
        MessageId::AkeReceiverInfo,
    ];

    /// Wire value of this id.
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Parse a wire value.
    pub fn from_u8(value: u8) -> Option<Self> {
        Self::ALL.iter().copied().find(|id| id.as_u8() == value)
    }

    /// Protocol name used in logs.
    pub fn name(self) -> &'static str {
        match self {
            MessageId::Null => "Null message",
            MessageId::AkeInit => "AKE_Init",
            MessageId::AkeSendCert => "AKE_Send_Cert",
            MessageId::AkeNoStoredKm => "AKE_No_Stored_km",
            MessageId::AkeStoredKm => "AKE_Stored_km",
            MessageId::AkeSendRrx => "AKE_Send_rrx",
            MessageId::AkeSendHPrime => "AKE_Send_H_prime",
            MessageId::AkeSendPairingInfo => "AKE_Send_Pairing_Info",
            MessageId::LcInit => "LC_Init",
            MessageId::LcSendLPrime => "LC_Send_L_prime",
            MessageId::SkeSendEks => "SKE_Send_Eks",
            MessageId::RepeaterAuthSendReceiverIdList => "RepeaterAuth_Send_ReceiverID_List",
            MessageId::RttReady => "RTT_Ready",
            MessageId::RttChallenge => "RTT_Challenge",
            MessageId::RepeaterAuthSendAck => "RepeaterAuth_Send_Ack",
            MessageId::RepeaterAuthStreamManage => "RepeaterAuth_Stream_Manage",
            MessageId::RepeaterAuthStreamReady => "RepeaterAuth_Stream_Ready",
            MessageId::ReceiverAuthStatus => "Receiver_AuthStatus",
            MessageId::AkeTransmitterInfo => "AKE_Transmitter_Info",
            MessageId::AkeReceiverInfo => "AKE_Receiver_Info",
        }
    }
}

/// Fixed field lengths in bytes.
pub mod len {
    pub const RTX: usize = 8;
    pub const RRX: usize = 8;
    pub const CAPS: usize = 3;
    pub const CERT_RX: usize = 522;
    pub const RECEIVER_ID: usize = 5;
    pub const EKPUB_KM: usize = 128;
    pub const EKH_KM: usize = 16;
    pub const M: usize = 16;
    pub const H_PRIME: usize = 32;
    pub const RN: usize = 8;
    pub const L_PRIME: usize = 32;
    pub const L_PRIME_PRECOMPUTED: usize = 16;
    pub const EDKEY_KS: usize = 16;
    pub const RIV: usize = 8;
    pub const RX_INFO: usize = 2;
    pub const SEQ_NUM_V: usize = 3;
    pub const V_PRIME: usize = 16;
    pub const V: usize = 16;
    pub const SEQ_NUM_M: usize = 3;
    pub const K: usize = 2;
    pub const DP_STREAM_ENTRY: usize = 2;
    pub const IIA_STREAM_ENTRY: usize = 7;
    pub const M_PRIME: usize = 32;
    pub const VERSION_INFO: usize = 5;
}

/// Topology limits for repeater authentication.
pub mod limits {
    /// Maximum downstream receivers reported in one list.
    pub const MAX_DEVICE_COUNT: usize = 31;
    /// Maximum repeater cascade depth.
    pub const MAX_DEPTH: u8 = 4;
    /// Largest value representable in a 3-byte sequence number.
    pub const SEQ_NUM_MAX: u32 = 0x00FF_FFFF;
}
