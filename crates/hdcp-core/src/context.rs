//! Per-link transmitter and receiver contexts.
//!
//! A link owns exactly one [`TxContext`] and one [`RxContext`]. The codec
//! reads outbound fields from them and writes inbound fields into them; the
//! state machine fills in gateway-produced material between messages.

use crate::caps::{Caps, RxInfo};
use crate::ids::{len, limits};
use serde::{Deserialize, Serialize};

/// Five-byte receiver identifier.
pub type ReceiverId = [u8; len::RECEIVER_ID];

/// One content stream managed through a repeater.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StreamEntry {
    /// Input counter for the stream's cipher.
    pub stream_ctr: u32,
    /// Packet or stream identifier.
    pub stream_id: u16,
    /// Content type (0 = may go to HDCP 1.x devices, 1 = HDCP 2.2+ only).
    pub content_type: u8,
}

impl StreamEntry {
    pub fn new(stream_id: u16, content_type: u8) -> Self {
        Self {
            stream_ctr: 0,
            stream_id,
            content_type,
        }
    }

    pub fn with_counter(mut self, stream_ctr: u32) -> Self {
        self.stream_ctr = stream_ctr;
        self
    }
}

impl Default for StreamEntry {
    fn default() -> Self {
        Self::new(0, 0)
    }
}

/// Parsed RepeaterAuth_Send_ReceiverID_List.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ReceiverIdList {
    pub info: RxInfo,
    pub seq_num_v: u32,
    pub v_prime: [u8; len::V_PRIME],
    pub receiver_ids: Vec<ReceiverId>,
}

impl ReceiverIdList {
    pub fn device_count(&self) -> usize {
        self.receiver_ids.len()
    }
}

/// Transmitter-side state for one link.
#[derive(Debug, Clone)]
pub struct TxContext {
    pub caps: Caps,
    pub version: u8,
    pub lc_precompute: bool,
    pub rtx: [u8; len::RTX],
    pub rn: [u8; len::RN],
    /// Least significant half of L, sent in RTT_Challenge.
    pub l_lsb: [u8; 16],
    pub riv: [u8; len::RIV],
    /// Stored pairing was found for the receiver in this attempt.
    pub stored_km: bool,
    pub ekpub_km: Vec<u8>,
    pub ekh_km: [u8; len::EKH_KM],
    pub m: [u8; len::M],
    pub edkey_ks: [u8; len::EDKEY_KS],
    pub v: [u8; len::V],
    /// Sequence number of the most recent Stream_Manage.
    pub seq_num_m: Option<u32>,
    /// Last accepted receiver-ID list sequence number.
    pub seq_num_v: Option<u32>,
    pub k: u16,
    pub streamid_type: Vec<u8>,
    pub streams: Vec<StreamEntry>,
}

impl Default for TxContext {
    fn default() -> Self {
        Self {
            caps: Caps::transmitter(),
            version: crate::caps::HDCP_VERSION_2,
            lc_precompute: true,
            rtx: [0; len::RTX],
            rn: [0; len::RN],
            l_lsb: [0; 16],
            riv: [0; len::RIV],
            stored_km: false,
            ekpub_km: Vec::new(),
            ekh_km: [0; len::EKH_KM],
            m: [0; len::M],
            edkey_ks: [0; len::EDKEY_KS],
            v: [0; len::V],
            seq_num_m: None,
            seq_num_v: None,
            k: 0,
            streamid_type: Vec::new(),
            streams: vec![StreamEntry::default()],
        }
    }
}

impl TxContext {
    /// Advance seq_num_M for a new Stream_Manage.
    ///
    /// Returns `None` once the 24-bit counter would roll over; the link must
    /// reauthenticate before managing streams again.
    pub fn next_seq_num_m(&mut self) -> Option<u32> {
        let next = match self.seq_num_m {
            None => 0,
            Some(current) => current.checked_add(1)?,
        };
        if next > limits::SEQ_NUM_MAX {
            return None;
        }
        self.seq_num_m = Some(next);
        Some(next)
    }

    /// StreamID_Type || seq_num_M of the most recent Stream_Manage.
    pub fn stream_message(&self) -> Vec<u8> {
        let seq = self.seq_num_m.unwrap_or(0).to_be_bytes();
        let mut out = Vec::with_capacity(self.streamid_type.len() + len::SEQ_NUM_M);
        out.extend_from_slice(&self.streamid_type);
        out.extend_from_slice(&seq[1..]);
        out
    }

    /// Clear per-attempt material before a fresh authentication.
    ///
    /// Capabilities and configured streams survive; sequence numbers restart.
    pub fn reset_attempt(&mut self) {
        let caps = self.caps;
        let version = self.version;
        let lc_precompute = self.lc_precompute;
        let streams = std::mem::take(&mut self.streams);
        *self = Self {
            caps,
            version,
            lc_precompute,
            streams,
            ..Self::default()
        };
    }
}

/// Receiver-side state learned during one link's authentication.
#[derive(Debug, Clone, Default)]
pub struct RxContext {
    pub caps: Caps,
    pub version: u8,
    pub repeater: bool,
    pub lc_precompute: bool,
    pub cert: Vec<u8>,
    pub receiver_id: ReceiverId,
    pub rrx: [u8; len::RRX],
    pub h_prime: Vec<u8>,
    pub l_prime: Vec<u8>,
    pub ekh_km: [u8; len::EKH_KM],
    pub receiver_id_list: Option<ReceiverIdList>,
    pub m_prime: Vec<u8>,
    pub reauth_req: bool,
}

impl RxContext {
    /// HDCP 2.0 receivers cannot precompute L'.
    pub fn is_hdcp2_0(&self) -> bool {
        self.version == 0
    }

    pub fn reset_attempt(&mut self) {
        *self = Self::default();
    }
}
