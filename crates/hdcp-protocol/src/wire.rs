//! Typed protocol messages and their byte layouts.
//!
//! Both framings share one message model. DisplayPort bytes are the
//! concatenation of the message's fields in [`dp_layout`](crate::fields::dp_layout)
//! order; IIA bytes start with the message id.

use crate::fields;
use hdcp_core::caps::{Caps, RxInfo};
use hdcp_core::context::{ReceiverId, ReceiverIdList};
use hdcp_core::error::CodecError;
use hdcp_core::ids::{len, limits, LinkType, MessageId};

/// IIA Receiver ID list header: id, devs_exd, cascade_exd, count, depth,
/// hdcp2_down, hdcp1_down, seq_num_V, V'.
pub const IIA_LIST_HEADER_LEN: usize = 1 + 6 + len::SEQ_NUM_V + len::V_PRIME;
/// DisplayPort Receiver ID list header: RxInfo, seq_num_V, V'.
pub const DP_LIST_HEADER_LEN: usize = len::RX_INFO + len::SEQ_NUM_V + len::V_PRIME;
/// AKE_Transmitter_Info / AKE_Receiver_Info length field value.
const VERSION_INFO_LENGTH: u8 = 6;

/// A decoded protocol message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    AkeInit {
        rtx: [u8; len::RTX],
        /// Carried on DisplayPort only.
        tx_caps: Option<Caps>,
    },
    AkeSendCert {
        cert: Vec<u8>,
        /// Carried on DisplayPort only; IIA sends rrx in AKE_Send_rrx.
        rrx: Option<[u8; len::RRX]>,
        rx_caps: Caps,
    },
    AkeNoStoredKm {
        ekpub_km: Vec<u8>,
    },
    AkeStoredKm {
        ekh_km: [u8; len::EKH_KM],
        m: [u8; len::M],
    },
    AkeSendRrx {
        rrx: [u8; len::RRX],
    },
    AkeSendHPrime {
        h_prime: [u8; len::H_PRIME],
    },
    AkeSendPairingInfo {
        ekh_km: [u8; len::EKH_KM],
    },
    LcInit {
        rn: [u8; len::RN],
    },
    LcSendLPrime {
        /// 32 bytes, or the 16 most significant bytes after RTT precompute.
        l_prime: Vec<u8>,
    },
    SkeSendEks {
        edkey_ks: [u8; len::EDKEY_KS],
        riv: [u8; len::RIV],
    },
    RepeaterAuthSendReceiverIdList(ReceiverIdList),
    RttReady,
    RttChallenge {
        l_lsb: [u8; 16],
    },
    RepeaterAuthSendAck {
        v: [u8; len::V],
    },
    RepeaterAuthStreamManage {
        seq_num_m: u32,
        k: u16,
        streamid_type: Vec<u8>,
    },
    RepeaterAuthStreamReady {
        m_prime: [u8; len::M_PRIME],
    },
    ReceiverAuthStatus {
        reauth_req: bool,
    },
    AkeTransmitterInfo {
        version: u8,
        lc_precompute: bool,
    },
    AkeReceiverInfo {
        version: u8,
        lc_precompute: bool,
    },
}

impl Message {
    pub fn id(&self) -> MessageId {
        match self {
            Message::AkeInit { .. } => MessageId::AkeInit,
            Message::AkeSendCert { .. } => MessageId::AkeSendCert,
            Message::AkeNoStoredKm { .. } => MessageId::AkeNoStoredKm,
            Message::AkeStoredKm { .. } => MessageId::AkeStoredKm,
            Message::AkeSendRrx { .. } => MessageId::AkeSendRrx,
            Message::AkeSendHPrime { .. } => MessageId::AkeSendHPrime,
            Message::AkeSendPairingInfo { .. } => MessageId::AkeSendPairingInfo,
            Message::LcInit { .. } => MessageId::LcInit,
            Message::LcSendLPrime { .. } => MessageId::LcSendLPrime,
            Message::SkeSendEks { .. } => MessageId::SkeSendEks,
            Message::RepeaterAuthSendReceiverIdList(_) => MessageId::RepeaterAuthSendReceiverIdList,
            Message::RttReady => MessageId::RttReady,
            Message::RttChallenge { .. } => MessageId::RttChallenge,
            Message::RepeaterAuthSendAck { .. } => MessageId::RepeaterAuthSendAck,
            Message::RepeaterAuthStreamManage { .. } => MessageId::RepeaterAuthStreamManage,
            Message::RepeaterAuthStreamReady { .. } => MessageId::RepeaterAuthStreamReady,
            Message::ReceiverAuthStatus { .. } => MessageId::ReceiverAuthStatus,
            Message::AkeTransmitterInfo { .. } => MessageId::AkeTransmitterInfo,
            Message::AkeReceiverInfo { .. } => MessageId::AkeReceiverInfo,
        }
    }

    /// Serialize for the given transport.
    pub fn encode(&self, link_type: LinkType) -> Result<Vec<u8>, CodecError> {
        let id = self.id();
        if link_type == LinkType::DisplayPort {
            // Rejects messages DisplayPort does not carry.
            fields::dp_layout(id)?;
        }
        let mut out = Vec::new();
        if link_type.has_id_prefix() {
            out.push(id.as_u8());
        }
        let dp = link_type == LinkType::DisplayPort;

        match self {
            Message::AkeInit { rtx, tx_caps } => {
                out.extend_from_slice(rtx);
                if dp {
                    let caps = tx_caps.ok_or_else(|| missing("TxCaps"))?;
                    out.extend_from_slice(caps.as_bytes());
                }
            }
            Message::AkeSendCert { cert, rrx, rx_caps } => {
                if cert.len() != len::CERT_RX {
                    return Err(CodecError::InvalidField(format!(
                        "cert_rx is {} bytes",
                        cert.len()
                    )));
                }
                if dp {
                    out.extend_from_slice(cert);
                    out.extend_from_slice(&rrx.ok_or_else(|| missing("rrx"))?);
                    out.extend_from_slice(rx_caps.as_bytes());
                } else {
                    out.push(u8::from(rx_caps.is_repeater()));
                    out.extend_from_slice(cert);
                }
            }
            Message::AkeNoStoredKm { ekpub_km } => {
                if ekpub_km.len() != len::EKPUB_KM {
                    return Err(CodecError::InvalidField(format!(
                        "Ekpub(km) is {} bytes",
                        ekpub_km.len()
                    )));
                }
                out.extend_from_slice(ekpub_km);
            }
            Message::AkeStoredKm { ekh_km, m } => {
                out.extend_from_slice(ekh_km);
                out.extend_from_slice(m);
            }
            Message::AkeSendRrx { rrx } => out.extend_from_slice(rrx),
            Message::AkeSendHPrime { h_prime } => out.extend_from_slice(h_prime),
            Message::AkeSendPairingInfo { ekh_km } => out.extend_from_slice(ekh_km),
            Message::LcInit { rn } => out.extend_from_slice(rn),
            Message::LcSendLPrime { l_prime } => {
                let ok = l_prime.len() == len::L_PRIME
                    || (!dp && l_prime.len() == len::L_PRIME_PRECOMPUTED);
                if !ok {
                    return Err(CodecError::InvalidField(format!(
                        "L' is {} bytes",
                        l_prime.len()
                    )));
                }
                out.extend_from_slice(l_prime);
            }
            Message::SkeSendEks { edkey_ks, riv } => {
                out.extend_from_slice(edkey_ks);
                out.extend_from_slice(riv);
            }
            Message::RepeaterAuthSendReceiverIdList(list) => {
                encode_receiver_id_list(link_type, list, &mut out)?;
            }
            Message::RttReady => {}
            Message::RttChallenge { l_lsb } => out.extend_from_slice(l_lsb),
            Message::RepeaterAuthSendAck { v } => out.extend_from_slice(v),
            Message::RepeaterAuthStreamManage {
                seq_num_m,
                k,
                streamid_type,
            } => {
                let entry = stream_entry_len(link_type);
                if streamid_type.len() != usize::from(*k) * entry {
                    return Err(CodecError::InvalidField(format!(
                        "StreamID_Type is {} bytes for k={}",
                        streamid_type.len(),
                        k
                    )));
                }
                out.extend_from_slice(&seq_to_bytes(*seq_num_m)?);
                out.extend_from_slice(&k.to_be_bytes());
                out.extend_from_slice(streamid_type);
            }
            Message::RepeaterAuthStreamReady { m_prime } => out.extend_from_slice(m_prime),
            Message::ReceiverAuthStatus { reauth_req } => {
                out.extend_from_slice(&4u16.to_be_bytes());
                out.push(u8::from(*reauth_req));
            }
            Message::AkeTransmitterInfo {
                version,
                lc_precompute,
            }
            | Message::AkeReceiverInfo {
                version,
                lc_precompute,
            } => {
                out.extend_from_slice(&[0x00, VERSION_INFO_LENGTH, *version, 0x00]);
                out.push(u8::from(*lc_precompute));
            }
        }
        Ok(out)
    }

    /// Parse bytes received for `id`.
    ///
    /// Checks run in order: non-empty buffer, minimum length, id byte (IIA).
    /// Nothing is parsed after a failed check.
    pub fn decode(id: MessageId, link_type: LinkType, bytes: &[u8]) -> Result<Message, CodecError> {
        if bytes.is_empty() {
            return Err(CodecError::WrongBuffer);
        }
        let min = min_len(id, link_type)?;
        if bytes.len() < min {
            return Err(CodecError::WrongLength {
                id,
                expected: min,
                actual: bytes.len(),
            });
        }
        let body = if link_type.has_id_prefix() {
            if bytes[0] != id.as_u8() {
                return Err(CodecError::WrongMessageId {
                    expected: id,
                    actual: bytes[0],
                });
            }
            &bytes[1..]
        } else {
            bytes
        };
        let dp = link_type == LinkType::DisplayPort;

        let msg = match id {
            MessageId::AkeInit => Message::AkeInit {
                rtx: array(body, 0)?,
                tx_caps: if dp {
                    Some(Caps(array(body, len::RTX)?))
                } else {
                    None
                },
            },
            MessageId::AkeSendCert => {
                if dp {
                    Message::AkeSendCert {
                        cert: body[..len::CERT_RX].to_vec(),
                        rrx: Some(array(body, len::CERT_RX)?),
                        rx_caps: Caps(array(body, len::CERT_RX + len::RRX)?),
                    }
                } else {
                    Message::AkeSendCert {
                        cert: body[1..1 + len::CERT_RX].to_vec(),
                        rrx: None,
                        rx_caps: Caps::receiver(body[0] != 0),
                    }
                }
            }
            MessageId::AkeNoStoredKm => Message::AkeNoStoredKm {
                ekpub_km: body[..len::EKPUB_KM].to_vec(),
            },
            MessageId::AkeStoredKm => Message::AkeStoredKm {
                ekh_km: array(body, 0)?,
                m: array(body, len::EKH_KM)?,
            },
            MessageId::AkeSendRrx => Message::AkeSendRrx { rrx: array(body, 0)? },
            MessageId::AkeSendHPrime => Message::AkeSendHPrime {
                h_prime: array(body, 0)?,
            },
            MessageId::AkeSendPairingInfo => Message::AkeSendPairingInfo {
                ekh_km: array(body, 0)?,
            },
            MessageId::LcInit => Message::LcInit { rn: array(body, 0)? },
            MessageId::LcSendLPrime => {
                let take = if body.len() >= len::L_PRIME {
                    len::L_PRIME
                } else if body.len() == len::L_PRIME_PRECOMPUTED {
                    len::L_PRIME_PRECOMPUTED
                } else {
                    return Err(CodecError::WrongLength {
                        id,
                        expected: bytes.len() - body.len() + len::L_PRIME,
                        actual: bytes.len(),
                    });
                };
                Message::LcSendLPrime {
                    l_prime: body[..take].to_vec(),
                }
            }
            MessageId::SkeSendEks => Message::SkeSendEks {
                edkey_ks: array(body, 0)?,
                riv: array(body, len::EDKEY_KS)?,
            },
            MessageId::RepeaterAuthSendReceiverIdList => {
                Message::RepeaterAuthSendReceiverIdList(decode_receiver_id_list(link_type, bytes)?)
            }
            MessageId::RttReady => Message::RttReady,
            MessageId::RttChallenge => Message::RttChallenge { l_lsb: array(body, 0)? },
            MessageId::RepeaterAuthSendAck => Message::RepeaterAuthSendAck { v: array(body, 0)? },
            MessageId::RepeaterAuthStreamManage => {
                let seq_num_m = seq_from_bytes(&body[..len::SEQ_NUM_M]);
                let k = u16::from_be_bytes(array(body, len::SEQ_NUM_M)?);
                let start = len::SEQ_NUM_M + len::K;
                let expected = start + usize::from(k) * stream_entry_len(link_type);
                if body.len() < expected {
                    return Err(CodecError::WrongLength {
                        id,
                        expected: bytes.len() - body.len() + expected,
                        actual: bytes.len(),
                    });
                }
                Message::RepeaterAuthStreamManage {
                    seq_num_m,
                    k,
                    streamid_type: body[start..expected].to_vec(),
                }
            }
            MessageId::RepeaterAuthStreamReady => Message::RepeaterAuthStreamReady {
                m_prime: array(body, 0)?,
            },
            MessageId::ReceiverAuthStatus => Message::ReceiverAuthStatus {
                reauth_req: body[2] != 0,
            },
            MessageId::AkeTransmitterInfo | MessageId::AkeReceiverInfo => {
                if body[0] == 0 && body[1] < VERSION_INFO_LENGTH {
                    return Err(CodecError::WrongLength {
                        id,
                        expected: usize::from(VERSION_INFO_LENGTH),
                        actual: usize::from(body[1]),
                    });
                }
                let version = body[2];
                let lc_precompute = body[4] & 0x01 != 0;
                if id == MessageId::AkeTransmitterInfo {
                    Message::AkeTransmitterInfo {
                        version,
                        lc_precompute,
                    }
                } else {
                    Message::AkeReceiverInfo {
                        version,
                        lc_precompute,
                    }
                }
            }
            MessageId::Null => return Err(CodecError::Unsupported { id, link_type }),
        };
        Ok(msg)
    }
}

fn missing(field: &str) -> CodecError {
    CodecError::InvalidField(format!("{} is required on DisplayPort", field))
}

fn array<const N: usize>(body: &[u8], offset: usize) -> Result<[u8; N], CodecError> {
    body.get(offset..offset + N)
        .and_then(|s| s.try_into().ok())
        .ok_or(CodecError::WrongBuffer)
}

/// Three-byte big-endian sequence number.
pub fn seq_to_bytes(seq: u32) -> Result<[u8; 3], CodecError> {
    if seq > limits::SEQ_NUM_MAX {
        return Err(CodecError::InvalidField(format!(
            "sequence number {:#x} exceeds 24 bits",
            seq
        )));
    }
    let b = seq.to_be_bytes();
    Ok([b[1], b[2], b[3]])
}

pub fn seq_from_bytes(bytes: &[u8]) -> u32 {
    bytes
        .iter()
        .take(3)
        .fold(0u32, |acc, &b| (acc << 8) | u32::from(b))
}

/// Bytes per StreamID_Type entry.
pub fn stream_entry_len(link_type: LinkType) -> usize {
    match link_type {
        LinkType::DisplayPort => len::DP_STREAM_ENTRY,
        LinkType::Iia => len::IIA_STREAM_ENTRY,
    }
}

/// Fixed minimum length of a message on the given transport.
pub fn min_len(id: MessageId, link_type: LinkType) -> Result<usize, CodecError> {
    match link_type {
        LinkType::DisplayPort => fields::dp_fixed_len(id),
        LinkType::Iia => {
            let body = match id {
                MessageId::AkeInit => len::RTX,
                MessageId::AkeSendCert => 1 + len::CERT_RX,
                MessageId::AkeNoStoredKm => len::EKPUB_KM,
                MessageId::AkeStoredKm => len::EKH_KM + len::M,
                MessageId::AkeSendRrx => len::RRX,
                MessageId::AkeSendHPrime => len::H_PRIME,
                MessageId::AkeSendPairingInfo => len::EKH_KM,
                MessageId::LcInit => len::RN,
                MessageId::LcSendLPrime => len::L_PRIME_PRECOMPUTED,
                MessageId::SkeSendEks => len::EDKEY_KS + len::RIV,
                MessageId::RepeaterAuthSendReceiverIdList => IIA_LIST_HEADER_LEN - 1,
                MessageId::RttReady => 0,
                MessageId::RttChallenge => 16,
                MessageId::RepeaterAuthSendAck => len::V,
                MessageId::RepeaterAuthStreamManage => len::SEQ_NUM_M + len::K,
                MessageId::RepeaterAuthStreamReady => len::M_PRIME,
                MessageId::ReceiverAuthStatus => 3,
                MessageId::AkeTransmitterInfo | MessageId::AkeReceiverInfo => len::VERSION_INFO,
                MessageId::Null => return Err(CodecError::Unsupported { id, link_type }),
            };
            Ok(1 + body)
        }
    }
}

/// Largest legal encoding of a message, used to size IIA reads.
pub fn max_len(id: MessageId, link_type: LinkType) -> Result<usize, CodecError> {
    let prefix = usize::from(link_type.has_id_prefix());
    let n = match id {
        MessageId::LcSendLPrime => prefix + len::L_PRIME,
        MessageId::RepeaterAuthSendReceiverIdList => {
            list_header_len(link_type) + limits::MAX_DEVICE_COUNT * len::RECEIVER_ID
        }
        MessageId::RepeaterAuthStreamManage => {
            min_len(id, link_type)? + usize::from(u16::MAX) * stream_entry_len(link_type)
        }
        _ => min_len(id, link_type)?,
    };
    Ok(n)
}

/// Validate a Receiver ID list header and return the full message length.
///
/// `header` must hold at least the fixed header for the transport. Lists
/// exceeding the topology limits are rejected here, before the ID tail is
/// read.
pub fn receiver_id_list_len(link_type: LinkType, header: &[u8]) -> Result<usize, CodecError> {
    let id = MessageId::RepeaterAuthSendReceiverIdList;
    let header_len = list_header_len(link_type);
    if header.is_empty() {
        return Err(CodecError::WrongBuffer);
    }
    if header.len() < header_len {
        return Err(CodecError::WrongLength {
            id,
            expected: header_len,
            actual: header.len(),
        });
    }
    let info = parse_list_info(link_type, header)?;
    check_topology(&info)?;
    Ok(header_len + usize::from(info.device_count) * len::RECEIVER_ID)
}

fn list_header_len(link_type: LinkType) -> usize {
    match link_type {
        LinkType::DisplayPort => DP_LIST_HEADER_LEN,
        LinkType::Iia => IIA_LIST_HEADER_LEN,
    }
}

fn parse_list_info(link_type: LinkType, header: &[u8]) -> Result<RxInfo, CodecError> {
    match link_type {
        LinkType::DisplayPort => Ok(RxInfo::from_dp_bytes(array(header, 0)?)),
        LinkType::Iia => {
            if header[0] != MessageId::RepeaterAuthSendReceiverIdList.as_u8() {
                return Err(CodecError::WrongMessageId {
                    expected: MessageId::RepeaterAuthSendReceiverIdList,
                    actual: header[0],
                });
            }
            Ok(RxInfo {
                max_devs_exceeded: header[1] != 0,
                max_cascade_exceeded: header[2] != 0,
                device_count: header[3],
                depth: header[4],
                hdcp2_0_repeater_downstream: header[5] != 0,
                hdcp1_device_downstream: header[6] != 0,
            })
        }
    }
}

fn check_topology(info: &RxInfo) -> Result<(), CodecError> {
    if info.max_devs_exceeded {
        return Err(CodecError::ListTooLarge("MAX_DEVS_EXCEEDED".to_string()));
    }
    if info.max_cascade_exceeded {
        return Err(CodecError::ListTooLarge("MAX_CASCADE_EXCEEDED".to_string()));
    }
    if usize::from(info.device_count) > limits::MAX_DEVICE_COUNT {
        return Err(CodecError::ListTooLarge(format!(
            "{} devices",
            info.device_count
        )));
    }
    if info.depth > limits::MAX_DEPTH {
        return Err(CodecError::ListTooLarge(format!("depth {}", info.depth)));
    }
    Ok(())
}

fn decode_receiver_id_list(link_type: LinkType, bytes: &[u8]) -> Result<ReceiverIdList, CodecError> {
    let id = MessageId::RepeaterAuthSendReceiverIdList;
    let total = receiver_id_list_len(link_type, bytes)?;
    if bytes.len() < total {
        return Err(CodecError::WrongLength {
            id,
            expected: total,
            actual: bytes.len(),
        });
    }
    let info = parse_list_info(link_type, bytes)?;
    let (seq_at, v_at) = match link_type {
        LinkType::DisplayPort => (len::RX_INFO, len::RX_INFO + len::SEQ_NUM_V),
        LinkType::Iia => (7, 7 + len::SEQ_NUM_V),
    };
    let header_len = list_header_len(link_type);
    let receiver_ids = bytes[header_len..total]
        .chunks_exact(len::RECEIVER_ID)
        .map(|chunk| {
            let mut rid: ReceiverId = [0; len::RECEIVER_ID];
            rid.copy_from_slice(chunk);
            rid
        })
        .collect();
    Ok(ReceiverIdList {
        info,
        seq_num_v: seq_from_bytes(&bytes[seq_at..seq_at + len::SEQ_NUM_V]),
        v_prime: array(bytes, v_at)?,
        receiver_ids,
    })
}

fn encode_receiver_id_list(
    link_type: LinkType,
    list: &ReceiverIdList,
    out: &mut Vec<u8>,
) -> Result<(), CodecError> {
    if usize::from(list.info.device_count) != list.receiver_ids.len() {
        return Err(CodecError::InvalidField(format!(
            "device count {} with {} receiver ids",
            list.info.device_count,
            list.receiver_ids.len()
        )));
    }
    check_topology(&list.info)?;
    match link_type {
        LinkType::DisplayPort => out.extend_from_slice(&list.info.to_dp_bytes()),
        LinkType::Iia => {
            let info = &list.info;
            out.extend_from_slice(&[
                u8::from(info.max_devs_exceeded),
                u8::from(info.max_cascade_exceeded),
                info.device_count,
                info.depth,
                u8::from(info.hdcp2_0_repeater_downstream),
                u8::from(info.hdcp1_device_downstream),
            ]);
        }
    }
    out.extend_from_slice(&seq_to_bytes(list.seq_num_v)?);
    out.extend_from_slice(&list.v_prime);
    for rid in &list.receiver_ids {
        out.extend_from_slice(rid);
    }
    Ok(())
}

/// Input to the V/V' hash: receiver IDs, topology, seq_num_V.
pub fn receiver_id_list_message(link_type: LinkType, list: &ReceiverIdList) -> Result<Vec<u8>, CodecError> {
    let mut out = Vec::with_capacity(list.receiver_ids.len() * len::RECEIVER_ID + 9);
    for rid in &list.receiver_ids {
        out.extend_from_slice(rid);
    }
    let info = &list.info;
    match link_type {
        LinkType::DisplayPort => out.extend_from_slice(&info.to_dp_bytes()),
        LinkType::Iia => out.extend_from_slice(&[
            info.depth,
            info.device_count,
            u8::from(info.max_devs_exceeded),
            u8::from(info.max_cascade_exceeded),
            u8::from(info.hdcp2_0_repeater_downstream),
            u8::from(info.hdcp1_device_downstream),
        ]),
    }
    out.extend_from_slice(&seq_to_bytes(list.seq_num_v)?);
    Ok(out)
}
