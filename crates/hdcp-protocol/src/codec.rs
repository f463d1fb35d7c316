//! Context-bound message codec.
//!
//! `encode` builds an outgoing message from the link's transmitter context.
//! `decode` parses an incoming message, stores its fields in the receiver
//! context and runs the gateway check the message carries (certificate,
//! H', L', V', M').

use crate::wire::{self, Message};
use hdcp_core::context::{RxContext, StreamEntry, TxContext};
use hdcp_core::error::{CodecError, Error, Result};
use hdcp_core::ids::{len, LinkType, MessageId};
use hdcp_crypto::{CryptoGateway, VersionInfo};
use tracing::{debug, warn};

/// Encode a transmitter-originated message from the link's contexts.
pub fn encode(
    link_type: LinkType,
    id: MessageId,
    tx: &TxContext,
) -> std::result::Result<Vec<u8>, CodecError> {
    let msg = match id {
        MessageId::AkeInit => Message::AkeInit {
            rtx: tx.rtx,
            tx_caps: Some(tx.caps),
        },
        MessageId::AkeNoStoredKm => Message::AkeNoStoredKm {
            ekpub_km: tx.ekpub_km.clone(),
        },
        MessageId::AkeStoredKm => Message::AkeStoredKm {
            ekh_km: tx.ekh_km,
            m: tx.m,
        },
        MessageId::LcInit => Message::LcInit { rn: tx.rn },
        MessageId::RttChallenge => Message::RttChallenge { l_lsb: tx.l_lsb },
        MessageId::SkeSendEks => Message::SkeSendEks {
            edkey_ks: tx.edkey_ks,
            riv: tx.riv,
        },
        MessageId::RepeaterAuthSendAck => Message::RepeaterAuthSendAck { v: tx.v },
        MessageId::RepeaterAuthStreamManage => Message::RepeaterAuthStreamManage {
            seq_num_m: tx
                .seq_num_m
                .ok_or_else(|| CodecError::InvalidField("seq_num_M not assigned".to_string()))?,
            k: tx.k,
            streamid_type: tx.streamid_type.clone(),
        },
        MessageId::AkeTransmitterInfo => Message::AkeTransmitterInfo {
            version: tx.version,
            lc_precompute: tx.lc_precompute,
        },
        MessageId::Null
        | MessageId::AkeSendCert
        | MessageId::AkeSendRrx
        | MessageId::AkeSendHPrime
        | MessageId::AkeSendPairingInfo
        | MessageId::LcSendLPrime
        | MessageId::RepeaterAuthSendReceiverIdList
        | MessageId::RttReady
        | MessageId::RepeaterAuthStreamReady
        | MessageId::ReceiverAuthStatus
        | MessageId::AkeReceiverInfo => {
            return Err(CodecError::Unsupported { id, link_type });
        }
    };
    let bytes = msg.encode(link_type)?;
    debug!("Encoded {} ({} bytes)", id.name(), bytes.len());
    Ok(bytes)
}

/// Decode a receiver-originated message into the link's contexts.
pub async fn decode(
    link_type: LinkType,
    id: MessageId,
    bytes: &[u8],
    tx: &mut TxContext,
    rx: &mut RxContext,
    gateway: &dyn CryptoGateway,
) -> Result<()> {
    let msg = Message::decode(id, link_type, bytes)?;
    debug!("Decoded {} ({} bytes)", id.name(), bytes.len());

    match msg {
        Message::AkeSendCert { cert, rrx, rx_caps } => {
            let rrx = rrx.unwrap_or(rx.rrx);
            let receiver_id = gateway
                .verify_certificate(&cert, rrx, rx_caps)
                .await
                .map_err(|e| {
                    warn!("Certificate verification failed: {}", e);
                    CodecError::VerifyCertFailed
                })?;
            rx.cert = cert;
            rx.rrx = rrx;
            rx.caps = rx_caps;
            rx.repeater = rx_caps.is_repeater();
            rx.receiver_id = receiver_id;
            debug!("Receiver id {}", hex::encode(receiver_id));
        }
        Message::AkeSendRrx { rrx } => {
            gateway.set_rrx(rrx).await?;
            rx.rrx = rrx;
        }
        Message::AkeSendHPrime { h_prime } => {
            rx.h_prime = h_prime.to_vec();
            gateway.compare_ake_hmac(&h_prime).await?;
        }
        Message::AkeSendPairingInfo { ekh_km } => {
            rx.ekh_km = ekh_km;
            gateway.store_pairing(rx.receiver_id, ekh_km).await?;
        }
        Message::LcSendLPrime { l_prime } => {
            let body = if lc_precompute_negotiated(link_type, tx, rx) {
                len::L_PRIME_PRECOMPUTED
            } else {
                len::L_PRIME
            };
            let expected = usize::from(link_type.has_id_prefix()) + body;
            if bytes.len() != expected {
                return Err(CodecError::WrongLength {
                    id,
                    expected,
                    actual: bytes.len(),
                }
                .into());
            }
            gateway.compare_lc_hmac(&l_prime).await?;
            rx.l_prime = l_prime;
        }
        Message::RepeaterAuthSendReceiverIdList(list) => {
            check_seq_num_v(tx.seq_num_v, list.seq_num_v)?;
            let list_message = wire::receiver_id_list_message(link_type, &list)?;
            tx.v = gateway
                .verify_receiver_id_list(&list_message, &list.v_prime)
                .await?;
            tx.seq_num_v = Some(list.seq_num_v);
            debug!(
                "Receiver ID list verified: {} devices, depth {}",
                list.device_count(),
                list.info.depth
            );
            rx.receiver_id_list = Some(list);
        }
        Message::RepeaterAuthStreamReady { m_prime } => {
            gateway
                .verify_stream_ready(&m_prime, &tx.stream_message())
                .await?;
            rx.m_prime = m_prime.to_vec();
        }
        Message::ReceiverAuthStatus { reauth_req } => {
            rx.reauth_req = reauth_req;
        }
        Message::AkeReceiverInfo {
            version,
            lc_precompute,
        } => {
            gateway
                .set_receiver_info(VersionInfo {
                    version,
                    lc_precompute,
                })
                .await?;
            rx.version = version;
            rx.lc_precompute = lc_precompute;
        }
        Message::RttReady => {}
        Message::AkeInit { .. }
        | Message::AkeNoStoredKm { .. }
        | Message::AkeStoredKm { .. }
        | Message::LcInit { .. }
        | Message::SkeSendEks { .. }
        | Message::RttChallenge { .. }
        | Message::RepeaterAuthSendAck { .. }
        | Message::RepeaterAuthStreamManage { .. }
        | Message::AkeTransmitterInfo { .. } => {
            return Err(Error::Codec(CodecError::Unsupported { id, link_type }));
        }
    }
    Ok(())
}

/// Whether L' is truncated to 16 bytes after RTT_Challenge: IIA only, both
/// sides advertised precompute and the receiver is not HDCP 2.0.
pub fn lc_precompute_negotiated(link_type: LinkType, tx: &TxContext, rx: &RxContext) -> bool {
    link_type == LinkType::Iia && tx.lc_precompute && rx.lc_precompute && !rx.is_hdcp2_0()
}

/// The first list of an authentication carries seq_num_V 0; later lists
/// must strictly increase it.
fn check_seq_num_v(last: Option<u32>, received: u32) -> std::result::Result<(), CodecError> {
    let ok = match last {
        None => received == 0,
        Some(prev) => received > prev,
    };
    if ok {
        Ok(())
    } else {
        Err(CodecError::InvalidField(format!(
            "seq_num_V {} after {:?}",
            received, last
        )))
    }
}

/// Check caller-supplied streams before stream management.
pub fn validate_streams(
    link_type: LinkType,
    streams: &[StreamEntry],
    max: usize,
) -> std::result::Result<(), CodecError> {
    if streams.is_empty() {
        return Err(CodecError::InvalidField("no streams".to_string()));
    }
    if streams.len() > max {
        return Err(CodecError::TooManyStreams {
            count: streams.len(),
            max,
        });
    }
    if link_type == LinkType::DisplayPort {
        if let Some(entry) = streams.iter().find(|s| s.stream_id > 0xFF) {
            return Err(CodecError::InvalidField(format!(
                "stream id {:#x} does not fit a DisplayPort entry",
                entry.stream_id
            )));
        }
    }
    Ok(())
}
