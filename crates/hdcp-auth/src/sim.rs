//! Simulated HDCP 2.2 receiver or repeater.
//!
//! Implements [`Transport`] by playing the receiver side of the protocol with
//! the software key schedule. Pair it with a `SoftwareGateway` built from the
//! same derivation key.

use crate::traits::Transport;
use async_trait::async_trait;
use hdcp_core::caps::{Caps, RxInfo, RxStatus, HDCP_VERSION_2};
use hdcp_core::context::{ReceiverId, ReceiverIdList};
use hdcp_core::error::{CodecError, Error, Result, TransportError};
use hdcp_core::ids::{len, LinkType, MessageId};
use hdcp_crypto::derive;
use hdcp_protocol::{fields, wire, Field, Message};
use rand::{rngs::OsRng, RngCore};
use std::collections::HashMap;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Transmitter messages as they appear on DisplayPort, keyed by first field.
const DP_TX_MESSAGES: [MessageId; 7] = [
    MessageId::AkeInit,
    MessageId::AkeNoStoredKm,
    MessageId::AkeStoredKm,
    MessageId::LcInit,
    MessageId::SkeSendEks,
    MessageId::RepeaterAuthSendAck,
    MessageId::RepeaterAuthStreamManage,
];

/// Stream_Manage as seen by the receiver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamManageRecord {
    pub seq_num_m: u32,
    pub k: u16,
    pub streamid_type: Vec<u8>,
}

#[derive(Default)]
struct SimState {
    caps: Caps,
    version: u8,
    lc_precompute: bool,
    downstream: Vec<ReceiverId>,
    depth: u8,
    bad_l_prime_rounds: u32,
    truncated_l_prime: bool,
    list_never_ready: bool,
    reauth_after_polls: Option<u32>,

    tx_lc_precompute: bool,
    rtx: [u8; len::RTX],
    rrx: [u8; len::RRX],
    rn: [u8; len::RN],
    km: Option<[u8; 16]>,
    kd: Option<[u8; 32]>,
    ks: Option<[u8; 16]>,
    riv: [u8; len::RIV],
    pending_l: Option<[u8; 32]>,
    pending_v: Option<[u8; 16]>,
    seq_num_v: Option<u32>,

    registers: HashMap<Field, Vec<u8>>,
    outbox: HashMap<MessageId, Vec<u8>>,
    dp_pending: Vec<(Field, Vec<u8>)>,
    status: RxStatus,

    encryption: bool,
    encryption_enables: u32,
    ake_inits: u32,
    lc_inits: u32,
    polls: u32,
    acks: u32,
    stored_km: u32,
    stream_manages: Vec<StreamManageRecord>,
}

impl SimState {
    fn kd(&self) -> Result<[u8; 32]> {
        self.kd.ok_or_else(|| {
            Error::Transport(TransportError::Read {
                field: "kd".to_string(),
                reason: "no master key exchanged".to_string(),
            })
        })
    }

    fn km(&self) -> Result<[u8; 16]> {
        self.km.ok_or_else(|| {
            Error::Transport(TransportError::Read {
                field: "km".to_string(),
                reason: "no master key exchanged".to_string(),
            })
        })
    }
}

/// A receiver (or repeater with downstream devices) on the far end of a link.
pub struct SimulatedReceiver {
    link_type: LinkType,
    derivation_key: Vec<u8>,
    receiver_id: ReceiverId,
    state: Mutex<SimState>,
}

fn random<const N: usize>() -> [u8; N] {
    let mut out = [0u8; N];
    OsRng.fill_bytes(&mut out);
    out
}

impl SimulatedReceiver {
    pub fn new(link_type: LinkType, derivation_key: impl Into<Vec<u8>>, receiver_id: ReceiverId) -> Self {
        let caps = Caps::receiver(false);
        let mut registers = HashMap::new();
        registers.insert(Field::RxCaps, caps.as_bytes().to_vec());
        Self {
            link_type,
            derivation_key: derivation_key.into(),
            receiver_id,
            state: Mutex::new(SimState {
                caps,
                version: HDCP_VERSION_2,
                lc_precompute: true,
                registers,
                ..Default::default()
            }),
        }
    }

    fn update(mut self, f: impl FnOnce(&mut SimState)) -> Self {
        f(self.state.get_mut());
        self
    }

    /// Act as a repeater with these downstream receivers at depth 1.
    pub fn repeater(self, downstream: Vec<ReceiverId>) -> Self {
        self.update(|s| {
            s.caps = Caps::receiver(true);
            s.registers.insert(Field::RxCaps, s.caps.as_bytes().to_vec());
            s.downstream = downstream;
            s.depth = 1;
        })
    }

    /// Advertise arbitrary RxCaps (for capability failures).
    pub fn with_caps(self, caps: Caps) -> Self {
        self.update(|s| {
            s.caps = caps;
            s.registers.insert(Field::RxCaps, caps.as_bytes().to_vec());
        })
    }

    /// IIA receiver version and precompute support.
    pub fn with_version(self, version: u8, lc_precompute: bool) -> Self {
        self.update(|s| {
            s.version = version;
            s.lc_precompute = lc_precompute;
        })
    }

    /// Answer the next `rounds` locality checks with a wrong L'.
    pub fn with_bad_l_prime(self, rounds: u32) -> Self {
        self.update(|s| s.bad_l_prime_rounds = rounds)
    }

    /// Send only the 16-byte L' half even when precompute was not negotiated.
    pub fn with_truncated_l_prime(self) -> Self {
        self.update(|s| s.truncated_l_prime = true)
    }

    /// Never report the receiver ID list as ready.
    pub fn with_list_never_ready(self) -> Self {
        self.update(|s| s.list_never_ready = true)
    }

    /// Assert REAUTH_REQ on the n-th status poll, once.
    pub fn with_reauth_after_polls(self, polls: u32) -> Self {
        self.update(|s| s.reauth_after_polls = Some(polls))
    }

    pub fn receiver_id(&self) -> ReceiverId {
        self.receiver_id
    }

    fn effective_caps(&self, caps: Caps) -> Caps {
        match self.link_type {
            LinkType::DisplayPort => caps,
            LinkType::Iia => Caps::receiver(caps.is_repeater()),
        }
    }

    fn put(&self, s: &mut SimState, msg: Message) -> Result<()> {
        let bytes = msg.encode(self.link_type)?;
        match self.link_type {
            LinkType::DisplayPort => {
                for (field, part) in fields::split_dp(msg.id(), &bytes)? {
                    s.registers.insert(field, part.to_vec());
                }
            }
            LinkType::Iia => {
                s.outbox.insert(msg.id(), bytes);
            }
        }
        Ok(())
    }

    /// Replace the downstream topology and announce a new list.
    pub async fn change_topology(&self, downstream: Vec<ReceiverId>) -> Result<()> {
        let mut s = self.state.lock().await;
        s.downstream = downstream;
        s.list_never_ready = false;
        self.publish_list(&mut s)
    }

    fn publish_list(&self, s: &mut SimState) -> Result<()> {
        let seq_num_v = s.seq_num_v.map_or(0, |v| v + 1);
        let device_count = u8::try_from(s.downstream.len())
            .map_err(|_| CodecError::ListTooLarge(format!("{} devices", s.downstream.len())))?;
        let mut list = ReceiverIdList {
            info: RxInfo {
                depth: s.depth,
                device_count,
                ..Default::default()
            },
            seq_num_v,
            v_prime: [0; len::V_PRIME],
            receiver_ids: s.downstream.clone(),
        };
        let message = wire::receiver_id_list_message(self.link_type, &list)?;
        let v = derive::compute_v(&s.kd()?, &message)?;
        list.v_prime.copy_from_slice(&v[..len::V_PRIME]);
        let mut ack = [0u8; len::V];
        ack.copy_from_slice(&v[len::V_PRIME..]);

        s.pending_v = Some(ack);
        s.seq_num_v = Some(seq_num_v);
        self.put(s, Message::RepeaterAuthSendReceiverIdList(list))?;
        s.status = s.status.with(RxStatus::READY);
        debug!("Simulated repeater published list seq {}", seq_num_v);
        Ok(())
    }

    fn l_prime(s: &mut SimState, l: &[u8]) -> Vec<u8> {
        let mut out = l.to_vec();
        if s.bad_l_prime_rounds > 0 {
            s.bad_l_prime_rounds -= 1;
            out[0] ^= 0xFF;
        }
        out
    }

    fn after_km(&self, s: &mut SimState, km: [u8; 16], stored: bool) -> Result<()> {
        s.km = Some(km);
        let kd = derive::derive_kd(&km, &s.rtx, &s.rrx)?;
        s.kd = Some(kd);
        if self.link_type == LinkType::Iia {
            let rrx = s.rrx;
            self.put(s, Message::AkeSendRrx { rrx })?;
        }
        let rx_caps = self.effective_caps(s.caps);
        let h = derive::compute_h(&kd, &s.rtx, rx_caps.as_bytes(), Caps::transmitter().as_bytes())?;
        self.put(s, Message::AkeSendHPrime { h_prime: h })?;
        s.status = s.status.with(RxStatus::H_AVAILABLE);
        if !stored {
            let ekh_km = derive::encrypt_km_kh(&self.derivation_key, &self.receiver_id, &km)?;
            self.put(s, Message::AkeSendPairingInfo { ekh_km })?;
            s.status = s.status.with(RxStatus::PAIRING_AVAILABLE);
        }
        Ok(())
    }

    fn handle(&self, s: &mut SimState, id: MessageId, bytes: &[u8]) -> Result<()> {
        let msg = Message::decode(id, self.link_type, bytes)?;
        debug!("Simulated receiver got {}", id.name());
        match msg {
            Message::AkeInit { rtx, .. } => {
                s.ake_inits += 1;
                s.rtx = rtx;
                s.rrx = random();
                s.km = None;
                s.kd = None;
                s.ks = None;
                s.pending_l = None;
                s.pending_v = None;
                s.seq_num_v = None;
                s.status = RxStatus::empty();
                s.outbox.clear();
                s.registers.retain(|field, _| *field == Field::RxCaps);
                let cert = derive::build_certificate(&self.derivation_key, &self.receiver_id)?;
                let rrx = s.rrx;
                let caps = s.caps;
                self.put(
                    s,
                    Message::AkeSendCert {
                        cert,
                        rrx: Some(rrx),
                        rx_caps: caps,
                    },
                )?;
            }
            Message::AkeTransmitterInfo { lc_precompute, .. } => {
                s.tx_lc_precompute = lc_precompute;
                let reply = Message::AkeReceiverInfo {
                    version: s.version,
                    lc_precompute: s.lc_precompute,
                };
                self.put(s, reply)?;
            }
            Message::AkeNoStoredKm { ekpub_km } => {
                let km = derive::decrypt_km_kpub(&self.derivation_key, &self.receiver_id, &ekpub_km)?;
                self.after_km(s, km, false)?;
            }
            Message::AkeStoredKm { ekh_km, .. } => {
                let km = derive::decrypt_km_kh(&self.derivation_key, &self.receiver_id, &ekh_km)?;
                s.stored_km += 1;
                self.after_km(s, km, true)?;
            }
            Message::LcInit { rn } => {
                s.lc_inits += 1;
                s.rn = rn;
                let l = derive::compute_l(&s.kd()?, &rn, &s.rrx)?;
                let precompute = self.link_type == LinkType::Iia
                    && s.tx_lc_precompute
                    && s.lc_precompute
                    && s.version != 0;
                if precompute {
                    s.pending_l = Some(l);
                    self.put(s, Message::RttReady)?;
                } else if s.truncated_l_prime && self.link_type == LinkType::Iia {
                    let l_prime = Self::l_prime(s, &l[..len::L_PRIME_PRECOMPUTED]);
                    self.put(s, Message::LcSendLPrime { l_prime })?;
                } else {
                    let l_prime = Self::l_prime(s, &l);
                    self.put(s, Message::LcSendLPrime { l_prime })?;
                }
            }
            Message::RttChallenge { l_lsb } => {
                let l = s.pending_l.take().ok_or_else(|| {
                    Error::Codec(CodecError::InvalidField("RTT_Challenge without LC_Init".to_string()))
                })?;
                let mut l_prime = Self::l_prime(s, &l[..len::L_PRIME_PRECOMPUTED]);
                if !derive::ct_eq(&l_lsb, &l[16..]) {
                    warn!("Simulated receiver rejected RTT_Challenge");
                    l_prime[0] ^= 0x5A;
                }
                self.put(s, Message::LcSendLPrime { l_prime })?;
            }
            Message::SkeSendEks { edkey_ks, riv } => {
                let dkey2 = derive::dkey2(&s.km()?, &s.rtx, &s.rrx, &s.rn)?;
                s.ks = Some(derive::mask_ks(&edkey_ks, &dkey2));
                s.riv = riv;
                if s.caps.is_repeater() && !s.list_never_ready {
                    self.publish_list(s)?;
                }
            }
            Message::RepeaterAuthSendAck { v } => {
                if s.pending_v.map_or(false, |expected| derive::ct_eq(&expected, &v)) {
                    s.acks += 1;
                    s.status = RxStatus(s.status.0 & !RxStatus::READY);
                } else {
                    warn!("Simulated repeater got a wrong V");
                }
            }
            Message::RepeaterAuthStreamManage {
                seq_num_m,
                k,
                streamid_type,
            } => {
                let mut stream_message = streamid_type.clone();
                stream_message.extend_from_slice(&wire::seq_to_bytes(seq_num_m)?);
                let m_prime = derive::compute_m(&s.kd()?, &stream_message)?;
                s.stream_manages.push(StreamManageRecord {
                    seq_num_m,
                    k,
                    streamid_type,
                });
                self.put(s, Message::RepeaterAuthStreamReady { m_prime })?;
            }
            other => {
                return Err(CodecError::Unsupported {
                    id: other.id(),
                    link_type: self.link_type,
                }
                .into())
            }
        }
        Ok(())
    }

    fn take_dp_message(s: &mut SimState) -> Result<Option<(MessageId, Vec<u8>)>> {
        let first = match s.dp_pending.first() {
            Some((field, _)) => *field,
            None => return Ok(None),
        };
        let id = DP_TX_MESSAGES
            .iter()
            .copied()
            .find(|id| fields::dp_layout(*id).map_or(false, |layout| layout[0] == first))
            .ok_or_else(|| {
                s.dp_pending.clear();
                Error::Transport(TransportError::Write {
                    field: first.name(),
                    reason: "not a message start".to_string(),
                })
            })?;
        let layout = fields::dp_layout(id)?;
        if s.dp_pending.len() < layout.len() {
            return Ok(None);
        }
        let pending = std::mem::take(&mut s.dp_pending);
        let in_order = pending.iter().map(|(f, _)| *f).eq(layout.iter().copied());
        if !in_order {
            return Err(TransportError::Write {
                field: first.name(),
                reason: format!("fields out of order for {}", id.name()),
            }
            .into());
        }
        let bytes = pending.into_iter().flat_map(|(_, b)| b).collect();
        Ok(Some((id, bytes)))
    }

    pub async fn encryption_enabled(&self) -> bool {
        self.state.lock().await.encryption
    }

    /// Times encryption was switched on.
    pub async fn encryption_enable_count(&self) -> u32 {
        self.state.lock().await.encryption_enables
    }

    pub async fn ake_init_count(&self) -> u32 {
        self.state.lock().await.ake_inits
    }

    pub async fn lc_init_count(&self) -> u32 {
        self.state.lock().await.lc_inits
    }

    /// AKE_Stored_km messages received.
    pub async fn stored_km_count(&self) -> u32 {
        self.state.lock().await.stored_km
    }

    pub async fn ack_count(&self) -> u32 {
        self.state.lock().await.acks
    }

    pub async fn stream_manages(&self) -> Vec<StreamManageRecord> {
        self.state.lock().await.stream_manages.clone()
    }

    /// Riv received in the last SKE_Send_Eks.
    pub async fn riv(&self) -> [u8; len::RIV] {
        self.state.lock().await.riv
    }

    /// Session key recovered from the last SKE_Send_Eks.
    pub async fn session_key(&self) -> Option<[u8; 16]> {
        self.state.lock().await.ks
    }
}

#[async_trait]
impl Transport for SimulatedReceiver {
    async fn send(&self, field: Field, bytes: &[u8]) -> Result<()> {
        let mut s = self.state.lock().await;
        match (self.link_type, field) {
            (LinkType::Iia, Field::Message(id)) => self.handle(&mut s, id, bytes),
            (LinkType::DisplayPort, Field::Message(_)) | (LinkType::Iia, _) => {
                Err(TransportError::Write {
                    field: field.name(),
                    reason: format!("not a {:?} field", self.link_type),
                }
                .into())
            }
            (LinkType::DisplayPort, field) => {
                s.dp_pending.push((field, bytes.to_vec()));
                match Self::take_dp_message(&mut s)? {
                    Some((id, message)) => self.handle(&mut s, id, &message),
                    None => Ok(()),
                }
            }
        }
    }

    async fn recv(&self, field: Field, len: usize) -> Result<Vec<u8>> {
        let mut s = self.state.lock().await;
        let value = match field {
            Field::Message(id) => s.outbox.remove(&id),
            other => s.registers.get(&other).cloned(),
        };
        let bytes = value.ok_or_else(|| TransportError::Read {
            field: field.name(),
            reason: "nothing available".to_string(),
        })?;
        if bytes.len() > len {
            return Err(TransportError::Read {
                field: field.name(),
                reason: format!("{} bytes exceed the {} byte read", bytes.len(), len),
            }
            .into());
        }
        Ok(bytes)
    }

    async fn poll_status(&self) -> Result<RxStatus> {
        let mut s = self.state.lock().await;
        s.polls += 1;
        if let Some(after) = s.reauth_after_polls {
            if s.polls >= after {
                s.reauth_after_polls = None;
                s.status = s.status.with(RxStatus::REAUTH_REQ);
            }
        }
        Ok(s.status)
    }

    async fn set_encryption(&self, enabled: bool) -> Result<()> {
        let mut s = self.state.lock().await;
        if enabled && !s.encryption {
            s.encryption_enables += 1;
        }
        s.encryption = enabled;
        Ok(())
    }
}
