//! Logical transport fields.
//!
//! DisplayPort exposes every protocol value through its own receiver
//! register window, so a message is moved as a sequence of fields. IIA moves
//! whole framed messages, which appear here as [`Field::Message`].

use hdcp_core::error::CodecError;
use hdcp_core::ids::{len, LinkType, MessageId};

/// A named unit the transport adapter moves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    Rtx,
    TxCaps,
    CertRx,
    Rrx,
    RxCaps,
    EkpubKm,
    /// Ekh(km) written by the transmitter in AKE_Stored_km.
    EkhKmWrite,
    M,
    HPrime,
    /// Ekh(km) read from the receiver in AKE_Send_Pairing_Info.
    EkhKmRead,
    Rn,
    LPrime,
    /// First half of Edkey(ks).
    EdkeyKs0,
    /// Second half of Edkey(ks).
    EdkeyKs1,
    Riv,
    RxInfo,
    SeqNumV,
    VPrime,
    ReceiverIdList,
    V,
    SeqNumM,
    K,
    StreamIdType,
    MPrime,
    RxStatus,
    /// A whole IIA message.
    Message(MessageId),
}

impl Field {
    /// Fixed size, or `None` when the size depends on the message contents.
    pub fn fixed_len(self) -> Option<usize> {
        let n = match self {
            Field::Rtx => len::RTX,
            Field::TxCaps | Field::RxCaps => len::CAPS,
            Field::CertRx => len::CERT_RX,
            Field::Rrx => len::RRX,
            Field::EkpubKm => len::EKPUB_KM,
            Field::EkhKmWrite | Field::EkhKmRead => len::EKH_KM,
            Field::M => len::M,
            Field::HPrime => len::H_PRIME,
            Field::Rn => len::RN,
            Field::LPrime => len::L_PRIME,
            Field::EdkeyKs0 | Field::EdkeyKs1 => len::EDKEY_KS / 2,
            Field::Riv => len::RIV,
            Field::RxInfo => len::RX_INFO,
            Field::SeqNumV => len::SEQ_NUM_V,
            Field::VPrime => len::V_PRIME,
            Field::V => len::V,
            Field::SeqNumM => len::SEQ_NUM_M,
            Field::K => len::K,
            Field::MPrime => len::M_PRIME,
            Field::RxStatus => 1,
            Field::ReceiverIdList | Field::StreamIdType | Field::Message(_) => return None,
        };
        Some(n)
    }

    pub fn name(self) -> String {
        match self {
            Field::Message(id) => id.name().to_string(),
            other => format!("{:?}", other),
        }
    }
}

/// Field sequence a DisplayPort message occupies, in wire order.
pub fn dp_layout(id: MessageId) -> Result<&'static [Field], CodecError> {
    use Field::*;
    let layout: &'static [Field] = match id {
        MessageId::AkeInit => &[Rtx, TxCaps],
        MessageId::AkeSendCert => &[CertRx, Rrx, RxCaps],
        MessageId::AkeNoStoredKm => &[EkpubKm],
        MessageId::AkeStoredKm => &[EkhKmWrite, M],
        MessageId::AkeSendHPrime => &[HPrime],
        MessageId::AkeSendPairingInfo => &[EkhKmRead],
        MessageId::LcInit => &[Rn],
        MessageId::LcSendLPrime => &[LPrime],
        MessageId::SkeSendEks => &[EdkeyKs0, EdkeyKs1, Riv],
        MessageId::RepeaterAuthSendReceiverIdList => &[RxInfo, SeqNumV, VPrime, ReceiverIdList],
        MessageId::RepeaterAuthSendAck => &[V],
        MessageId::RepeaterAuthStreamManage => &[SeqNumM, K, StreamIdType],
        MessageId::RepeaterAuthStreamReady => &[MPrime],
        MessageId::Null
        | MessageId::AkeSendRrx
        | MessageId::RttReady
        | MessageId::RttChallenge
        | MessageId::ReceiverAuthStatus
        | MessageId::AkeTransmitterInfo
        | MessageId::AkeReceiverInfo => {
            return Err(CodecError::Unsupported {
                id,
                link_type: LinkType::DisplayPort,
            })
        }
    };
    Ok(layout)
}

/// Split an encoded DisplayPort message into its fields.
///
/// The trailing variable-size field takes whatever remains.
pub fn split_dp(id: MessageId, bytes: &[u8]) -> Result<Vec<(Field, &[u8])>, CodecError> {
    let layout = dp_layout(id)?;
    let mut out = Vec::with_capacity(layout.len());
    let mut rest = bytes;
    for field in layout {
        let take = match field.fixed_len() {
            Some(n) => n,
            None => rest.len(),
        };
        if rest.len() < take {
            return Err(CodecError::WrongLength {
                id,
                expected: bytes.len() - rest.len() + take,
                actual: bytes.len(),
            });
        }
        let (head, tail) = rest.split_at(take);
        out.push((*field, head));
        rest = tail;
    }
    if !rest.is_empty() {
        return Err(CodecError::InvalidField(format!(
            "{} trailing bytes after {}",
            rest.len(),
            id.name()
        )));
    }
    Ok(out)
}

/// Sum of the fixed field sizes of a DisplayPort message.
pub fn dp_fixed_len(id: MessageId) -> Result<usize, CodecError> {
    Ok(dp_layout(id)?.iter().filter_map(|f| f.fixed_len()).sum())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsupported_dp_messages() {
        for id in [
            MessageId::AkeSendRrx,
            MessageId::RttReady,
            MessageId::RttChallenge,
            MessageId::ReceiverAuthStatus,
            MessageId::AkeTransmitterInfo,
            MessageId::AkeReceiverInfo,
        ] {
            assert_eq!(
                dp_layout(id),
                Err(CodecError::Unsupported {
                    id,
                    link_type: LinkType::DisplayPort
                })
            );
        }
    }

    #[test]
    fn fixed_lengths() {
        assert_eq!(dp_fixed_len(MessageId::AkeInit).unwrap(), 11);
        assert_eq!(dp_fixed_len(MessageId::AkeSendCert).unwrap(), 533);
        assert_eq!(dp_fixed_len(MessageId::SkeSendEks).unwrap(), 24);
        assert_eq!(dp_fixed_len(MessageId::RepeaterAuthSendReceiverIdList).unwrap(), 21);
        assert_eq!(dp_fixed_len(MessageId::RepeaterAuthStreamManage).unwrap(), 5);
    }

    #[test]
    fn split_eks_into_halves() {
        let bytes: Vec<u8> = (0u8..24).collect();
        let parts = split_dp(MessageId::SkeSendEks, &bytes).unwrap();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], (Field::EdkeyKs0, &bytes[..8]));
        assert_eq!(parts[1], (Field::EdkeyKs1, &bytes[8..16]));
        assert_eq!(parts[2], (Field::Riv, &bytes[16..]));
    }

    #[test]
    fn split_variable_tail() {
        let bytes = vec![0u8; 21 + 10];
        let parts = split_dp(MessageId::RepeaterAuthSendReceiverIdList, &bytes).unwrap();
        assert_eq!(parts.last().map(|(f, b)| (*f, b.len())), Some((Field::ReceiverIdList, 10)));
    }

    #[test]
    fn split_rejects_short_and_long() {
        assert!(matches!(
            split_dp(MessageId::LcInit, &[0u8; 7]),
            Err(CodecError::WrongLength { expected: 8, actual: 7, .. })
        ));
        assert!(matches!(
            split_dp(MessageId::LcInit, &[0u8; 9]),
            Err(CodecError::InvalidField(_))
        ));
    }

    #[test]
    fn field_names() {
        assert_eq!(Field::Message(MessageId::AkeInit).name(), "AKE_Init");
        assert_eq!(Field::HPrime.name(), "HPrime");
    }
}
