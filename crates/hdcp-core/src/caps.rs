//! Capability bytes, receiver status bits and repeater topology header.

use crate::ids::len;

/// HDCP version byte advertised by 2.x capable devices.
pub const HDCP_VERSION_2: u8 = 0x02;

/// Three-byte RxCaps / TxCaps field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Caps(pub [u8; len::CAPS]);

impl Caps {
    pub const REPEATER: u8 = 1 << 0;
    pub const HDCP_CAPABLE: u8 = 1 << 1;

    /// Capabilities this transmitter advertises.
    pub fn transmitter() -> Self {
        Self([HDCP_VERSION_2, 0x00, 0x00])
    }

    /// Receiver capabilities with the given repeater flag.
    pub fn receiver(repeater: bool) -> Self {
        let mut flags = Self::HDCP_CAPABLE;
        if repeater {
            flags |= Self::REPEATER;
        }
        Self([HDCP_VERSION_2, 0x00, flags])
    }

    /// Build from a received slice.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let arr: [u8; len::CAPS] = bytes.get(..len::CAPS)?.try_into().ok()?;
        Some(Self(arr))
    }

    pub fn version(&self) -> u8 {
        self.0[0]
    }

    pub fn is_repeater(&self) -> bool {
        self.0[2] & Self::REPEATER != 0
    }

    pub fn is_hdcp_capable(&self) -> bool {
        self.0[2] & Self::HDCP_CAPABLE != 0
    }

    /// HDCP 2.x capable: capable bit set and version 2.
    pub fn is_hdcp2_capable(&self) -> bool {
        self.is_hdcp_capable() && self.version() == HDCP_VERSION_2
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// Receiver-asserted status bits read from the link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RxStatus(pub u8);

impl RxStatus {
    pub const READY: u8 = 1 << 0;
    pub const H_AVAILABLE: u8 = 1 << 1;
    pub const PAIRING_AVAILABLE: u8 = 1 << 2;
    pub const REAUTH_REQ: u8 = 1 << 3;
    pub const LINK_INTEGRITY_FAILURE: u8 = 1 << 4;

    pub fn empty() -> Self {
        Self(0)
    }

    pub fn with(self, bit: u8) -> Self {
        Self(self.0 | bit)
    }

    pub fn has(&self, bit: u8) -> bool {
        self.0 & bit != 0
    }

    pub fn is_ready(&self) -> bool {
        self.has(Self::READY)
    }

    pub fn h_prime_available(&self) -> bool {
        self.has(Self::H_AVAILABLE)
    }

    pub fn pairing_available(&self) -> bool {
        self.has(Self::PAIRING_AVAILABLE)
    }

    pub fn reauth_requested(&self) -> bool {
        self.has(Self::REAUTH_REQ)
    }

    pub fn integrity_failed(&self) -> bool {
        self.has(Self::LINK_INTEGRITY_FAILURE)
    }
}

/// Repeater topology header that precedes the receiver ID list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RxInfo {
    pub depth: u8,
    pub device_count: u8,
    pub max_devs_exceeded: bool,
    pub max_cascade_exceeded: bool,
    pub hdcp2_0_repeater_downstream: bool,
    pub hdcp1_device_downstream: bool,
}

const HDCP1_DOWN_SHIFT: u16 = 0;
const HDCP20_DOWN_SHIFT: u16 = 1;
const CASCADE_EXD_SHIFT: u16 = 2;
const DEV_EXD_SHIFT: u16 = 3;
const DEV_COUNT_SHIFT: u16 = 4;
const DEV_COUNT_MASK: u16 = 0x1F;
const DEPTH_SHIFT: u16 = 9;
const DEPTH_MASK: u16 = 0x07;

impl RxInfo {
    /// Decode the two-byte big-endian DisplayPort RxInfo field.
    pub fn from_dp_bytes(bytes: [u8; len::RX_INFO]) -> Self {
        let raw = u16::from_be_bytes(bytes);
        let bit = |shift: u16| (raw >> shift) & 1 == 1;
        Self {
            depth: ((raw >> DEPTH_SHIFT) & DEPTH_MASK) as u8,
            device_count: ((raw >> DEV_COUNT_SHIFT) & DEV_COUNT_MASK) as u8,
            max_devs_exceeded: bit(DEV_EXD_SHIFT),
            max_cascade_exceeded: bit(CASCADE_EXD_SHIFT),
            hdcp2_0_repeater_downstream: bit(HDCP20_DOWN_SHIFT),
            hdcp1_device_downstream: bit(HDCP1_DOWN_SHIFT),
        }
    }

    /// Encode as the two-byte big-endian DisplayPort RxInfo field.
    pub fn to_dp_bytes(&self) -> [u8; len::RX_INFO] {
        let mut raw = (u16::from(self.depth) & DEPTH_MASK) << DEPTH_SHIFT;
        raw |= (u16::from(self.device_count) & DEV_COUNT_MASK) << DEV_COUNT_SHIFT;
        raw |= u16::from(self.max_devs_exceeded) << DEV_EXD_SHIFT;
        raw |= u16::from(self.max_cascade_exceeded) << CASCADE_EXD_SHIFT;
        raw |= u16::from(self.hdcp2_0_repeater_downstream) << HDCP20_DOWN_SHIFT;
        raw |= u16::from(self.hdcp1_device_downstream) << HDCP1_DOWN_SHIFT;
        raw.to_be_bytes()
    }

    /// Either topology-exceeded flag is set.
    pub fn exceeds_topology(&self) -> bool {
        self.max_devs_exceeded || self.max_cascade_exceeded
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod caps {
        use super::*;

        #[test]
        fn receiver_caps_flags() {
            let caps = Caps::receiver(true);
            assert!(caps.is_repeater());
            assert!(caps.is_hdcp2_capable());

            let caps = Caps::receiver(false);
            assert!(!caps.is_repeater());
            assert!(caps.is_hdcp2_capable());
        }

        #[test]
        fn hdcp1_only_receiver_is_not_hdcp2_capable() {
            let caps = Caps([0x01, 0x00, Caps::HDCP_CAPABLE]);
            assert!(caps.is_hdcp_capable());
            assert!(!caps.is_hdcp2_capable());

            let caps = Caps([HDCP_VERSION_2, 0x00, 0x00]);
            assert!(!caps.is_hdcp2_capable());
        }

        #[test]
        fn from_slice_requires_three_bytes() {
            assert!(Caps::from_slice(&[0x02, 0x00]).is_none());
            assert_eq!(
                Caps::from_slice(&[0x02, 0x00, 0x03, 0xFF]),
                Some(Caps([0x02, 0x00, 0x03]))
            );
        }
    }

    mod rx_status {
        use super::*;

        #[test]
        fn bits_are_independent() {
            let status = RxStatus::empty()
                .with(RxStatus::READY)
                .with(RxStatus::LINK_INTEGRITY_FAILURE);
            assert!(status.is_ready());
            assert!(status.integrity_failed());
            assert!(!status.h_prime_available());
            assert!(!status.pairing_available());
            assert!(!status.reauth_requested());
        }
    }

    mod rx_info {
        use super::*;

        #[test]
        fn decodes_dp_layout() {
            // depth 2, count 3, hdcp1 downstream
            let raw: u16 = (2 << 9) | (3 << 4) | 1;
            let info = RxInfo::from_dp_bytes(raw.to_be_bytes());
            assert_eq!(info.depth, 2);
            assert_eq!(info.device_count, 3);
            assert!(info.hdcp1_device_downstream);
            assert!(!info.hdcp2_0_repeater_downstream);
            assert!(!info.exceeds_topology());
        }

        #[test]
        fn exceeded_flags() {
            let raw: u16 = 1 << 3;
            let info = RxInfo::from_dp_bytes(raw.to_be_bytes());
            assert!(info.max_devs_exceeded);
            assert!(info.exceeds_topology());

            let raw: u16 = 1 << 2;
            let info = RxInfo::from_dp_bytes(raw.to_be_bytes());
            assert!(info.max_cascade_exceeded);
            assert!(info.exceeds_topology());
        }

        #[test]
        fn encode_matches_decode() {
            let info = RxInfo {
                depth: 4,
                device_count: 31,
                max_devs_exceeded: false,
                max_cascade_exceeded: false,
                hdcp2_0_repeater_downstream: true,
                hdcp1_device_downstream: false,
            };
            assert_eq!(RxInfo::from_dp_bytes(info.to_dp_bytes()), info);
        }
    }
}
