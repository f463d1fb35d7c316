//! Receiver-asserted events latched per link.
//!
//! The signal path only sets a flag and wakes whoever is waiting; it never
//! takes the authentication lock. The state machine consumes the flags.

use hdcp_core::caps::RxStatus;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Notify;

/// An event raised by the receiver (interrupt, CP_IRQ or status message).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RxSignal {
    HPrimeAvailable,
    PairingAvailable,
    ReceiverIdListReady,
    ReauthRequested,
    IntegrityFailure,
}

/// Latches for one link.
#[derive(Debug, Default)]
pub struct LinkSignals {
    h_prime: AtomicBool,
    pairing: AtomicBool,
    list_ready: AtomicBool,
    reauth: AtomicBool,
    integrity: AtomicBool,
    notify: Notify,
}

impl LinkSignals {
    pub fn new() -> Self {
        Self::default()
    }

    fn flag(&self, signal: RxSignal) -> &AtomicBool {
        match signal {
            RxSignal::HPrimeAvailable => &self.h_prime,
            RxSignal::PairingAvailable => &self.pairing,
            RxSignal::ReceiverIdListReady => &self.list_ready,
            RxSignal::ReauthRequested => &self.reauth,
            RxSignal::IntegrityFailure => &self.integrity,
        }
    }

    /// Latch `signal` and wake a waiter. Raising an already latched signal
    /// has no further effect.
    pub fn raise(&self, signal: RxSignal) {
        self.flag(signal).store(true, Ordering::SeqCst);
        self.notify.notify_one();
    }

    /// Consume a latched signal.
    pub fn take(&self, signal: RxSignal) -> bool {
        self.flag(signal).swap(false, Ordering::SeqCst)
    }

    pub fn is_raised(&self, signal: RxSignal) -> bool {
        self.flag(signal).load(Ordering::SeqCst)
    }

    /// Reauthentication requested or link integrity lost.
    pub fn abort_requested(&self) -> bool {
        self.is_raised(RxSignal::ReauthRequested) || self.is_raised(RxSignal::IntegrityFailure)
    }

    /// Latch the abort conditions reported in a status poll.
    pub fn latch_status(&self, status: RxStatus) {
        if status.reauth_requested() {
            self.raise(RxSignal::ReauthRequested);
        }
        if status.integrity_failed() {
            self.raise(RxSignal::IntegrityFailure);
        }
    }

    /// Clear every latch at once; done when a fresh authentication begins.
    pub fn clear_all(&self) {
        for flag in [
            &self.h_prime,
            &self.pairing,
            &self.list_ready,
            &self.reauth,
            &self.integrity,
        ] {
            flag.store(false, Ordering::SeqCst);
        }
    }

    /// Wait for the next `raise`.
    pub async fn notified(&self) {
        self.notify.notified().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn take_consumes_once() {
        let signals = LinkSignals::new();
        signals.raise(RxSignal::HPrimeAvailable);
        assert!(signals.take(RxSignal::HPrimeAvailable));
        assert!(!signals.take(RxSignal::HPrimeAvailable));
    }

    #[test]
    fn raising_twice_equals_once() {
        let signals = LinkSignals::new();
        signals.raise(RxSignal::ReauthRequested);
        signals.raise(RxSignal::ReauthRequested);
        assert!(signals.abort_requested());
        assert!(signals.take(RxSignal::ReauthRequested));
        assert!(!signals.abort_requested());
    }

    #[test]
    fn integrity_failure_aborts() {
        let signals = LinkSignals::new();
        assert!(!signals.abort_requested());
        signals.raise(RxSignal::IntegrityFailure);
        assert!(signals.abort_requested());
    }

    #[test]
    fn status_bits_latch_aborts_only() {
        let signals = LinkSignals::new();
        signals.latch_status(RxStatus::empty().with(RxStatus::H_AVAILABLE));
        assert!(!signals.abort_requested());
        signals.latch_status(RxStatus::empty().with(RxStatus::LINK_INTEGRITY_FAILURE));
        assert!(signals.is_raised(RxSignal::IntegrityFailure));
    }

    #[test]
    fn clear_all_resets_every_latch() {
        let signals = LinkSignals::new();
        signals.raise(RxSignal::ReceiverIdListReady);
        signals.raise(RxSignal::ReauthRequested);
        signals.clear_all();
        assert!(!signals.is_raised(RxSignal::ReceiverIdListReady));
        assert!(!signals.abort_requested());
    }

    #[tokio::test]
    async fn raise_wakes_waiter() {
        let signals = Arc::new(LinkSignals::new());
        let waiter = {
            let signals = signals.clone();
            tokio::spawn(async move { signals.notified().await })
        };
        signals.raise(RxSignal::PairingAvailable);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }
}
