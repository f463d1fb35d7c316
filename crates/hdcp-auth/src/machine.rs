//! Link authentication state machine.
//!
//! One [`AuthContext`] drives one link through H1 → A0..A5 (and the
//! repeater states A6..A9) while the caller holds the engine's
//! authentication lock. Every transition goes through
//! [`AuthState::can_transition_to`]; every failure ends the attempt and
//! drops the link back to H1.

use crate::registry::{Link, LinkContext, Session};
use crate::signals::RxSignal;
use crate::traits::{Delay, Transport};
use hdcp_core::caps::{Caps, RxStatus};
use hdcp_core::error::{AuthError, CodecError, Error, RegistryError, Result, TransportError};
use hdcp_core::ids::{len, LinkType, MessageId};
use hdcp_core::state::AuthState;
use hdcp_crypto::{CryptoGateway, RandomKind};
use hdcp_protocol::{codec, fields, wire, Field};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Borrowed collaborators and per-link state for one authentication run.
pub struct AuthContext<'a> {
    pub(crate) link: &'a Link,
    pub(crate) session: &'a Session,
    pub(crate) ctx: &'a mut LinkContext,
    pub(crate) transport: &'a dyn Transport,
    pub(crate) gateway: &'a dyn CryptoGateway,
    pub(crate) delay: &'a dyn Delay,
}

/// What a bounded wait observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WaitOutcome {
    Ready,
    TimedOut,
}

fn random_array<const N: usize>(bytes: Vec<u8>) -> Result<[u8; N]> {
    let actual = bytes.len();
    bytes.try_into().map_err(|_| {
        Error::Transport(TransportError::ShortRead {
            field: "gateway random".to_string(),
            expected: N,
            actual,
        })
    })
}

impl<'a> AuthContext<'a> {
    pub fn new(
        link: &'a Link,
        session: &'a Session,
        ctx: &'a mut LinkContext,
        transport: &'a dyn Transport,
        gateway: &'a dyn CryptoGateway,
        delay: &'a dyn Delay,
    ) -> Self {
        Self {
            link,
            session,
            ctx,
            transport,
            gateway,
            delay,
        }
    }

    fn link_type(&self) -> LinkType {
        self.link.link_type()
    }

    /// Move to `next` if the transition table allows it.
    pub(crate) async fn transition(&mut self, next: AuthState) -> Result<()> {
        let current = self.link.state().await;
        if current == next {
            return Ok(());
        }
        if !current.can_transition_to(next) {
            warn!("{}: illegal transition {} -> {}", self.link.handle(), current, next);
            return Err(RegistryError::InvalidState(format!(
                "{} cannot move from {} to {}",
                self.link.handle(),
                current,
                next
            ))
            .into());
        }
        debug!("{}: {} -> {}", self.link.handle(), current, next);
        self.link.set_state(next).await;
        Ok(())
    }

    /// Fall back to H1, disabling encryption if it was on.
    pub(crate) async fn drop_to_h1(&mut self) {
        if self.link.encrypting() {
            if let Err(e) = self.transport.set_encryption(false).await {
                warn!("{}: disabling encryption failed: {}", self.link.handle(), e);
            }
            self.link.set_encrypting(false);
        }
        if self.link.state().await != AuthState::H1 {
            debug!("{}: -> {}", self.link.handle(), AuthState::H1);
            self.link.set_state(AuthState::H1).await;
        }
    }

    pub(crate) fn check_abort(&self) -> Result<()> {
        if self.link.signals().abort_requested() {
            debug!("{}: abort latched", self.link.handle());
            return Err(AuthError::Aborted.into());
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Message exchange
    // ------------------------------------------------------------------

    pub(crate) async fn send_message(&mut self, id: MessageId) -> Result<()> {
        self.check_abort()?;
        let bytes = codec::encode(self.link_type(), id, &self.ctx.tx)?;
        match self.link_type() {
            LinkType::DisplayPort => {
                for (field, part) in fields::split_dp(id, &bytes)? {
                    self.transport.send(field, part).await?;
                }
            }
            LinkType::Iia => self.transport.send(Field::Message(id), &bytes).await?,
        }
        debug!("{}: sent {}", self.link.handle(), id.name());
        Ok(())
    }

    async fn read_exact(&self, field: Field, n: usize) -> Result<Vec<u8>> {
        let bytes = self.transport.recv(field, n).await?;
        if bytes.len() != n {
            return Err(TransportError::ShortRead {
                field: field.name(),
                expected: n,
                actual: bytes.len(),
            }
            .into());
        }
        Ok(bytes)
    }

    async fn read_message(&self, id: MessageId) -> Result<Vec<u8>> {
        match self.link_type() {
            LinkType::Iia => {
                let max = wire::max_len(id, LinkType::Iia)?;
                self.transport.recv(Field::Message(id), max).await
            }
            LinkType::DisplayPort => {
                let mut out = Vec::new();
                for field in fields::dp_layout(id)? {
                    match field.fixed_len() {
                        Some(n) => out.extend(self.read_exact(*field, n).await?),
                        None if *field == Field::ReceiverIdList => {
                            let total = wire::receiver_id_list_len(LinkType::DisplayPort, &out)?;
                            let tail = total - out.len();
                            if tail > 0 {
                                out.extend(self.read_exact(*field, tail).await?);
                            }
                        }
                        None => {
                            return Err(CodecError::Unsupported {
                                id,
                                link_type: LinkType::DisplayPort,
                            }
                            .into())
                        }
                    }
                }
                Ok(out)
            }
        }
    }

    pub(crate) async fn recv_message(&mut self, id: MessageId) -> Result<()> {
        self.check_abort()?;
        let bytes = self.read_message(id).await?;
        let LinkContext { tx, rx, .. } = &mut *self.ctx;
        codec::decode(self.link.link_type(), id, &bytes, tx, rx, self.gateway).await?;
        debug!("{}: received {}", self.link.handle(), id.name());
        Ok(())
    }

    /// Bounded wait for a receiver event.
    ///
    /// Each iteration re-checks abort, consumes the latched signal, polls the
    /// status bits and then suspends until either a signal arrives or the
    /// poll interval passes.
    pub(crate) async fn wait_for(
        &mut self,
        signal: RxSignal,
        initial_delay: Duration,
        polls: u32,
        ready: fn(&RxStatus) -> bool,
    ) -> Result<WaitOutcome> {
        self.delay.sleep(initial_delay).await;
        let link = self.link;
        let signals = link.signals();
        for _ in 0..polls {
            self.check_abort()?;
            if signals.take(signal) {
                return Ok(WaitOutcome::Ready);
            }
            let status = self.transport.poll_status().await?;
            signals.latch_status(status);
            self.check_abort()?;
            if ready(&status) {
                signals.take(signal);
                return Ok(WaitOutcome::Ready);
            }
            tokio::select! {
                _ = signals.notified() => {}
                _ = self.delay.sleep(self.ctx.policy.poll_interval) => {}
            }
        }
        debug!("{}: timed out waiting for {:?}", self.link.handle(), signal);
        Ok(WaitOutcome::TimedOut)
    }

    // ------------------------------------------------------------------
    // Steps
    // ------------------------------------------------------------------

    /// A0: make sure the receiver speaks HDCP 2.x.
    pub(crate) async fn determine_rx_capability(&mut self) -> Result<()> {
        self.check_abort()?;
        match self.link_type() {
            LinkType::DisplayPort => {
                let bytes = self.read_exact(Field::RxCaps, len::CAPS).await?;
                let caps = Caps::from_slice(&bytes).ok_or(AuthError::RxNotCapable)?;
                if !caps.is_hdcp2_capable() {
                    info!("{}: receiver caps {} not HDCP 2.x", self.link.handle(), hex::encode(bytes));
                    return Err(AuthError::RxNotCapable.into());
                }
                self.ctx.rx.caps = caps;
                self.ctx.rx.repeater = caps.is_repeater();
                self.ctx.rx.version = caps.version();
            }
            LinkType::Iia => {
                let info = self.gateway.transmitter_info().await?;
                self.ctx.tx.version = info.version;
                self.ctx.tx.lc_precompute = info.lc_precompute;
                self.send_message(MessageId::AkeTransmitterInfo).await?;
                self.recv_message(MessageId::AkeReceiverInfo).await?;
            }
        }
        Ok(())
    }

    /// A1: authentication and key exchange.
    pub(crate) async fn exchange_master_key(&mut self) -> Result<()> {
        let rtx = self.gateway.generate_random(RandomKind::Rtx, len::RTX).await?;
        self.ctx.tx.rtx = random_array(rtx)?;
        self.send_message(MessageId::AkeInit).await?;
        self.delay.sleep(self.ctx.policy.ake_init_delay).await;

        self.recv_message(MessageId::AkeSendCert).await?;
        let receiver_id = self.ctx.rx.receiver_id;

        match self.gateway.find_pairing(receiver_id).await? {
            Some(pairing) => {
                debug!("{}: stored km for {}", self.link.handle(), hex::encode(receiver_id));
                self.ctx.tx.stored_km = true;
                self.ctx.tx.ekh_km = pairing.ekh_km;
                self.ctx.tx.m = pairing.m;
                self.send_message(MessageId::AkeStoredKm).await?;
            }
            None => {
                self.ctx.tx.stored_km = false;
                self.ctx.tx.ekpub_km = self.gateway.generate_master_key(self.link_type()).await?;
                self.send_message(MessageId::AkeNoStoredKm).await?;
            }
        }

        if self.link_type() == LinkType::Iia {
            self.recv_message(MessageId::AkeSendRrx).await?;
        }

        let initial = self.ctx.policy.h_prime_initial_delay;
        let polls = self.ctx.policy.h_prime_polls;
        if self
            .wait_for(RxSignal::HPrimeAvailable, initial, polls, RxStatus::h_prime_available)
            .await?
            == WaitOutcome::TimedOut
        {
            return Err(AuthError::ExchangeKmFailed.into());
        }
        self.recv_message(MessageId::AkeSendHPrime).await?;

        if !self.ctx.tx.stored_km {
            let initial = self.ctx.policy.pairing_initial_delay;
            let polls = self.ctx.policy.pairing_polls;
            if self
                .wait_for(RxSignal::PairingAvailable, initial, polls, RxStatus::pairing_available)
                .await?
                == WaitOutcome::TimedOut
            {
                return Err(AuthError::ExchangeKmFailed.into());
            }
            self.recv_message(MessageId::AkeSendPairingInfo).await?;
        }
        Ok(())
    }

    fn use_lc_precompute(&self) -> bool {
        codec::lc_precompute_negotiated(self.link_type(), &self.ctx.tx, &self.ctx.rx)
    }

    /// A2: locality check, retried with a fresh rn each round.
    pub(crate) async fn locality_check(&mut self) -> Result<()> {
        let precompute = self.use_lc_precompute();
        let rounds = self.ctx.policy.max_lc_attempts;
        for round in 1..=rounds {
            match self.locality_round(precompute).await {
                Ok(()) => {
                    debug!("{}: locality check passed in round {}", self.link.handle(), round);
                    return Ok(());
                }
                Err(e) if e.is_aborted() => return Err(e),
                Err(e) => warn!("{}: locality round {}/{} failed: {}", self.link.handle(), round, rounds, e),
            }
        }
        Err(AuthError::LocalityCheckFailed.into())
    }

    async fn locality_round(&mut self, precompute: bool) -> Result<()> {
        let rn = self.gateway.generate_random(RandomKind::Rn, len::RN).await?;
        self.ctx.tx.rn = random_array(rn)?;
        self.send_message(MessageId::LcInit).await?;
        if precompute {
            self.recv_message(MessageId::RttReady).await?;
            self.ctx.tx.l_lsb = self.gateway.precompute_lc_hmac().await?;
            self.send_message(MessageId::RttChallenge).await?;
        }
        self.delay.sleep(self.ctx.policy.lc_delay).await;
        self.recv_message(MessageId::LcSendLPrime).await
    }

    /// A3: session key exchange.
    pub(crate) async fn exchange_session_key(&mut self) -> Result<()> {
        self.check_abort()?;
        let shared_riv = self.session.keys().lock().await.riv;
        let share = shared_riv.is_some();
        self.ctx.tx.riv = match shared_riv {
            Some(riv) => riv,
            None => random_array(self.gateway.generate_random(RandomKind::Riv, len::RIV).await?)?,
        };
        self.ctx.tx.edkey_ks = self
            .gateway
            .generate_session_key(self.link_type(), share)
            .await?;
        self.send_message(MessageId::SkeSendEks).await?;

        if !share {
            let wrapped = self.gateway.wrap_key(&self.ctx.tx.edkey_ks).await?;
            let mut keys = self.session.keys().lock().await;
            keys.wrapped_ks = Some(wrapped);
            keys.riv = Some(self.ctx.tx.riv);
            debug!("{}: session key material stored", self.session.handle());
        }
        Ok(())
    }

    /// A5: enable encryption for this successful attempt.
    pub(crate) async fn enter_authenticated(&mut self) -> Result<()> {
        self.transition(AuthState::A5).await?;
        if !self.link.encrypting() {
            self.transport.set_encryption(true).await?;
            self.link.set_encrypting(true);
        }
        info!("{}: authenticated", self.link.handle());
        Ok(())
    }

    /// One pass H1 → A0 → ... → A5.
    async fn run_attempt(&mut self) -> Result<()> {
        self.ctx.tx.reset_attempt();
        self.ctx.rx.reset_attempt();

        self.transition(AuthState::A0).await?;
        step(self.determine_rx_capability().await, AuthError::RxNotCapable)?;

        self.transition(AuthState::A1).await?;
        step(self.exchange_master_key().await, AuthError::ExchangeKmFailed)?;

        self.transition(AuthState::A2).await?;
        step(self.locality_check().await, AuthError::LocalityCheckFailed)?;

        self.transition(AuthState::A3).await?;
        step(self.exchange_session_key().await, AuthError::ExchangeKsFailed)?;

        self.transition(AuthState::A4).await?;
        if self.ctx.rx.repeater {
            self.transition(AuthState::A6).await?;
            step(
                self.authenticate_repeater().await,
                AuthError::VerifyReceiverIdListFailed,
            )?;
            self.transition(AuthState::A9).await?;
            step(self.manage_streams().await, AuthError::StreamManageFailed)?;
        }
        self.enter_authenticated().await
    }

    /// Full authentication with the whole-link retry budget.
    pub async fn authenticate(&mut self) -> Result<()> {
        self.link.signals().clear_all();
        self.drop_to_h1().await;

        let max = self.ctx.policy.max_attempts.max(1);
        let mut last = AuthError::Aborted;
        for attempt in 1..=max {
            info!("{}: authentication attempt {}/{}", self.link.handle(), attempt, max);
            match self.run_attempt().await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    self.drop_to_h1().await;
                    let cause = match e.as_auth() {
                        Some(AuthError::Aborted) => {
                            warn!("{}: authentication aborted", self.link.handle());
                            return Err(e);
                        }
                        Some(auth) => auth.clone(),
                        None => {
                            warn!("{}: attempt {} failed outside a step: {}", self.link.handle(), attempt, e);
                            return Err(e);
                        }
                    };
                    warn!("{}: attempt {} failed: {}", self.link.handle(), attempt, cause);
                    last = cause;
                }
            }
        }
        Err(AuthError::AuthenticationFailed {
            attempts: max,
            cause: Box::new(last),
        }
        .into())
    }
}

/// Promote a step failure to the step's error, keeping aborts and
/// already-classified outcomes.
pub(crate) fn step(result: Result<()>, failure: AuthError) -> Result<()> {
    match result {
        Ok(()) => Ok(()),
        Err(Error::Auth(AuthError::Aborted)) => Err(AuthError::Aborted.into()),
        Err(Error::Auth(auth)) if auth == failure => Err(auth.into()),
        Err(Error::Registry(e)) => Err(Error::Registry(e)),
        Err(e) => {
            debug!("Step failed with {}: {}", failure, e);
            Err(failure.into())
        }
    }
}
