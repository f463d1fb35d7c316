//! Control surface for the authentication engine.

use crate::machine::AuthContext;
use crate::registry::{Link, LinkHandle, Registry, Session, SessionHandle};
use crate::signals::RxSignal;
use crate::traits::{Delay, TokioDelay, Transport};
use hdcp_core::context::{ReceiverIdList, StreamEntry};
use hdcp_core::error::{RegistryError, Result};
use hdcp_core::ids::LinkType;
use hdcp_core::policy::AuthPolicy;
use hdcp_core::state::AuthState;
use hdcp_crypto::{CryptoGateway, WrappedKey};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// What `Engine::service` did with the latched signals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceOutcome {
    /// Nothing was pending.
    Idle,
    /// Reauthentication was requested or integrity lost; the link was
    /// authenticated again.
    Reauthenticated,
    /// A repeater reported a new receiver ID list, which was verified.
    ListReverified,
}

/// HDCP 2.2 transmitter authentication engine.
///
/// Authentication attempts, stream management and signal servicing are
/// serialized by one engine-wide lock. Registry lookups and `signal` never
/// take it.
pub struct Engine {
    registry: Registry,
    gateway: Arc<dyn CryptoGateway>,
    delay: Arc<dyn Delay>,
    policy: AuthPolicy,
    auth_lock: Mutex<()>,
}

impl Engine {
    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    pub fn policy(&self) -> &AuthPolicy {
        &self.policy
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub async fn session_open(&self) -> SessionHandle {
        self.registry.session_open().await
    }

    pub async fn session_close(&self, session: SessionHandle) -> Result<()> {
        self.registry.session_close(session).await
    }

    pub async fn link_open(&self, session: SessionHandle, link_type: LinkType) -> Result<LinkHandle> {
        let link = self
            .registry
            .link_open(session, link_type, self.policy.clone())
            .await?;
        Ok(link.handle())
    }

    /// Close a link, waiting for any attempt in progress to settle.
    ///
    /// Encryption is turned off at the sink first if it was on. The link is
    /// released even when that fails; the failure is still returned.
    pub async fn link_close(&self, handle: LinkHandle, transport: &dyn Transport) -> Result<()> {
        let _guard = self.auth_lock.lock().await;
        let link = self.registry.find_link(handle).await?;
        let disabled = if link.encrypting() {
            transport.set_encryption(false).await
        } else {
            Ok(())
        };
        self.registry.link_close(handle).await?;
        if let Err(e) = &disabled {
            warn!("{}: disabling encryption on close failed: {}", handle, e);
        }
        disabled
    }

    async fn resolve(&self, handle: LinkHandle) -> Result<(Arc<Link>, Arc<Session>)> {
        let link = self.registry.find_link(handle).await?;
        let session = self.registry.find_session(link.session()).await?;
        Ok((link, session))
    }

    /// Authenticate a link from scratch with the whole-link retry budget.
    pub async fn authenticate(&self, link: LinkHandle, transport: &dyn Transport) -> Result<()> {
        let _guard = self.auth_lock.lock().await;
        let (link, session) = self.resolve(link).await?;
        let mut ctx = link.context().lock().await;
        AuthContext::new(&link, &session, &mut ctx, transport, self.gateway.as_ref(), self.delay.as_ref())
            .authenticate()
            .await
    }

    /// Send Stream_Manage for `streams` on an authenticated repeater link.
    pub async fn manage_stream(
        &self,
        link: LinkHandle,
        transport: &dyn Transport,
        streams: Vec<StreamEntry>,
    ) -> Result<()> {
        let _guard = self.auth_lock.lock().await;
        self.require_authenticated_repeater(link).await?;
        let (link, session) = self.resolve(link).await?;
        let mut ctx = link.context().lock().await;
        AuthContext::new(&link, &session, &mut ctx, transport, self.gateway.as_ref(), self.delay.as_ref())
            .manage_stream(streams)
            .await
    }

    /// Re-run receiver ID list verification after a topology change.
    pub async fn reverify_receiver_id_list(
        &self,
        link: LinkHandle,
        transport: &dyn Transport,
    ) -> Result<()> {
        let _guard = self.auth_lock.lock().await;
        self.require_authenticated_repeater(link).await?;
        let (link, session) = self.resolve(link).await?;
        let mut ctx = link.context().lock().await;
        AuthContext::new(&link, &session, &mut ctx, transport, self.gateway.as_ref(), self.delay.as_ref())
            .reverify_receiver_id_list()
            .await
    }

    async fn require_authenticated_repeater(&self, handle: LinkHandle) -> Result<()> {
        let link = self.registry.find_link(handle).await?;
        let state = link.state().await;
        if state != AuthState::A5 {
            return Err(RegistryError::InvalidState(format!("{} is in {}", handle, state)).into());
        }
        if !link.context().lock().await.rx.repeater {
            return Err(RegistryError::InvalidState(format!("{} is not a repeater link", handle)).into());
        }
        Ok(())
    }

    /// Latch a receiver event. Never waits for the authentication lock.
    ///
    /// A latched reauthentication request or integrity failure makes
    /// `content_enabled` report false at once. The link stays in its current
    /// state, and encryption stays on at the sink, until `service` (or the
    /// next foreground call) drops it to H1.
    pub async fn signal(&self, link: LinkHandle, signal: RxSignal) -> Result<()> {
        let link = self.registry.find_link(link).await?;
        debug!("{}: signal {:?}", link.handle(), signal);
        link.signals().raise(signal);
        Ok(())
    }

    /// Act on latched signals once any in-flight attempt has settled.
    pub async fn service(&self, handle: LinkHandle, transport: &dyn Transport) -> Result<ServiceOutcome> {
        let _guard = self.auth_lock.lock().await;
        let (link, session) = self.resolve(handle).await?;
        let mut ctx = link.context().lock().await;
        let mut auth = AuthContext::new(
            &link,
            &session,
            &mut ctx,
            transport,
            self.gateway.as_ref(),
            self.delay.as_ref(),
        );

        if link.signals().abort_requested() {
            info!("{}: reauthentication required", handle);
            auth.authenticate().await?;
            return Ok(ServiceOutcome::Reauthenticated);
        }

        if link.state().await == AuthState::A5
            && auth.ctx.rx.repeater
            && link.signals().take(RxSignal::ReceiverIdListReady)
        {
            info!("{}: downstream topology changed", handle);
            auth.reverify_receiver_id_list().await?;
            return Ok(ServiceOutcome::ListReverified);
        }
        Ok(ServiceOutcome::Idle)
    }

    pub async fn wrap_key(&self, key: &[u8]) -> Result<WrappedKey> {
        Ok(self.gateway.wrap_key(key).await?)
    }

    pub async fn unwrap_key(&self, wrapped: &WrappedKey) -> Result<Vec<u8>> {
        Ok(self.gateway.unwrap_key(wrapped).await?)
    }

    pub async fn link_state(&self, link: LinkHandle) -> Result<AuthState> {
        Ok(self.registry.find_link(link).await?.state().await)
    }

    /// Whether content may currently flow encrypted on the link.
    pub async fn content_enabled(&self, link: LinkHandle) -> Result<bool> {
        Ok(self.registry.find_link(link).await?.content_enabled())
    }

    /// Last verified receiver ID list of a repeater link.
    pub async fn receiver_id_list(&self, link: LinkHandle) -> Result<Option<ReceiverIdList>> {
        let link = self.registry.find_link(link).await?;
        let list = link.context().lock().await.rx.receiver_id_list.clone();
        Ok(list)
    }
}

/// Builder for configuring an [`Engine`].
pub struct EngineBuilder {
    gateway: Option<Arc<dyn CryptoGateway>>,
    delay: Arc<dyn Delay>,
    policy: AuthPolicy,
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self {
            gateway: None,
            delay: Arc::new(TokioDelay),
            policy: AuthPolicy::default(),
        }
    }

    /// Crypto gateway the engine delegates every cryptographic step to.
    pub fn gateway(mut self, gateway: Arc<dyn CryptoGateway>) -> Self {
        self.gateway = Some(gateway);
        self
    }

    /// Delay implementation; `NoDelay` for tests and simulation.
    pub fn delay(mut self, delay: impl Delay + 'static) -> Self {
        self.delay = Arc::new(delay);
        self
    }

    /// Retry and timeout policy applied to new links.
    pub fn policy(mut self, policy: AuthPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn build(self) -> Result<Engine> {
        let gateway = self
            .gateway
            .ok_or_else(|| RegistryError::InvalidInput("no crypto gateway configured".to_string()))?;
        Ok(Engine {
            registry: Registry::new(),
            gateway,
            delay: self.delay,
            policy: self.policy,
            auth_lock: Mutex::new(()),
        })
    }
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}
