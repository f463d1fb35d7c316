//! Session and link lifecycle store.
//!
//! Sessions live in one map and each session keeps its own link map. Each
//! map has its own `RwLock`: lookups run concurrently, mutation is exclusive.
//! Neither lock is ever held across an authentication step.

use crate::signals::LinkSignals;
use hdcp_core::context::{RxContext, TxContext};
use hdcp_core::error::{RegistryError, Result};
use hdcp_core::ids::{len, LinkType};
use hdcp_core::policy::AuthPolicy;
use hdcp_core::state::{AuthState, SessionState};
use hdcp_crypto::WrappedKey;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

fn next_id() -> u64 {
    NEXT_ID.fetch_add(1, Ordering::Relaxed)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionHandle(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LinkHandle(pub u64);

impl fmt::Display for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session#{}", self.0)
    }
}

impl fmt::Display for LinkHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "link#{}", self.0)
    }
}

/// Key material shared by every link of a session.
///
/// The first link to finish SKE fills it; later links reuse riv and ask the
/// gateway for the shared session key.
#[derive(Debug, Default)]
pub struct SessionKeys {
    pub wrapped_ks: Option<WrappedKey>,
    pub riv: Option<[u8; len::RIV]>,
}

pub struct Session {
    handle: SessionHandle,
    state: RwLock<SessionState>,
    keys: Mutex<SessionKeys>,
    links: RwLock<HashMap<LinkHandle, Arc<Link>>>,
}

impl Session {
    fn new(handle: SessionHandle) -> Self {
        Self {
            handle,
            state: RwLock::new(SessionState::Init),
            keys: Mutex::new(SessionKeys::default()),
            links: RwLock::new(HashMap::new()),
        }
    }

    pub fn handle(&self) -> SessionHandle {
        self.handle
    }

    pub async fn state(&self) -> SessionState {
        *self.state.read().await
    }

    pub fn keys(&self) -> &Mutex<SessionKeys> {
        &self.keys
    }

    pub async fn link_ids(&self) -> Vec<LinkHandle> {
        let mut ids: Vec<_> = self.links.read().await.keys().copied().collect();
        ids.sort();
        ids
    }

    pub async fn link_count(&self) -> usize {
        self.links.read().await.len()
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session").field("handle", &self.handle).finish()
    }
}

/// Mutable per-link protocol state, guarded by the link's async mutex.
#[derive(Debug, Clone, Default)]
pub struct LinkContext {
    pub tx: TxContext,
    pub rx: RxContext,
    pub policy: AuthPolicy,
}

pub struct Link {
    handle: LinkHandle,
    /// Owning session; a handle, not a reference.
    session: SessionHandle,
    link_type: LinkType,
    state: RwLock<AuthState>,
    encrypting: AtomicBool,
    signals: LinkSignals,
    context: Mutex<LinkContext>,
}

impl Link {
    fn new(handle: LinkHandle, session: SessionHandle, link_type: LinkType, policy: AuthPolicy) -> Self {
        Self {
            handle,
            session,
            link_type,
            state: RwLock::new(AuthState::H1),
            encrypting: AtomicBool::new(false),
            signals: LinkSignals::new(),
            context: Mutex::new(LinkContext {
                policy,
                ..Default::default()
            }),
        }
    }

    pub fn handle(&self) -> LinkHandle {
        self.handle
    }

    pub fn session(&self) -> SessionHandle {
        self.session
    }

    pub fn link_type(&self) -> LinkType {
        self.link_type
    }

    pub async fn state(&self) -> AuthState {
        *self.state.read().await
    }

    /// Unchecked store; callers go through the transition table.
    pub(crate) async fn set_state(&self, state: AuthState) {
        *self.state.write().await = state;
    }

    /// Encryption is on and no reauthentication or integrity failure is
    /// latched.
    pub fn content_enabled(&self) -> bool {
        self.encrypting() && !self.signals.abort_requested()
    }

    /// Whether encryption was last turned on at the sink.
    pub(crate) fn encrypting(&self) -> bool {
        self.encrypting.load(Ordering::SeqCst)
    }

    pub(crate) fn set_encrypting(&self, enabled: bool) {
        self.encrypting.store(enabled, Ordering::SeqCst);
    }

    pub fn signals(&self) -> &LinkSignals {
        &self.signals
    }

    pub fn context(&self) -> &Mutex<LinkContext> {
        &self.context
    }
}

impl fmt::Debug for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Link")
            .field("handle", &self.handle)
            .field("session", &self.session)
            .field("link_type", &self.link_type)
            .finish()
    }
}

#[derive(Debug, Default)]
pub struct Registry {
    sessions: RwLock<HashMap<SessionHandle, Arc<Session>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a session ready for links.
    pub async fn session_open(&self) -> SessionHandle {
        let handle = SessionHandle(next_id());
        let session = Arc::new(Session::new(handle));
        *session.state.write().await = SessionState::LinkSetup;
        self.sessions.write().await.insert(handle, session);
        info!("Opened {}", handle);
        handle
    }

    /// Close a session. Fails while any link remains.
    pub async fn session_close(&self, handle: SessionHandle) -> Result<()> {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .get(&handle)
            .ok_or_else(|| RegistryError::InvalidHandle(handle.to_string()))?;
        let links = session.link_count().await;
        if links > 0 {
            return Err(RegistryError::InvalidState(format!("{} has {} links", handle, links)).into());
        }
        *session.state.write().await = SessionState::Ended;
        sessions.remove(&handle);
        info!("Closed {}", handle);
        Ok(())
    }

    /// Open a link in H1 under an existing session.
    pub async fn link_open(
        &self,
        session: SessionHandle,
        link_type: LinkType,
        policy: AuthPolicy,
    ) -> Result<Arc<Link>> {
        // Held across the insert so session_close cannot release the owner
        // in between.
        let sessions = self.sessions.read().await;
        let owner = sessions
            .get(&session)
            .ok_or_else(|| RegistryError::InvalidInput(format!("unknown {}", session)))?;
        let handle = LinkHandle(next_id());
        let link = Arc::new(Link::new(handle, session, link_type, policy));
        owner.links.write().await.insert(handle, link.clone());
        drop(sessions);
        debug!("Opened {} ({:?}) in {}", handle, link_type, session);
        Ok(link)
    }

    /// Drop a link to H0 and release it.
    pub async fn link_close(&self, handle: LinkHandle) -> Result<()> {
        let link = self.find_link(handle).await?;
        let session = self.find_session(link.session).await?;
        link.set_state(AuthState::H0).await;
        link.set_encrypting(false);
        session.links.write().await.remove(&handle);
        debug!("Closed {}", handle);
        Ok(())
    }

    pub async fn find_session(&self, handle: SessionHandle) -> Result<Arc<Session>> {
        self.sessions
            .read()
            .await
            .get(&handle)
            .cloned()
            .ok_or_else(|| RegistryError::InvalidHandle(handle.to_string()).into())
    }

    pub async fn find_link(&self, handle: LinkHandle) -> Result<Arc<Link>> {
        let sessions: Vec<Arc<Session>> = self.sessions.read().await.values().cloned().collect();
        for session in sessions {
            if let Some(link) = session.links.read().await.get(&handle) {
                return Ok(link.clone());
            }
        }
        Err(RegistryError::InvalidHandle(handle.to_string()).into())
    }

    pub async fn session_ids(&self) -> Vec<SessionHandle> {
        let mut ids: Vec<_> = self.sessions.read().await.keys().copied().collect();
        ids.sort();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hdcp_core::error::Error;

    fn is_registry(err: &Error, expect: fn(&RegistryError) -> bool) -> bool {
        matches!(err, Error::Registry(e) if expect(e))
    }

    mod sessions {
        use super::*;

        #[tokio::test]
        async fn open_then_find() {
            let registry = Registry::new();
            let handle = registry.session_open().await;
            let session = registry.find_session(handle).await.unwrap();
            assert_eq!(session.handle(), handle);
            assert_eq!(session.state().await, SessionState::LinkSetup);
        }

        #[tokio::test]
        async fn ids_are_never_reused() {
            let registry = Registry::new();
            let a = registry.session_open().await;
            registry.session_close(a).await.unwrap();
            let b = registry.session_open().await;
            assert!(b > a);
        }

        #[tokio::test]
        async fn close_requires_empty_link_set() {
            let registry = Registry::new();
            let session = registry.session_open().await;
            let link = registry
                .link_open(session, LinkType::DisplayPort, AuthPolicy::default())
                .await
                .unwrap();

            let err = registry.session_close(session).await.unwrap_err();
            assert!(is_registry(&err, |e| matches!(e, RegistryError::InvalidState(_))));

            registry.link_close(link.handle()).await.unwrap();
            registry.session_close(session).await.unwrap();
            assert!(registry.find_session(session).await.is_err());
        }

        #[tokio::test]
        async fn close_unknown_session() {
            let registry = Registry::new();
            let err = registry.session_close(SessionHandle(u64::MAX)).await.unwrap_err();
            assert!(is_registry(&err, |e| matches!(e, RegistryError::InvalidHandle(_))));
        }
    }

    mod links {
        use super::*;

        #[tokio::test]
        async fn new_link_starts_in_h1() {
            let registry = Registry::new();
            let session = registry.session_open().await;
            let link = registry
                .link_open(session, LinkType::Iia, AuthPolicy::default())
                .await
                .unwrap();
            assert_eq!(link.state().await, AuthState::H1);
            assert_eq!(link.session(), session);
            assert!(!link.content_enabled());

            let found = registry.find_link(link.handle()).await.unwrap();
            assert_eq!(found.handle(), link.handle());
            let session = registry.find_session(session).await.unwrap();
            assert_eq!(session.link_ids().await, vec![link.handle()]);
        }

        #[tokio::test]
        async fn open_in_unknown_session_is_invalid_input() {
            let registry = Registry::new();
            let err = registry
                .link_open(SessionHandle(u64::MAX), LinkType::DisplayPort, AuthPolicy::default())
                .await
                .unwrap_err();
            assert!(is_registry(&err, |e| matches!(e, RegistryError::InvalidInput(_))));
        }

        #[tokio::test]
        async fn close_moves_to_h0_and_releases() {
            let registry = Registry::new();
            let session = registry.session_open().await;
            let link = registry
                .link_open(session, LinkType::DisplayPort, AuthPolicy::default())
                .await
                .unwrap();
            registry.link_close(link.handle()).await.unwrap();

            assert_eq!(link.state().await, AuthState::H0);
            assert!(registry.find_link(link.handle()).await.is_err());
            let err = registry.link_close(link.handle()).await.unwrap_err();
            assert!(is_registry(&err, |e| matches!(e, RegistryError::InvalidHandle(_))));
        }

        #[tokio::test]
        async fn open_keeps_session_map_locked_until_inserted() {
            let registry = Arc::new(Registry::new());
            let handle = registry.session_open().await;
            let session = registry.find_session(handle).await.unwrap();

            // Park link_open on the link map insert.
            let links = session.links.write().await;
            let opening = {
                let registry = registry.clone();
                tokio::spawn(async move {
                    registry
                        .link_open(handle, LinkType::DisplayPort, AuthPolicy::default())
                        .await
                })
            };
            for _ in 0..10 {
                tokio::task::yield_now().await;
            }
            // session_close needs this write guard, so it cannot run here.
            assert!(registry.sessions.try_write().is_err());
            drop(links);

            let link = opening.await.unwrap().unwrap();
            let err = registry.session_close(handle).await.unwrap_err();
            assert!(is_registry(&err, |e| matches!(e, RegistryError::InvalidState(_))));
            assert!(registry.find_link(link.handle()).await.is_ok());
        }

        #[tokio::test]
        async fn links_carry_their_policy() {
            let registry = Registry::new();
            let session = registry.session_open().await;
            let policy = AuthPolicy {
                max_attempts: 2,
                ..Default::default()
            };
            let link = registry
                .link_open(session, LinkType::DisplayPort, policy.clone())
                .await
                .unwrap();
            assert_eq!(link.context().lock().await.policy, policy);
        }
    }
}
