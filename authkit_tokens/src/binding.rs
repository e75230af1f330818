//! Binding the token store to the signed-in identity
//!
//! An [`AccessTokenBinding`] is what UI code holds on to. It combines the
//! shared [`TokenStore`] with the identity of whoever is currently signed in,
//! so that a token minted for one user or session is never handed to code
//! running on behalf of another, and so that anonymous visitors never trigger
//! a remote call.

use std::{fmt, sync::Arc};

use tokio::{
    sync::{mpsc, watch},
    task::AbortHandle,
};

use crate::{
    error::{RefreshError, SubscriptionClosed},
    AccessToken, AccessTokenRef, OrganizationId, OrganizationIdRef, SessionId, SessionIdRef,
    Subscription, TokenStore, UserId, UserIdRef,
};

/// Who the binding is acting on behalf of
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum Identity {
    /// A signed-in user with an active session
    Authenticated {
        /// The signed-in user
        user_id: UserId,
        /// The user's current session
        session_id: SessionId,
        /// The organization the session is scoped to, if any
        organization_id: Option<OrganizationId>,
    },
    /// Nobody is signed in
    #[default]
    Anonymous,
}

impl Identity {
    /// An authenticated identity not scoped to any organization
    pub fn authenticated(user_id: impl Into<UserId>, session_id: impl Into<SessionId>) -> Self {
        Self::Authenticated {
            user_id: user_id.into(),
            session_id: session_id.into(),
            organization_id: None,
        }
    }

    /// Scopes an authenticated identity to an organization
    ///
    /// Has no effect on an anonymous identity.
    pub fn with_organization(self, organization_id: impl Into<OrganizationId>) -> Self {
        match self {
            Self::Authenticated {
                user_id,
                session_id,
                ..
            } => Self::Authenticated {
                user_id,
                session_id,
                organization_id: Some(organization_id.into()),
            },
            Self::Anonymous => Self::Anonymous,
        }
    }

    /// Whether somebody is signed in
    #[inline]
    pub fn is_authenticated(&self) -> bool {
        matches!(self, Self::Authenticated { .. })
    }

    /// The signed-in user
    pub fn user_id(&self) -> Option<&UserIdRef> {
        match self {
            Self::Authenticated { user_id, .. } => Some(user_id),
            Self::Anonymous => None,
        }
    }

    /// The current session
    pub fn session_id(&self) -> Option<&SessionIdRef> {
        match self {
            Self::Authenticated { session_id, .. } => Some(session_id),
            Self::Anonymous => None,
        }
    }

    /// The organization the session is scoped to
    pub fn organization_id(&self) -> Option<&OrganizationIdRef> {
        match self {
            Self::Authenticated {
                organization_id, ..
            } => organization_id.as_deref(),
            Self::Anonymous => None,
        }
    }

    /// Whether a token obtained under `self` must not be used under `next`
    ///
    /// True when the user or the session differs. Moving between
    /// organizations within the same session does not invalidate the token.
    fn invalidated_by(&self, next: &Identity) -> bool {
        let user_changed = self.user_id().is_some_and(|u| Some(u) != next.user_id());
        let session_changed = self
            .session_id()
            .is_some_and(|s| Some(s) != next.session_id());
        user_changed || session_changed
    }
}

/// A signal that a long-idle tab may have missed scheduled renewals
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum WakeEvent {
    /// The page became visible again
    VisibilityVisible,
    /// The window regained focus
    Focus,
    /// The network came back online
    Online,
    /// The page was restored from the back/forward cache
    PageShow,
}

impl WakeEvent {
    /// The name of the underlying browser event
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::VisibilityVisible => "visibilitychange",
            Self::Focus => "focus",
            Self::Online => "online",
            Self::PageShow => "pageshow",
        }
    }
}

impl fmt::Display for WakeEvent {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The state exposed to UI code
#[derive(Clone, Debug, Default)]
pub struct BindingState {
    access_token: Option<AccessToken>,
    loading: bool,
    error: Option<RefreshError>,
}

impl BindingState {
    /// The token usable by the current identity
    #[inline]
    pub fn access_token(&self) -> Option<&AccessTokenRef> {
        self.access_token.as_deref()
    }

    /// Whether the initial fetch or a store refresh is outstanding
    #[inline]
    pub fn is_loading(&self) -> bool {
        self.loading
    }

    /// The failure of the most recent refresh
    #[inline]
    pub fn error(&self) -> Option<&RefreshError> {
        self.error.as_ref()
    }
}

/// A token store bound to the current identity
pub struct AccessTokenBinding {
    store: TokenStore,
    subscription: Subscription,
    identity: watch::Sender<Identity>,
    pending_fetch: Arc<watch::Sender<Option<u64>>>,
    pending_rx: watch::Receiver<Option<u64>>,
    next_fetch: u64,
    fetch: Option<AbortHandle>,
    wake_listener: Option<AbortHandle>,
}

impl fmt::Debug for AccessTokenBinding {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("AccessTokenBinding")
            .field("identity", &*self.identity.borrow())
            .field("initial_fetch", &*self.pending_rx.borrow())
            .field("wake_listener", &self.wake_listener.is_some())
            .finish()
    }
}

impl AccessTokenBinding {
    /// Binds the store to an identity
    ///
    /// For an authenticated identity, the initial token fetch starts right
    /// away. For an anonymous one, any cached token is cleared.
    ///
    /// # Panics
    ///
    /// Must be called from within a Tokio runtime.
    pub fn mount(store: TokenStore, identity: Identity) -> Self {
        let subscription = store.subscribe();
        let (pending_fetch, pending_rx) = watch::channel(None);

        let mut binding = Self {
            store,
            subscription,
            identity: watch::channel(Identity::Anonymous).0,
            pending_fetch: Arc::new(pending_fetch),
            pending_rx,
            next_fetch: 0,
            fetch: None,
            wake_listener: None,
        };

        if identity.is_authenticated() {
            binding.identity.send_replace(identity);
            binding.start_initial_fetch();
        } else if binding.store.snapshot().token().is_some() {
            tracing::debug!("mounted without a signed-in user, clearing token");
            binding.store.clear_token();
        }

        binding
    }

    /// The identity the binding is acting on behalf of
    pub fn identity(&self) -> Identity {
        self.identity.borrow().clone()
    }

    /// The state to present to UI code
    ///
    /// Anonymous identities never see a token.
    pub fn state(&self) -> BindingState {
        if !self.identity.borrow().is_authenticated() {
            return BindingState::default();
        }

        let snapshot = self.store.snapshot();
        BindingState {
            access_token: snapshot.token().map(ToOwned::to_owned),
            loading: self.pending_rx.borrow().is_some() || snapshot.is_loading(),
            error: snapshot.error().cloned(),
        }
    }

    /// Updates the identity the binding is acting on behalf of
    ///
    /// A different user or session invalidates the cached token and starts a
    /// new initial fetch. Signing out clears the token without fetching.
    pub fn set_identity(&mut self, identity: Identity) {
        let previous = self.identity.send_replace(identity.clone());

        if !identity.is_authenticated() {
            if previous.is_authenticated() {
                tracing::debug!("user signed out, clearing token");
            }
            self.cancel_initial_fetch();
            self.store.clear_token();
            return;
        }

        if previous.invalidated_by(&identity) {
            tracing::debug!("identity changed, clearing token");
            self.cancel_initial_fetch();
            self.store.clear_token();
            self.start_initial_fetch();
        } else if !previous.is_authenticated() {
            self.start_initial_fetch();
        }
    }

    /// Gets a token that is safe to use right now
    ///
    /// Returns `None` without touching the store when nobody is signed in.
    ///
    /// # Errors
    ///
    /// Returns the refresh failure, as [`TokenStore::get_access_token()`].
    pub async fn get_access_token(&self) -> Result<Option<AccessToken>, RefreshError> {
        if !self.identity.borrow().is_authenticated() {
            return Ok(None);
        }

        self.store.get_access_token().await
    }

    /// Forces a new token to be obtained
    ///
    /// Returns `None` without touching the store when nobody is signed in.
    ///
    /// # Errors
    ///
    /// Returns the refresh failure, as [`TokenStore::refresh_token()`].
    pub async fn refresh(&self) -> Result<Option<AccessToken>, RefreshError> {
        if !self.identity.borrow().is_authenticated() {
            return Ok(None);
        }

        self.store.refresh_token().await
    }

    /// Forces a new token scoped to the given organization
    ///
    /// Returns `None` without touching the store when nobody is signed in.
    ///
    /// # Errors
    ///
    /// Returns the refresh failure, as
    /// [`TokenStore::refresh_token_for_organization()`].
    pub async fn refresh_for_organization(
        &self,
        organization_id: impl Into<OrganizationId>,
    ) -> Result<Option<AccessToken>, RefreshError> {
        if !self.identity.borrow().is_authenticated() {
            return Ok(None);
        }

        self.store
            .refresh_token_for_organization(organization_id)
            .await
    }

    /// Reacts to the tab waking up
    ///
    /// Runs the silent path so that a renewal the platform suspended while
    /// the tab was idle is caught up on.
    pub async fn on_wake(&self, event: WakeEvent) -> Option<AccessToken> {
        wake(&self.store, &self.identity.subscribe(), event).await
    }

    /// Listens for wake events in the background
    ///
    /// Replaces any listener armed by a previous call. The listener stops
    /// when the sender is dropped or the binding is dropped.
    ///
    /// # Panics
    ///
    /// Must be called from within a Tokio runtime.
    pub fn listen_for_wake(&mut self, mut events: mpsc::Receiver<WakeEvent>) {
        if let Some(listener) = self.wake_listener.take() {
            listener.abort();
        }

        let store = self.store.clone();
        let identity = self.identity.subscribe();
        let task = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                wake(&store, &identity, event).await;
            }
            tracing::trace!("wake event sender dropped");
        });

        self.wake_listener = Some(task.abort_handle());
    }

    /// Waits until the bound state may have changed
    ///
    /// # Errors
    ///
    /// Returns an error once the underlying store has been reset. Mount a
    /// new binding to keep observing it.
    pub async fn changed(&mut self) -> Result<(), SubscriptionClosed> {
        tokio::select! {
            res = self.subscription.changed() => res,
            res = self.pending_rx.changed() => {
                // The sender lives as long as the binding
                let _ = res;
                Ok(())
            }
        }
    }

    fn start_initial_fetch(&mut self) {
        self.cancel_initial_fetch();

        self.next_fetch += 1;
        let id = self.next_fetch;
        self.pending_fetch.send_replace(Some(id));

        let store = self.store.clone();
        let pending = Arc::clone(&self.pending_fetch);
        let task = tokio::spawn(async move {
            let token = store.get_access_token_silently().await;
            tracing::debug!(found = token.is_some(), "initial token fetch complete");
            pending.send_if_modified(|current| {
                if *current == Some(id) {
                    *current = None;
                    true
                } else {
                    false
                }
            });
        });

        self.fetch = Some(task.abort_handle());
    }

    fn cancel_initial_fetch(&mut self) {
        if let Some(fetch) = self.fetch.take() {
            fetch.abort();
        }
        self.pending_fetch.send_if_modified(|current| current.take().is_some());
    }
}

impl Drop for AccessTokenBinding {
    fn drop(&mut self) {
        if let Some(fetch) = self.fetch.take() {
            fetch.abort();
        }
        if let Some(listener) = self.wake_listener.take() {
            listener.abort();
        }
    }
}

async fn wake(
    store: &TokenStore,
    identity: &watch::Receiver<Identity>,
    event: WakeEvent,
) -> Option<AccessToken> {
    let authenticated = identity.borrow().is_authenticated();
    if !authenticated {
        tracing::trace!(%event, "ignoring wake event without a signed-in user");
        return None;
    }

    tracing::debug!(%event, "tab woke up, checking token");
    store.get_access_token_silently().await
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use authkit_clock::{TestClock, UnixTime};

    use super::*;
    use crate::{
        jwt::test_tokens,
        test_support::{settle, MockRemote},
    };

    const NOW: u64 = 1_700_000_000;

    fn alice(session: &'static str) -> Identity {
        Identity::authenticated(
            UserId::from_static("user_alice"),
            SessionId::from_static(session),
        )
    }

    fn store_with(remote: &Arc<MockRemote>, clock: &TestClock) -> TokenStore {
        TokenStore::builder(Arc::clone(remote))
            .with_clock(clock.clone())
            .build()
    }

    #[tokio::test]
    async fn anonymous_binding_never_calls_the_remote() {
        let remote = Arc::new(MockRemote::new());
        let clock = TestClock::new(UnixTime(NOW));
        let store = store_with(&remote, &clock);
        let binding = AccessTokenBinding::mount(store, Identity::Anonymous);

        assert_eq!(binding.get_access_token().await.unwrap(), None);
        assert_eq!(binding.refresh().await.unwrap(), None);
        let org = OrganizationId::from_static("org_01");
        assert_eq!(binding.refresh_for_organization(org).await.unwrap(), None);
        assert_eq!(binding.on_wake(WakeEvent::Focus).await, None);
        settle().await;

        assert_eq!(remote.get_calls() + remote.refresh_calls(), 0);
        let state = binding.state();
        assert!(state.access_token().is_none());
        assert!(!state.is_loading());
    }

    #[tokio::test]
    async fn initial_fetch_loads_token() {
        let token = test_tokens::issued(NOW, NOW + 3600);
        let remote = Arc::new(MockRemote::new().on_get(Ok(Some(token.clone()))));
        let clock = TestClock::new(UnixTime(NOW));
        let store = store_with(&remote, &clock);
        let mut binding = AccessTokenBinding::mount(store, alice("sess_1"));

        assert!(binding.state().is_loading());

        binding.changed().await.unwrap();
        settle().await;

        let state = binding.state();
        assert_eq!(state.access_token(), Some(&*token));
        assert!(!state.is_loading());
        assert_eq!(remote.get_calls(), 1);
    }

    #[tokio::test]
    async fn session_change_clears_token_and_refetches() {
        let first = test_tokens::issued(NOW, NOW + 3600);
        let second = test_tokens::issued(NOW + 1, NOW + 3601);
        let remote = Arc::new(MockRemote::new().on_get(Ok(Some(first))));
        let clock = TestClock::new(UnixTime(NOW));
        let store = store_with(&remote, &clock);
        let mut binding = AccessTokenBinding::mount(store.clone(), alice("sess_1"));
        settle().await;

        remote.push_get(Ok(Some(second.clone())));
        binding.set_identity(alice("sess_2"));

        assert!(store.snapshot().token().is_none());
        assert!(binding.state().is_loading());

        settle().await;
        assert_eq!(binding.state().access_token(), Some(&*second));
        assert_eq!(remote.get_calls(), 2);
    }

    #[tokio::test]
    async fn organization_switch_keeps_token() {
        let token = test_tokens::issued(NOW, NOW + 3600);
        let remote = Arc::new(MockRemote::new().on_get(Ok(Some(token.clone()))));
        let clock = TestClock::new(UnixTime(NOW));
        let store = store_with(&remote, &clock);
        let mut binding = AccessTokenBinding::mount(store, alice("sess_1"));
        settle().await;

        let org = OrganizationId::from_static("org_01");
        binding.set_identity(alice("sess_1").with_organization(org));
        settle().await;

        assert_eq!(binding.state().access_token(), Some(&*token));
        assert_eq!(
            binding.identity().organization_id().map(|o| o.as_str()),
            Some("org_01")
        );
        assert_eq!(remote.get_calls(), 1);
    }

    #[tokio::test]
    async fn signing_out_clears_token_without_fetching() {
        let token = test_tokens::issued(NOW, NOW + 3600);
        let remote = Arc::new(MockRemote::new().on_get(Ok(Some(token))));
        let clock = TestClock::new(UnixTime(NOW));
        let store = store_with(&remote, &clock);
        let mut binding = AccessTokenBinding::mount(store.clone(), alice("sess_1"));
        settle().await;

        binding.set_identity(Identity::Anonymous);
        settle().await;

        assert!(store.snapshot().is_empty());
        let state = binding.state();
        assert!(state.access_token().is_none());
        assert!(!state.is_loading());
        assert_eq!(remote.get_calls() + remote.refresh_calls(), 1);
    }

    #[tokio::test]
    async fn wake_events_run_the_silent_path() {
        let first = test_tokens::issued(NOW, NOW + 3600);
        let second = test_tokens::issued(NOW + 3550, NOW + 7150);
        let remote = Arc::new(MockRemote::new().on_get(Ok(Some(first))));
        let clock = TestClock::new(UnixTime(NOW));
        let store = store_with(&remote, &clock);
        let mut binding = AccessTokenBinding::mount(store, alice("sess_1"));
        settle().await;

        // The tab slept through its renewal
        clock.set(UnixTime(NOW + 3550));
        remote.push_refresh(Ok(Some(second.clone())));

        let (tx, rx) = mpsc::channel(4);
        binding.listen_for_wake(rx);
        tx.send(WakeEvent::VisibilityVisible).await.unwrap();
        settle().await;

        assert_eq!(remote.refresh_calls(), 1);
        assert_eq!(binding.state().access_token(), Some(&*second));

        // Fresh again, so further wake-ups are free
        tx.send(WakeEvent::Online).await.unwrap();
        settle().await;
        assert_eq!(remote.get_calls() + remote.refresh_calls(), 2);
    }

    #[tokio::test]
    async fn rearming_replaces_the_wake_listener() {
        let remote = Arc::new(MockRemote::new().on_get(Ok(None)));
        let clock = TestClock::new(UnixTime(NOW));
        let store = store_with(&remote, &clock);
        let mut binding = AccessTokenBinding::mount(store, alice("sess_1"));
        settle().await;

        let (old_tx, old_rx) = mpsc::channel(1);
        binding.listen_for_wake(old_rx);
        let (_new_tx, new_rx) = mpsc::channel(1);
        binding.listen_for_wake(new_rx);
        settle().await;

        assert!(old_tx.is_closed());
    }

    #[test]
    fn identity_invalidation() {
        let base = alice("sess_1");
        assert!(base.invalidated_by(&alice("sess_2")));
        assert!(base.invalidated_by(&Identity::Anonymous));
        let scoped = base
            .clone()
            .with_organization(OrganizationId::from_static("org_01"));
        assert!(!base.invalidated_by(&scoped));
        assert!(!Identity::Anonymous.invalidated_by(&base));
        assert_eq!(Identity::default(), Identity::Anonymous);
        assert!(base.invalidated_by(&Identity::default()));
    }

    #[test]
    fn wake_event_names() {
        assert_eq!(WakeEvent::VisibilityVisible.to_string(), "visibilitychange");
        assert_eq!(WakeEvent::PageShow.as_str(), "pageshow");
    }
}
