//! The tab-local access token store
//!
//! A [`TokenStore`] caches the current bearer token, renews it in the
//! background shortly before it expires, and merges concurrent requests for a
//! fresh token into a single remote call. Its state is published through a
//! watch channel so that any number of consumers can react to changes without
//! polling.
//!
//! ```
//! use authkit_tokens::{remote::StaticTokenRemote, TokenStore};
//!
//! # #[tokio::main(flavor = "current_thread")] async fn main() {
//! let store = TokenStore::new(StaticTokenRemote::new("opaque-token"));
//!
//! let token = store.get_access_token().await.unwrap();
//! assert_eq!(token.as_ref().map(|t| t.as_str()), Some("opaque-token"));
//! assert_eq!(store.snapshot().token().map(|t| t.as_str()), Some("opaque-token"));
//! # }
//! ```

use std::{
    error, fmt,
    sync::{Arc, Mutex, MutexGuard, PoisonError, Weak},
    time::Duration,
};

use authkit_clock::{Clock, System, UnixTime};
use futures::future::{BoxFuture, FutureExt, Shared};
use serde::{Deserialize, Serialize};
use tokio::{sync::watch, task::AbortHandle, time::Instant};

use crate::{
    cookie::{self, CookieJar, BOOTSTRAP_COOKIE_NAME},
    error::{self as errors, RefreshError, RemoteError, SubscriptionClosed},
    expiry::ExpiryPolicy,
    jitter::{JitterSource, NullJitter},
    remote::TokenRemote,
    AccessToken, AccessTokenRef, OrganizationId,
};

/// Configuration for a [`TokenStore`]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StoreConfig {
    expiry: ExpiryPolicy,
    #[serde(with = "crate::expiry::millis")]
    retry_delay: Duration,
    bootstrap_cookie: String,
    secure_transport: bool,
}

impl Default for StoreConfig {
    /// Default store configuration
    ///
    /// Uses the default [`ExpiryPolicy`], retries a failed refresh after
    /// 5 minutes, and reads the bootstrap token from the
    /// [`BOOTSTRAP_COOKIE_NAME`] cookie, assuming a secure transport.
    fn default() -> Self {
        Self {
            expiry: ExpiryPolicy::default(),
            retry_delay: Duration::from_secs(5 * 60),
            bootstrap_cookie: BOOTSTRAP_COOKIE_NAME.to_owned(),
            secure_transport: true,
        }
    }
}

impl StoreConfig {
    /// Constructs a configuration using the given expiry policy
    pub fn new(expiry: ExpiryPolicy) -> Self {
        Self {
            expiry,
            ..Self::default()
        }
    }

    /// Sets the delay before retrying after a failed refresh
    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    /// Sets the name of the bootstrap cookie
    pub fn with_bootstrap_cookie(mut self, name: impl Into<String>) -> Self {
        self.bootstrap_cookie = name.into();
        self
    }

    /// Sets whether the page is served over a secure transport
    ///
    /// Controls whether the bootstrap cookie tombstone carries `Secure`.
    pub fn with_secure_transport(mut self, secure: bool) -> Self {
        self.secure_transport = secure;
        self
    }

    /// The expiry policy
    pub fn expiry(&self) -> &ExpiryPolicy {
        &self.expiry
    }

    /// The delay before retrying after a failed refresh
    pub fn retry_delay(&self) -> Duration {
        self.retry_delay
    }

    /// The name of the bootstrap cookie
    pub fn bootstrap_cookie(&self) -> &str {
        &self.bootstrap_cookie
    }
}

/// An observable snapshot of the store
#[derive(Clone, Debug, Default)]
pub struct TokenState {
    token: Option<AccessToken>,
    loading: bool,
    error: Option<RefreshError>,
}

impl TokenState {
    /// The current token
    #[inline]
    pub fn token(&self) -> Option<&AccessTokenRef> {
        self.token.as_deref()
    }

    /// Whether a refresh is outstanding that the holder should wait on
    #[inline]
    pub fn is_loading(&self) -> bool {
        self.loading
    }

    /// The failure of the most recent refresh, cleared when the next one starts
    #[inline]
    pub fn error(&self) -> Option<&RefreshError> {
        self.error.as_ref()
    }

    /// Whether the state holds nothing at all
    pub fn is_empty(&self) -> bool {
        self.token.is_none() && !self.loading && self.error.is_none()
    }
}

type RefreshResult = Result<Option<AccessToken>, RefreshError>;
type SharedRefresh = Shared<BoxFuture<'static, RefreshResult>>;

struct InFlight {
    id: u64,
    scope: Option<OrganizationId>,
    result: SharedRefresh,
}

struct Timer {
    id: u64,
    due: Instant,
    handle: AbortHandle,
}

struct Machine {
    publisher: watch::Sender<TokenState>,
    epoch: u64,
    generation: u64,
    next_id: u64,
    in_flight: Option<InFlight>,
    timer: Option<Timer>,
    bootstrap_consumed: bool,
    unsubscribed: bool,
}

impl Machine {
    fn new() -> Self {
        Self {
            publisher: watch::channel(TokenState::default()).0,
            epoch: 0,
            generation: 0,
            next_id: 0,
            in_flight: None,
            timer: None,
            bootstrap_consumed: false,
            unsubscribed: false,
        }
    }

    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn current_token(&self) -> Option<AccessToken> {
        self.publisher.borrow().token.clone()
    }

    fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.handle.abort();
            tracing::trace!(timer = timer.id, "renewal timer cancelled");
        }
    }
}

#[derive(Clone, Debug)]
struct Attempt {
    silent: bool,
    force: bool,
    scope: Option<OrganizationId>,
}

impl Attempt {
    const fn fetch() -> Self {
        Self {
            silent: false,
            force: false,
            scope: None,
        }
    }

    const fn background() -> Self {
        Self {
            silent: true,
            force: false,
            scope: None,
        }
    }

    const fn forced(scope: Option<OrganizationId>) -> Self {
        Self {
            silent: false,
            force: true,
            scope,
        }
    }
}

struct Inner {
    remote: Arc<dyn TokenRemote>,
    config: StoreConfig,
    clock: Arc<dyn Clock + Send + Sync>,
    jitter: Mutex<Box<dyn JitterSource + Send>>,
    cookie_jar: Option<Arc<dyn CookieJar>>,
    machine: Mutex<Machine>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.machine
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .cancel_timer();
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, Machine> {
        self.machine.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn now(&self) -> UnixTime {
        self.clock.now()
    }

    /// Opaque tokens are never considered expiring
    fn is_expiring(&self, token: &AccessTokenRef) -> bool {
        self.config
            .expiry
            .parse_at(token, self.now())
            .is_some_and(|info| info.is_expiring())
    }

    fn expires_before(&self, next: &AccessTokenRef, current: &AccessTokenRef) -> bool {
        let now = self.now();
        let policy = &self.config.expiry;
        match (policy.parse_at(next, now), policy.parse_at(current, now)) {
            (Some(next), Some(current)) => next.expires_at() < current.expires_at(),
            _ => false,
        }
    }

    fn renewal_delay(&self, token: &AccessTokenRef) -> Duration {
        let delay = self.config.expiry.refresh_delay_for(token, self.now());
        if delay.is_zero() {
            return delay;
        }

        let jittered = self
            .jitter
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .jitter(delay);
        self.config.expiry.clamp_delay(jittered)
    }

    /// The renewal delay for a token that was just obtained from the remote
    ///
    /// A token that is already inside its buffer cannot be renewed sooner by
    /// asking again, so the delay never drops below the configured floor.
    fn delay_after_refresh(&self, token: &AccessTokenRef) -> Duration {
        let delay = self.renewal_delay(token);
        if delay.is_zero() {
            tracing::debug!("refreshed token is already expiring, deferring renewal");
            self.config.expiry.min_refresh_delay()
        } else {
            delay
        }
    }

    fn reschedule(self: &Arc<Self>, m: &mut Machine, delay: Duration) {
        if m.unsubscribed {
            tracing::debug!("no subscribers left, renewal not rescheduled");
            return;
        }
        self.schedule(m, delay);
    }

    fn schedule(self: &Arc<Self>, m: &mut Machine, delay: Duration) {
        m.cancel_timer();

        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(_) => {
                tracing::warn!("no async runtime available, token renewal not scheduled");
                return;
            }
        };

        let id = m.next_id();
        let handle = runtime.spawn(renew_after(Arc::downgrade(self), id, delay));
        tracing::debug!(
            timer = id,
            delay_ms = delay.as_millis() as u64,
            "scheduled token renewal"
        );

        m.timer = Some(Timer {
            id,
            due: Instant::now() + delay,
            handle: handle.abort_handle(),
        });
    }

    fn start(self: &Arc<Self>, m: &mut Machine, attempt: Attempt) -> SharedRefresh {
        let id = m.next_id();
        let generation = m.generation;
        let previous = m.current_token();

        let show_loading = !attempt.silent || previous.is_none();
        m.publisher.send_if_modified(|state| {
            let cleared = state.error.take().is_some();
            let loading = show_loading && !state.loading;
            if loading {
                state.loading = true;
            }
            cleared || loading
        });

        tracing::debug!(
            refresh = id,
            silent = attempt.silent,
            force = attempt.force,
            organization = ?attempt.scope,
            "starting token refresh"
        );

        let scope = attempt.scope.clone();
        let task = tokio::spawn(Arc::clone(self).perform(id, generation, previous, attempt));
        let store = Arc::downgrade(self);
        let result = async move {
            match task.await {
                Ok(result) => result,
                Err(err) => {
                    if err.is_panic() {
                        tracing::error!(refresh = id, "token refresh panicked");
                    } else {
                        tracing::info!(refresh = id, "token refresh was cancelled");
                    }

                    if let Some(inner) = store.upgrade() {
                        let mut m = inner.lock();
                        if m.in_flight.as_ref().is_some_and(|f| f.id == id) {
                            m.in_flight = None;
                        }
                    }

                    Err(RefreshError::Aborted)
                }
            }
        }
        .boxed()
        .shared();

        m.in_flight = Some(InFlight {
            id,
            scope,
            result: result.clone(),
        });

        result
    }

    async fn perform(
        self: Arc<Self>,
        id: u64,
        generation: u64,
        previous: Option<AccessToken>,
        attempt: Attempt,
    ) -> RefreshResult {
        let outcome = self.call_remote(previous.as_deref(), &attempt).await;

        let mut m = self.lock();
        if m.in_flight.as_ref().is_some_and(|f| f.id == id) {
            m.in_flight = None;
        }

        if m.generation != generation {
            tracing::debug!(refresh = id, "token cleared during refresh, discarding result");
            return Err(RefreshError::Superseded);
        }

        match outcome {
            Ok(token) => {
                let token = self.commit(&mut m, token, attempt.silent);
                match &token {
                    Some(token) => {
                        let delay = self.delay_after_refresh(token);
                        self.reschedule(&mut m, delay);
                    }
                    None => {
                        tracing::info!(refresh = id, "no active session, token cleared");
                        m.cancel_timer();
                    }
                }
                Ok(token)
            }
            Err(error) => {
                tracing::warn!(
                    refresh = id,
                    error = (&error as &dyn error::Error),
                    retry_ms = self.config.retry_delay.as_millis() as u64,
                    "error refreshing token, will retry"
                );

                let error = RefreshError::from(error);
                m.publisher.send_modify(|state| {
                    state.loading = false;
                    state.error = Some(error.clone());
                });
                self.reschedule(&mut m, self.config.retry_delay);
                Err(error)
            }
        }
    }

    async fn call_remote(
        &self,
        previous: Option<&AccessTokenRef>,
        attempt: &Attempt,
    ) -> Result<Option<AccessToken>, RemoteError> {
        // A caller that already holds a token it cannot use needs a new one,
        // and the session would only hand back the same expiring token.
        let forced = attempt.force
            || previous.is_some_and(|p| !attempt.silent || self.is_expiring(p));

        if forced {
            tracing::trace!(organization = ?attempt.scope, "requesting forced refresh");
            return Ok(self
                .remote
                .refresh_access_token(attempt.scope.as_deref())
                .await?);
        }

        tracing::trace!("requesting session token");
        match self.remote.get_access_token().await? {
            Some(token) if self.is_expiring(&token) => {
                tracing::debug!("session token is expiring, requesting forced refresh");
                Ok(self.remote.refresh_access_token(None).await?)
            }
            other => Ok(other),
        }
    }

    /// Publishes the outcome of a successful refresh and returns the token
    /// now held by the store
    fn commit(
        &self,
        m: &mut Machine,
        token: Option<AccessToken>,
        silent: bool,
    ) -> Option<AccessToken> {
        let mut committed = token.clone();

        m.publisher.send_if_modified(|state| {
            let mut changed = !silent || state.loading || state.error.is_some();
            state.loading = false;
            state.error = None;

            let keep_current = match (&state.token, &token) {
                (Some(current), Some(next)) => {
                    current == next || self.expires_before(next, current)
                }
                _ => false,
            };

            if keep_current {
                if state.token != token {
                    tracing::debug!(
                        "refreshed token expires before the cached token, keeping cached token"
                    );
                }
                committed = state.token.clone();
            } else {
                changed |= state.token != token;
                state.token = token;
            }

            changed
        });

        committed
    }
}

async fn renew_after(store: Weak<Inner>, id: u64, delay: Duration) {
    tokio::time::sleep(delay).await;

    let inner = match store.upgrade() {
        Some(inner) => inner,
        None => return,
    };

    {
        let mut m = inner.lock();
        if m.timer.as_ref().map(|t| t.id) != Some(id) {
            return;
        }
        m.timer = None;
    }

    tracing::debug!(timer = id, "renewal timer fired");
    let store = TokenStore { inner };
    if let Err(error) = store.refresh(Attempt::background()).await {
        tracing::warn!(
            timer = id,
            error = (&error as &dyn error::Error),
            "background token renewal failed"
        );
    }
}

/// A tab-local access token cache with coalesced, self-scheduling renewal
///
/// Cloning the store is cheap; all clones share the same state.
#[derive(Clone)]
pub struct TokenStore {
    inner: Arc<Inner>,
}

impl fmt::Debug for TokenStore {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let (state, refreshing, timer_armed) = {
            let m = self.inner.lock();
            let state = m.publisher.borrow().clone();
            (state, m.in_flight.is_some(), m.timer.is_some())
        };

        f.debug_struct("TokenStore")
            .field("state", &state)
            .field("refreshing", &refreshing)
            .field("timer_armed", &timer_armed)
            .field("config", &self.inner.config)
            .finish()
    }
}

impl TokenStore {
    /// Constructs a store with the default configuration
    pub fn new(remote: impl TokenRemote + 'static) -> Self {
        Self::builder(remote).build()
    }

    /// Begins building a store
    pub fn builder(remote: impl TokenRemote + 'static) -> TokenStoreBuilder {
        TokenStoreBuilder {
            remote: Arc::new(remote),
            config: StoreConfig::default(),
            clock: Arc::new(System),
            jitter: Box::new(NullJitter),
            cookie_jar: None,
        }
    }

    /// The store's configuration
    pub fn config(&self) -> &StoreConfig {
        &self.inner.config
    }

    /// A copy of the current state
    pub fn snapshot(&self) -> TokenState {
        self.inner.lock().publisher.borrow().clone()
    }

    /// Subscribes to state changes
    ///
    /// Dropping the last subscription cancels any pending renewal.
    pub fn subscribe(&self) -> Subscription {
        let mut m = self.inner.lock();
        m.unsubscribed = false;
        Subscription {
            receiver: m.publisher.subscribe(),
            epoch: m.epoch,
            store: Arc::downgrade(&self.inner),
        }
    }

    /// Whether a refresh is currently outstanding
    pub fn is_refreshing(&self) -> bool {
        self.inner.lock().in_flight.is_some()
    }

    /// How long until the pending renewal fires, if one is scheduled
    pub fn next_renewal_in(&self) -> Option<Duration> {
        self.inner
            .lock()
            .timer
            .as_ref()
            .map(|t| t.due.saturating_duration_since(Instant::now()))
    }

    /// Consumes the bootstrap cookie, if it has not been consumed yet
    ///
    /// The cookie is read at most once per store lifetime (or since the last
    /// [`reset()`][Self::reset()]) and deleted immediately. A token found
    /// there is adopted as the cached token and renewal is scheduled from its
    /// expiry.
    pub fn bootstrap(&self) -> Option<AccessToken> {
        let jar = self.inner.cookie_jar.as_ref()?;

        let mut m = self.inner.lock();
        if m.bootstrap_consumed {
            return None;
        }
        m.bootstrap_consumed = true;

        let config = &self.inner.config;
        let token = cookie::take_bootstrap_token(
            &**jar,
            &config.bootstrap_cookie,
            config.secure_transport,
        )?;

        m.publisher.send_modify(|state| {
            state.token = Some(token.clone());
            state.loading = false;
            state.error = None;
        });

        let delay = self.inner.renewal_delay(&token);
        self.inner.schedule(&mut m, delay);
        tracing::info!("adopted bootstrap token");

        Some(token)
    }

    /// Gets a token that is safe to use right now
    ///
    /// A cached token is returned without any remote call unless it is inside
    /// its renewal buffer. Tokens whose expiry cannot be determined are
    /// trusted as-is. Otherwise the caller waits on a refresh, joining one
    /// that is already outstanding.
    ///
    /// # Errors
    ///
    /// Returns the refresh failure. The store's state has already recorded
    /// the failure by the time it is returned.
    ///
    /// # Panics
    ///
    /// Panics when called outside of a Tokio runtime, since the refresh runs
    /// on a spawned task.
    pub async fn get_access_token(&self) -> Result<Option<AccessToken>, RefreshError> {
        if let Some(token) = self.usable_token() {
            return Ok(Some(token));
        }

        self.refresh(Attempt::fetch()).await
    }

    /// Gets a usable token without surfacing failures
    ///
    /// Suitable for opportunistic calls, such as when a tab wakes up. Any
    /// refresh runs without flagging the store as loading if a token is
    /// already cached. On success, renewal is rescheduled from the returned
    /// token. On failure, the failure is logged and the cached token, if
    /// any, is returned.
    ///
    /// # Panics
    ///
    /// Panics when called outside of a Tokio runtime, since the refresh runs
    /// on a spawned task.
    pub async fn get_access_token_silently(&self) -> Option<AccessToken> {
        let result = match self.usable_token() {
            Some(token) => Ok(Some(token)),
            None => self.refresh(Attempt::background()).await,
        };

        match result {
            Ok(Some(token)) => {
                self.reschedule_from(&token);
                Some(token)
            }
            Ok(None) => None,
            Err(error) => {
                tracing::warn!(
                    error = (&error as &dyn error::Error),
                    "silent token refresh failed"
                );
                self.inner.lock().current_token()
            }
        }
    }

    /// Forces a new token to be obtained from the server
    ///
    /// Joins an outstanding refresh rather than starting a second one.
    ///
    /// # Errors
    ///
    /// Returns the refresh failure. Any previously cached token is kept.
    ///
    /// # Panics
    ///
    /// Panics when called outside of a Tokio runtime, since the refresh runs
    /// on a spawned task.
    pub async fn refresh_token(&self) -> Result<Option<AccessToken>, RefreshError> {
        self.refresh(Attempt::forced(None)).await
    }

    /// Forces a new token scoped to the given organization
    ///
    /// Only joins an outstanding refresh for the same organization; any
    /// other outstanding refresh is waited out first.
    ///
    /// # Errors
    ///
    /// Returns the refresh failure. Any previously cached token is kept.
    ///
    /// # Panics
    ///
    /// Panics when called outside of a Tokio runtime, since the refresh runs
    /// on a spawned task.
    pub async fn refresh_token_for_organization(
        &self,
        organization_id: impl Into<OrganizationId>,
    ) -> Result<Option<AccessToken>, RefreshError> {
        self.refresh(Attempt::forced(Some(organization_id.into()))).await
    }

    /// Drops the cached token and cancels pending renewal
    ///
    /// Any refresh still outstanding will have its result discarded.
    pub fn clear_token(&self) {
        let mut m = self.inner.lock();
        m.generation += 1;
        m.in_flight = None;
        m.cancel_timer();
        m.publisher.send_replace(TokenState::default());
        tracing::debug!("token cleared");
    }

    /// Returns the store to its initial state
    ///
    /// In addition to [`clear_token()`][Self::clear_token()], closes every
    /// existing subscription and allows the bootstrap cookie to be read
    /// again.
    pub fn reset(&self) {
        let mut m = self.inner.lock();
        m.generation += 1;
        m.epoch += 1;
        m.in_flight = None;
        m.cancel_timer();
        m.bootstrap_consumed = false;
        m.unsubscribed = false;
        m.publisher = watch::channel(TokenState::default()).0;
        tracing::debug!("token store reset");
    }

    fn usable_token(&self) -> Option<AccessToken> {
        self.bootstrap();

        let token = self.inner.lock().current_token()?;
        if self.inner.is_expiring(&token) {
            tracing::debug!("cached token is expiring");
            None
        } else {
            Some(token)
        }
    }

    fn reschedule_from(&self, token: &AccessTokenRef) {
        let mut m = self.inner.lock();
        if m.current_token().as_deref() == Some(token) {
            m.unsubscribed = false;
            let delay = self.inner.delay_after_refresh(token);
            self.inner.schedule(&mut m, delay);
        }
    }

    async fn refresh(&self, attempt: Attempt) -> RefreshResult {
        loop {
            let (pending, joined) = {
                let mut m = self.inner.lock();
                let existing = m.in_flight.as_ref().map(|f| {
                    let joinable = attempt.scope.is_none() || f.scope == attempt.scope;
                    (f.result.clone(), joinable)
                });

                match existing {
                    Some(existing) => existing,
                    None => (self.inner.start(&mut m, attempt.clone()), true),
                }
            };

            if joined {
                return pending.await;
            }

            tracing::debug!(
                organization = ?attempt.scope,
                "waiting out refresh for a different organization"
            );
            let _ = pending.await;
        }
    }
}

/// Builder for a [`TokenStore`]
pub struct TokenStoreBuilder {
    remote: Arc<dyn TokenRemote>,
    config: StoreConfig,
    clock: Arc<dyn Clock + Send + Sync>,
    jitter: Box<dyn JitterSource + Send>,
    cookie_jar: Option<Arc<dyn CookieJar>>,
}

impl fmt::Debug for TokenStoreBuilder {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("TokenStoreBuilder")
            .field("config", &self.config)
            .field("cookie_jar", &self.cookie_jar.is_some())
            .finish()
    }
}

impl TokenStoreBuilder {
    /// Sets the store configuration
    pub fn with_config(mut self, config: StoreConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets a custom clock to be used for expiry decisions
    ///
    /// Useful for testing purposes
    pub fn with_clock(mut self, clock: impl Clock + Send + Sync + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Sets the jitter applied to renewal delays
    pub fn with_jitter(mut self, jitter: impl JitterSource + Send + 'static) -> Self {
        self.jitter = Box::new(jitter);
        self
    }

    /// Sets the cookie jar holding the bootstrap cookie
    ///
    /// The bootstrap cookie is consumed as soon as the store is built.
    pub fn with_cookie_jar(mut self, jar: Arc<dyn CookieJar>) -> Self {
        self.cookie_jar = Some(jar);
        self
    }

    /// Builds the store
    pub fn build(self) -> TokenStore {
        let store = TokenStore {
            inner: Arc::new(Inner {
                remote: self.remote,
                config: self.config,
                clock: self.clock,
                jitter: Mutex::new(self.jitter),
                cookie_jar: self.cookie_jar,
                machine: Mutex::new(Machine::new()),
            }),
        };

        store.bootstrap();
        store
    }
}

/// A subscription to a [`TokenStore`]'s state
pub struct Subscription {
    receiver: watch::Receiver<TokenState>,
    epoch: u64,
    store: Weak<Inner>,
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("state", &*self.receiver.borrow())
            .field("epoch", &self.epoch)
            .finish()
    }
}

impl Subscription {
    /// A copy of the latest state seen by this subscription
    pub fn snapshot(&self) -> TokenState {
        self.receiver.borrow().clone()
    }

    /// Waits until the state changes
    ///
    /// # Errors
    ///
    /// Returns an error once the store has been reset or dropped; no further
    /// changes will be observed.
    pub async fn changed(&mut self) -> Result<(), SubscriptionClosed> {
        self.receiver
            .changed()
            .await
            .map_err(|_| errors::subscription_closed())
    }

    /// Whether a change is waiting to be observed
    ///
    /// # Errors
    ///
    /// Returns an error once the store has been reset or dropped.
    pub fn has_changed(&self) -> Result<bool, SubscriptionClosed> {
        self.receiver
            .has_changed()
            .map_err(|_| errors::subscription_closed())
    }

    /// Marks the current state as seen
    pub fn mark_seen(&mut self) {
        self.receiver.borrow_and_update();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let inner = match self.store.upgrade() {
            Some(inner) => inner,
            None => return,
        };

        let mut m = inner.lock();
        // This subscription's receiver is still counted
        if m.epoch == self.epoch && m.publisher.receiver_count() <= 1 {
            m.unsubscribed = true;
            m.cancel_timer();
            tracing::debug!("last subscriber left, pending renewal cancelled");
        }
    }
}
