//! A scripted remote for exercising the store

use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
};

use async_trait::async_trait;
use tokio::sync::Semaphore;

use crate::{error::BoxError, remote::TokenRemote, AccessToken, OrganizationIdRef};

type Scripted = Result<Option<AccessToken>, String>;

/// Replays scripted responses and counts calls
///
/// Unscripted calls fail. When gated, every call waits for a permit on the
/// gate before responding.
#[derive(Debug, Default)]
pub(crate) struct MockRemote {
    gets: Mutex<VecDeque<Scripted>>,
    refreshes: Mutex<VecDeque<Scripted>>,
    get_calls: AtomicUsize,
    refresh_calls: AtomicUsize,
    organizations: Mutex<Vec<Option<String>>>,
    gate: Option<Arc<Semaphore>>,
}

impl MockRemote {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn on_get(self, response: Scripted) -> Self {
        self.gets.lock().unwrap().push_back(response);
        self
    }

    pub(crate) fn on_refresh(self, response: Scripted) -> Self {
        self.refreshes.lock().unwrap().push_back(response);
        self
    }

    pub(crate) fn gated(mut self, gate: Arc<Semaphore>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub(crate) fn push_refresh(&self, response: Scripted) {
        self.refreshes.lock().unwrap().push_back(response);
    }

    pub(crate) fn push_get(&self, response: Scripted) {
        self.gets.lock().unwrap().push_back(response);
    }

    pub(crate) fn get_calls(&self) -> usize {
        self.get_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn refresh_calls(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn organizations(&self) -> Vec<Option<String>> {
        self.organizations.lock().unwrap().clone()
    }

    async fn respond(
        &self,
        queue: &Mutex<VecDeque<Scripted>>,
    ) -> Result<Option<AccessToken>, BoxError> {
        if let Some(gate) = &self.gate {
            gate.acquire().await.unwrap().forget();
        }

        let next = queue.lock().unwrap().pop_front();
        match next {
            Some(Ok(token)) => Ok(token),
            Some(Err(message)) => Err(message.into()),
            None => Err("unscripted remote call".into()),
        }
    }
}

#[async_trait]
impl TokenRemote for MockRemote {
    async fn get_access_token(&self) -> Result<Option<AccessToken>, BoxError> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        self.respond(&self.gets).await
    }

    async fn refresh_access_token(
        &self,
        organization_id: Option<&OrganizationIdRef>,
    ) -> Result<Option<AccessToken>, BoxError> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        self.organizations
            .lock()
            .unwrap()
            .push(organization_id.map(|o| o.as_str().to_owned()));
        self.respond(&self.refreshes).await
    }
}

/// Lets spawned tasks on a current-thread runtime run to quiescence
pub(crate) async fn settle() {
    for _ in 0..32 {
        tokio::task::yield_now().await;
    }
}
