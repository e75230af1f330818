use std::time::Duration;

use authkit_tokens::{
    jitter, remote::http::HttpTokenRemote, AccessTokenBinding, ExpiryPolicy, Identity, SessionId,
    StoreConfig, TokenStatus, TokenStore, UserId, WakeEvent,
};
use clap::Parser;
use tokio::{sync::mpsc, time};

#[derive(Debug, Parser)]
struct Opts {
    /// The base URL under which the token server functions are exposed
    #[clap(short, long, env)]
    base_url: reqwest::Url,

    /// The signed-in user
    #[clap(short, long, env)]
    user_id: String,

    /// The user's current session
    #[clap(short, long, env)]
    session_id: String,

    /// Seconds between simulated focus events
    #[clap(long, env, default_value = "30")]
    wake_interval: u64,
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    dotenvy::dotenv().ok();
    color_eyre::install()?;

    tracing_subscriber::fmt()
        .pretty()
        .with_env_filter(tracing_subscriber::filter::EnvFilter::from_default_env())
        .init();

    let opts = Opts::parse();

    let client = reqwest::Client::builder().build()?;
    let remote = HttpTokenRemote::new(client, opts.base_url);

    let policy = ExpiryPolicy::default();
    let store = TokenStore::builder(remote)
        .with_config(StoreConfig::new(policy.clone()))
        .with_jitter(jitter::RandomEarlyJitter::new(Duration::from_secs(10)))
        .build();

    let identity = Identity::authenticated(
        UserId::new(opts.user_id),
        SessionId::new(opts.session_id),
    );
    let mut binding = AccessTokenBinding::mount(store, identity);

    let (wake_tx, wake_rx) = mpsc::channel(8);
    binding.listen_for_wake(wake_rx);

    let wake_interval = Duration::from_secs(opts.wake_interval);
    tokio::spawn(async move {
        let mut interval = time::interval(wake_interval);
        interval.tick().await;
        loop {
            interval.tick().await;
            if wake_tx.send(WakeEvent::Focus).await.is_err() {
                break;
            }
        }
    });

    let token = binding.get_access_token().await?;
    tracing::info!(
        token = format_args!("{:#?}", token),
        "first access token"
    );

    let mut interval = time::interval(Duration::from_secs(5));
    loop {
        interval.tick().await;

        let state = binding.state();
        let token = match state.access_token() {
            Some(token) => token,
            None => {
                tracing::warn!(loading = state.is_loading(), "no access token");
                continue;
            }
        };

        let info = match policy.parse(token) {
            Some(info) => info,
            None => {
                tracing::debug!(token = format_args!("{:#?}", token), "pulled opaque token");
                continue;
            }
        };

        let status = info.status();
        match status {
            TokenStatus::Fresh => {
                tracing::debug!(
                    ?status,
                    remaining = info.time_until_expiry(),
                    expiry = info.expires_at().0,
                    "pulled token"
                )
            }
            TokenStatus::Expiring => {
                tracing::warn!(
                    ?status,
                    remaining = info.time_until_expiry(),
                    expiry = info.expires_at().0,
                    "pulled token"
                )
            }
            TokenStatus::Expired => {
                tracing::error!(
                    ?status,
                    remaining = info.time_until_expiry(),
                    expiry = info.expires_at().0,
                    error = state.error().map(tracing::field::display),
                    "pulled token"
                )
            }
        }
    }
}
