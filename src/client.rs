use crate::{
    PoolError,
    Result,
    amount::{
        Amount,
        format_currency,
    },
    connection::{
        ChainReader,
        ChainWriter,
        Connection,
        SessionSigner,
        TxOutcome,
    },
    deployment::{
        ContractAddresses,
        Network,
    },
    estimate::{
        DrawingSchedule,
        estimate,
    },
    identity::{
        IdentityProvider,
        SessionMetadata,
    },
    pool::{
        self,
        read_pool_snapshot,
        read_user_balances,
    },
    proxy::{
        self,
        resolve_binding,
    },
    store::{
        PoolData,
        Session,
        SessionData,
        SessionStore,
    },
};
use alloy::primitives::Address;
use chrono::{
    DateTime,
    Utc,
};
use std::{
    sync::Arc,
    time::Duration,
};
use tokio::{
    sync::watch,
    time,
};
use url::Url;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(15);

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub network: Network,
    pub rpc_url: Url,
    pub addresses: ContractAddresses,
    pub schedule: DrawingSchedule,
    pub poll_interval: Duration,
}

/// Cancellation signal for one flow. Clones share the signal.
#[derive(Clone, Debug)]
pub struct CancelToken {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            tx: Arc::new(tx),
            rx,
        }
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        if rx.wait_for(|cancelled| *cancelled).await.is_err() {
            std::future::pending::<()>().await;
        }
    }

    /// Runs `fut` unless the token fires first.
    pub async fn guard<T>(&self, fut: impl Future<Output = Result<T>>) -> Result<T> {
        tokio::select! {
            biased;
            _ = self.cancelled() => Err(PoolError::Cancelled),
            out = fut => out,
        }
    }

    fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(PoolError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Connection chosen for the current identity state.
pub enum ActiveConnection {
    Anonymous(Connection),
    Authenticated {
        connection: Connection,
        signer: SessionSigner,
        metadata: SessionMetadata,
    },
}

impl ActiveConnection {
    pub fn reader(&self) -> &Connection {
        match self {
            ActiveConnection::Anonymous(connection) => connection,
            ActiveConnection::Authenticated { connection, .. } => connection,
        }
    }

    pub fn metadata(&self) -> Option<&SessionMetadata> {
        match self {
            ActiveConnection::Anonymous(_) => None,
            ActiveConnection::Authenticated { metadata, .. } => Some(metadata),
        }
    }

    pub fn signer(&self) -> Result<&SessionSigner> {
        match self {
            ActiveConnection::Anonymous(_) => Err(PoolError::AuthUnavailable(
                "log in to send transactions".to_string(),
            )),
            ActiveConnection::Authenticated { signer, .. } => Ok(signer),
        }
    }
}

pub struct AppController<I> {
    config: AppConfig,
    identity: I,
    store: Arc<SessionStore>,
}

impl<I: IdentityProvider> AppController<I> {
    pub fn new(config: AppConfig, identity: I, store: Arc<SessionStore>) -> Self {
        Self {
            config,
            identity,
            store,
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn identity(&self) -> &I {
        &self.identity
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    /// Checks the identity provider and builds the matching connection.
    pub async fn connect(&self) -> Result<ActiveConnection> {
        self.identity.preload()?;
        if !self.identity.is_logged_in().await? {
            tracing::info!(network = %self.config.network, "no session, using default provider");
            return Ok(ActiveConnection::Anonymous(Connection::build_default(
                self.config.rpc_url.clone(),
            )));
        }
        let metadata = self.identity.metadata().await?;
        let transport = self.identity.transport().ok_or_else(|| {
            PoolError::AuthUnavailable("session has no transport".to_string())
        })?;
        let (connection, signer) = Connection::build_authenticated(transport);
        tracing::info!(
            network = %self.config.network,
            address = %metadata.public_address,
            "session established"
        );
        Ok(ActiveConnection::Authenticated {
            connection,
            signer,
            metadata,
        })
    }

    /// Resolves the session's proxy and balances, then replaces the session section.
    pub async fn sync_session<R: ChainReader>(
        &self,
        reader: &R,
        metadata: Option<&SessionMetadata>,
        cancel: &CancelToken,
    ) -> Result<SessionData> {
        let stamp = self.store.begin_fetch();
        let addresses = &self.config.addresses;
        let data = match metadata {
            None => SessionData {
                session: Session::anonymous(),
                binding: None,
                balances: None,
            },
            Some(metadata) => {
                let binding = cancel
                    .guard(resolve_binding(
                        reader,
                        addresses.factory,
                        metadata.public_address,
                        addresses.user_pool_logic,
                    ))
                    .await?;
                let balances = match binding.proxy {
                    Some(proxy) => Some(
                        cancel
                            .guard(read_user_balances(reader, addresses, proxy))
                            .await?,
                    ),
                    None => None,
                };
                SessionData {
                    session: Session {
                        is_authenticated: true,
                        public_address: Some(metadata.public_address),
                        email: metadata.email.clone(),
                    },
                    binding: Some(binding),
                    balances,
                }
            }
        };
        cancel.check()?;
        if !self.store.set_session(stamp, data.clone()) {
            tracing::info!(stamp = stamp.value(), "session result superseded");
        }
        Ok(data)
    }

    /// Reads a pool snapshot, derives the prize estimate, and replaces the prize section.
    pub async fn sync_pool<R: ChainReader>(
        &self,
        reader: &R,
        now: DateTime<Utc>,
        cancel: &CancelToken,
    ) -> Result<PoolData> {
        let stamp = self.store.begin_fetch();
        let snapshot = cancel
            .guard(read_pool_snapshot(reader, &self.config.addresses))
            .await?;
        let estimate = estimate(&snapshot, &self.config.schedule, now)?;
        cancel.check()?;
        if self
            .store
            .set_pool_data(stamp, snapshot.clone(), estimate.clone())
        {
            tracing::info!(
                block = snapshot.block_number,
                prize = %estimate.estimated_prize,
                "pool data updated"
            );
        } else {
            tracing::info!(stamp = stamp.value(), "pool result superseded");
        }
        Ok(PoolData { snapshot, estimate })
    }

    /// One full pass: identity, connection, proxy, snapshot, estimate.
    pub async fn refresh(&self, cancel: &CancelToken) -> Result<ActiveConnection> {
        let active = self.connect().await?;
        self.sync_session(active.reader(), active.metadata(), cancel)
            .await?;
        self.sync_pool(active.reader(), Utc::now(), cancel).await?;
        Ok(active)
    }

    /// Polls pool data until Ctrl-C or `cancel` fires.
    pub async fn watch(
        &self,
        cancel: &CancelToken,
        on_update: impl FnMut(&PoolData),
    ) -> Result<()> {
        let active = self.connect().await?;
        tokio::select! {
            result = self.watch_with(active.reader(), active.metadata(), cancel, on_update) => result,
            _ = tokio::signal::ctrl_c() => {
                cancel.cancel();
                tracing::info!("watch interrupted");
                Ok(())
            }
        }
    }

    /// Syncs the session once, then syncs pool data on every tick until
    /// `cancel` fires. A failed tick is reported and the next tick is a fresh
    /// attempt.
    pub async fn watch_with<R: ChainReader>(
        &self,
        reader: &R,
        metadata: Option<&SessionMetadata>,
        cancel: &CancelToken,
        mut on_update: impl FnMut(&PoolData),
    ) -> Result<()> {
        match self.sync_session(reader, metadata, cancel).await {
            Ok(_) => {}
            Err(PoolError::Cancelled) => return Ok(()),
            Err(e) => report_error(&e),
        }
        let mut ticker = time::interval(self.config.poll_interval);
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    match self.sync_pool(reader, Utc::now(), cancel).await {
                        Ok(data) => on_update(&data),
                        Err(PoolError::Cancelled) => break,
                        Err(e) => report_error(&e),
                    }
                }
            }
        }
        tracing::info!("watch stopped");
        Ok(())
    }

    pub async fn create_proxy(&self, active: &ActiveConnection) -> Result<TxOutcome> {
        let signer = active.signer()?;
        let addresses = &self.config.addresses;
        proxy::create_proxy(signer, addresses.factory, addresses.user_pool_logic).await
    }

    pub async fn deposit(&self, active: &ActiveConnection) -> Result<TxOutcome> {
        let signer = active.signer()?;
        let proxy = self.require_proxy(active).await?;
        pool::deposit(signer, proxy).await
    }

    pub async fn withdraw(
        &self,
        active: &ActiveConnection,
        amount: Amount,
        recipient: Option<Address>,
    ) -> Result<TxOutcome> {
        let signer = active.signer()?;
        let proxy = self.require_proxy(active).await?;
        let recipient = recipient.unwrap_or_else(|| signer.sender());
        pool::withdraw(signer, proxy, amount, recipient).await
    }

    async fn require_proxy(&self, active: &ActiveConnection) -> Result<Address> {
        let metadata = active.metadata().ok_or_else(|| {
            PoolError::AuthUnavailable("log in to use your pool".to_string())
        })?;
        proxy::resolve_proxy(
            active.reader(),
            self.config.addresses.factory,
            metadata.public_address,
        )
        .await?
        .ok_or_else(|| {
            PoolError::Config("no proxy deployed yet; run create-proxy first".to_string())
        })
    }
}

pub fn report_error(err: &PoolError) {
    tracing::error!(error = %err, severity = ?err.severity(), "{}", err.user_message());
}

pub fn format_pool_summary(data: &PoolData) -> String {
    let estimate = &data.estimate;
    let blocks = &estimate.remaining_blocks;
    let mut lines = vec![
        format!(
            "Block {} | draw #{}",
            data.snapshot.block_number, data.snapshot.current_draw_id
        ),
        format!(
            "Total earning interest: {}",
            format_currency(estimate.total_earning_interest, 2, 2)
        ),
        format!(
            "Eligible tickets: {} | open tickets: {}",
            format_currency(estimate.eligible_tickets, 2, 2),
            format_currency(estimate.open_tickets, 2, 2)
        ),
        format!("Sponsored: {}", format_currency(estimate.sponsored_amount, 2, 2)),
        format!(
            "Estimated prize: {} (accrued so far {})",
            format_currency(estimate.estimated_prize, 2, 4),
            format_currency(estimate.accrued_prize, 2, 4)
        ),
        format!(
            "Next drawing: {} (~{} blocks at {}s, {}-{} if block times drift)",
            estimate.next_drawing.to_rfc2822(),
            blocks.blocks,
            blocks.assumed_block_secs,
            blocks.min_blocks,
            blocks.max_blocks
        ),
    ];
    if let Some(deficit) = estimate.sponsorship_deficit {
        lines.push(format!(
            "Warning: ticket supply exceeds accounted balance by {}",
            format_currency(deficit, 2, 4)
        ));
    }
    lines.join("\n")
}

pub fn format_session_summary(data: &SessionData) -> String {
    let session = &data.session;
    if !session.is_authenticated {
        return String::from("Not logged in");
    }
    let mut lines = Vec::new();
    if let Some(address) = session.public_address {
        lines.push(format!("Account: {address}"));
    }
    if let Some(email) = &session.email {
        lines.push(format!("Email: {email}"));
    }
    match data.binding.and_then(|binding| binding.proxy) {
        Some(proxy) => lines.push(format!("Proxy: {proxy}")),
        None => lines.push(String::from("Proxy: not deployed (run create-proxy)")),
    }
    if let Some(balances) = &data.balances {
        lines.push(format!(
            "Dai in proxy: {} | committed: {} | open: {} | total: {}",
            format_currency(balances.dai_in_proxy, 2, 4),
            format_currency(balances.committed_balance, 2, 4),
            format_currency(balances.open_balance, 2, 4),
            format_currency(balances.total_balance, 2, 4)
        ));
    }
    lines.join("\n")
}
