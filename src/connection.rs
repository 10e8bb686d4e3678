use crate::{
    PoolError,
    Result,
};
use alloy::{
    eips::BlockId,
    network::TransactionBuilder,
    primitives::{
        Address,
        Bytes,
        TxHash,
    },
    providers::{
        DynProvider,
        Provider,
        ProviderBuilder,
    },
    rpc::{
        json_rpc::ErrorPayload,
        types::TransactionRequest,
    },
    signers::local::PrivateKeySigner,
    sol_types::{
        Revert,
        SolError,
        decode_revert_reason,
    },
    transports::TransportError,
};
use std::fmt;
use url::Url;

/// Read access to a chain through `eth_call`.
pub trait ChainReader {
    /// Executes a read-only call, pinned to `block` when given.
    fn call(
        &self,
        to: Address,
        data: Bytes,
        block: Option<u64>,
    ) -> impl Future<Output = Result<Bytes>>;
}

/// Write access attributable to the session holder.
pub trait ChainWriter {
    fn sender(&self) -> Address;

    /// Submits a transaction and waits for its receipt.
    fn send(&self, to: Address, data: Bytes) -> impl Future<Output = Result<TxOutcome>>;
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TxOutcome {
    pub tx_hash: TxHash,
    pub block_number: Option<u64>,
}

/// Raw transport handed out by an identity provider once a session is active.
#[derive(Clone)]
pub struct SessionTransport {
    pub rpc_url: Url,
    pub signer: PrivateKeySigner,
}

impl fmt::Debug for SessionTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionTransport")
            .field("rpc_url", &self.rpc_url.as_str())
            .field("address", &self.signer.address())
            .finish()
    }
}

#[derive(Clone)]
pub struct Connection {
    provider: DynProvider,
    endpoint: Url,
}

/// Signing handle bound to one session.
#[derive(Clone)]
pub struct SessionSigner {
    provider: DynProvider,
    address: Address,
}

impl Connection {
    /// Read-only connection for the logged-out state. Performs no I/O.
    pub fn build_default(endpoint: Url) -> Self {
        tracing::debug!(%endpoint, "building read-only connection");
        let provider = ProviderBuilder::new().connect_http(endpoint.clone()).erased();
        Self { provider, endpoint }
    }

    /// Connection plus a signer for the session holder. Performs no I/O.
    pub fn build_authenticated(transport: SessionTransport) -> (Self, SessionSigner) {
        let SessionTransport { rpc_url, signer } = transport;
        let address = signer.address();
        tracing::debug!(endpoint = %rpc_url, %address, "building authenticated connection");
        let connection = Self::build_default(rpc_url.clone());
        let provider = ProviderBuilder::new()
            .wallet(signer)
            .connect_http(rpc_url)
            .erased();
        (connection, SessionSigner { provider, address })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

impl fmt::Display for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.endpoint)
    }
}

impl ChainReader for Connection {
    async fn call(&self, to: Address, data: Bytes, block: Option<u64>) -> Result<Bytes> {
        let tx = TransactionRequest::default().with_to(to).with_input(data);
        let call = self.provider.call(tx);
        let result = match block {
            Some(number) => call.block(BlockId::number(number)).await,
            None => call.await,
        };
        result.map_err(|e| PoolError::Connection(format!("eth_call to {to} failed: {e}")))
    }
}

impl ChainWriter for SessionSigner {
    fn sender(&self) -> Address {
        self.address
    }

    async fn send(&self, to: Address, data: Bytes) -> Result<TxOutcome> {
        let tx = TransactionRequest::default()
            .with_from(self.address)
            .with_to(to)
            .with_input(data);
        let pending = self
            .provider
            .send_transaction(tx)
            .await
            .map_err(write_error)?;
        tracing::info!(tx_hash = %pending.tx_hash(), %to, "transaction submitted");
        let receipt = pending
            .get_receipt()
            .await
            .map_err(|e| PoolError::Connection(format!("waiting for receipt failed: {e}")))?;
        if !receipt.status() {
            return Err(PoolError::ContractRevert { reason: None });
        }
        Ok(TxOutcome {
            tx_hash: receipt.transaction_hash,
            block_number: receipt.block_number,
        })
    }
}

/// JSON-RPC code nodes use for `execution reverted`.
const EXECUTION_REVERTED: i64 = 3;

/// Only an execution revert is a `ContractRevert`; nonce, gas and fee
/// rejections are the node refusing the transaction.
fn write_error(err: TransportError) -> PoolError {
    match err.as_error_resp() {
        Some(payload) => payload_error(payload),
        None => PoolError::Connection(err.to_string()),
    }
}

fn payload_error(payload: &ErrorPayload) -> PoolError {
    let revert_data = payload.as_revert_data();
    let is_revert = payload.code == EXECUTION_REVERTED
        || revert_data.is_some()
        || payload.message.starts_with("execution reverted");
    if !is_revert {
        return PoolError::Connection(format!(
            "node rejected transaction ({}): {}",
            payload.code, payload.message
        ));
    }
    let reason = revert_data
        .as_ref()
        .and_then(|data| revert_reason(data))
        .or_else(|| {
            payload
                .message
                .strip_prefix("execution reverted")
                .map(|rest| rest.trim_start_matches(':').trim().to_string())
                .filter(|rest| !rest.is_empty())
        });
    PoolError::ContractRevert { reason }
}

fn revert_reason(data: &[u8]) -> Option<String> {
    match Revert::abi_decode(data) {
        Ok(revert) => Some(revert.reason),
        Err(_) => decode_revert_reason(data),
    }
}
