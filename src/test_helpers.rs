//! Scripted chain and identity doubles for flow tests.

use crate::{
    PoolError,
    Result,
    amount::Amount,
    client::AppConfig,
    connection::{
        ChainReader,
        ChainWriter,
        SessionTransport,
        TxOutcome,
    },
    deployment::{
        ContractAddresses,
        Network,
    },
    estimate::{
        Cadence,
        DrawingSchedule,
    },
    identity::{
        IdentityProvider,
        SessionMetadata,
    },
    pool_types::{
        IBasePool,
        ICToken,
        IERC20,
        IMulticall,
        IUserPoolFactory,
    },
};
use alloy::{
    primitives::{
        Address,
        B256,
        Bytes,
        U256,
    },
    sol_types::{
        SolCall,
        SolValue,
    },
};
use chrono::{
    DateTime,
    TimeZone,
    Utc,
};
use std::{
    collections::HashMap,
    sync::{
        Mutex,
        atomic::{
            AtomicU64,
            AtomicUsize,
            Ordering,
        },
    },
    time::Duration,
};

pub fn test_addresses() -> ContractAddresses {
    ContractAddresses {
        multicall: Address::repeat_byte(0x10),
        base_pool: Address::repeat_byte(0x11),
        dai: Address::repeat_byte(0x12),
        ctoken: Address::repeat_byte(0x13),
        factory: Address::repeat_byte(0x14),
        user_pool_logic: Address::repeat_byte(0x15),
    }
}

pub fn test_user() -> Address {
    Address::repeat_byte(0xaa)
}

pub fn test_proxy() -> Address {
    Address::repeat_byte(0xbb)
}

/// 2020-05-01T12:00:00Z.
pub fn test_now() -> DateTime<Utc> {
    Utc.timestamp_opt(1_588_334_400, 0).unwrap()
}

pub fn test_config() -> AppConfig {
    AppConfig {
        network: Network::Local,
        rpc_url: "http://127.0.0.1:8545".parse().unwrap(),
        addresses: test_addresses(),
        schedule: DrawingSchedule::recurring(
            test_now() + chrono::Duration::hours(1),
            Cadence::Weekly,
            4,
        ),
        poll_interval: Duration::from_millis(10),
    }
}

/// On-chain pool values served by [`FakeChain::with_pool`].
#[derive(Clone, Debug)]
pub struct PoolFixture {
    pub draw_id: u64,
    pub total_balance: Amount,
    pub accounted_balance: Amount,
    pub committed_supply: Amount,
    pub open_supply: Amount,
    pub supply_rate_per_block: U256,
    pub fee_fraction: U256,
}

impl Default for PoolFixture {
    fn default() -> Self {
        Self {
            draw_id: 7,
            total_balance: Amount::from_whole(1_000),
            accounted_balance: Amount::from_whole(900),
            committed_supply: Amount::from_whole(800),
            open_supply: Amount::from_whole(50),
            supply_rate_per_block: U256::from(10_000_000_000u64),
            fee_fraction: U256::from(100_000_000_000_000_000u64),
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RecordedCall {
    pub to: Address,
    pub selector: [u8; 4],
    pub block: Option<u64>,
}

/// In-memory chain answering calls by `(target, selector)`.
///
/// Calls to the multicall address are unpacked and answered one by one, so
/// tests script individual contract methods rather than whole batches.
pub struct FakeChain {
    multicall: Address,
    block_number: u64,
    responses: HashMap<(Address, [u8; 4]), Bytes>,
    dropped_payloads: usize,
    failing_aggregates: AtomicUsize,
    sender: Address,
    revert_sends: Option<String>,
    calls: Mutex<Vec<RecordedCall>>,
    sent: Mutex<Vec<(Address, Bytes)>>,
}

impl FakeChain {
    pub fn new(addresses: &ContractAddresses) -> Self {
        Self {
            multicall: addresses.multicall,
            block_number: 10_000_000,
            responses: HashMap::new(),
            dropped_payloads: 0,
            failing_aggregates: AtomicUsize::new(0),
            sender: test_user(),
            revert_sends: None,
            calls: Mutex::new(Vec::new()),
            sent: Mutex::new(Vec::new()),
        }
    }

    /// Chain with a pool, a proxy for [`test_user`], and balances for it.
    pub fn funded(addresses: &ContractAddresses) -> Self {
        Self::new(addresses)
            .with_pool(addresses, &PoolFixture::default())
            .with_proxy(addresses, Some(test_proxy()))
            .with_user_balances(
                addresses,
                Amount::from_whole(25),
                Amount::from_whole(100),
                Amount::from_whole(40),
            )
    }

    pub fn with_block(mut self, block_number: u64) -> Self {
        self.block_number = block_number;
        self
    }

    pub fn respond<C: SolCall>(mut self, target: Address, payload: impl Into<Bytes>) -> Self {
        self.responses.insert((target, C::SELECTOR), payload.into());
        self
    }

    pub fn respond_value<C: SolCall, V: SolValue>(self, target: Address, value: V) -> Self {
        self.respond::<C>(target, value.abi_encode())
    }

    pub fn with_pool(self, addresses: &ContractAddresses, pool: &PoolFixture) -> Self {
        let base = addresses.base_pool;
        let draw = (
            pool.fee_fraction,
            Address::repeat_byte(0xfe),
            U256::from(9_000_000u64),
            B256::repeat_byte(1),
            B256::ZERO,
            Address::ZERO,
            U256::ZERO,
            U256::ZERO,
        )
            .abi_encode_params();
        self.respond_value::<IBasePool::currentCommittedDrawIdCall, _>(base, U256::from(pool.draw_id))
            .respond_value::<IBasePool::balanceCall, _>(base, pool.total_balance.raw())
            .respond_value::<IBasePool::accountedBalanceCall, _>(base, pool.accounted_balance.raw())
            .respond_value::<IBasePool::committedSupplyCall, _>(base, pool.committed_supply.raw())
            .respond_value::<IBasePool::openSupplyCall, _>(base, pool.open_supply.raw())
            .respond_value::<ICToken::supplyRatePerBlockCall, _>(
                addresses.ctoken,
                pool.supply_rate_per_block,
            )
            .respond::<IBasePool::getDrawCall>(base, draw)
    }

    /// `None` scripts the factory's zero-address answer for an undeployed proxy.
    pub fn with_proxy(self, addresses: &ContractAddresses, proxy: Option<Address>) -> Self {
        self.respond_value::<IUserPoolFactory::getContractCall, _>(
            addresses.factory,
            proxy.unwrap_or(Address::ZERO),
        )
    }

    pub fn with_user_balances(
        self,
        addresses: &ContractAddresses,
        dai: Amount,
        committed: Amount,
        open: Amount,
    ) -> Self {
        let total = committed.raw() + open.raw();
        self.respond_value::<IERC20::balanceOfCall, _>(addresses.dai, dai.raw())
            .respond_value::<IBasePool::committedBalanceOfCall, _>(addresses.base_pool, committed.raw())
            .respond_value::<IBasePool::openBalanceOfCall, _>(addresses.base_pool, open.raw())
            .respond_value::<IBasePool::totalBalanceOfCall, _>(addresses.base_pool, total)
    }

    /// Drops the last `count` payloads from every aggregate response.
    pub fn dropping_payloads(mut self, count: usize) -> Self {
        self.dropped_payloads = count;
        self
    }

    /// Truncates the next `count` aggregate responses by one payload, then
    /// answers normally.
    pub fn failing_next_aggregates(self, count: usize) -> Self {
        self.failing_aggregates.store(count, Ordering::SeqCst);
        self
    }

    pub fn reverting_sends(mut self, reason: impl Into<String>) -> Self {
        self.revert_sends = Some(reason.into());
        self
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn sent(&self) -> Vec<(Address, Bytes)> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }

    fn answer(&self, to: Address, data: &[u8]) -> Result<Bytes> {
        let selector: [u8; 4] = data
            .get(..4)
            .and_then(|s| s.try_into().ok())
            .ok_or_else(|| PoolError::Connection(format!("calldata to {to} has no selector")))?;
        self.responses
            .get(&(to, selector))
            .cloned()
            .ok_or_else(|| {
                PoolError::Connection(format!(
                    "execution reverted: {to} has no method 0x{}",
                    hex::encode(selector)
                ))
            })
    }

    fn aggregate(&self, data: &[u8], block: Option<u64>) -> Result<Bytes> {
        let request = IMulticall::aggregateCall::abi_decode(data)
            .map_err(|e| PoolError::Connection(format!("bad aggregate calldata: {e}")))?;
        let mut payloads = request
            .calls
            .iter()
            .map(|call| self.answer(call.target, &call.callData))
            .collect::<Result<Vec<_>>>()?;
        let failing = self
            .failing_aggregates
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        let dropped = self.dropped_payloads + usize::from(failing);
        let keep = payloads.len().saturating_sub(dropped);
        payloads.truncate(keep);
        let block_number = block.unwrap_or(self.block_number);
        Ok((U256::from(block_number), payloads)
            .abi_encode_params()
            .into())
    }
}

impl ChainReader for FakeChain {
    async fn call(&self, to: Address, data: Bytes, block: Option<u64>) -> Result<Bytes> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(RecordedCall {
                to,
                selector: data.get(..4).and_then(|s| s.try_into().ok()).unwrap_or_default(),
                block,
            });
        }
        if to == self.multicall {
            self.aggregate(&data, block)
        } else {
            self.answer(to, &data)
        }
    }
}

impl ChainWriter for FakeChain {
    fn sender(&self) -> Address {
        self.sender
    }

    async fn send(&self, to: Address, data: Bytes) -> Result<TxOutcome> {
        if let Some(reason) = &self.revert_sends {
            return Err(PoolError::ContractRevert {
                reason: Some(reason.clone()),
            });
        }
        let mut sent = self
            .sent
            .lock()
            .map_err(|_| PoolError::Connection("fake chain poisoned".to_string()))?;
        sent.push((to, data));
        Ok(TxOutcome {
            tx_hash: B256::repeat_byte(sent.len() as u8),
            block_number: Some(self.block_number + 1),
        })
    }
}

/// Identity with a fixed answer and no keystore behind it.
pub struct StaticIdentity {
    metadata: Option<SessionMetadata>,
    transport: Option<SessionTransport>,
    preloads: AtomicU64,
}

impl StaticIdentity {
    pub fn logged_out() -> Self {
        Self {
            metadata: None,
            transport: None,
            preloads: AtomicU64::new(0),
        }
    }

    pub fn logged_in(public_address: Address, email: Option<&str>) -> Self {
        Self {
            metadata: Some(SessionMetadata {
                email: email.map(str::to_string),
                public_address,
            }),
            transport: None,
            preloads: AtomicU64::new(0),
        }
    }

    pub fn with_transport(mut self, transport: SessionTransport) -> Self {
        self.metadata = Some(SessionMetadata {
            email: self.metadata.and_then(|m| m.email),
            public_address: transport.signer.address(),
        });
        self.transport = Some(transport);
        self
    }

    pub fn preloads(&self) -> u64 {
        self.preloads.load(Ordering::SeqCst)
    }
}

impl IdentityProvider for StaticIdentity {
    fn preload(&self) -> Result<()> {
        self.preloads.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn is_logged_in(&self) -> Result<bool> {
        Ok(self.metadata.is_some())
    }

    async fn metadata(&self) -> Result<SessionMetadata> {
        self.metadata
            .clone()
            .ok_or_else(|| PoolError::AuthUnavailable("no active session".to_string()))
    }

    fn transport(&self) -> Option<SessionTransport> {
        self.transport.clone()
    }
}
