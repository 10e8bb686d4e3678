//! Batched reads through a Multicall aggregator.
//!
//! Calls are added to a [`Batch`] as typed descriptors; every `add` hands back
//! a [`Slot`] that remembers both its position and the call it was made for.
//! After execution a slot can only be decoded with its own call's return
//! schema, so a reordered or truncated response is a decode error rather than
//! a silently wrong value.

use crate::{
    PoolError,
    Result,
    connection::ChainReader,
    pool_types::IMulticall,
};
use alloy::{
    primitives::{
        Address,
        Bytes,
    },
    sol_types::{
        SolCall,
        SolType,
    },
};
use std::{
    marker::PhantomData,
    sync::atomic::{
        AtomicU64,
        Ordering,
    },
};

static NEXT_BATCH_ID: AtomicU64 = AtomicU64::new(1);

const AGGREGATE: &str = "aggregate((address,bytes)[])";

/// Handle to one call inside a batch.
#[derive(Debug)]
pub struct Slot<C> {
    batch: u64,
    index: usize,
    _call: PhantomData<fn() -> C>,
}

impl<C> Slot<C> {
    pub fn index(&self) -> usize {
        self.index
    }
}

#[derive(Clone, Debug)]
struct Descriptor {
    target: Address,
    signature: &'static str,
    calldata: Bytes,
}

#[derive(Debug)]
pub struct Batch {
    id: u64,
    calls: Vec<Descriptor>,
}

impl Default for Batch {
    fn default() -> Self {
        Self::new()
    }
}

impl Batch {
    pub fn new() -> Self {
        Self {
            id: NEXT_BATCH_ID.fetch_add(1, Ordering::Relaxed),
            calls: Vec::new(),
        }
    }

    pub fn add<C: SolCall>(&mut self, target: Address, call: C) -> Slot<C> {
        let index = self.calls.len();
        self.calls.push(Descriptor {
            target,
            signature: C::SIGNATURE,
            calldata: call.abi_encode().into(),
        });
        Slot {
            batch: self.id,
            index,
            _call: PhantomData,
        }
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    /// Calldata for `aggregate(calls)`, in submission order.
    pub fn encode(&self) -> Bytes {
        let calls = self
            .calls
            .iter()
            .map(|d| IMulticall::Call {
                target: d.target,
                callData: d.calldata.clone(),
            })
            .collect();
        IMulticall::aggregateCall { calls }.abi_encode().into()
    }

    /// Runs the batch as a read-only `eth_call` against the aggregator.
    ///
    /// `aggregate` is not declared `view`, but it is never sent as a
    /// transaction here.
    pub async fn execute<R: ChainReader>(
        self,
        reader: &R,
        multicall: Address,
        block: Option<u64>,
    ) -> Result<BatchResult> {
        tracing::debug!(calls = self.len(), %multicall, ?block, "executing multicall batch");
        let raw = reader.call(multicall, self.encode(), block).await?;
        self.decode_response(&raw)
    }

    /// Splits a raw `aggregate` response into per-call payloads.
    pub fn decode_response(self, raw: &[u8]) -> Result<BatchResult> {
        let response = IMulticall::aggregateCall::abi_decode_returns_validate(raw)
            .map_err(|e| PoolError::decode(AGGREGATE, e.to_string()))?;
        let block_number = u64::try_from(response.blockNumber)
            .map_err(|_| PoolError::decode(AGGREGATE, "block number overflows u64"))?;
        self.into_result(block_number, response.returnData)
    }

    /// Pairs payloads with descriptors; the counts must match exactly.
    pub fn into_result(self, block_number: u64, payloads: Vec<Bytes>) -> Result<BatchResult> {
        if payloads.len() != self.calls.len() {
            return Err(PoolError::decode(
                AGGREGATE,
                format!(
                    "expected {} return payloads, got {}",
                    self.calls.len(),
                    payloads.len()
                ),
            ));
        }
        let entries = self
            .calls
            .into_iter()
            .zip(payloads)
            .map(|(descriptor, payload)| (descriptor.signature, payload))
            .collect();
        Ok(BatchResult {
            batch: self.id,
            block_number,
            entries,
        })
    }
}

/// Payloads of an executed batch, still paired with their call signatures.
#[derive(Debug)]
pub struct BatchResult {
    batch: u64,
    block_number: u64,
    entries: Vec<(&'static str, Bytes)>,
}

impl BatchResult {
    /// Block height every payload in this batch was read at.
    pub fn block_number(&self) -> u64 {
        self.block_number
    }

    pub fn decode<C: SolCall>(&self, slot: &Slot<C>) -> Result<C::Return> {
        if slot.batch != self.batch {
            return Err(PoolError::decode(
                C::SIGNATURE,
                "slot belongs to a different batch",
            ));
        }
        let (signature, payload) = self.entries.get(slot.index).ok_or_else(|| {
            PoolError::decode(C::SIGNATURE, format!("no payload at index {}", slot.index))
        })?;
        if *signature != C::SIGNATURE {
            return Err(PoolError::decode(
                C::SIGNATURE,
                format!("payload at index {} belongs to `{signature}`", slot.index),
            ));
        }
        decode_returns::<C>(payload)
    }
}

/// Strictly decodes one call's return data: exact static size, validated words.
pub fn decode_returns<C: SolCall>(payload: &[u8]) -> Result<C::Return> {
    if let Some(expected) = <C::ReturnTuple<'static> as SolType>::ENCODED_SIZE {
        if payload.len() != expected {
            return Err(PoolError::decode(
                C::SIGNATURE,
                format!("expected {expected} bytes, got {}", payload.len()),
            ));
        }
    }
    C::abi_decode_returns_validate(payload)
        .map_err(|e| PoolError::decode(C::SIGNATURE, e.to_string()))
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;
    use crate::pool_types::{
        IBasePool,
        ICToken,
    };
    use alloy::{
        primitives::U256,
        sol_types::SolValue,
    };

    fn word(value: u64) -> Bytes {
        U256::from(value).abi_encode().into()
    }

    #[test]
    fn into_result__rejects_fewer_payloads_than_calls() {
        // given
        let pool = Address::repeat_byte(1);
        let mut batch = Batch::new();
        batch.add(pool, IBasePool::balanceCall {});
        batch.add(pool, IBasePool::openSupplyCall {});

        // when
        let err = batch.into_result(10, vec![word(1)]).unwrap_err();

        // then
        assert!(matches!(err, PoolError::Decode { .. }));
    }

    #[test]
    fn decode__returns_values_in_submission_order() {
        // given
        let pool = Address::repeat_byte(1);
        let ctoken = Address::repeat_byte(2);
        let mut batch = Batch::new();
        let balance = batch.add(pool, IBasePool::balanceCall {});
        let rate = batch.add(ctoken, ICToken::supplyRatePerBlockCall {});
        let raw = (U256::from(99u64), vec![word(1_000), word(7)]).abi_encode_params();

        // when
        let result = batch.decode_response(&raw).unwrap();

        // then
        assert_eq!(result.block_number(), 99);
        assert_eq!(result.decode(&balance).unwrap(), U256::from(1_000u64));
        assert_eq!(result.decode(&rate).unwrap(), U256::from(7u64));
    }

    #[test]
    fn decode__slot_from_another_batch_is_rejected() {
        let pool = Address::repeat_byte(1);
        let mut first = Batch::new();
        let foreign = first.add(pool, IBasePool::balanceCall {});
        let mut second = Batch::new();
        second.add(pool, IBasePool::balanceCall {});

        let result = second.into_result(1, vec![word(5)]).unwrap();

        assert!(matches!(
            result.decode(&foreign),
            Err(PoolError::Decode { .. })
        ));
    }

    #[test]
    fn decode__payloads_in_swapped_order_fail_instead_of_misreading() {
        // given
        let factory = Address::repeat_byte(1);
        let pool = Address::repeat_byte(2);
        let mut batch = Batch::new();
        let proxy = batch.add(
            factory,
            crate::pool_types::IUserPoolFactory::getContractCall {
                user: Address::repeat_byte(3),
            },
        );
        batch.add(pool, IBasePool::balanceCall {});
        let address_word: Bytes = Address::repeat_byte(9).abi_encode().into();
        let balance_word: Bytes = U256::MAX.abi_encode().into();

        // when
        let result = batch
            .into_result(1, vec![balance_word, address_word])
            .unwrap();

        // then
        assert!(matches!(
            result.decode(&proxy),
            Err(PoolError::Decode { .. })
        ));
    }

    #[test]
    fn decode_returns__rejects_wrong_length() {
        let mut long = word(1).to_vec();
        long.extend_from_slice(&[0u8; 32]);

        let err = decode_returns::<IBasePool::balanceCall>(&long).unwrap_err();

        assert!(matches!(err, PoolError::Decode { .. }));
    }

    #[test]
    fn decode_returns__rejects_dirty_address_words() {
        // an address word with non-zero upper bytes is not a valid encoding
        let payload = [0xffu8; 32];

        let err = decode_returns::<crate::pool_types::IUserPoolFactory::getContractCall>(&payload)
            .unwrap_err();

        assert!(matches!(err, PoolError::Decode { .. }));
    }

    #[test]
    fn encode__targets_each_call_in_order() {
        let pool = Address::repeat_byte(1);
        let ctoken = Address::repeat_byte(2);
        let mut batch = Batch::new();
        batch.add(pool, IBasePool::balanceCall {});
        batch.add(ctoken, ICToken::supplyRatePerBlockCall {});

        let encoded = batch.encode();
        let decoded = IMulticall::aggregateCall::abi_decode(&encoded).unwrap();

        assert_eq!(decoded.calls.len(), 2);
        assert_eq!(decoded.calls[0].target, pool);
        assert_eq!(decoded.calls[1].target, ctoken);
        assert_eq!(
            decoded.calls[1].callData.as_ref(),
            ICToken::supplyRatePerBlockCall::SELECTOR.as_slice()
        );
    }
}
