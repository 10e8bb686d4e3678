use crate::{
    PoolError,
    Result,
    amount::Amount,
    connection::{
        ChainReader,
        ChainWriter,
        TxOutcome,
    },
    deployment::ContractAddresses,
    multicall::Batch,
    pool_types::{
        IBasePool,
        ICToken,
        IERC20,
        IUserPool,
    },
};
use alloy::{
    primitives::{
        Address,
        U256,
    },
    sol_types::SolCall,
};
use serde::Serialize;

/// Pool state read atomically at one block height.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct PoolSnapshot {
    pub block_number: u64,
    pub current_draw_id: u64,
    pub total_balance: Amount,
    pub accounted_balance: Amount,
    pub eligible_supply: Amount,
    pub open_supply: Amount,
    /// 18-decimal fixed-point rate from the cToken.
    pub supply_rate_per_block: U256,
    /// 18-decimal fixed-point fraction of the current draw.
    pub draw_fee_fraction: U256,
}

/// Balances held by a user's proxy.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct UserBalances {
    pub dai_in_proxy: Amount,
    pub committed_balance: Amount,
    pub open_balance: Amount,
    pub total_balance: Amount,
}

pub async fn read_pool_snapshot<R: ChainReader>(
    reader: &R,
    addresses: &ContractAddresses,
) -> Result<PoolSnapshot> {
    let pool = addresses.base_pool;
    let mut batch = Batch::new();
    let draw_id = batch.add(pool, IBasePool::currentCommittedDrawIdCall {});
    let balance = batch.add(pool, IBasePool::balanceCall {});
    let accounted = batch.add(pool, IBasePool::accountedBalanceCall {});
    let committed = batch.add(pool, IBasePool::committedSupplyCall {});
    let open = batch.add(pool, IBasePool::openSupplyCall {});
    let rate = batch.add(addresses.ctoken, ICToken::supplyRatePerBlockCall {});

    let result = batch.execute(reader, addresses.multicall, None).await?;
    let block_number = result.block_number();
    let draw_id = result.decode(&draw_id)?;
    let total_balance = Amount::from_raw(result.decode(&balance)?);
    let accounted_balance = Amount::from_raw(result.decode(&accounted)?);
    let eligible_supply = Amount::from_raw(result.decode(&committed)?);
    let open_supply = Amount::from_raw(result.decode(&open)?);
    let supply_rate_per_block = result.decode(&rate)?;

    // getDraw depends on the draw id, so it runs second, pinned to the same block.
    let mut draw_batch = Batch::new();
    let draw = draw_batch.add(pool, IBasePool::getDrawCall { drawId: draw_id });
    let draw_result = draw_batch
        .execute(reader, addresses.multicall, Some(block_number))
        .await?;
    if draw_result.block_number() != block_number {
        return Err(PoolError::decode(
            IBasePool::getDrawCall::SIGNATURE,
            format!(
                "read at block {} but snapshot is at block {block_number}",
                draw_result.block_number()
            ),
        ));
    }
    let draw = draw_result.decode(&draw)?;

    let current_draw_id = u64::try_from(draw_id).map_err(|_| {
        PoolError::decode(
            IBasePool::currentCommittedDrawIdCall::SIGNATURE,
            "draw id overflows u64",
        )
    })?;

    let snapshot = PoolSnapshot {
        block_number,
        current_draw_id,
        total_balance,
        accounted_balance,
        eligible_supply,
        open_supply,
        supply_rate_per_block,
        draw_fee_fraction: draw.feeFraction,
    };
    tracing::debug!(
        block = snapshot.block_number,
        draw = snapshot.current_draw_id,
        balance = %snapshot.total_balance,
        "pool snapshot read"
    );
    Ok(snapshot)
}

pub async fn read_user_balances<R: ChainReader>(
    reader: &R,
    addresses: &ContractAddresses,
    proxy: Address,
) -> Result<UserBalances> {
    let pool = addresses.base_pool;
    let mut batch = Batch::new();
    let dai = batch.add(addresses.dai, IERC20::balanceOfCall { owner: proxy });
    let committed = batch.add(pool, IBasePool::committedBalanceOfCall { user: proxy });
    let open = batch.add(pool, IBasePool::openBalanceOfCall { user: proxy });
    let total = batch.add(pool, IBasePool::totalBalanceOfCall { user: proxy });

    let result = batch.execute(reader, addresses.multicall, None).await?;
    Ok(UserBalances {
        dai_in_proxy: Amount::from_raw(result.decode(&dai)?),
        committed_balance: Amount::from_raw(result.decode(&committed)?),
        open_balance: Amount::from_raw(result.decode(&open)?),
        total_balance: Amount::from_raw(result.decode(&total)?),
    })
}

/// Moves all Dai held by the proxy into the pool.
pub async fn deposit<W: ChainWriter>(writer: &W, proxy: Address) -> Result<TxOutcome> {
    tracing::info!(%proxy, "depositing proxy balance into pool");
    writer
        .send(proxy, IUserPool::depositCall {}.abi_encode().into())
        .await
}

pub async fn withdraw<W: ChainWriter>(
    writer: &W,
    proxy: Address,
    amount: Amount,
    recipient: Address,
) -> Result<TxOutcome> {
    tracing::info!(%proxy, %amount, %recipient, "withdrawing from pool");
    let call = IUserPool::withdrawCall {
        amount: amount.raw(),
        recipient,
    };
    writer.send(proxy, call.abi_encode().into()).await
}
