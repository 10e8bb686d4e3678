use crate::{
    Result,
    connection::{
        ChainReader,
        ChainWriter,
        TxOutcome,
    },
    multicall::decode_returns,
    pool_types::IUserPoolFactory,
};
use alloy::{
    primitives::Address,
    sol_types::SolCall,
};
use serde::Serialize;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
pub struct ProxyBinding {
    pub owner: Address,
    /// `None` until the factory has deployed the owner's proxy.
    pub proxy: Option<Address>,
    pub logic: Address,
}

impl ProxyBinding {
    pub fn is_deployed(&self) -> bool {
        self.proxy.is_some()
    }
}

/// Looks up `owner`'s proxy. A missing proxy is `Ok(None)`, not an error.
pub async fn resolve_proxy<R: ChainReader>(
    reader: &R,
    factory: Address,
    owner: Address,
) -> Result<Option<Address>> {
    let data = IUserPoolFactory::getContractCall { user: owner }.abi_encode();
    let raw = reader.call(factory, data.into(), None).await?;
    let proxy = decode_returns::<IUserPoolFactory::getContractCall>(&raw)?;
    if proxy.is_zero() {
        tracing::info!(%owner, "no proxy deployed yet");
        Ok(None)
    } else {
        tracing::info!(%owner, %proxy, "proxy resolved");
        Ok(Some(proxy))
    }
}

pub async fn resolve_binding<R: ChainReader>(
    reader: &R,
    factory: Address,
    owner: Address,
    logic: Address,
) -> Result<ProxyBinding> {
    let proxy = resolve_proxy(reader, factory, owner).await?;
    Ok(ProxyBinding {
        owner,
        proxy,
        logic,
    })
}

/// Asks the factory to deploy a proxy for the signer, cloning `logic`.
pub async fn create_proxy<W: ChainWriter>(
    writer: &W,
    factory: Address,
    logic: Address,
) -> Result<TxOutcome> {
    tracing::info!(owner = %writer.sender(), %factory, %logic, "creating proxy");
    let data = IUserPoolFactory::createContractCall { logic }.abi_encode();
    writer.send(factory, data.into()).await
}
