use crate::estimate::{
    Cadence,
    DrawingSchedule,
};
use alloy::primitives::Address;
use chrono::{
    DateTime,
    Utc,
};
use color_eyre::eyre::{
    Result,
    WrapErr,
    eyre,
};
use serde::Deserialize;
use std::{
    collections::BTreeMap,
    fmt,
    fs,
    path::{
        Path,
        PathBuf,
    },
    str::FromStr,
};

pub const DEFAULT_ADDRESS_BOOK: &str = "addresses.json";
pub const DEFAULT_MAINNET_RPC_URL: &str = "https://cloudflare-eth.com";
pub const DEFAULT_KOVAN_RPC_URL: &str = "https://kovan.poa.network";
pub const DEFAULT_LOCAL_RPC_URL: &str = "http://localhost:8545";

const MULTICALL: &str = "Multicall";
const BASE_POOL: &str = "BasePool";
const DAI: &str = "Dai";
const CTOKEN: &str = "CToken";
const FACTORY: &str = "UserPoolFactory";
const USER_POOL_LOGIC: &str = "UserPoolLogic";

#[derive(Clone, Copy, Debug, Eq, PartialEq, clap::ValueEnum)]
pub enum Network {
    Mainnet,
    Kovan,
    Local,
}

impl Network {
    /// Key of this network in the address book.
    pub fn key(self) -> &'static str {
        match self {
            Network::Mainnet => "mainnet",
            Network::Kovan => "kovan",
            Network::Local => "local",
        }
    }

    pub fn default_rpc_url(self) -> &'static str {
        match self {
            Network::Mainnet => DEFAULT_MAINNET_RPC_URL,
            Network::Kovan => DEFAULT_KOVAN_RPC_URL,
            Network::Local => DEFAULT_LOCAL_RPC_URL,
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Network::Mainnet => "Mainnet",
            Network::Kovan => "Kovan",
            Network::Local => "Local",
        };
        write!(f, "{name}")
    }
}

/// Deployed addresses of every contract the client needs on one network.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ContractAddresses {
    pub multicall: Address,
    pub base_pool: Address,
    pub dai: Address,
    pub ctoken: Address,
    pub factory: Address,
    pub user_pool_logic: Address,
}

/// Read-only view of `addresses.json`: network -> contract name -> address.
#[derive(Debug)]
pub struct AddressBook {
    path: PathBuf,
    entries: BTreeMap<String, BTreeMap<String, String>>,
}

impl AddressBook {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = fs::read(path)
            .wrap_err_with(|| format!("Failed to read address book at {}", path.display()))?;
        Self::from_slice(path, &data)
    }

    pub fn from_slice(path: impl Into<PathBuf>, data: &[u8]) -> Result<Self> {
        let path = path.into();
        let entries = serde_json::from_slice(data).wrap_err_with(|| {
            format!("Failed to parse address book JSON at {}", path.display())
        })?;
        Ok(Self { path, entries })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn networks(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn resolve(&self, network: Network) -> Result<ContractAddresses> {
        let contracts = self.entries.get(network.key()).ok_or_else(|| {
            eyre!(
                "Address book {} has no entry for {network}",
                self.path.display()
            )
        })?;
        let lookup = |name: &str| -> Result<Address> {
            let raw = contracts.get(name).ok_or_else(|| {
                eyre!("Address book has no `{name}` address for {network}")
            })?;
            Address::from_str(raw.trim())
                .wrap_err_with(|| format!("Invalid `{name}` address for {network}: {raw}"))
        };
        Ok(ContractAddresses {
            multicall: lookup(MULTICALL)?,
            base_pool: lookup(BASE_POOL)?,
            dai: lookup(DAI)?,
            ctoken: lookup(CTOKEN)?,
            factory: lookup(FACTORY)?,
            user_pool_logic: lookup(USER_POOL_LOGIC)?,
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ScheduleFile {
    Dates {
        dates: Vec<DateTime<Utc>>,
    },
    Recurring {
        cadence: Cadence,
        first: DateTime<Utc>,
        count: usize,
    },
}

/// Loads a drawing schedule, either an explicit list of RFC 3339 dates or a
/// recurring cadence.
pub fn load_schedule(path: impl AsRef<Path>) -> Result<DrawingSchedule> {
    let path = path.as_ref();
    let data = fs::read(path)
        .wrap_err_with(|| format!("Failed to read drawing schedule at {}", path.display()))?;
    let file: ScheduleFile = serde_json::from_slice(&data)
        .wrap_err("Failed to parse drawing schedule JSON")?;
    let schedule = match file {
        ScheduleFile::Dates { dates } => DrawingSchedule::new(dates),
        ScheduleFile::Recurring {
            cadence,
            first,
            count,
        } => DrawingSchedule::recurring(first, cadence, count),
    };
    if schedule.is_empty() {
        return Err(eyre!("Drawing schedule at {} is empty", path.display()));
    }
    Ok(schedule)
}
