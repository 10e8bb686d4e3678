//! Identity provider seam and the encrypted-keystore provider.

use crate::{
    PoolError,
    Result,
    connection::SessionTransport,
    wallets::{
        self,
        WalletDescriptor,
    },
};
use alloy::{
    primitives::Address,
    signers::local::PrivateKeySigner,
};
use std::{
    path::PathBuf,
    sync::{
        OnceLock,
        RwLock,
    },
};
use url::Url;

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SessionMetadata {
    pub email: Option<String>,
    pub public_address: Address,
}

pub trait IdentityProvider {
    /// Loads provider assets. Runs once per provider; later calls are no-ops.
    fn preload(&self) -> Result<()>;

    fn is_logged_in(&self) -> impl Future<Output = Result<bool>>;

    fn metadata(&self) -> impl Future<Output = Result<SessionMetadata>>;

    /// Transport for the active session, `None` when logged out.
    fn transport(&self) -> Option<SessionTransport>;
}

/// Session backed by an encrypted JSON keystore on local disk.
///
/// The keystore directory is indexed by the first successful `preload`;
/// wallets added to it afterwards are not seen by this provider.
pub struct KeystoreIdentity {
    dir: PathBuf,
    index: OnceLock<Vec<WalletDescriptor>>,
    wallet: Option<String>,
    email: Option<String>,
    rpc_url: Url,
    signer: RwLock<Option<PrivateKeySigner>>,
}

impl KeystoreIdentity {
    pub fn new(dir: PathBuf, wallet: Option<String>, email: Option<String>, rpc_url: Url) -> Self {
        Self {
            dir,
            index: OnceLock::new(),
            wallet,
            email,
            rpc_url,
            signer: RwLock::new(None),
        }
    }

    pub fn wallet_name(&self) -> Option<&str> {
        self.wallet.as_deref()
    }

    /// Keystores found by `preload`, empty before it has run.
    pub fn wallets(&self) -> &[WalletDescriptor] {
        self.index.get().map(Vec::as_slice).unwrap_or_default()
    }

    fn index_keystores(&self) -> Result<&[WalletDescriptor]> {
        if let Some(index) = self.index.get() {
            return Ok(index.as_slice());
        }
        let wallets = wallets::list_wallets(&self.dir)
            .map_err(|e| PoolError::AuthUnavailable(format!("{e:#}")))?;
        tracing::debug!(dir = %self.dir.display(), count = wallets.len(), "indexed keystores");
        Ok(self.index.get_or_init(|| wallets).as_slice())
    }

    fn descriptor(&self) -> Result<WalletDescriptor> {
        let name = self
            .wallet
            .as_deref()
            .ok_or_else(|| PoolError::AuthUnavailable("no wallet selected".to_string()))?;
        let index = self.index_keystores()?;
        wallets::find_wallet(index, name).cloned().ok_or_else(|| {
            PoolError::AuthUnavailable(format!(
                "Wallet '{name}' not found in {}",
                self.dir.display()
            ))
        })
    }

    /// Prompts for the keystore password and starts a session.
    pub fn login(&self) -> Result<Address> {
        let descriptor = self.descriptor()?;
        let signer = wallets::unlock_wallet(&descriptor)
            .map_err(|e| PoolError::AuthUnavailable(format!("{e:#}")))?;
        Ok(self.login_with_signer(signer))
    }

    pub fn login_with_password(&self, password: &str) -> Result<Address> {
        let descriptor = self.descriptor()?;
        let signer = wallets::unlock_with_password(&descriptor, password)
            .map_err(|e| PoolError::AuthUnavailable(format!("{e:#}")))?;
        Ok(self.login_with_signer(signer))
    }

    pub fn login_with_signer(&self, signer: PrivateKeySigner) -> Address {
        let address = signer.address();
        *self.signer.write().unwrap_or_else(|e| e.into_inner()) = Some(signer);
        tracing::info!(%address, "session started");
        address
    }

    pub fn logout(&self) {
        *self.signer.write().unwrap_or_else(|e| e.into_inner()) = None;
        tracing::info!("session ended");
    }

    fn current_signer(&self) -> Option<PrivateKeySigner> {
        self.signer
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl IdentityProvider for KeystoreIdentity {
    fn preload(&self) -> Result<()> {
        self.index_keystores().map(|_| ())
    }

    async fn is_logged_in(&self) -> Result<bool> {
        self.preload()?;
        Ok(self.current_signer().is_some())
    }

    async fn metadata(&self) -> Result<SessionMetadata> {
        let signer = self
            .current_signer()
            .ok_or_else(|| PoolError::AuthUnavailable("no active session".to_string()))?;
        Ok(SessionMetadata {
            email: self.email.clone(),
            public_address: signer.address(),
        })
    }

    fn transport(&self) -> Option<SessionTransport> {
        self.current_signer().map(|signer| SessionTransport {
            rpc_url: self.rpc_url.clone(),
            signer,
        })
    }
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;
    use std::{
        fs,
        path::Path,
    };
    use tempdir::TempDir;

    // Hardhat account #0
    const TEST_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

    fn identity(dir: &Path) -> KeystoreIdentity {
        KeystoreIdentity::new(
            dir.to_path_buf(),
            Some("alice".to_string()),
            Some("alice@example.com".to_string()),
            "http://localhost:8545".parse().unwrap(),
        )
    }

    #[tokio::test]
    async fn is_logged_in__false_until_a_signer_is_unlocked() {
        // given
        let dir = TempDir::new("identity").unwrap();
        let identity = identity(dir.path());

        // when
        let before = identity.is_logged_in().await.unwrap();
        let address = identity.login_with_signer(TEST_KEY.parse().unwrap());
        let after = identity.is_logged_in().await.unwrap();

        // then
        assert!(!before);
        assert!(after);
        let metadata = identity.metadata().await.unwrap();
        assert_eq!(metadata.public_address, address);
        assert_eq!(metadata.email.as_deref(), Some("alice@example.com"));
    }

    #[tokio::test]
    async fn metadata__without_session_is_auth_unavailable() {
        let dir = TempDir::new("identity").unwrap();
        let identity = identity(dir.path());

        let err = identity.metadata().await.unwrap_err();

        assert!(matches!(err, PoolError::AuthUnavailable(_)));
        assert!(identity.transport().is_none());
    }

    #[test]
    fn logout__drops_the_transport() {
        let dir = TempDir::new("identity").unwrap();
        let identity = identity(dir.path());
        identity.login_with_signer(TEST_KEY.parse().unwrap());
        assert!(identity.transport().is_some());

        identity.logout();

        assert!(identity.transport().is_none());
    }

    #[test]
    fn login_with_password__unknown_wallet_is_auth_unavailable() {
        let dir = TempDir::new("identity").unwrap();
        let identity = identity(dir.path());

        let err = identity.login_with_password("pw").unwrap_err();

        assert!(matches!(err, PoolError::AuthUnavailable(_)));
    }

    #[test]
    fn preload__is_idempotent() {
        let dir = TempDir::new("identity").unwrap();
        let identity = identity(dir.path());

        identity.preload().unwrap();
        let first = identity.wallets().as_ptr();
        identity.preload().unwrap();

        assert_eq!(identity.wallets().as_ptr(), first);
    }

    #[test]
    fn login_with_password__resolves_the_wallet_from_the_preloaded_index() {
        // given
        let dir = TempDir::new("identity").unwrap();
        fs::write(dir.path().join("alice.json"), "{}").unwrap();
        let identity = identity(dir.path());
        identity.preload().unwrap();

        // when
        let err = identity.login_with_password("pw").unwrap_err();

        // then
        assert_eq!(identity.wallets().len(), 1);
        assert!(err.to_string().contains("Invalid password"), "got {err}");
    }

    #[test]
    fn login_with_password__ignores_wallets_added_after_preload() {
        // given
        let dir = TempDir::new("identity").unwrap();
        let identity = identity(dir.path());
        identity.preload().unwrap();
        fs::write(dir.path().join("alice.json"), "{}").unwrap();

        // when
        let err = identity.login_with_password("pw").unwrap_err();

        // then
        assert!(identity.wallets().is_empty());
        assert!(err.to_string().contains("not found"), "got {err}");
    }
}
