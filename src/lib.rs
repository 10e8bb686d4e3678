pub mod amount;
pub mod client;
pub mod connection;
pub mod deployment;
pub mod error;
pub mod estimate;
pub mod identity;
pub mod multicall;
pub mod pool;
pub mod proxy;
pub mod store;
pub mod wallets;

#[cfg(any(test, feature = "test-helpers"))]
pub mod test_helpers;

pub use error::PoolError;

pub type Result<T, E = PoolError> = std::result::Result<T, E>;

/// Solidity interfaces of every contract the client talks to.
pub mod pool_types {
    use alloy::sol;

    sol! {
        /// PoolTogether v2 base pool.
        interface IBasePool {
            function currentCommittedDrawId() external view returns (uint256);
            function balance() external view returns (uint256);
            function accountedBalance() external view returns (uint256);
            function committedSupply() external view returns (uint256);
            function openSupply() external view returns (uint256);
            function getDraw(uint256 drawId) external view returns (
                uint256 feeFraction,
                address feeBeneficiary,
                uint256 openedBlock,
                bytes32 secretHash,
                bytes32 entropy,
                address winner,
                uint256 netWinnings,
                uint256 fee
            );
            function committedBalanceOf(address user) external view returns (uint256);
            function openBalanceOf(address user) external view returns (uint256);
            function totalBalanceOf(address user) external view returns (uint256);
        }

        /// Deploys and tracks one `UserPool` proxy per user.
        interface IUserPoolFactory {
            function getContract(address user) external view returns (address);
            function createContract(address logic) external;
        }

        /// Per-user proxy holding the user's pooled Dai.
        interface IUserPool {
            function deposit() external;
            function withdraw(uint256 amount, address recipient) external;
        }

        interface IMulticall {
            struct Call {
                address target;
                bytes callData;
            }

            function aggregate(Call[] calls) external returns (uint256 blockNumber, bytes[] returnData);
        }

        /// Compound cToken backing the pool.
        interface ICToken {
            function supplyRatePerBlock() external view returns (uint256);
        }

        interface IERC20 {
            function balanceOf(address owner) external view returns (uint256);
        }
    }
}
