//! Network-wide constants for the Blackhole chain.
//!
//! Every node must agree on these values; the genesis block hash is a pure
//! function of them.

/// Symbol of the native coin.
pub const BHX_SYMBOL: &str = "BHX";

/// Display name of the native coin.
pub const BHX_NAME: &str = "Blackhole";

/// Decimal places of the native coin.
pub const BHX_DECIMALS: u8 = 8;

/// Native coins minted to the treasury when the chain is created.
pub const INITIAL_SUPPLY: u64 = 1_000_000_000;

/// Reward credited to the block producer, paid out of the treasury.
pub const BLOCK_REWARD: u64 = 10;

/// Synthetic sender of reward and other privileged transactions.
pub const SYSTEM_ADDRESS: &str = "system";

/// Synthetic custody account holding all currently staked coins.
pub const STAKING_CONTRACT: &str = "staking_contract";

/// Synthetic account receiving slashed coins; anything here is out of
/// effective supply.
pub const BURN_ADDRESS: &str = "burn_address";

/// Producer of the genesis block.
pub const GENESIS_VALIDATOR: &str = "genesis-validator";

/// Stake assigned to the genesis validator at chain creation.
pub const GENESIS_STAKE: u64 = 1000;

/// Fixed genesis timestamp, identical on every node.
pub const GENESIS_TIMESTAMP: &str = "2024-01-01T00:00:00Z";

/// Maximum clock skew tolerated when validating a block timestamp.
pub const MAX_TIMESTAMP_SKEW_SECS: i64 = 120;
