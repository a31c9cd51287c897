pub mod block;

pub use block::{Block, BlockHeader, GenesisConfig, SealedBlock};
