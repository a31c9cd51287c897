pub mod hash;
pub mod keys;
pub mod seal;

pub use hash::{hash_blake3, Hash};
pub use keys::{NodeKey, ValidatorId};
pub use seal::{sign_digest, Seal};
