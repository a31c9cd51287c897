//! Keystone Core - Core types, cryptography, and serialization
//!
//! This crate provides the foundational types and utilities for the Keystone
//! permissioned blockchain: hashing, recoverable signatures, validator
//! identities, and block structures.

pub mod crypto;
pub mod error;
pub mod serialize;
pub mod types;

pub use crypto::{hash_blake3, sign_digest, Hash, NodeKey, Seal, ValidatorId};
pub use error::CoreError;
pub use types::*;
