use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Invalid signature")]
    InvalidSignature,

    #[error("Invalid secret key")]
    InvalidSecretKey,

    #[error("Invalid recovery id")]
    InvalidRecoveryId,

    #[error("Invalid validator id")]
    InvalidValidatorId,

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Hex decode error: {0}")]
    HexDecode(#[from] hex::FromHexError),
}
