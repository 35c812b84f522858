use thiserror::Error;

use murmur_api::ApiError;
use murmur_crypto::CryptoError;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("transport closed")]
    TransportClosed,

    #[error("could not connect: {0}")]
    Connect(String),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Api(#[from] ApiError),
}
