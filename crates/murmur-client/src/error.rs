use thiserror::Error;

use murmur_api::ApiError;
use murmur_crypto::CryptoError;
use murmur_gateway::GatewayError;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("no conversation is open")]
    NoActivePeer,

    #[error("not connected to the chat server")]
    NotConnected,

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error(transparent)]
    Gateway(#[from] GatewayError),
}
