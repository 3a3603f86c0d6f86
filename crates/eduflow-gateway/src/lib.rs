pub mod bus;
pub mod call;
pub mod chat;
pub mod connection;
pub mod dispatcher;
pub mod identity;
pub mod presence;
pub mod translator;

use thiserror::Error;

use crate::identity::AuthError;

/// Why a socket was refused at connect time. Each variant maps to a
/// distinct WebSocket close code.
#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("{0}")]
    Unauthenticated(#[from] AuthError),

    #[error("Invalid room id")]
    InvalidRoom,

    #[error("Not a member of this room")]
    NotMember,

    #[error("Storage unavailable: {0}")]
    Storage(String),
}

impl ConnectError {
    pub fn close_code(&self) -> u16 {
        match self {
            Self::Unauthenticated(_) => 4001,
            Self::NotMember => 4003,
            Self::InvalidRoom => 4004,
            Self::Storage(_) => 1011,
        }
    }
}
