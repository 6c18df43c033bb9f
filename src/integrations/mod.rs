//! External service integrations.

pub mod gateway_client {
    pub use crate::gateway_client::*;
}

pub mod telephony_client {
    pub use crate::telephony_client::*;
}

pub mod calendar {
    pub use crate::calendar::*;
}
