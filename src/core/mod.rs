// Domain-layer modules and shared errors/models
pub mod overdue {
    pub use crate::overdue::*;
}

pub mod charges {
    pub use crate::charges::*;
}

pub mod calls {
    pub use crate::calls::*;
}

pub mod payments {
    pub use crate::payments::*;
}

pub mod models {
    pub use crate::models::*;
}

pub mod errors {
    pub use crate::errors::*;
}
