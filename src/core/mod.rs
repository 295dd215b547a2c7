// Domain-layer modules and shared errors/models
pub mod plafond {
    pub use crate::plafond::*;
}

pub mod targets {
    pub use crate::targets::*;
}

pub mod reporting {
    pub use crate::reporting::*;
}

pub mod assignment {
    pub use crate::assignment::*;
}

pub mod intake {
    pub use crate::intake::*;
}

pub mod models {
    pub use crate::models::*;
}
