//! The monitoring engine: health checks, incidents, healing and scoring.

mod checker;
mod healer;
mod incidents;
mod score;

pub use checker::*;
pub use healer::*;
pub use incidents::*;
pub use score::*;
