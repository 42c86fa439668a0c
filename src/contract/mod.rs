pub mod builder;
pub mod model;
pub mod provider;
pub mod types;

pub use builder::build;
pub use model::*;
pub use provider::*;
pub use types::*;
