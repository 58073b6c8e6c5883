pub mod provider;
pub mod types;

pub use provider::TextGenerator;
pub use types::*;
