pub mod openai_provider;
pub mod shaper;

pub use openai_provider::*;
pub use shaper::*;
