pub mod codec;
pub mod firestore;
pub mod token;

pub use firestore::*;
pub use token::*;
