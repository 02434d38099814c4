pub mod error;
pub mod types;
pub mod value;

pub use error::PlayerError;
pub use types::*;
pub use value::*;
