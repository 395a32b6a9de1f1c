pub mod enums;
pub mod message;
pub mod profile;

pub use enums::*;
pub use message::*;
pub use profile::*;
