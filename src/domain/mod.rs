pub mod address;
pub mod dead_letter;
pub mod envelope;
pub mod events;
pub mod processed_message;
pub mod user;

pub use address::*;
pub use dead_letter::*;
pub use envelope::*;
pub use events::*;
pub use processed_message::*;
pub use user::*;
