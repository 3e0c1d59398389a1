pub mod dispatcher;
pub mod handlers;
pub mod publishers;
pub mod registry;
pub mod user_events;

pub use dispatcher::*;
pub use handlers::*;
pub use publishers::*;
pub use registry::*;
pub use user_events::*;
