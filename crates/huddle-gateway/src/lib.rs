pub mod connection;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod moderation;
pub mod session;

pub use dispatcher::Dispatcher;
pub use engine::{Engine, Joined, Policy};
pub use error::EngineError;
pub use moderation::{Moderation, Verdict};
pub use session::{Delivery, JoinFilter, LiveFeed, Session, SessionState};
