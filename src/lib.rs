pub mod acl;
pub mod config;
pub mod cursor;
pub mod engine;
pub mod errors;
pub mod expressions;
pub mod logger;
pub mod memo;
pub mod pather;
pub mod platform;
pub mod utils;
pub mod value;

pub use acl::{AccessContext, Principal};
pub use config::EngineConfig;
pub use cursor::SharedCursor;
pub use engine::{Engine, EngineBuilder};
pub use errors::{ExprError, Result};
pub use expressions::{Definition, RuntimeKind};
pub use value::Value;

/// Initializes the expression engine's logging.
///
/// Hosts that configure `log4rs` themselves can skip this.
pub fn init() -> std::result::Result<(), Box<dyn std::error::Error>> {
    logger::init()?;
    Ok(())
}
