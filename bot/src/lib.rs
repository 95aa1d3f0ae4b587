pub mod dispatcher;
pub mod error;
pub mod handlers;
pub mod logging;
pub mod settings;
pub mod telegram;

pub use dispatcher::Dispatcher;
pub use error::{BotError, BotResult};
pub use handlers::{Handler, PipelineProcessor, Processed, Processor};
pub use settings::Settings;
