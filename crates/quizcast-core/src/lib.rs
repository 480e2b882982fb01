//! # Quizcast Core
//! Configuration, error taxonomy, and the shared data model used by the
//! scheduler and the binary.

pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use config::{QuizcastConfig, ScheduleSnapshot};
pub use error::{QuizcastError, Result};
pub use traits::Transport;
pub use types::*;
