//! Errors raised by the runner itself, as opposed to by hooks

#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    #[error("an entry file is required")]
    MissingEntry,

    #[error("handler {handler} dropped its completion callback without calling it")]
    CallbackDropped { handler: String },

    #[error("queued task panicked: {0}")]
    TaskPanicked(String),
}
