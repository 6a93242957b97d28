use crate::errors::AppResult;

/// The editing surface the core drives without knowing its internals.
/// Implementations live outside this crate; the core stores one boxed
/// instance per session.
pub trait EditorCapability: Send + Sync {
    fn get_content(&self, id: &str) -> AppResult<String>;
    fn set_content(&self, id: &str, content: &str) -> AppResult<()>;
    fn focus(&self, id: &str) -> AppResult<()>;
    /// Formatting and navigation commands, passed through verbatim.
    fn exec_command(&self, id: &str, command: &str) -> AppResult<()>;
}
