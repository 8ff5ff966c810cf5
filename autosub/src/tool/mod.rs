//! External engine tools such as the staging store cleaner and the table re-add utility.

mod base;
mod shell;

pub use base::{
    SPAWN_FAILED_EXIT_CODE, Substitutions, TOKEN_BOOKMARK, TOKEN_SOURCE, TOKEN_SUB, TOKEN_TABLE,
    ToolOutput, ToolRunner, prepare_command, split_arguments, substitute,
};
pub use shell::ShellToolRunner;
