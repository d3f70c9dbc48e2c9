//! Version control access for working trees

pub mod git;
pub mod process;

pub use git::{GitGateway, VcsResult};
pub use process::{CommandOutput, CommandRunner, CommandSpec, SystemRunner};
