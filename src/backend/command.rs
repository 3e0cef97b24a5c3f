//! Backend command line.

use std::fmt;

use crate::error::BridgeError;

/// An argv split from a shell-syntax command string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandSpec {
    /// Split `command` with POSIX shell quoting rules.
    pub fn parse(command: &str) -> Result<Self, BridgeError> {
        let mut argv = shlex::split(command)
            .ok_or_else(|| BridgeError::Command(format!("unbalanced quoting in {:?}", command)))?
            .into_iter();

        let program = argv
            .next()
            .ok_or_else(|| BridgeError::Command("backend command is empty".to_string()))?;

        Ok(Self {
            program,
            args: argv.collect(),
        })
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}
