//! Command-line tokenization.

use crate::KernelError;
use arrayvec::ArrayVec;

/// Maximum number of tokens in a command line.
pub const MAX_ARGS: usize = 32;

/// A parsed command line: the executable name followed by its arguments.
///
/// The vector owns its tokens, so it can outlive the buffer the command
/// arrived in — the launcher hands it across the parent/child boundary
/// and the child reads it until the load handoff completes.
pub struct ArgVector {
    tokens: ArrayVec<Box<str>, MAX_ARGS>,
}

impl ArgVector {
    /// Split `cmd` on spaces. Runs of spaces count as one separator.
    ///
    /// Fails on an empty (or all-separator) command and on more than
    /// [`MAX_ARGS`] tokens.
    pub fn parse(cmd: &str) -> Result<ArgVector, KernelError> {
        let mut tokens = ArrayVec::new();
        for token in cmd.split(' ').filter(|t| !t.is_empty()) {
            tokens
                .try_push(token.into())
                .map_err(|_| KernelError::InvalidArgument)?;
        }
        if tokens.is_empty() {
            return Err(KernelError::InvalidArgument);
        }
        Ok(Self { tokens })
    }

    /// The executable name: the first token.
    pub fn file_name(&self) -> &str {
        &self.tokens[0]
    }

    /// Number of tokens.
    pub fn argc(&self) -> usize {
        self.tokens.len()
    }

    /// The tokens in order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.tokens.iter().map(|t| &**t)
    }
}
