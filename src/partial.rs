//! Fragmented-message admission state.
//!
//! Tracks whether a fragmented message is currently open on the connection
//! and which endpoint handle opened it. Evaluated under the admission lock,
//! before a request is queued:
//!
//! ```text
//! Closed --(fragment, is_last=false)--> Open{opcode, owner}
//! Open   --(matching fragment)-------> Open
//! Open   --(fragment, is_last=true)--> Closed
//! ```
//!
//! While `Open`, full-message admissions and fragments from other handles
//! are rejected with a protocol violation; the open message is unaffected.
//! Control frames never consult this state.

use crate::error::{Result, SendError};
use crate::protocol::OpCode;

/// Per-connection fragmentation state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartialMessageState {
    /// No fragmented message open.
    Closed,
    /// A fragmented message is open: only its continuations (from the
    /// handle that opened it) and control frames may be admitted.
    Open {
        /// Opcode declared by the initiating fragment.
        opcode: OpCode,
        /// Endpoint handle that opened the message.
        owner: u64,
    },
}

impl PartialMessageState {
    /// Whether a fragmented message is open.
    #[inline]
    pub fn is_open(&self) -> bool {
        matches!(self, PartialMessageState::Open { .. })
    }

    /// Check that a full (non-fragment) message may be admitted.
    pub fn check_full_message(&self) -> Result<()> {
        match self {
            PartialMessageState::Closed => Ok(()),
            PartialMessageState::Open { opcode, .. } => Err(SendError::Protocol(format!(
                "Cannot send a full message while a fragmented {:?} message is open",
                opcode
            ))),
        }
    }

    /// Admit one explicit fragment and advance the state machine.
    ///
    /// `opcode` is the message type the caller is sending (`Text` or
    /// `Binary`), `owner` identifies the endpoint handle. Returns `true`
    /// if this fragment initiates a new message (and must carry the data
    /// opcode on the wire) or `false` for a continuation.
    pub fn admit_fragment(&mut self, opcode: OpCode, owner: u64, is_last: bool) -> Result<bool> {
        debug_assert!(matches!(opcode, OpCode::Text | OpCode::Binary));

        match *self {
            PartialMessageState::Closed => {
                if !is_last {
                    *self = PartialMessageState::Open { opcode, owner };
                }
                Ok(true)
            }
            PartialMessageState::Open {
                opcode: open_opcode,
                owner: open_owner,
            } => {
                if owner != open_owner {
                    return Err(SendError::Protocol(format!(
                        "Fragmented {:?} message is owned by another endpoint handle",
                        open_opcode
                    )));
                }
                if opcode != open_opcode {
                    return Err(SendError::Protocol(format!(
                        "Fragment type {:?} does not match open {:?} message",
                        opcode, open_opcode
                    )));
                }
                if is_last {
                    *self = PartialMessageState::Closed;
                }
                Ok(false)
            }
        }
    }
}

impl Default for PartialMessageState {
    fn default() -> Self {
        PartialMessageState::Closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_message_while_closed() {
        let state = PartialMessageState::Closed;
        assert!(state.check_full_message().is_ok());
    }

    #[test]
    fn test_single_fragment_message_stays_closed() {
        let mut state = PartialMessageState::Closed;
        let is_first = state.admit_fragment(OpCode::Text, 1, true).unwrap();
        assert!(is_first);
        assert!(!state.is_open());
    }

    #[test]
    fn test_open_close_cycle() {
        let mut state = PartialMessageState::Closed;

        assert!(state.admit_fragment(OpCode::Text, 1, false).unwrap());
        assert!(state.is_open());

        // Continuations from the same handle.
        assert!(!state.admit_fragment(OpCode::Text, 1, false).unwrap());
        assert!(state.is_open());

        assert!(!state.admit_fragment(OpCode::Text, 1, true).unwrap());
        assert!(!state.is_open());
    }

    #[test]
    fn test_full_message_rejected_while_open() {
        let mut state = PartialMessageState::Closed;
        state.admit_fragment(OpCode::Binary, 1, false).unwrap();

        assert!(matches!(
            state.check_full_message(),
            Err(SendError::Protocol(_))
        ));

        // The open message is unaffected and can still complete.
        assert!(!state.admit_fragment(OpCode::Binary, 1, true).unwrap());
        assert!(state.check_full_message().is_ok());
    }

    #[test]
    fn test_other_owner_rejected() {
        let mut state = PartialMessageState::Closed;
        state.admit_fragment(OpCode::Text, 1, false).unwrap();

        assert!(matches!(
            state.admit_fragment(OpCode::Text, 2, false),
            Err(SendError::Protocol(_))
        ));

        // Still open for the owner.
        assert!(state.is_open());
        assert!(!state.admit_fragment(OpCode::Text, 1, true).unwrap());
    }

    #[test]
    fn test_type_mismatch_rejected() {
        let mut state = PartialMessageState::Closed;
        state.admit_fragment(OpCode::Text, 1, false).unwrap();

        assert!(matches!(
            state.admit_fragment(OpCode::Binary, 1, true),
            Err(SendError::Protocol(_))
        ));
        assert!(state.is_open());
    }

    #[test]
    fn test_zero_length_final_fragment_closes() {
        let mut state = PartialMessageState::Closed;
        state.admit_fragment(OpCode::Text, 1, false).unwrap();
        state.admit_fragment(OpCode::Text, 1, true).unwrap();
        assert_eq!(state, PartialMessageState::Closed);
    }
}
