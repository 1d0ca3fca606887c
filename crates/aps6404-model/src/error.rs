//! Protocol violations detected by the model.

use picovision_hal::PsramProgram;

/// Something the host did that the real hardware would not tolerate.
///
/// The model records these instead of failing the call, so a test can run a
/// whole scenario and then assert that [`crate::SimBoard::errors`] is empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ModelError {
    #[error("burst of {len} bytes at {addr:#08x} crosses a page boundary at {clock_hz} Hz")]
    PageCrossing { addr: u32, len: u32, clock_hz: u32 },

    #[error("transfer command {command:#04x} sent to chip {chip} outside QPI mode")]
    NotInQpiMode { chip: u8, command: u8 },

    #[error("command {command:#04x} does not match entry point {entry}")]
    CommandMismatch { command: u8, entry: u8 },

    #[error("jump to {pc} is not an entry point of the program at {offset}")]
    BadEntryPoint { pc: u32, offset: u8 },

    #[error("{program:?} started at {offset} but not loaded there")]
    ProgramNotLoaded { program: PsramProgram, offset: u8 },

    #[error("{program:?} does not fit in PIO{block} instruction memory")]
    ProgramDoesNotFit { program: PsramProgram, block: usize },

    #[error("word pushed while the state machine is disabled")]
    StateMachineDisabled,

    #[error("data channel started as a write without being configured for writes")]
    ChannelNotConfigured,

    #[error("waited on a read that still expects {remaining} words")]
    TransferStalled { remaining: u32 },

    #[error("control register {reg:#04x} not acknowledged")]
    Nak { reg: u8 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errors_are_plain_values() {
        let err = ModelError::ProgramNotLoaded {
            program: PsramProgram::QpiFast,
            offset: 8,
        };
        let recorded = err;
        assert_eq!(err, recorded);
        assert_eq!(recorded.to_string(), "QpiFast started at 8 but not loaded there");
    }
}
