//! Drives a library's incremental decoder over a [`DecodeBuffer`].
//!
//! Input is handed over in small windows and output is pushed as soon as it
//! is produced, so the overlap arena sees the same read/write interleaving a
//! real in-place decoder would.

use xpak_core::{CodecError, DecodeBuffer};

const INPUT_WINDOW: usize = 4 * 1024;
const OUTPUT_WINDOW: usize = 16 * 1024;

#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct Step {
    pub consumed: usize,
    pub produced: usize,
    /// The decoder saw the logical end of its stream.
    pub finished: bool,
}

pub(crate) trait StreamDecoder {
    fn step(&mut self, input: &[u8], output: &mut [u8]) -> Result<Step, CodecError>;
}

pub(crate) fn drive(decoder: &mut dyn StreamDecoder, io: &mut dyn DecodeBuffer) -> Result<(), CodecError> {
    let mut input = Vec::with_capacity(INPUT_WINDOW);
    let mut output = vec![0u8; OUTPUT_WINDOW];

    loop {
        input.clear();
        input.extend_from_slice(io.input_window(INPUT_WINDOW));
        let room = io.output_room().min(OUTPUT_WINDOW);

        let step = if room == 0 {
            // Out of room: the stream may still need input to reach its end
            // marker, but any further output is an overrun.
            let mut probe = [0u8; 1];
            let step = decoder.step(&input, &mut probe)?;
            if step.produced > 0 {
                return Err(CodecError::OutputOverrun);
            }
            io.consume(step.consumed);
            step
        } else {
            let step = decoder.step(&input, &mut output[..room])?;
            io.consume(step.consumed);
            io.push_slice(&output[..step.produced])?;
            step
        };

        if step.finished {
            return Ok(());
        }
        if step.consumed == 0 && step.produced == 0 {
            return Err(if input.is_empty() {
                CodecError::InputOverrun
            } else {
                CodecError::Error
            });
        }
    }
}
