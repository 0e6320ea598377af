//! x86-64 code generation

use std::slice;

use iced_x86::{
    BlockEncoder, BlockEncoderOptions, Decoder, DecoderOptions, FlowControl, IcedError,
    Instruction, InstructionBlock,
};
use thiserror::Error;

use crate::alloc::{self, ExecutableMemory, ProximityError};

/// Length of the absolute jump written over a hooked function's entry
pub const JMP_ABS_LEN: usize = 14;

/// Longest possible x86 instruction
const MAX_INSTR_LEN: usize = 15;

/// Bytes reserved for each trampoline
const TRAMPOLINE_SIZE: usize = 96;

/// Error types for trampoline generation
#[derive(Debug, Error)]
pub enum CodeError {
    /// Error while re-encoding relocated instructions
    #[error("{0}")]
    IcedError(#[from] IcedError),
    /// Bytes at the target do not decode to a valid instruction
    #[error("undecodable instruction at {0:#x}")]
    Undecodable(u64),
    /// Function ends before there is room for the redirect jump
    #[error("function ends after {0} bytes, too small to hook")]
    TooSmall(usize),
    /// Relocated code does not fit in a trampoline slot
    #[error("relocated code needs {0} bytes")]
    TooLarge(usize),
    /// No executable memory close enough to the target
    #[error("{0}")]
    Alloc(#[from] ProximityError),
}

/// Generates an absolute jump (`jmp [rip]` followed by the address) to `target`
pub fn jmp_abs(target: usize) -> [u8; JMP_ABS_LEN] {
    let mut code = [0u8; JMP_ABS_LEN];
    code[..6].copy_from_slice(&[0xff, 0x25, 0x00, 0x00, 0x00, 0x00]);
    code[6..].copy_from_slice(&(target as u64).to_le_bytes());
    code
}

/// Redirect written over `stolen` bytes of a function entry: an absolute jump padded with `int3`
pub fn redirect_patch(destination: usize, stolen: usize) -> Vec<u8> {
    let mut patch = jmp_abs(destination).to_vec();
    patch.resize(stolen.max(JMP_ABS_LEN), 0xCC);
    patch
}

/// Whether execution never falls through past `instruction`
fn ends_flow(instruction: &Instruction) -> bool {
    matches!(
        instruction.flow_control(),
        FlowControl::Return
            | FlowControl::UnconditionalBranch
            | FlowControl::IndirectBranch
            | FlowControl::Interrupt
    )
}

/// Relocated copy of a function's first instructions followed by a jump back into the function.
///
/// Calling the trampoline behaves like calling the function before it was patched.
pub struct Trampoline {
    /// Executable memory holding the code
    memory: ExecutableMemory,
    /// Number of bytes taken from the start of the target
    stolen: usize,
    /// Number of bytes of code emitted
    len: usize,
}

impl Trampoline {
    /// Builds a trampoline for the function at `target`.
    ///
    /// Whole instructions are taken until at least [`JMP_ABS_LEN`] bytes are covered, so the
    /// redirect never splits an instruction.
    ///
    /// # Safety
    ///
    /// `target` must be readable for `JMP_ABS_LEN + 14` bytes and point at the start of an instruction
    pub unsafe fn build(target: *const u8) -> Result<Self, CodeError> {
        let origin = target as u64;
        let code = slice::from_raw_parts(target, JMP_ABS_LEN + MAX_INSTR_LEN - 1);
        let mut decoder = Decoder::with_ip(64, code, origin, DecoderOptions::NONE);

        let mut instructions = Vec::new();
        let mut stolen = 0usize;
        while stolen < JMP_ABS_LEN {
            let instruction = decoder.decode();
            if instruction.is_invalid() {
                return Err(CodeError::Undecodable(origin + stolen as u64));
            }
            stolen += instruction.len();
            instructions.push(instruction);
            if stolen < JMP_ABS_LEN && ends_flow(&instruction) {
                return Err(CodeError::TooSmall(stolen));
            }
        }

        let mut memory = alloc::allocate_executable(target as usize, TRAMPOLINE_SIZE)?;

        // re-encode at the trampoline's address so RIP-relative operands still reach their data
        let block = InstructionBlock::new(&instructions, memory.address() as u64);
        let relocated = BlockEncoder::encode(64, block, BlockEncoderOptions::NONE)?.code_buffer;
        let back = jmp_abs(target as usize + stolen);

        let len = relocated.len() + back.len();
        if len > memory.len() {
            return Err(CodeError::TooLarge(len));
        }
        memory[..relocated.len()].copy_from_slice(&relocated);
        memory[relocated.len()..len].copy_from_slice(&back);

        Ok(Self {
            memory,
            stolen,
            len,
        })
    }

    /// Entry point of the relocated code
    pub fn address(&self) -> usize {
        self.memory.address()
    }

    /// Number of bytes of the target covered by the relocated instructions
    pub fn stolen_len(&self) -> usize {
        self.stolen
    }

    /// Emitted code
    pub fn code(&self) -> &[u8] {
        &self.memory[..self.len]
    }
}
