//
// Copyright (c) Memfault, Inc.
// See License.txt for details
//
// Unlike the host-process introspection this pattern is usually used for,
// this tool analyzes cores from arbitrary, possibly foreign architectures, so
// register layout must be picked by the core's own `e_machine`, not by
// `target_arch`.
use goblin::elf::header::{EM_AARCH64, EM_X86_64};

use crate::error::{CoreError, Result};

/// Extracts the stack pointer register from an NT_PRSTATUS descriptor's
/// register block, given the machine type recorded in the core's ELF header.
pub fn stack_pointer(e_machine: u16, pr_reg: &[u8]) -> Result<u64> {
    match e_machine {
        EM_X86_64 => {
            // `rsp` is the 20th u64 (index 19) of the x86_64 user_regs_struct.
            read_u64_at(pr_reg, 19 * 8)
        }
        EM_AARCH64 => {
            // `sp` is the 32nd u64 (index 31) of aarch64's user_regs_struct.
            read_u64_at(pr_reg, 31 * 8)
        }
        other => Err(CoreError::UnsupportedArch(other)),
    }
}

fn read_u64_at(buf: &[u8], offset: usize) -> Result<u64> {
    let end = offset + 8;
    if buf.len() < end {
        return Err(CoreError::MalformedElf(
            "register block too short for stack pointer".into(),
        ));
    }
    Ok(u64::from_le_bytes(buf[offset..end].try_into().unwrap()))
}
