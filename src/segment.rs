//
// Copyright (c) Memfault, Inc.
// See License.txt for details
//
// Uniform representation of an output segment: a program-header template
// plus its payload bytes. `offset` is left at zero here; the Writer fills it
// in once segment order (and therefore layout) is fixed.
use goblin::elf::program_header::{ProgramHeader, PF_R, PF_W, PF_X, PT_LOAD};

/// Flags shared by every synthesized `PT_LOAD`: `R|W|X`, forced regardless of
/// the underlying data's actual protection, per the reconstruction contract.
const SYNTHETIC_FLAGS: u32 = PF_R | PF_W | PF_X;

#[derive(Debug)]
pub enum Segment {
    /// The original PT_NOTE, copied verbatim from the input core.
    Note { phdr: ProgramHeader, data: Vec<u8> },
    /// The executable's `.dynamic`, materialized as a synthetic PT_LOAD.
    Dynamic { vaddr: u64, data: Vec<u8> },
    /// The linker rendezvous structure.
    RDebug { vaddr: u64, data: Vec<u8> },
    /// One `link_map` node.
    Linkmap { vaddr: u64, data: Vec<u8> },
    /// The NUL-terminated path a `link_map.l_name` points at.
    String { vaddr: u64, data: Vec<u8> },
    /// A slice of a thread's stack, from its (aligned) stack pointer to the
    /// end of the PT_LOAD it was dumped in.
    Stack { vaddr: u64, data: Vec<u8> },
}

impl Segment {
    /// The program header template for this segment, with `p_offset` left
    /// at zero — the Writer assigns it once the final layout is known.
    pub fn program_header(&self) -> ProgramHeader {
        match self {
            Segment::Note { phdr, .. } => phdr.clone(),
            Segment::Dynamic { vaddr, data }
            | Segment::RDebug { vaddr, data }
            | Segment::Linkmap { vaddr, data }
            | Segment::String { vaddr, data }
            | Segment::Stack { vaddr, data } => ProgramHeader {
                p_type: PT_LOAD,
                p_flags: SYNTHETIC_FLAGS,
                p_offset: 0,
                p_vaddr: *vaddr,
                p_paddr: 0,
                p_filesz: data.len() as u64,
                p_memsz: 0,
                p_align: 0,
            },
        }
    }

    pub fn payload(&self) -> &[u8] {
        match self {
            Segment::Note { data, .. }
            | Segment::Dynamic { data, .. }
            | Segment::RDebug { data, .. }
            | Segment::Linkmap { data, .. }
            | Segment::String { data, .. }
            | Segment::Stack { data, .. } => data,
        }
    }
}
