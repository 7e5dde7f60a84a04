//
// Copyright (c) Memfault, Inc.
// See License.txt for details
//
// Random-access reader over an input ELF core: resolves virtual addresses to
// file offsets and exposes the class-aware ELF/program-header/note/dyn/auxv
// primitives the reconstruction pipeline chases pointers through.
use std::fs;
use std::path::Path;

use goblin::container::Ctx;
use goblin::elf::dynamic::Dyn;
use goblin::elf::header::Header;
use goblin::elf::program_header::{ProgramHeader, PT_DYNAMIC, PT_NOTE, PT_PHDR};
use scroll::Pread;

use crate::arch;
use crate::auxv::Auxv;
use crate::error::{CoreError, Result};
use crate::note::{self, NoteEntry, NoteIter, PrStatus};
use crate::r_debug::{LinkMap, RDebug};

/// Maximum bytes scanned when truncating a C string at its NUL terminator.
const MAX_CSTRING_LEN: usize = 4096;

pub struct CoreFile {
    data: Vec<u8>,
    ehdr: Header,
    ctx: Ctx,
    phdrs: Vec<ProgramHeader>,
}

impl CoreFile {
    pub fn open(path: &Path) -> Result<Self> {
        let data = fs::read(path)?;
        let ehdr: Header = data.pread_with(0, scroll::LE).map_err(|_| CoreError::NotElf)?;
        let container = ehdr.container().map_err(|_| CoreError::NotElf)?;
        let endianness = ehdr.endianness().map_err(|_| CoreError::NotElf)?;
        let ctx = Ctx::new(container, endianness);

        let phdrs = ProgramHeader::parse(&data, ehdr.e_phoff as usize, ehdr.e_phnum as usize, ctx)
            .map_err(|e| CoreError::MalformedElf(format!("program headers: {e}")))?;

        Ok(Self {
            data,
            ehdr,
            ctx,
            phdrs,
        })
    }

    pub fn ehdr(&self) -> &Header {
        &self.ehdr
    }

    pub fn ctx(&self) -> Ctx {
        self.ctx
    }

    pub fn find_note_phdr(&self) -> Option<&ProgramHeader> {
        self.phdrs.iter().find(|ph| ph.p_type == PT_NOTE)
    }

    pub fn note_data(&self, phdr: &ProgramHeader) -> &[u8] {
        &self.data[phdr.file_range()]
    }

    pub fn iter_notes<'a>(&self, note_bytes: &'a [u8]) -> NoteIter<'a> {
        NoteIter::new(note_bytes)
    }

    pub fn auxv_data<'a>(
        &'a self,
        note_phdr: &ProgramHeader,
        note_bytes: &'a [u8],
    ) -> Option<&'a [u8]> {
        self.find_note(note_bytes, note::NT_AUXV).map(|entry| {
            let start = note_phdr.p_offset as usize + entry.desc_offset;
            &self.data[start..start + entry.desc.len()]
        })
    }

    fn find_note<'a>(&self, note_bytes: &'a [u8], n_type: u32) -> Option<NoteEntry<'a>> {
        self.iter_notes(note_bytes).find(|e| e.n_type == n_type)
    }

    pub fn find_auxv(&self, auxv_bytes: &[u8], key: u64) -> Option<u64> {
        Auxv::new(auxv_bytes, self.ctx).find_value(key)
    }

    pub fn find_phdr_containing(&self, vaddr: u64) -> Option<&ProgramHeader> {
        self.phdrs
            .iter()
            .find(|ph| vaddr >= ph.p_vaddr && vaddr < ph.p_vaddr + ph.p_filesz)
    }

    pub fn vaddr_to_offset(&self, vaddr: u64) -> Option<usize> {
        let phdr = self.find_phdr_containing(vaddr)?;
        Some((phdr.p_offset + (vaddr - phdr.p_vaddr)) as usize)
    }

    pub fn dyn_data(&self, phdr: &ProgramHeader) -> Option<&[u8]> {
        let offset = self.vaddr_to_offset(phdr.p_vaddr)?;
        self.data.get(offset..offset + phdr.p_filesz as usize)
    }

    pub fn find_dyn(&self, data: &[u8], tag: u64) -> Option<Dyn> {
        let mut offset = 0;
        while let Ok(entry) = data.gread_with::<Dyn>(&mut offset, self.ctx) {
            if entry.d_tag == tag {
                return Some(entry);
            }
        }
        None
    }

    pub fn exec_phdr_data(&self, phdr_vaddr: u64, phnum: u64, phentsize: u64) -> Option<&[u8]> {
        let offset = self.vaddr_to_offset(phdr_vaddr)?;
        let len = (phnum * phentsize) as usize;
        self.data.get(offset..offset + len)
    }

    /// Parses a raw program header table (e.g. the executable's, read out of
    /// the core's address space), dispatched over this core's cached ELF
    /// class. This is the class-dispatch point the specification calls out:
    /// the class comes from `self.ctx`, cached at `open()` time from the
    /// input's own `EI_CLASS` byte, never from the host's pointer width.
    pub fn parse_phdr_table(&self, phdr_bytes: &[u8]) -> Vec<ProgramHeader> {
        let entry_size = ProgramHeader::size(self.ctx);
        let count = phdr_bytes.len() / entry_size;
        ProgramHeader::parse(phdr_bytes, 0, count, self.ctx).unwrap_or_default()
    }

    /// Finds a program header of the given type within the executable's own
    /// in-memory program header table.
    pub fn find_exec_phdr(&self, phdr_bytes: &[u8], wanted_type: u32) -> Option<ProgramHeader> {
        self.parse_phdr_table(phdr_bytes)
            .into_iter()
            .find(|ph| ph.p_type == wanted_type)
    }

    /// Reads a NUL-terminated string at `vaddr`. An unresolved `vaddr` (not
    /// backed by any dumped PT_LOAD, e.g. a vdso entry) is not an error: it
    /// yields the single-NUL-byte sentinel. But if `vaddr` does resolve and no
    /// NUL terminator turns up within the scanned window, that's a malformed
    /// string and reading fails outright, matching `getString`'s behavior of
    /// discarding the buffer and reporting failure in that case.
    pub fn read_cstring(&self, vaddr: u64) -> Option<Vec<u8>> {
        let Some(offset) = self.vaddr_to_offset(vaddr) else {
            return Some(vec![0]);
        };
        let end = (offset + MAX_CSTRING_LEN).min(self.data.len());
        let slice = self.data.get(offset..end)?;
        let nul = slice.iter().position(|&b| b == 0)?;
        Some(slice[..=nul].to_vec())
    }

    pub fn read_bytes(&self, vaddr: u64, len: usize) -> Option<&[u8]> {
        let offset = self.vaddr_to_offset(vaddr)?;
        self.data.get(offset..offset + len)
    }

    pub fn read_rdebug(&self, vaddr: u64) -> Option<(RDebug, &[u8])> {
        let bytes = self.read_bytes(vaddr, RDebug::size(self.ctx))?;
        let rdebug = RDebug::parse(bytes, self.ctx).ok()?;
        Some((rdebug, bytes))
    }

    pub fn read_linkmap(&self, vaddr: u64) -> Option<(LinkMap, &[u8])> {
        let bytes = self.read_bytes(vaddr, LinkMap::size(self.ctx))?;
        let link_map = LinkMap::parse(bytes, self.ctx).ok()?;
        Some((link_map, bytes))
    }

    pub fn next_prstatus<'a>(
        &self,
        note_bytes: &'a [u8],
        pos: usize,
    ) -> Option<(usize, PrStatus<'a>)> {
        note::next_prstatus(note_bytes, pos)
    }

    /// Extracts the aligned stack slice around a thread's stack pointer, as
    /// recorded in the PT_LOAD that was actually dumped for it.
    pub fn stack_data(&self, prs: &PrStatus) -> Result<Option<(u64, Vec<u8>)>> {
        let sp = arch::stack_pointer(self.ehdr.e_machine, prs.reg)?;

        let Some(phdr) = self.find_phdr_containing(sp) else {
            return Ok(None);
        };
        let align = if phdr.p_align == 0 { 1 } else { phdr.p_align };
        let vaddr_aligned = (sp / align) * align;
        let end = phdr.p_vaddr + phdr.p_filesz;
        if vaddr_aligned >= end {
            return Ok(None);
        }
        let Some(offset) = self.vaddr_to_offset(vaddr_aligned) else {
            return Ok(None);
        };
        let len = (end - vaddr_aligned) as usize;
        Ok(self.data.get(offset..offset + len).map(|b| (vaddr_aligned, b.to_vec())))
    }

    /// Is the dynamic phdr's PT_PHDR the same vaddr the executable's auxv
    /// advertises? If not, the executable is a PIE and the dynamic segment's
    /// recorded vaddr is unbiased.
    pub fn phdr_bias(&self, exec_phdrs: &[ProgramHeader], at_phdr: u64) -> Option<u64> {
        let phdr_header = exec_phdrs.iter().find(|ph| ph.p_type == PT_PHDR)?;
        if phdr_header.p_vaddr == at_phdr {
            return Some(0);
        }
        let load = self.find_phdr_containing(at_phdr)?;
        Some(load.p_vaddr)
    }

    pub fn find_dynamic_phdr(exec_phdrs: &[ProgramHeader]) -> Option<&ProgramHeader> {
        exec_phdrs.iter().find(|ph| ph.p_type == PT_DYNAMIC)
    }
}
