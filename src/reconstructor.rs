//
// Copyright (c) Memfault, Inc.
// See License.txt for details
//
// Orchestrates the pointer-chase pipeline: NOTE -> auxv -> executable's
// program headers -> PT_DYNAMIC -> DT_DEBUG -> r_debug -> link_map chain ->
// name strings, plus the sibling walk over PRSTATUS notes to thread stacks.
// Each stage either succeeds and appends segments, or fails and aborts the
// whole reconstruction; there are no partial outputs.
use goblin::elf::dynamic::DT_DEBUG;
use goblin::elf::header::{Header, ET_DYN};
use goblin::elf::program_header::ProgramHeader;
use log::{debug, warn};

use crate::auxv::{AT_PHDR, AT_PHENT, AT_PHNUM};
use crate::core_file::CoreFile;
use crate::error::{CoreError, Result};
use crate::segment::Segment;

const LIBPTHREAD_MARKER: &str = "/libpthread.so";

pub struct Reconstructor<'a> {
    core: &'a CoreFile,
    note_phdr: Option<ProgramHeader>,
    note_bytes: Option<&'a [u8]>,
    dynamic_vaddr: Option<u64>,
    rdebug_r_map: Option<u64>,
    segments: Vec<Segment>,
}

impl<'a> Reconstructor<'a> {
    pub fn new(core: &'a CoreFile) -> Self {
        Self {
            core,
            note_phdr: None,
            note_bytes: None,
            dynamic_vaddr: None,
            rdebug_r_map: None,
            segments: Vec::new(),
        }
    }

    /// Runs the full pipeline in canonical order and produces the output
    /// header and segment list.
    pub fn run(mut self) -> Result<(Header, Vec<Segment>)> {
        self.read_note()?;
        self.read_dynamic()?;
        self.read_rdebug()?;
        self.read_linkmaps()?;
        self.read_stacks()?;
        self.result()
    }

    fn read_note(&mut self) -> Result<()> {
        debug!("Reading core notes");
        let note_phdr = self
            .core
            .find_note_phdr()
            .ok_or_else(|| CoreError::MalformedElf("no PT_NOTE segment".into()))?
            .clone();
        let note_bytes = self.core.note_data(&note_phdr);

        self.segments.push(Segment::Note {
            phdr: note_phdr.clone(),
            data: note_bytes.to_vec(),
        });
        self.note_phdr = Some(note_phdr);
        self.note_bytes = Some(note_bytes);
        Ok(())
    }

    fn read_dynamic(&mut self) -> Result<()> {
        debug!("Reading dynamic section");
        let note_phdr = self.note_phdr.as_ref().expect("read_note must run first");
        let note_bytes = self.note_bytes.expect("read_note must run first");

        let auxv_bytes = self
            .core
            .auxv_data(note_phdr, note_bytes)
            .ok_or_else(|| CoreError::MalformedElf("no NT_AUXV note".into()))?;

        let at_phdr = self.require_auxv(auxv_bytes, AT_PHDR)?;
        let at_phnum = self.require_auxv(auxv_bytes, AT_PHNUM)?;
        let at_phent = self.require_auxv(auxv_bytes, AT_PHENT)?;

        let phdr_bytes = self
            .core
            .exec_phdr_data(at_phdr, at_phnum, at_phent)
            .ok_or_else(|| CoreError::MalformedElf("executable phdr table not dumped".into()))?;
        let exec_phdrs = self.core.parse_phdr_table(phdr_bytes);

        let dynamic_phdr = CoreFile::find_dynamic_phdr(&exec_phdrs)
            .ok_or_else(|| CoreError::MalformedElf("no PT_DYNAMIC in executable".into()))?;

        let bias = if self.core.ehdr().e_type == ET_DYN {
            self.core.phdr_bias(&exec_phdrs, at_phdr).unwrap_or(0)
        } else {
            0
        };
        let dynamic_vaddr = dynamic_phdr.p_vaddr + bias;
        debug!("Dynamic section at vaddr {:#x} (bias {:#x})", dynamic_vaddr, bias);

        let dyn_data = self
            .core
            .read_bytes(dynamic_vaddr, dynamic_phdr.p_filesz as usize)
            .ok_or_else(|| CoreError::MalformedElf("dynamic section not dumped".into()))?;

        self.dynamic_vaddr = Some(dynamic_vaddr);
        self.segments.push(Segment::Dynamic {
            vaddr: dynamic_vaddr,
            data: dyn_data.to_vec(),
        });
        Ok(())
    }

    fn require_auxv(&self, auxv_bytes: &[u8], key: u64) -> Result<u64> {
        self.core
            .find_auxv(auxv_bytes, key)
            .ok_or_else(|| CoreError::MalformedElf(format!("missing auxv entry {key}")))
    }

    fn read_rdebug(&mut self) -> Result<()> {
        debug!("Reading rdebug structure");
        let dynamic_vaddr = self.dynamic_vaddr.expect("read_dynamic must run first");
        let dyn_data = self
            .segments
            .iter()
            .find_map(|s| match s {
                Segment::Dynamic { data, .. } => Some(data.as_slice()),
                _ => None,
            })
            .expect("dynamic segment recorded in read_dynamic");

        let d_debug = self
            .core
            .find_dyn(dyn_data, DT_DEBUG)
            .ok_or_else(|| CoreError::MalformedElf("no DT_DEBUG entry".into()))?;

        let (rdebug, rdebug_bytes) = self
            .core
            .read_rdebug(d_debug.d_val)
            .ok_or_else(|| CoreError::MalformedElf("r_debug struct not dumped".into()))?;

        self.rdebug_r_map = Some(rdebug.r_map);
        self.segments.push(Segment::RDebug {
            vaddr: d_debug.d_val,
            data: rdebug_bytes.to_vec(),
        });
        let _ = dynamic_vaddr;
        Ok(())
    }

    fn read_linkmaps(&mut self) -> Result<()> {
        debug!("Reading linkmap");
        let mut vaddr = self.rdebug_r_map.expect("read_rdebug must run first");
        let mut pending = Vec::new();

        while vaddr != 0 {
            let (link_map, link_map_bytes) = self
                .core
                .read_linkmap(vaddr)
                .ok_or_else(|| CoreError::MalformedElf(format!("link_map at {vaddr:#x} not dumped")))?;

            pending.push(Segment::Linkmap {
                vaddr,
                data: link_map_bytes.to_vec(),
            });

            let mut name = self.core.read_cstring(link_map.l_name).ok_or_else(|| {
                CoreError::MalformedElf(format!(
                    "link_map name string at {:#x} has no NUL terminator within the scanned window",
                    link_map.l_name
                ))
            })?;
            apply_libpthread_rename(&mut name);
            pending.push(Segment::String {
                vaddr: link_map.l_name,
                data: name,
            });

            vaddr = link_map.l_next;
        }

        self.segments.extend(pending);
        Ok(())
    }

    fn read_stacks(&mut self) -> Result<()> {
        debug!("Reading stacks");
        let note_bytes = self.note_bytes.expect("read_note must run first");
        let mut pos = 0;

        while let Some((new_pos, prs)) = self.core.next_prstatus(note_bytes, pos) {
            pos = new_pos;
            match self.core.stack_data(&prs) {
                Ok(Some((vaddr_aligned, data))) => {
                    self.segments.push(Segment::Stack {
                        vaddr: vaddr_aligned,
                        data,
                    });
                }
                Ok(None) => {
                    warn!("Stack pointer for thread {} not contained in any PT_LOAD", prs.pid);
                    return Err(CoreError::MalformedElf(format!(
                        "stack for thread {} not found",
                        prs.pid
                    )));
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    fn result(self) -> Result<(Header, Vec<Segment>)> {
        let input = self.core.ehdr();
        let ehsize = Header::size(self.core.ctx()) as u16;
        let header = Header {
            e_ident: input.e_ident,
            e_type: input.e_type,
            e_machine: input.e_machine,
            e_version: input.e_version,
            e_entry: input.e_entry,
            e_phoff: ehsize as u64,
            e_shoff: input.e_shoff,
            e_flags: input.e_flags,
            e_ehsize: input.e_ehsize,
            e_phentsize: input.e_phentsize,
            e_phnum: self.segments.len() as u16,
            e_shentsize: input.e_shentsize,
            e_shnum: input.e_shnum,
            e_shstrndx: input.e_shstrndx,
        };
        Ok((header, self.segments))
    }
}

/// Mutates `libpthread.so.N` -> `libathread.so.N` in-place, to defeat a
/// specific loader/debugger's resolution of that object. Undocumented
/// upstream; preserved bit-exactly. See DESIGN.md.
fn apply_libpthread_rename(name: &mut [u8]) {
    if find_subslice(name, LIBPTHREAD_MARKER.as_bytes()).is_none() {
        return;
    }
    let Some(slash_pos) = name.iter().rposition(|&b| b == b'/') else {
        return;
    };
    let basename_byte3 = slash_pos + 1 + 3;
    if basename_byte3 < name.len() {
        name[basename_byte3] = b'a';
    }
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_libpthread_rename() {
        let mut name = b"/lib/x86_64-linux-gnu/libpthread.so.0\0".to_vec();
        apply_libpthread_rename(&mut name);
        assert_eq!(&name[..], b"/lib/x86_64-linux-gnu/libathread.so.0\0");
    }

    #[test]
    fn test_non_libpthread_name_untouched() {
        let mut name = b"/lib/x86_64-linux-gnu/libc.so.6\0".to_vec();
        let original = name.clone();
        apply_libpthread_rename(&mut name);
        assert_eq!(name, original);
    }

    #[test]
    fn test_libpthread_rename_searches_for_final_slash_in_whole_name() {
        // A `/` appears after the "libpthread.so" match itself; the final `/`
        // in the whole name is at index 16, not the one inside the match.
        let mut name = b"/a/libpthread.so/b\0".to_vec();
        let original = name.clone();
        apply_libpthread_rename(&mut name);
        // The resulting basename ("b\0") is too short for byte index 3, so no
        // write happens at all.
        assert_eq!(name, original);
    }

    #[test]
    fn test_libpthread_rename_idempotent() {
        let mut name = b"/lib/libpthread.so.0\0".to_vec();
        apply_libpthread_rename(&mut name);
        let once = name.clone();
        apply_libpthread_rename(&mut name);
        assert_eq!(name, once);
    }
}
