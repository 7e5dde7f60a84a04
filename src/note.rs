//
// Copyright (c) Memfault, Inc.
// See License.txt for details
//
// ELF note iteration, per the Linux core-dump convention: each entry is an
// Nhdr32 header (namesz/descsz/type, always 4-byte fields regardless of ELF
// class) followed by the name and description, each individually padded up
// to a 4-byte boundary.
use goblin::elf::note::Nhdr32 as Nhdr;
use scroll::Pread;

use crate::util::align_up;

pub const NT_AUXV: u32 = 6;
pub const NT_PRSTATUS: u32 = 1;

/// Byte offset of the register block (`pr_reg`) within an `NT_PRSTATUS`
/// descriptor on a 64-bit Linux target. `elf_prstatus` is laid out
/// identically up to this point for every 64-bit architecture we support:
/// `pr_info`(12) + `pr_cursig`(2) + pad(2) + `pr_sigpend`(8) + `pr_sighold`(8)
/// + 4 pid_t fields(16) + 4 timevals(64) = 112.
const PRSTATUS_REG_OFFSET: usize = 112;
/// Byte offset of `pr_pid` within the same descriptor, used only for logging.
const PRSTATUS_PID_OFFSET: usize = 32;

/// One parsed note entry, borrowing from the note segment's raw bytes.
pub struct NoteEntry<'a> {
    pub n_type: u32,
    pub name: &'a [u8],
    pub desc: &'a [u8],
    /// Offset of `desc` within the buffer the iterator was built from.
    pub desc_offset: usize,
}

/// Restartable iterator over the notes in a PT_NOTE segment's raw bytes.
pub struct NoteIter<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> NoteIter<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn at(data: &'a [u8], pos: usize) -> Self {
        Self { data, pos }
    }

    /// Cursor position after the most recently yielded entry.
    pub fn pos(&self) -> usize {
        self.pos
    }
}

impl<'a> Iterator for NoteIter<'a> {
    type Item = NoteEntry<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let header: Nhdr = self.data.gread(&mut self.pos).ok()?;

        let name_len = header.n_namesz as usize;
        let name = self.data.get(self.pos..self.pos + name_len)?;
        self.pos += align_up(name_len, 4);

        let desc_offset = self.pos;
        let desc_len = header.n_descsz as usize;
        let desc = self.data.get(desc_offset..desc_offset + desc_len)?;
        self.pos += align_up(desc_len, 4);

        Some(NoteEntry {
            n_type: header.n_type,
            name,
            desc,
            desc_offset,
        })
    }
}

/// A thread's register state, borrowed from an `NT_PRSTATUS` descriptor.
pub struct PrStatus<'a> {
    pub pid: u32,
    pub reg: &'a [u8],
}

impl<'a> TryFrom<&'a [u8]> for PrStatus<'a> {
    type Error = ();

    fn try_from(desc: &'a [u8]) -> Result<Self, Self::Error> {
        if desc.len() <= PRSTATUS_REG_OFFSET {
            return Err(());
        }
        let pid = desc.pread_with::<u32>(PRSTATUS_PID_OFFSET, scroll::LE).map_err(|_| ())?;
        Ok(PrStatus {
            pid,
            reg: &desc[PRSTATUS_REG_OFFSET..],
        })
    }
}

/// Advances through notes starting at `pos`, returning the next `NT_PRSTATUS`
/// entry and the cursor position to resume from, or `None` once notes are
/// exhausted.
pub fn next_prstatus(note_bytes: &[u8], pos: usize) -> Option<(usize, PrStatus<'_>)> {
    let mut iter = NoteIter::at(note_bytes, pos);
    for entry in &mut iter {
        if entry.n_type == NT_PRSTATUS {
            let prs = PrStatus::try_from(entry.desc).ok()?;
            return Some((iter.pos(), prs));
        }
    }
    None
}

#[cfg(test)]
mod test {
    use super::*;
    use scroll::Pwrite;

    fn build_note(name: &[u8], note_type: u32, desc: &[u8]) -> Vec<u8> {
        let mut namesz = name.len();
        if namesz > 0 {
            namesz += 1;
        }
        let header = Nhdr {
            n_namesz: namesz as u32,
            n_descsz: desc.len() as u32,
            n_type: note_type,
        };
        let mut buf = vec![0u8; 12 + align_up(namesz, 4) + align_up(desc.len(), 4)];
        buf.pwrite(header, 0).unwrap();
        buf[12..12 + name.len()].copy_from_slice(name);
        let desc_off = 12 + align_up(namesz, 4);
        buf[desc_off..desc_off + desc.len()].copy_from_slice(desc);
        buf
    }

    #[test]
    fn test_iter_single_note() {
        let buf = build_note(b"CORE", NT_AUXV, &[1, 2, 3, 4]);
        let entries: Vec<_> = NoteIter::new(&buf).collect();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].n_type, NT_AUXV);
        assert_eq!(entries[0].desc, &[1, 2, 3, 4]);
    }

    #[test]
    fn test_iter_multiple_notes() {
        let mut buf = build_note(b"CORE", NT_AUXV, &[0u8; 16]);
        buf.extend(build_note(b"CORE", NT_PRSTATUS, &[0u8; 8]));
        let types: Vec<_> = NoteIter::new(&buf).map(|e| e.n_type).collect();
        assert_eq!(types, vec![NT_AUXV, NT_PRSTATUS]);
    }

    #[test]
    fn test_next_prstatus_resumes() {
        let mut desc1 = vec![0u8; PRSTATUS_REG_OFFSET + 8];
        desc1.pwrite_with(111u32, PRSTATUS_PID_OFFSET, scroll::LE).unwrap();
        let mut desc2 = vec![0u8; PRSTATUS_REG_OFFSET + 8];
        desc2.pwrite_with(222u32, PRSTATUS_PID_OFFSET, scroll::LE).unwrap();

        let mut buf = build_note(b"CORE", NT_PRSTATUS, &desc1);
        buf.extend(build_note(b"CORE", NT_PRSTATUS, &desc2));

        let (pos, prs) = next_prstatus(&buf, 0).unwrap();
        assert_eq!(prs.pid, 111);
        let (_, prs2) = next_prstatus(&buf, pos).unwrap();
        assert_eq!(prs2.pid, 222);
    }

    #[test]
    fn test_next_prstatus_none_when_exhausted() {
        let buf = build_note(b"CORE", NT_AUXV, &[0u8; 16]);
        assert!(next_prstatus(&buf, 0).is_none());
    }
}
