//
// Copyright (c) Memfault, Inc.
// See License.txt for details
//
// Two-pass streaming ELF writer: the program header table's offsets depend
// on payload sizes that aren't known until every segment is in hand, so the
// header is written first assuming `e_phnum` from the segment count, then
// the phdr table is written with offsets computed in one pass over the
// segments, then the payloads themselves follow in the same order. No
// `Seek` is required; the output offset is tracked manually, matching
// `CoreWriterImpl`.
use std::io::Write;

use goblin::container::Ctx;
use goblin::elf::header::Header;
use goblin::elf::program_header::ProgramHeader;
use scroll::ctx::IntoCtx;
use scroll::Pwrite;

use crate::error::{CoreError, Result};
use crate::segment::Segment;

pub struct Writer<W: Write> {
    ehdr: Header,
    ctx: Ctx,
    segments: Vec<Segment>,
    output: W,
    output_offset: usize,
}

impl<W: Write> Writer<W> {
    pub fn new(ehdr: Header, ctx: Ctx, segments: Vec<Segment>, output: W) -> Self {
        Self {
            ehdr,
            ctx,
            segments,
            output,
            output_offset: 0,
        }
    }

    pub fn write(mut self) -> Result<()> {
        self.write_elf_header()?;
        self.write_phdr_table()?;
        self.write_payloads()
    }

    fn write_elf_header(&mut self) -> Result<()> {
        let ehsize = Header::size(self.ctx);
        let mut bytes = vec![0u8; ehsize];
        self.ehdr.into_ctx(&mut bytes, self.ctx);
        self.write_all(&bytes)
    }

    /// Computes each segment's final `p_offset` and writes the phdr table. A
    /// pure running sum: header + phdr table, then each segment's `filesz`
    /// in order. The writer never seeks and never pads between segments.
    fn write_phdr_table(&mut self) -> Result<()> {
        let phentsize = ProgramHeader::size(self.ctx);
        let mut offset = self.output_offset + phentsize * self.segments.len();

        let mut phdrs = Vec::with_capacity(self.segments.len());
        for segment in &self.segments {
            let mut phdr = segment.program_header();
            phdr.p_offset = offset as u64;
            offset += phdr.p_filesz as usize;
            phdrs.push(phdr);
        }

        for phdr in &phdrs {
            let mut bytes = vec![0u8; phentsize];
            bytes
                .pwrite_with(phdr.clone(), 0, self.ctx)
                .map_err(|e| CoreError::MalformedElf(format!("program header: {e}")))?;
            self.write_all(&bytes)?;
        }
        Ok(())
    }

    fn write_payloads(&mut self) -> Result<()> {
        for segment in &self.segments {
            write_bytes(&mut self.output, &mut self.output_offset, segment.payload())?;
        }
        Ok(())
    }

    fn write_all(&mut self, bytes: &[u8]) -> Result<()> {
        write_bytes(&mut self.output, &mut self.output_offset, bytes)
    }
}

fn write_bytes<W: Write>(output: &mut W, output_offset: &mut usize, bytes: &[u8]) -> Result<()> {
    output.write_all(bytes).map_err(|e| {
        if e.kind() == std::io::ErrorKind::WriteZero || e.kind() == std::io::ErrorKind::BrokenPipe
        {
            CoreError::OutputClosed
        } else {
            CoreError::Io(e)
        }
    })?;
    *output_offset += bytes.len();
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use goblin::container::Container;
    use goblin::elf::header::{EI_CLASS, ELFCLASS64, EM_X86_64, ET_CORE};
    use goblin::elf::program_header::PT_NOTE;
    use scroll::ctx::TryFromCtx;

    fn test_ctx() -> Ctx {
        Ctx::new(Container::Big, scroll::LE)
    }

    fn test_header(ctx: Ctx, phnum: u16) -> Header {
        let mut e_ident = [0u8; 16];
        e_ident[0..4].copy_from_slice(&[0x7f, b'E', b'L', b'F']);
        e_ident[EI_CLASS] = ELFCLASS64;
        e_ident[5] = 1;
        Header {
            e_ident,
            e_type: ET_CORE,
            e_machine: EM_X86_64,
            e_version: 1,
            e_entry: 0,
            e_phoff: Header::size(ctx) as u64,
            e_shoff: 0,
            e_flags: 0,
            e_ehsize: Header::size(ctx) as u16,
            e_phentsize: ProgramHeader::size(ctx) as u16,
            e_phnum: phnum,
            e_shentsize: 0,
            e_shnum: 0,
            e_shstrndx: 0,
        }
    }

    #[test]
    fn test_writes_header_and_single_segment() {
        let ctx = test_ctx();
        let segments = vec![Segment::Note {
            phdr: ProgramHeader {
                p_type: PT_NOTE,
                p_align: 0,
                p_filesz: 37,
                ..Default::default()
            },
            data: vec![0xa5; 37],
        }];

        let mut output = Vec::new();
        let writer = Writer::new(test_header(ctx, 1), ctx, segments, &mut output);
        writer.write().unwrap();

        let ehsize = Header::size(ctx);
        let (hdr, _) = Header::try_from_ctx(&output, scroll::LE).unwrap();
        assert_eq!(hdr.e_phnum, 1);

        let phentsize = ProgramHeader::size(ctx);
        let phdr = ProgramHeader::parse(&output, ehsize, 1, ctx).unwrap();
        let phdr = &phdr[0];
        assert_eq!(phdr.p_offset as usize, ehsize + phentsize);
        assert_eq!(phdr.p_filesz, 37);

        let payload = &output[phdr.p_offset as usize..phdr.p_offset as usize + 37];
        assert_eq!(payload, &[0xa5u8; 37][..]);
    }

    #[test]
    fn test_multiple_segments_are_contiguous_without_alignment() {
        let ctx = test_ctx();
        let segments = vec![
            Segment::Dynamic {
                vaddr: 0x1000,
                data: vec![1; 16],
            },
            Segment::RDebug {
                vaddr: 0x2000,
                data: vec![2; 24],
            },
        ];

        let mut output = Vec::new();
        let writer = Writer::new(test_header(ctx, 2), ctx, segments, &mut output);
        writer.write().unwrap();

        let ehsize = Header::size(ctx);
        let phentsize = ProgramHeader::size(ctx);
        let phdrs = ProgramHeader::parse(&output, ehsize, 2, ctx).unwrap();

        assert_eq!(phdrs[0].p_offset as usize, ehsize + 2 * phentsize);
        assert_eq!(phdrs[1].p_offset as usize, phdrs[0].p_offset as usize + 16);
    }
}
