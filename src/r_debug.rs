//
// Copyright (c) Memfault, Inc.
// See License.txt for details
//
// The r_debug / link_map rendezvous structures from glibc's elf/link.h:
// https://sourceware.org/git/?p=glibc.git;a=blob;f=elf/link.h
//
// Field widths depend on the core's ELF class, not the host's, so these are
// parsed through a `goblin::container::Ctx` the same way goblin parses `Dyn`.
use goblin::container::{Container, Ctx};
use scroll::Pread;

/// The r_debug C structure, widened to a common 64-bit representation.
#[derive(Debug, Clone, Copy, Default)]
pub struct RDebug {
    pub version: u32,
    pub r_map: u64,
    pub r_brk: u64,
    pub r_state: u32,
    pub r_ldbase: u64,
}

/// The link_map C structure, widened to a common 64-bit representation.
#[derive(Debug, Clone, Copy, Default)]
pub struct LinkMap {
    pub l_addr: u64,
    /// Pointer to the NUL-terminated path string.
    pub l_name: u64,
    pub l_ld: u64,
    /// Pointer to the next link_map node, or 0 at the end of the list.
    pub l_next: u64,
    pub l_prev: u64,
}

fn read_word(bytes: &[u8], offset: &mut usize, ctx: Ctx) -> Result<u64, scroll::Error> {
    match ctx.container {
        Container::Little => bytes.gread_with::<u32>(offset, ctx.le).map(u64::from),
        Container::Big => bytes.gread_with::<u64>(offset, ctx.le),
    }
}

impl RDebug {
    pub fn parse(bytes: &[u8], ctx: Ctx) -> Result<Self, scroll::Error> {
        let offset = &mut 0;
        // version is always a 32-bit int, followed by a pointer-sized r_map.
        let version = bytes.gread_with::<u32>(offset, ctx.le)?;
        // The r_map field is pointer-aligned; on 64-bit targets the compiler
        // inserts 4 bytes of padding after `version` to align it.
        if ctx.container == Container::Big {
            *offset += 4;
        }
        let r_map = read_word(bytes, offset, ctx)?;
        let r_brk = read_word(bytes, offset, ctx)?;
        let r_state = bytes.gread_with::<u32>(offset, ctx.le)?;
        if ctx.container == Container::Big {
            *offset += 4;
        }
        let r_ldbase = read_word(bytes, offset, ctx)?;
        Ok(RDebug {
            version,
            r_map,
            r_brk,
            r_state,
            r_ldbase,
        })
    }

    pub fn size(ctx: Ctx) -> usize {
        match ctx.container {
            // version, r_map, r_brk, r_state, r_ldbase: no padding needed, all 4 bytes.
            Container::Little => 4 * 5,
            // version(4) + pad(4) + r_map(8) + r_brk(8) + r_state(4) + pad(4) + r_ldbase(8).
            Container::Big => 4 + 4 + 8 + 8 + 4 + 4 + 8,
        }
    }
}

impl LinkMap {
    pub fn parse(bytes: &[u8], ctx: Ctx) -> Result<Self, scroll::Error> {
        let offset = &mut 0;
        let l_addr = read_word(bytes, offset, ctx)?;
        let l_name = read_word(bytes, offset, ctx)?;
        let l_ld = read_word(bytes, offset, ctx)?;
        let l_next = read_word(bytes, offset, ctx)?;
        let l_prev = read_word(bytes, offset, ctx)?;
        Ok(LinkMap {
            l_addr,
            l_name,
            l_ld,
            l_next,
            l_prev,
        })
    }

    pub fn size(ctx: Ctx) -> usize {
        match ctx.container {
            Container::Little => 4 * 5,
            Container::Big => 8 * 5,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use scroll::{IOwrite, Pwrite};
    use std::io::Cursor;

    #[test]
    fn test_parse_link_map_64() {
        let ctx = Ctx::new(Container::Big, scroll::LE);
        let mut cursor = Cursor::new(vec![]);
        for value in [0x1000u64, 0x2000, 0x3000, 0x4000, 0x5000] {
            cursor.iowrite_with::<u64>(value, scroll::LE).unwrap();
        }
        let buf = cursor.into_inner();
        let lmap = LinkMap::parse(&buf, ctx).unwrap();
        assert_eq!(lmap.l_addr, 0x1000);
        assert_eq!(lmap.l_name, 0x2000);
        assert_eq!(lmap.l_ld, 0x3000);
        assert_eq!(lmap.l_next, 0x4000);
        assert_eq!(lmap.l_prev, 0x5000);
    }

    #[test]
    fn test_parse_link_map_32() {
        let ctx = Ctx::new(Container::Little, scroll::LE);
        let mut cursor = Cursor::new(vec![]);
        for value in [0x10u32, 0x20, 0x30, 0x40, 0x50] {
            cursor.iowrite_with::<u32>(value, scroll::LE).unwrap();
        }
        let buf = cursor.into_inner();
        let lmap = LinkMap::parse(&buf, ctx).unwrap();
        assert_eq!(lmap.l_addr, 0x10);
        assert_eq!(lmap.l_next, 0x40);
        assert_eq!(LinkMap::size(ctx), 20);
    }

    #[test]
    fn test_parse_rdebug_64() {
        let ctx = Ctx::new(Container::Big, scroll::LE);
        let mut bytes = vec![0u8; RDebug::size(ctx)];
        bytes.pwrite_with::<u32>(1, 0, ctx.le).unwrap();
        bytes.pwrite_with::<u64>(0xdead, 8, ctx.le).unwrap();
        let rdebug = RDebug::parse(&bytes, ctx).unwrap();
        assert_eq!(rdebug.version, 1);
        assert_eq!(rdebug.r_map, 0xdead);
    }
}
