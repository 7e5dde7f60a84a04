//
// Copyright (c) Memfault, Inc.
// See License.txt for details
use goblin::container::{Container, Ctx};
use scroll::Pread;

pub const AT_PHDR: u64 = 3;
pub const AT_PHENT: u64 = 4;
pub const AT_PHNUM: u64 = 5;

/// One auxv entry, widened to a common 64-bit representation regardless of
/// whether the core is 32 or 64-bit.
#[derive(Debug, Eq, PartialEq)]
pub struct AuxvEntry {
    pub key: u64,
    pub value: u64,
}

pub struct Auxv<'a> {
    data: &'a [u8],
    ctx: Ctx,
}

impl<'a> Auxv<'a> {
    pub fn new(data: &'a [u8], ctx: Ctx) -> Self {
        Self { data, ctx }
    }

    pub fn iter(&self) -> AuxvIterator<'_> {
        AuxvIterator {
            data: self.data,
            ctx: self.ctx,
            offset: 0,
        }
    }

    pub fn find_value(&self, key: u64) -> Option<u64> {
        self.iter().find(|a| a.key == key).map(|a| a.value)
    }
}

pub struct AuxvIterator<'a> {
    data: &'a [u8],
    ctx: Ctx,
    offset: usize,
}

impl<'a> Iterator for AuxvIterator<'a> {
    type Item = AuxvEntry;

    fn next(&mut self) -> Option<Self::Item> {
        let mut read_word = || -> Option<u64> {
            match self.ctx.container {
                Container::Little => self
                    .data
                    .gread_with::<u32>(&mut self.offset, self.ctx.le)
                    .ok()
                    .map(u64::from),
                Container::Big => self
                    .data
                    .gread_with::<u64>(&mut self.offset, self.ctx.le)
                    .ok(),
            }
        };
        match (read_word(), read_word()) {
            (Some(key), Some(value)) => Some(AuxvEntry { key, value }),
            _ => None,
        }
    }
}
