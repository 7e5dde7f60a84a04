//
// Copyright (c) Memfault, Inc.
// See License.txt for details
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Input is not an ELF file")]
    NotElf,

    #[error("Malformed ELF: {0}")]
    MalformedElf(String),

    #[error("Unsupported architecture: e_machine {0}")]
    UnsupportedArch(u16),

    #[error("Output stream closed before all bytes were written")]
    OutputClosed,
}

pub type Result<T> = std::result::Result<T, CoreError>;
