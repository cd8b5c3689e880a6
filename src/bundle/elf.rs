//! src/bundle/elf.rs
//! Tells ELF machine code apart from text launchers that share its name.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use crate::error::{IoContext, Result};

const ELF_MAGIC: [u8; 4] = [0x7f, b'E', b'L', b'F'];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    /// ELF object; goes through the dependency-closure helper.
    Elf,
    /// Shell or other text launcher; copied verbatim.
    Script,
}

pub fn classify_bytes(head: &[u8]) -> FileKind {
    if head.starts_with(&ELF_MAGIC) {
        FileKind::Elf
    } else {
        FileKind::Script
    }
}

pub fn classify(path: &Path) -> Result<FileKind> {
    let mut head = [0u8; 4];
    let mut file = File::open(path).at(path)?;
    let mut read = 0;
    while read < head.len() {
        let n = file.read(&mut head[read..]).at(path)?;
        if n == 0 {
            break;
        }
        read += n;
    }
    Ok(classify_bytes(&head[..read]))
}
