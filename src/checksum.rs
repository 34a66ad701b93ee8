//! File checksums used to validate transfers.
//!
//! Only CRC32 is wired up; the remaining algorithm identifiers are part
//! of the public contract and report `NotSupported`.

use std::io::Read;

use flate2::Crc;

use crate::status::Status;

const BLOCK_SIZE: usize = 1024;

/// Hash algorithm selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecksumAlgorithm {
    Crc32,
    Md5,
    Sha256,
}

/// Stream `reader` to completion and return its checksum.
pub fn file_checksum<R: Read>(
    reader: &mut R,
    algorithm: ChecksumAlgorithm,
) -> Result<u64, Status> {
    match algorithm {
        ChecksumAlgorithm::Crc32 => crc32(reader),
        ChecksumAlgorithm::Md5 | ChecksumAlgorithm::Sha256 => Err(Status::NotSupported),
    }
}

fn crc32<R: Read>(reader: &mut R) -> Result<u64, Status> {
    let mut crc = Crc::new();
    let mut block = [0u8; BLOCK_SIZE];
    loop {
        let n = reader.read(&mut block).map_err(|_| Status::IoError)?;
        if n == 0 {
            break;
        }
        crc.update(&block[..n]);
    }
    Ok(crc.sum() as u64)
}
