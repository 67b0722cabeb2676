use fs2::FileExt;

use std::{ffi, fs, io, sync::Mutex};

use crate::{block::Block, read_file, util, write_file, Error, Result, BLOCK_SIZE};

/// One database file, addressed in [BLOCK_SIZE] strides. Owns the file
/// descriptor; reads and writes are positioned and serialized behind a
/// mutex, writers above this layer serialize themselves separately.
pub struct BlockFile {
    location: ffi::OsString,
    fd: Mutex<fs::File>,
}

impl Drop for BlockFile {
    fn drop(&mut self) {
        let fd = self.fd.lock().expect("poisoned block file");
        fd.unlock().ok();
    }
}

impl BlockFile {
    /// Create a fresh file at `location`, failing if one exists.
    pub fn create(location: &ffi::OsStr) -> Result<BlockFile> {
        let os_file = std::path::Path::new(location);
        if let Some(parent) = os_file.parent() {
            err_at!(IOError, fs::create_dir_all(parent))?;
        }
        let fd = {
            let mut opts = fs::OpenOptions::new();
            match opts.read(true).write(true).create_new(true).open(os_file) {
                Ok(fd) => Ok(fd),
                Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                    err_at!(FileExists, msg: "{:?}", location)
                }
                Err(err) => err_at!(IOError, Err(err)),
            }
        }?;
        err_at!(IOError, fd.lock_shared(), "lock {:?}", location)?;

        Ok(BlockFile {
            location: location.to_os_string(),
            fd: Mutex::new(fd),
        })
    }

    /// Open an existing file at `location`.
    pub fn open(location: &ffi::OsStr) -> Result<BlockFile> {
        let fd = util::open_file_rw(location)?;
        err_at!(IOError, fd.lock_shared(), "lock {:?}", location)?;

        Ok(BlockFile {
            location: location.to_os_string(),
            fd: Mutex::new(fd),
        })
    }

    pub fn to_location(&self) -> ffi::OsString {
        self.location.clone()
    }

    pub fn to_len(&self) -> Result<u64> {
        let fd = err_at!(Fatal, self.fd.lock())?;
        util::file_len(&fd)
    }

    /// Read and decode the block at `bid`, verifying its trailer.
    pub fn read(&self, bid: u64) -> Result<Block> {
        let buf = self.read_raw(bid)?;
        Block::decode(bid, &buf)
    }

    /// Read the raw [BLOCK_SIZE] image at `bid` without validation,
    /// used by the recovery scan which tolerates torn blocks.
    pub fn read_raw(&self, bid: u64) -> Result<Vec<u8>> {
        let fpos = io::SeekFrom::Start(bid * util::to_u64(BLOCK_SIZE)?);
        let mut fd = err_at!(Fatal, self.fd.lock())?;
        read_file!(*fd, fpos, BLOCK_SIZE, "read block")
    }

    /// Write `block` at its stamped position. Overwrites whatever is
    /// there, which is how a logically truncated tail gets recycled.
    pub fn write(&self, block: &Block) -> Result<()> {
        use std::io::{Seek, Write};

        let data = block.encode();
        let fpos = io::SeekFrom::Start(block.to_bid() * util::to_u64(BLOCK_SIZE)?);
        let mut fd = err_at!(Fatal, self.fd.lock())?;
        err_at!(IOError, fd.seek(fpos))?;
        write_file!(*fd, &data, &self.location, "write block")?;
        Ok(())
    }

    pub fn sync(&self) -> Result<()> {
        let fd = err_at!(Fatal, self.fd.lock())?;
        err_at!(IOError, fd.sync_all(), "sync {:?}", self.location)
    }
}
