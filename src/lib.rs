//! Grove is an embedded key,value storage engine for opaque byte keys
//! and values, designed to be linked into a host process as a library,
//! managing one logical database per file path.
//!
//! The engine is made up of an append-only block-structured log holding
//! document records, a pair of persistent indexes materialized through
//! copy-on-write blocks - an HB+-trie keyed by the primary key and a
//! B+-tree keyed by sequence-number - and an in-memory write-ahead
//! buffer that absorbs recent writes until they are flushed into the
//! indexes. Every commit appends a superblock describing the durable
//! root state; opening a file scans backward for the newest valid
//! superblock and replays the document window after the last index
//! flush, which makes the file self-describing after a crash or a
//! torn tail.
//!
//! Each mutation is tagged with a file-wide monotonically increasing
//! sequence-number. Documents can be fetched by key via [Db::get], by
//! sequence-number via [Db::get_by_seq], or streamed in key order via
//! [Db::range]. Stale versions accumulate in the log and are reclaimed
//! by [Db::compact], which rewrites the live set into a new file and
//! transparently hands over every open handle.

use std::{error, fmt, result};

/// Short form to compose Error values.
///
/// Here are few possible ways:
///
/// ```ignore
/// use crate::Error;
/// err_at!(InvalidFormat, msg: "bad magic {}", magic)
/// ```
///
/// ```ignore
/// use crate::Error;
/// err_at!(IOError, fd.read(&mut buf))
/// ```
///
/// ```ignore
/// use crate::Error;
/// err_at!(IOError, fd.read(&mut buf), "reading {:?}", loc)
/// ```
#[macro_export]
macro_rules! err_at {
    ($v:ident, msg: $($arg:expr),+) => {{
        let prefix = format!("{}:{}", file!(), line!());
        Err(Error::$v(prefix, format!($($arg),+)))
    }};
    ($v:ident, $e:expr) => {{
        match $e {
            Ok(val) => Ok(val),
            Err(err) => {
                let prefix = format!("{}:{}", file!(), line!());
                Err(Error::$v(prefix, format!("{}", err)))
            }
        }
    }};
    ($v:ident, $e:expr, $($arg:expr),+) => {{
        match $e {
            Ok(val) => Ok(val),
            Err(err) => {
                let prefix = format!("{}:{}", file!(), line!());
                let msg = format!($($arg),+);
                Err(Error::$v(prefix, format!("{} {}", err, msg)))
            }
        }
    }};
}

pub mod block;
pub mod btree;
pub mod cache;
pub mod db;
pub mod doclog;
pub mod seqidx;
pub mod trie;
pub mod util;
pub mod wal;

pub use crate::db::{
    shutdown, Config, Db, Doc, DurabilityOpt, Iter, IterOptions, SeqIter, Stats,
};

/// Size of a file block, the unit of I/O and of atomic writes.
pub const BLOCK_SIZE: usize = 4096;

/// Reserved sentinel offset/block-id meaning "absent".
pub const BLK_NOT_FOUND: u64 = u64::MAX;

/// Comparator overriding the byte-wise ordering of keys, applied to
/// key fragments at every inner B+-tree of the HB+-trie.
pub type CmpFn = fn(&[u8], &[u8]) -> std::cmp::Ordering;

/// Type alias for Result returned by functions of this package.
pub type Result<T> = result::Result<T, Error>;

/// Error variants that can be returned by this package's API.
///
/// Each variant carries a prefix, typically identifying the
/// error location.
#[derive(Clone, Debug, PartialEq)]
pub enum Error {
    InvalidArgs(String, String),
    NoDbFile(String, String),
    FileExists(String, String),
    IOError(String, String),
    ChecksumError(String, String),
    InvalidFormat(String, String),
    KeyNotFound(String, String),
    RdonlyViolation(String, String),
    CompactionFail(String, String),
    InvalidFile(String, String),
    FailConvert(String, String),
    Fatal(String, String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> result::Result<(), fmt::Error> {
        use Error::*;

        match self {
            InvalidArgs(p, msg) => write!(f, "InvalidArgs,{},{}", p, msg),
            NoDbFile(p, msg) => write!(f, "NoDbFile,{},{}", p, msg),
            FileExists(p, msg) => write!(f, "FileExists,{},{}", p, msg),
            IOError(p, msg) => write!(f, "IOError,{},{}", p, msg),
            ChecksumError(p, msg) => write!(f, "ChecksumError,{},{}", p, msg),
            InvalidFormat(p, msg) => write!(f, "InvalidFormat,{},{}", p, msg),
            KeyNotFound(p, msg) => write!(f, "KeyNotFound,{},{}", p, msg),
            RdonlyViolation(p, msg) => write!(f, "RdonlyViolation,{},{}", p, msg),
            CompactionFail(p, msg) => write!(f, "CompactionFail,{},{}", p, msg),
            InvalidFile(p, msg) => write!(f, "InvalidFile,{},{}", p, msg),
            FailConvert(p, msg) => write!(f, "FailConvert,{},{}", p, msg),
            Fatal(p, msg) => write!(f, "Fatal,{},{}", p, msg),
        }
    }
}

impl error::Error for Error {}

impl Error {
    /// Return whether this error denotes a missing key, useful to
    /// distinguish absence from real failures.
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::KeyNotFound(_, _) => true,
            _ => false,
        }
    }
}
