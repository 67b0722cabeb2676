use std::fmt;

use crate::{doclog, BLK_NOT_FOUND};

/// A document: opaque key, opaque meta, optional opaque body.
///
/// The engine owns copies of the buffers handed to it. `body: None`
/// denotes a tombstone, a zero-length body is an ordinary empty
/// value. `seqnum`, `offset`, `deleted` and `length` are engine
/// assigned and populated on reads and successful writes.
#[derive(Clone, Default, Eq, PartialEq)]
pub struct Doc {
    pub key: Vec<u8>,
    pub meta: Vec<u8>,
    pub body: Option<Vec<u8>>,
    pub seqnum: u64,
    pub offset: u64,
    pub deleted: bool,
    pub length: usize,
}

impl fmt::Debug for Doc {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "doc<key:{:?} seqnum:{} deleted:{}>",
            self.key, self.seqnum, self.deleted
        )
    }
}

impl Doc {
    /// New document shell carrying only a key, as used for lookups.
    pub fn new(key: &[u8]) -> Doc {
        Doc {
            key: key.to_vec(),
            offset: BLK_NOT_FOUND,
            ..Doc::default()
        }
    }

    /// New document carrying key, meta and body.
    pub fn with(key: &[u8], meta: &[u8], body: Option<&[u8]>) -> Doc {
        Doc {
            key: key.to_vec(),
            meta: meta.to_vec(),
            body: body.map(|body| body.to_vec()),
            deleted: body.is_none(),
            offset: BLK_NOT_FOUND,
            ..Doc::default()
        }
    }

    /// Replace meta and body, keeping the key. A `None` body turns
    /// the next [crate::Db::set] of this document into a deletion.
    pub fn update(&mut self, meta: &[u8], body: Option<&[u8]>) {
        self.meta = meta.to_vec();
        self.body = body.map(|body| body.to_vec());
        self.deleted = body.is_none();
    }

    pub(crate) fn from_record(rec: doclog::Record, offset: u64) -> Doc {
        let length = rec.length;
        Doc {
            key: rec.key,
            meta: rec.meta,
            body: rec.body,
            seqnum: rec.seqnum,
            offset,
            deleted: rec.deleted,
            length,
        }
    }
}
