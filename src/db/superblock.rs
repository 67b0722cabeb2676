use std::convert::TryFrom;

use crate::{
    block::{Block, BlockFile, Kind},
    util, Error, Result, BLOCK_SIZE,
};

/// Identifies a grove database file.
pub const MAGIC: u64 = 0x4752_4f56_4544_4231; // "GROVEDB1"
/// On-disk format version, gating [crate::Error::InvalidFormat].
pub const VERSION: u32 = 1;

/// The durable commit marker. One superblock is appended per commit;
/// they form a back-linked chain through `prev_header_bid` and the
/// newest valid one defines the committed state of the file.
///
/// Payload layout, all integers big-endian:
/// `[magic u64][version u32][last_header_bid u64][prev_header_bid u64]`
/// `[primary_root_bid u64][seq_root_bid u64][next_seqnum u64]`
/// `[ndocs u64][nlivedocs u64][datasize u64][wal_frontier u64]`
/// `[target-len u16][compact-target bytes][header_crc u32]`,
/// where `last_header_bid` is the block's own position, re-checked on
/// read against where it was found.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Superblock {
    pub last_header_bid: u64,
    pub prev_header_bid: u64,
    pub primary_root_bid: u64,
    pub seq_root_bid: u64,
    pub next_seqnum: u64,
    pub ndocs: u64,
    pub nlivedocs: u64,
    pub datasize: u64,
    pub wal_frontier: u64,
    /// Set by the marker commit of a finished compaction, naming the
    /// file that superseded this one.
    pub compact_target: Option<String>,
}

impl Superblock {
    pub fn encode(&self) -> Result<Vec<u8>> {
        let target = self.compact_target.as_deref().unwrap_or("");
        let tlen = err_at!(FailConvert, u16::try_from(target.len()))?;

        let mut buf = Vec::with_capacity(94 + target.len());
        buf.extend_from_slice(&MAGIC.to_be_bytes());
        buf.extend_from_slice(&VERSION.to_be_bytes());
        buf.extend_from_slice(&self.last_header_bid.to_be_bytes());
        buf.extend_from_slice(&self.prev_header_bid.to_be_bytes());
        buf.extend_from_slice(&self.primary_root_bid.to_be_bytes());
        buf.extend_from_slice(&self.seq_root_bid.to_be_bytes());
        buf.extend_from_slice(&self.next_seqnum.to_be_bytes());
        buf.extend_from_slice(&self.ndocs.to_be_bytes());
        buf.extend_from_slice(&self.nlivedocs.to_be_bytes());
        buf.extend_from_slice(&self.datasize.to_be_bytes());
        buf.extend_from_slice(&self.wal_frontier.to_be_bytes());
        buf.extend_from_slice(&tlen.to_be_bytes());
        buf.extend_from_slice(target.as_bytes());
        let crc = crc32fast::hash(&buf);
        buf.extend_from_slice(&crc.to_be_bytes());
        Ok(buf)
    }

    pub fn to_block(&self, bid: u64) -> Result<Block> {
        let mut block = Block::new(bid, Kind::Super);
        let data = self.encode()?;
        block.as_mut_payload()[..data.len()].copy_from_slice(&data);
        Ok(block)
    }

    /// Decode a candidate found at `bid`. `Ok(None)` rejects the
    /// candidate quietly, which keeps the recovery scan walking;
    /// a matching magic with an alien version is a hard
    /// `InvalidFormat`.
    pub fn decode(payload: &[u8], bid: u64) -> Result<Option<Superblock>> {
        if payload.len() < 90 {
            return Ok(None);
        }

        let mut u16s = [0_u8; 2];
        let mut u32s = [0_u8; 4];
        let mut u64s = [0_u8; 8];

        u64s.copy_from_slice(&payload[0..8]);
        if u64::from_be_bytes(u64s) != MAGIC {
            return Ok(None);
        }
        u32s.copy_from_slice(&payload[8..12]);
        let version = u32::from_be_bytes(u32s);
        if version != VERSION {
            err_at!(InvalidFormat, msg: "format version {}", version)?;
        }

        let mut fields = [0_u64; 9];
        for (off, field) in fields.iter_mut().enumerate() {
            u64s.copy_from_slice(&payload[12 + off * 8..20 + off * 8]);
            *field = u64::from_be_bytes(u64s);
        }
        u16s.copy_from_slice(&payload[84..86]);
        let tlen = u16::from_be_bytes(u16s) as usize;
        if 90 + tlen > payload.len() {
            return Ok(None);
        }
        let target = &payload[86..86 + tlen];

        u32s.copy_from_slice(&payload[86 + tlen..90 + tlen]);
        let crc = u32::from_be_bytes(u32s);
        if crc32fast::hash(&payload[..86 + tlen]) != crc {
            return Ok(None);
        }
        if fields[0] != bid {
            return Ok(None); // a copy restored to the wrong position
        }

        let compact_target = match tlen {
            0 => None,
            _ => Some(String::from_utf8_lossy(target).to_string()),
        };

        Ok(Some(Superblock {
            last_header_bid: fields[0],
            prev_header_bid: fields[1],
            primary_root_bid: fields[2],
            seq_root_bid: fields[3],
            next_seqnum: fields[4],
            ndocs: fields[5],
            nlivedocs: fields[6],
            datasize: fields[7],
            wal_frontier: fields[8],
            compact_target,
        }))
    }
}

/// Scan backward from end-of-file for the newest valid superblock.
/// Torn blocks, data blocks and stale garbage are skipped; only a
/// version mismatch aborts the scan.
pub fn find_latest(blkfile: &BlockFile) -> Result<Option<(u64, Superblock)>> {
    let nblocks = blkfile.to_len()? / util::to_u64(BLOCK_SIZE)?;

    for bid in (0..nblocks).rev() {
        let raw = blkfile.read_raw(bid)?;
        let block = match Block::decode(bid, &raw) {
            Ok(block) => block,
            Err(_) => continue, // torn or foreign block
        };
        if block.to_kind() != Kind::Super {
            continue;
        }
        if let Some(sb) = Superblock::decode(block.as_payload(), bid)? {
            return Ok(Some((bid, sb)));
        }
    }
    Ok(None)
}

#[cfg(test)]
#[path = "superblock_test.rs"]
mod superblock_test;
