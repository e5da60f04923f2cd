use orion_error::StructError;

use crate::error::{FuzzyReason, FuzzyResult};

// ---------------------------------------------------------------------------
// Wire constants
// ---------------------------------------------------------------------------

/// Current protocol version carried in the command header.
pub const FUZZY_VERSION: u8 = 3;
/// Previous epoch still accepted on the wire.
pub const FUZZY_VERSION_COMPAT: u8 = 2;

/// Rolling-hash fingerprints per shingled command.
pub const SHINGLE_COUNT: usize = 32;
/// A digest must win strictly more than this many shingle votes.
pub const SHINGLE_MATCH_THRESHOLD: usize = SHINGLE_COUNT / 2;

pub const DIGEST_LEN: usize = 64;

/// version, cmd, flag, value, digest, shingles_count, tag.
pub const CMD_SIZE: usize = 1 + 1 + 4 + 4 + DIGEST_LEN + 1 + 8;
pub const SHINGLE_CMD_SIZE: usize = CMD_SIZE + SHINGLE_COUNT * 8;
/// Legacy fixed header: cmd, flag, value, digest.
pub const LEGACY_CMD_SIZE: usize = 1 + 1 + 4 + DIGEST_LEN;

pub const REPLY_SIZE: usize = 4 + 4 + 4 + 8;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FuzzyCmdKind {
    Check = 0,
    Write = 1,
    Delete = 2,
}

impl FuzzyCmdKind {
    fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::Check),
            1 => Some(Self::Write),
            2 => Some(Self::Delete),
            _ => None,
        }
    }
}

/// Protocol epoch, used only for stats bucketing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FuzzyEpoch {
    Eight = 0,
    Nine = 1,
}

pub const EPOCH_COUNT: usize = 2;

/// A decoded fuzzy command. `shingles` is present iff the wire form
/// carried the shingle block.
#[derive(Debug, Clone, PartialEq)]
pub struct FuzzyCmd {
    pub version: u8,
    pub cmd: FuzzyCmdKind,
    pub flag: i32,
    pub value: i32,
    pub digest: [u8; DIGEST_LEN],
    pub tag: u64,
    pub shingles: Option<[u64; SHINGLE_COUNT]>,
}

impl FuzzyCmd {
    pub fn new(cmd: FuzzyCmdKind, digest: [u8; DIGEST_LEN]) -> Self {
        Self {
            version: FUZZY_VERSION,
            cmd,
            flag: 0,
            value: 0,
            digest,
            tag: 0,
            shingles: None,
        }
    }

    pub fn shingles_count(&self) -> u8 {
        if self.shingles.is_some() {
            SHINGLE_COUNT as u8
        } else {
            0
        }
    }

    /// Classify a datagram by size and parse it. Legacy commands are
    /// converted into the current form; the returned flag says whether the
    /// reply must use the legacy text rendering.
    pub fn decode(buf: &[u8]) -> FuzzyResult<(Self, FuzzyEpoch, bool)> {
        match buf.len() {
            LEGACY_CMD_SIZE => {
                let cmd = FuzzyCmdKind::from_u8(buf[0]).ok_or_else(bad_command)?;
                let flag = buf[1] as i32;
                let value = i32::from_le_bytes(buf[2..6].try_into().expect("slice len"));
                let mut digest = [0u8; DIGEST_LEN];
                digest.copy_from_slice(&buf[6..6 + DIGEST_LEN]);
                Ok((
                    Self {
                        version: FUZZY_VERSION_COMPAT,
                        cmd,
                        flag,
                        value,
                        digest,
                        tag: 0,
                        shingles: None,
                    },
                    FuzzyEpoch::Eight,
                    true,
                ))
            }
            CMD_SIZE | SHINGLE_CMD_SIZE => {
                let version = buf[0];
                let epoch = match version {
                    FUZZY_VERSION => FuzzyEpoch::Nine,
                    FUZZY_VERSION_COMPAT => FuzzyEpoch::Eight,
                    _ => return Err(bad_command()),
                };
                let cmd = FuzzyCmdKind::from_u8(buf[1]).ok_or_else(bad_command)?;
                let flag = i32::from_le_bytes(buf[2..6].try_into().expect("slice len"));
                let value = i32::from_le_bytes(buf[6..10].try_into().expect("slice len"));
                let mut digest = [0u8; DIGEST_LEN];
                digest.copy_from_slice(&buf[10..10 + DIGEST_LEN]);
                let shingles_count = buf[10 + DIGEST_LEN];
                let tag = u64::from_le_bytes(
                    buf[11 + DIGEST_LEN..11 + DIGEST_LEN + 8]
                        .try_into()
                        .expect("slice len"),
                );

                let shingles = if buf.len() == SHINGLE_CMD_SIZE {
                    if shingles_count as usize != SHINGLE_COUNT {
                        return Err(bad_command());
                    }
                    let mut shingles = [0u64; SHINGLE_COUNT];
                    for (i, chunk) in buf[CMD_SIZE..].chunks_exact(8).enumerate() {
                        shingles[i] = u64::from_le_bytes(chunk.try_into().expect("chunk len"));
                    }
                    Some(shingles)
                } else {
                    if shingles_count != 0 {
                        return Err(bad_command());
                    }
                    None
                };

                Ok((
                    Self {
                        version,
                        cmd,
                        flag,
                        value,
                        digest,
                        tag,
                        shingles,
                    },
                    epoch,
                    false,
                ))
            }
            _ => Err(bad_command()),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(if self.shingles.is_some() {
            SHINGLE_CMD_SIZE
        } else {
            CMD_SIZE
        });
        out.push(self.version);
        out.push(self.cmd as u8);
        out.extend_from_slice(&self.flag.to_le_bytes());
        out.extend_from_slice(&self.value.to_le_bytes());
        out.extend_from_slice(&self.digest);
        out.push(self.shingles_count());
        out.extend_from_slice(&self.tag.to_le_bytes());
        if let Some(shingles) = &self.shingles {
            for s in shingles {
                out.extend_from_slice(&s.to_le_bytes());
            }
        }
        out
    }
}

fn bad_command() -> crate::error::FuzzyError {
    StructError::from(FuzzyReason::BadCommand)
}

// ---------------------------------------------------------------------------
// FuzzyReply
// ---------------------------------------------------------------------------

/// Reply to any fuzzy command. `value` carries the hit weight or an
/// HTTP-like error code; `prob` is in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FuzzyReply {
    pub value: i32,
    pub flag: i32,
    pub prob: f32,
    pub tag: u64,
}

impl FuzzyReply {
    pub fn miss(tag: u64) -> Self {
        Self {
            value: 0,
            flag: 0,
            prob: 0.0,
            tag,
        }
    }

    pub fn error(code: i32, tag: u64) -> Self {
        Self {
            value: code,
            flag: 0,
            prob: 0.0,
            tag,
        }
    }

    pub fn encode(&self) -> [u8; REPLY_SIZE] {
        let mut out = [0u8; REPLY_SIZE];
        out[0..4].copy_from_slice(&self.value.to_le_bytes());
        out[4..8].copy_from_slice(&self.flag.to_le_bytes());
        out[8..12].copy_from_slice(&self.prob.to_le_bytes());
        out[12..20].copy_from_slice(&self.tag.to_le_bytes());
        out
    }

    pub fn decode(buf: &[u8]) -> FuzzyResult<Self> {
        if buf.len() != REPLY_SIZE {
            return Err(bad_command());
        }
        Ok(Self {
            value: i32::from_le_bytes(buf[0..4].try_into().expect("slice len")),
            flag: i32::from_le_bytes(buf[4..8].try_into().expect("slice len")),
            prob: f32::from_le_bytes(buf[8..12].try_into().expect("slice len")),
            tag: u64::from_le_bytes(buf[12..20].try_into().expect("slice len")),
        })
    }

    /// Legacy text rendering: `OK <val> <flag>` for a check hit, bare `OK`
    /// for accepted updates, `ERR` otherwise.
    pub fn encode_legacy(&self, cmd: FuzzyCmdKind) -> Vec<u8> {
        if self.prob > 0.5 {
            match cmd {
                FuzzyCmdKind::Check => format!("OK {} {}\r\n", self.value, self.flag).into_bytes(),
                _ => b"OK\r\n".to_vec(),
            }
        } else {
            b"ERR\r\n".to_vec()
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn digest(b: u8) -> [u8; DIGEST_LEN] {
        [b; DIGEST_LEN]
    }

    #[test]
    fn sizes_are_distinct() {
        assert_eq!(CMD_SIZE, 83);
        assert_eq!(SHINGLE_CMD_SIZE, 83 + 256);
        assert_ne!(LEGACY_CMD_SIZE, CMD_SIZE);
        assert_ne!(LEGACY_CMD_SIZE, SHINGLE_CMD_SIZE);
    }

    #[test]
    fn roundtrip_plain_command() {
        let mut cmd = FuzzyCmd::new(FuzzyCmdKind::Write, digest(0x5a));
        cmd.flag = 7;
        cmd.value = 3;
        cmd.tag = 0xdead_beef;
        let bytes = cmd.encode();
        assert_eq!(bytes.len(), CMD_SIZE);
        let (decoded, epoch, legacy) = FuzzyCmd::decode(&bytes).unwrap();
        assert_eq!(decoded, cmd);
        assert_eq!(epoch, FuzzyEpoch::Nine);
        assert!(!legacy);
    }

    #[test]
    fn roundtrip_shingle_command() {
        let mut cmd = FuzzyCmd::new(FuzzyCmdKind::Check, digest(1));
        let mut shingles = [0u64; SHINGLE_COUNT];
        for (i, s) in shingles.iter_mut().enumerate() {
            *s = i as u64 * 0x9e37_79b9;
        }
        cmd.shingles = Some(shingles);
        let bytes = cmd.encode();
        assert_eq!(bytes.len(), SHINGLE_CMD_SIZE);
        let (decoded, _, _) = FuzzyCmd::decode(&bytes).unwrap();
        assert_eq!(decoded.shingles, Some(shingles));
    }

    #[test]
    fn legacy_command_is_converted() {
        let mut buf = vec![0u8; LEGACY_CMD_SIZE];
        buf[0] = 0; // check
        buf[1] = 2; // flag
        buf[2..6].copy_from_slice(&9i32.to_le_bytes());
        buf[6..].copy_from_slice(&digest(0xcc));
        let (cmd, epoch, legacy) = FuzzyCmd::decode(&buf).unwrap();
        assert!(legacy);
        assert_eq!(epoch, FuzzyEpoch::Eight);
        assert_eq!(cmd.cmd, FuzzyCmdKind::Check);
        assert_eq!(cmd.flag, 2);
        assert_eq!(cmd.value, 9);
        assert_eq!(cmd.digest, digest(0xcc));
    }

    #[test]
    fn bad_sizes_and_fields_rejected() {
        assert!(FuzzyCmd::decode(&[]).is_err());
        assert!(FuzzyCmd::decode(&[0u8; 17]).is_err());
        assert!(FuzzyCmd::decode(&[0u8; 1500]).is_err());

        let mut cmd = FuzzyCmd::new(FuzzyCmdKind::Check, digest(0)).encode();
        cmd[1] = 9; // unknown command byte
        assert!(FuzzyCmd::decode(&cmd).is_err());

        let mut cmd = FuzzyCmd::new(FuzzyCmdKind::Check, digest(0)).encode();
        cmd[0] = 77; // unknown version
        assert!(FuzzyCmd::decode(&cmd).is_err());

        // shingles_count inconsistent with datagram size
        let mut cmd = FuzzyCmd::new(FuzzyCmdKind::Check, digest(0)).encode();
        cmd[10 + DIGEST_LEN] = 32;
        assert!(FuzzyCmd::decode(&cmd).is_err());
    }

    #[test]
    fn reply_roundtrip() {
        let reply = FuzzyReply {
            value: 3,
            flag: 7,
            prob: 1.0,
            tag: 42,
        };
        let decoded = FuzzyReply::decode(&reply.encode()).unwrap();
        assert_eq!(decoded, reply);
    }

    #[test]
    fn legacy_reply_forms() {
        let hit = FuzzyReply {
            value: 3,
            flag: 7,
            prob: 1.0,
            tag: 0,
        };
        assert_eq!(hit.encode_legacy(FuzzyCmdKind::Check), b"OK 3 7\r\n");
        assert_eq!(hit.encode_legacy(FuzzyCmdKind::Write), b"OK\r\n");
        let miss = FuzzyReply::miss(0);
        assert_eq!(miss.encode_legacy(FuzzyCmdKind::Check), b"ERR\r\n");
    }
}
