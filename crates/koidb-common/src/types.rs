//! 公共类型定义模块
//!
//! 定义 KoiDB 的核心标识类型:
//! - ObjectId: 12 字节唯一标识符(类似 MongoDB ObjectId)

use crate::error::{CommonError, CommonResult};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// ObjectId - 12 字节唯一标识符
///
/// 格式:
/// - 前 4 字节: 时间戳(秒,大端)
/// - 后 8 字节: 随机数(/dev/urandom 或系统熵)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectId([u8; 12]);

impl ObjectId {
    pub fn new() -> Self {
        let mut bytes = [0u8; 12];
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs() as u32;
        bytes[0..4].copy_from_slice(&timestamp.to_be_bytes());
        let random: [u8; 8] = rand_bytes();
        bytes[4..12].copy_from_slice(&random);
        Self(bytes)
    }

    pub fn from_bytes(bytes: [u8; 12]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 12] {
        &self.0
    }

    pub fn timestamp(&self) -> u32 {
        u32::from_be_bytes([self.0[0], self.0[1], self.0[2], self.0[3]])
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> CommonResult<Self> {
        let bytes = hex::decode(s)
            .map_err(|e| CommonError::InvalidObjectId(format!("Invalid hex: {}", e)))?;
        if bytes.len() != 12 {
            return Err(CommonError::InvalidObjectId(
                "ObjectId must be 12 bytes".to_string(),
            ));
        }
        let mut arr = [0u8; 12];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }
}

impl Default for ObjectId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ObjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

fn rand_bytes<const N: usize>() -> [u8; N] {
    let mut bytes = [0u8; N];
    #[cfg(target_os = "linux")]
    {
        use std::fs::File;
        use std::io::Read;
        if let Ok(mut f) = File::open("/dev/urandom") {
            let _ = f.read_exact(&mut bytes);
        }
    }
    #[cfg(not(target_os = "linux"))]
    {
        use std::collections::hash_map::RandomState;
        use std::hash::{BuildHasher, Hasher};
        let state = RandomState::new();
        for chunk in bytes.chunks_mut(8) {
            let hash = state.build_hasher().finish().to_le_bytes();
            let len = chunk.len().min(8);
            chunk.copy_from_slice(&hash[..len]);
        }
    }
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex_round_trip() {
        let id = ObjectId::new();
        let hex = id.to_hex();
        assert_eq!(hex.len(), 24);
        let parsed = ObjectId::from_hex(&hex).unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_from_hex_rejects_bad_input() {
        assert!(ObjectId::from_hex("zz").is_err());
        assert!(ObjectId::from_hex("0011223344").is_err());
    }

    #[test]
    fn test_timestamp_prefix() {
        let id = ObjectId::from_bytes([0, 0, 0, 42, 0, 0, 0, 0, 0, 0, 0, 0]);
        assert_eq!(id.timestamp(), 42);
    }
}
