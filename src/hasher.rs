// 内容哈希
//
// 用于分片完整性校验（非安全认证用途）

use sha2::{Digest, Sha256};

/// 计算字节切片的 SHA-256 摘要，返回 64 位十六进制字符串
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digest_deterministic() {
        let d1 = sha256_hex(b"hello world");
        let d2 = sha256_hex(b"hello world");
        assert_eq!(d1, d2);
        // SHA-256 = 64 个十六进制字符
        assert_eq!(d1.len(), 64);
    }

    #[test]
    fn test_digest_known_value() {
        // 空串的 SHA-256 是固定值
        assert_eq!(
            sha256_hex(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_digest_differs_on_input() {
        assert_ne!(sha256_hex(b"hello"), sha256_hex(b"world"));
    }
}
