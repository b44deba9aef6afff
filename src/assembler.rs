// 结果组装器（仅下载）
//
// 分片完成顺序不确定，结果缓冲必须按索引寻址（槽位数组）而不是追加写。
// 只有在全部槽位填满后才允许按索引顺序拼接出最终产物。

use crate::error::TransferError;
use crate::planner::FileChunk;
use std::sync::Mutex;

/// 结果组装器
///
/// 固定大小的槽位数组，槽位号 = 分片索引 - 首个分片索引（续传时索引不从 0 起）
#[derive(Debug)]
pub struct ResultAssembler {
    slots: Mutex<Vec<Option<Vec<u8>>>>,
    /// 首个分片的索引（续传偏移对应的基准）
    base_index: usize,
}

impl ResultAssembler {
    /// 创建指定槽位数量的组装器
    pub fn new(slot_count: usize, base_index: usize) -> Self {
        Self {
            slots: Mutex::new(vec![None; slot_count]),
            base_index,
        }
    }

    /// 根据规划好的分片列表创建组装器
    pub fn for_chunks(chunks: &[FileChunk]) -> Self {
        let base_index = chunks.first().map(|c| c.index).unwrap_or(0);
        Self::new(chunks.len(), base_index)
    }

    /// 按分片索引写入槽位（与完成顺序无关）
    ///
    /// 越界索引直接忽略（分片不属于本次传输）
    pub fn write_slot(&self, index: usize, bytes: Vec<u8>) {
        let mut slots = self.slots.lock().unwrap();
        if let Some(slot) = index
            .checked_sub(self.base_index)
            .and_then(|pos| slots.get_mut(pos))
        {
            *slot = Some(bytes);
        }
    }

    /// 已填充的槽位数量
    pub fn filled_count(&self) -> usize {
        self.slots
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.is_some())
            .count()
    }

    /// 是否全部槽位已填充
    pub fn is_complete(&self) -> bool {
        self.slots.lock().unwrap().iter().all(|s| s.is_some())
    }

    /// 按索引顺序拼接最终产物
    ///
    /// 全部分片完成前调用返回 `IncompleteTransferError`（契约违反）
    pub fn assemble(&self) -> Result<Vec<u8>, TransferError> {
        let mut slots = self.slots.lock().unwrap();
        let total = slots.len();
        let completed = slots.iter().filter(|s| s.is_some()).count();

        if completed < total {
            return Err(TransferError::IncompleteTransfer { completed, total });
        }

        let mut result = Vec::with_capacity(slots.iter().map(|s| s.as_ref().map_or(0, |b| b.len())).sum());
        for slot in slots.iter_mut() {
            // 拼接时转移所有权，组装器随传输一起废弃
            result.extend_from_slice(&slot.take().unwrap_or_default());
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_out_of_order_assembly() {
        let assembler = ResultAssembler::new(3, 0);
        // 完成顺序与索引顺序无关
        assembler.write_slot(2, b"CC".to_vec());
        assembler.write_slot(0, b"AAAA".to_vec());
        assembler.write_slot(1, b"BBBB".to_vec());

        assert!(assembler.is_complete());
        assert_eq!(assembler.assemble().unwrap(), b"AAAABBBBCC");
    }

    #[test]
    fn test_assemble_before_completion_fails() {
        let assembler = ResultAssembler::new(3, 0);
        assembler.write_slot(0, b"AAAA".to_vec());

        assert!(!assembler.is_complete());
        let err = assembler.assemble().unwrap_err();
        match err {
            TransferError::IncompleteTransfer { completed, total } => {
                assert_eq!(completed, 1);
                assert_eq!(total, 3);
            }
            other => panic!("期望 IncompleteTransfer, 实际 {:?}", other),
        }
    }

    #[test]
    fn test_base_index_offset() {
        // 续传场景：分片索引从 2 开始
        let chunks = vec![FileChunk::new(2, 8..12), FileChunk::new(3, 12..16)];
        let assembler = ResultAssembler::for_chunks(&chunks);

        assembler.write_slot(3, b"3333".to_vec());
        assembler.write_slot(2, b"2222".to_vec());
        assert_eq!(assembler.assemble().unwrap(), b"22223333");
    }

    #[test]
    fn test_foreign_index_ignored() {
        let assembler = ResultAssembler::new(2, 2);
        // 低于基准或超出范围的索引不属于本次传输
        assembler.write_slot(0, b"xx".to_vec());
        assembler.write_slot(9, b"yy".to_vec());
        assert_eq!(assembler.filled_count(), 0);
    }

    #[test]
    fn test_empty_assembler_is_complete() {
        // 零分片传输（续传偏移等于总大小）
        let assembler = ResultAssembler::new(0, 0);
        assert!(assembler.is_complete());
        assert_eq!(assembler.assemble().unwrap(), Vec::<u8>::new());
    }
}
