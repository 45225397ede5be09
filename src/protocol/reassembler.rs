// 该文件是 SegRelay （山南西风） 项目的一部分。
// src/protocol/reassembler.rs - 分片重组
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use thiserror::Error;
use tracing::{debug, warn};

/// 默认单条消息上限 32 MiB
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 32 * 1024 * 1024;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ReassemblyError {
  #[error("消息超过上限: {size} 字节 > {limit} 字节")]
  MessageTooLarge { limit: usize, size: usize },
}

/// 将传输层分片累积为一条完整消息。
///
/// 在收到带结束标记的分片之前缓冲区不会被读取；超过上限时缓冲区被丢弃。
#[derive(Debug)]
pub struct Reassembler {
  max_message_size: usize,
  buffer: Vec<u8>,
  complete: bool,
}

impl Default for Reassembler {
  fn default() -> Self {
    Self::new(DEFAULT_MAX_MESSAGE_SIZE)
  }
}

impl Reassembler {
  pub fn new(max_message_size: usize) -> Self {
    Self {
      max_message_size,
      buffer: Vec::new(),
      complete: false,
    }
  }

  pub fn append(&mut self, fragment: &[u8], is_final: bool) -> Result<(), ReassemblyError> {
    if self.complete {
      warn!(
        "上一条消息 ({} 字节) 尚未取走即收到新分片，已丢弃",
        self.buffer.len()
      );
      self.reset();
    }

    let size = self.buffer.len() + fragment.len();
    if size > self.max_message_size {
      self.reset();
      return Err(ReassemblyError::MessageTooLarge {
        limit: self.max_message_size,
        size,
      });
    }

    self.buffer.extend_from_slice(fragment);
    self.complete = is_final;
    debug!(
      "收到分片 {} 字节, 累计 {} 字节, 结束: {}",
      fragment.len(),
      self.buffer.len(),
      is_final
    );
    Ok(())
  }

  pub fn is_complete(&self) -> bool {
    self.complete
  }

  pub fn is_empty(&self) -> bool {
    self.buffer.is_empty()
  }

  pub fn len(&self) -> usize {
    self.buffer.len()
  }

  /// 取走累积的缓冲区并复位
  pub fn take_buffer(&mut self) -> Vec<u8> {
    self.complete = false;
    std::mem::take(&mut self.buffer)
  }

  pub fn reset(&mut self) {
    self.buffer.clear();
    self.complete = false;
  }
}
