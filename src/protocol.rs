// 该文件是 SegRelay （山南西风） 项目的一部分。
// src/protocol.rs - 线协议定义
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

//! 分发服务器与本客户端之间的消息格式。
//!
//! 每条逻辑消息由 4 字节小端长度前缀、JSON 头部和原始图像字节组成：
//!
//! ```text
//! offset 0     : u32 (little-endian) N，JSON 头部长度
//! offset 4     : N 字节 UTF-8 JSON 头部
//! offset 4 + N : 图像数据
//! ```

mod codec;
mod reassembler;

pub use self::codec::{
  CodecError, HEADER_LENGTH_SIZE, decode, decode_response, encode, encode_request, encode_response,
};
pub use self::reassembler::{DEFAULT_MAX_MESSAGE_SIZE, Reassembler, ReassemblyError};

/// 解码后的图像处理请求
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedRequest {
  pub request_id: String,
  pub image_bytes: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseStatus {
  Ok,
  Error(String),
}

/// 发往分发服务器的处理结果，`request_id` 与触发它的请求一致
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingResponse {
  pub request_id: String,
  pub status: ResponseStatus,
  pub image_bytes: Vec<u8>,
}

impl OutgoingResponse {
  pub fn ok(request_id: impl Into<String>, image_bytes: Vec<u8>) -> Self {
    Self {
      request_id: request_id.into(),
      status: ResponseStatus::Ok,
      image_bytes,
    }
  }

  pub fn error(request_id: impl Into<String>, message: impl Into<String>) -> Self {
    Self {
      request_id: request_id.into(),
      status: ResponseStatus::Error(message.into()),
      image_bytes: Vec::new(),
    }
  }

  pub fn is_ok(&self) -> bool {
    self.status == ResponseStatus::Ok
  }
}
