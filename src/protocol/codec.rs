// 该文件是 SegRelay （山南西风） 项目的一部分。
// src/protocol/codec.rs - 消息编解码
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

use serde::{
  Deserialize,
  de::{Error as _, IgnoredAny},
};
use serde_json::json;
use thiserror::Error;

use super::{DecodedRequest, OutgoingResponse, ResponseStatus};

/// 长度前缀字节数
pub const HEADER_LENGTH_SIZE: usize = 4;

#[derive(Error, Debug)]
pub enum CodecError {
  #[error("消息过短: {len} 字节, 至少需要 {HEADER_LENGTH_SIZE} 字节")]
  FrameTooShort { len: usize },
  #[error("头部被截断: 声明 {declared} 字节, 实际可用 {available} 字节")]
  HeaderTruncated { declared: usize, available: usize },
  #[error("头部解析错误: {0}")]
  HeaderParseError(#[from] serde_json::Error),
  #[error("期望请求消息, 收到响应消息")]
  UnexpectedResponse,
  #[error("期望响应消息, 收到请求消息")]
  UnexpectedRequest,
  #[error("请求 ID 为空")]
  EmptyRequestId,
}

#[derive(Debug, Deserialize)]
struct RequestHeader {
  request_id: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
enum HeaderStatus {
  #[default]
  Ok,
  Error,
}

#[derive(Debug, Deserialize)]
struct ResponseHeader {
  request_id: String,
  #[serde(default)]
  status: HeaderStatus,
  #[serde(default)]
  error: Option<String>,
}

/// 头部外层对象。只关心 `Request` / `Response` 两个键，其余顶层键忽略。
#[derive(Debug, Deserialize)]
struct MessageHeader<Req, Resp> {
  #[serde(rename = "Request")]
  request: Option<Req>,
  #[serde(rename = "Response")]
  response: Option<Resp>,
}

fn split_frame(buffer: &[u8]) -> Result<(&[u8], &[u8]), CodecError> {
  let Some((prefix, rest)) = buffer.split_first_chunk::<HEADER_LENGTH_SIZE>() else {
    return Err(CodecError::FrameTooShort { len: buffer.len() });
  };

  let declared = u32::from_le_bytes(*prefix) as usize;
  if rest.len() < declared {
    return Err(CodecError::HeaderTruncated {
      declared,
      available: rest.len(),
    });
  }

  Ok(rest.split_at(declared))
}

fn join_frame(header: &str, payload: &[u8]) -> Vec<u8> {
  let header = header.as_bytes();
  let mut out = Vec::with_capacity(HEADER_LENGTH_SIZE + header.len() + payload.len());
  out.extend_from_slice(&(header.len() as u32).to_le_bytes());
  out.extend_from_slice(header);
  out.extend_from_slice(payload);
  out
}

/// 解析一条完整的请求消息，图像数据原样保留，不做格式校验
pub fn decode(buffer: &[u8]) -> Result<DecodedRequest, CodecError> {
  let (header, payload) = split_frame(buffer)?;

  let header: MessageHeader<RequestHeader, IgnoredAny> = serde_json::from_slice(header)?;
  let request_id = match header {
    MessageHeader {
      request: Some(request),
      ..
    } => request.request_id,
    MessageHeader {
      response: Some(_), ..
    } => return Err(CodecError::UnexpectedResponse),
    _ => return Err(serde_json::Error::missing_field("Request").into()),
  };
  if request_id.is_empty() {
    return Err(CodecError::EmptyRequestId);
  }

  Ok(DecodedRequest {
    request_id,
    image_bytes: payload.to_vec(),
  })
}

/// 解析一条响应消息（分发服务器一侧的视角）。缺少 `status` 字段时视为成功。
pub fn decode_response(buffer: &[u8]) -> Result<OutgoingResponse, CodecError> {
  let (header, payload) = split_frame(buffer)?;

  let header: MessageHeader<IgnoredAny, ResponseHeader> = serde_json::from_slice(header)?;
  let response = match header {
    MessageHeader {
      response: Some(response),
      ..
    } => response,
    MessageHeader {
      request: Some(_), ..
    } => return Err(CodecError::UnexpectedRequest),
    _ => return Err(serde_json::Error::missing_field("Response").into()),
  };

  let status = match response.status {
    HeaderStatus::Ok => ResponseStatus::Ok,
    HeaderStatus::Error => ResponseStatus::Error(response.error.unwrap_or_default()),
  };

  Ok(OutgoingResponse {
    request_id: response.request_id,
    status,
    image_bytes: payload.to_vec(),
  })
}

/// 编码一条成功响应
pub fn encode(request_id: &str, payload: &[u8]) -> Vec<u8> {
  let header = json!({ "Response": { "request_id": request_id, "status": "ok" } });
  join_frame(&header.to_string(), payload)
}

/// 编码响应；失败响应携带错误信息且不带图像数据
pub fn encode_response(response: &OutgoingResponse) -> Vec<u8> {
  match &response.status {
    ResponseStatus::Ok => encode(&response.request_id, &response.image_bytes),
    ResponseStatus::Error(message) => {
      let header = json!({
        "Response": { "request_id": response.request_id, "status": "error", "error": message }
      });
      join_frame(&header.to_string(), &[])
    }
  }
}

/// 编码一条请求消息（分发服务器一侧的视角）
pub fn encode_request(request_id: &str, payload: &[u8]) -> Vec<u8> {
  let header = json!({ "Request": { "request_id": request_id } });
  join_frame(&header.to_string(), payload)
}
