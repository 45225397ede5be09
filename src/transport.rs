// 该文件是 SegRelay （山南西风） 项目的一部分。
// src/transport.rs - 传输层接口
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

mod websocket;
pub use self::websocket::WebSocketTransport;

/// 传输层生命周期事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
  Established,
  ConnectionFailed(String),
  Fragment { data: Vec<u8>, is_final: bool },
  Error(String),
  Closed,
}

#[derive(Error, Debug)]
pub enum TransportError {
  #[error("WebSocket 错误: {0}")]
  WebSocket(#[from] tungstenite::Error),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
  #[error("连接尚未建立")]
  NotConnected,
}

/// 由轮询驱动的传输层。连接结果、收到的分片和错误都以事件形式返回。
pub trait Transport {
  fn connect(&mut self);

  /// 取下一个事件；在轮询间隔内没有事件时返回 `None`
  fn poll_event(&mut self) -> Option<TransportEvent>;

  /// 以二进制消息发送一段完整的已编码数据
  fn send(&mut self, bytes: Vec<u8>) -> Result<(), TransportError>;

  fn close(&mut self);
}
