// 该文件是 SegRelay （山南西风） 项目的一部分。
// src/transport/websocket.rs - WebSocket 客户端
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

use std::{collections::VecDeque, io::ErrorKind, net::TcpStream, time::Duration};

use tracing::{debug, info, warn};
use tungstenite::{
  Message, WebSocket, client::connect_with_config, protocol::WebSocketConfig,
  stream::MaybeTlsStream,
};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  protocol::DEFAULT_MAX_MESSAGE_SIZE,
  transport::{Transport, TransportError, TransportEvent},
};

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);
const MAX_REDIRECTS: u8 = 3;

/// 基于 tungstenite 的阻塞式 WebSocket 客户端。
///
/// 套接字读超时等于轮询间隔，超时视为一次空闲轮询；
/// Ping/Pong 由 tungstenite 在读写时自动处理。
pub struct WebSocketTransport {
  url: Url,
  poll_interval: Duration,
  max_message_size: usize,
  socket: Option<WebSocket<MaybeTlsStream<TcpStream>>>,
  pending: VecDeque<TransportEvent>,
}

impl FromUrlWithScheme for WebSocketTransport {
  const SCHEME: &'static str = "ws";
}

impl FromUrl for WebSocketTransport {
  type Error = TransportError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(TransportError::SchemeMismatch(format!(
        "期望方案 '{}', 实际方案 '{}'",
        Self::SCHEME,
        url.scheme()
      )));
    }

    Ok(WebSocketTransport {
      url: url.clone(),
      poll_interval: DEFAULT_POLL_INTERVAL,
      max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
      socket: None,
      pending: VecDeque::new(),
    })
  }
}

impl WebSocketTransport {
  pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
    // 读超时不能为零
    self.poll_interval = poll_interval.max(Duration::from_millis(1));
    self
  }

  pub fn with_max_message_size(mut self, max_message_size: usize) -> Self {
    self.max_message_size = max_message_size;
    self
  }

  fn open(&self) -> Result<WebSocket<MaybeTlsStream<TcpStream>>, TransportError> {
    let mut config = WebSocketConfig::default();
    config.max_message_size = Some(self.max_message_size);
    config.max_frame_size = Some(self.max_message_size);

    let (mut socket, response) = connect_with_config(self.url.as_str(), Some(config), MAX_REDIRECTS)?;
    debug!("握手响应状态: {}", response.status());

    match socket.get_mut() {
      MaybeTlsStream::Plain(stream) => {
        stream
          .set_read_timeout(Some(self.poll_interval))
          .map_err(tungstenite::Error::Io)?;
        stream.set_nodelay(true).map_err(tungstenite::Error::Io)?;
      }
      _ => warn!("非明文连接，未设置读超时"),
    }

    Ok(socket)
  }
}

impl Transport for WebSocketTransport {
  fn connect(&mut self) {
    info!("正在连接 {} ...", self.url);
    match self.open() {
      Ok(socket) => {
        info!("已连接到 {}", self.url);
        self.socket = Some(socket);
        self.pending.push_back(TransportEvent::Established);
      }
      Err(e) => {
        self
          .pending
          .push_back(TransportEvent::ConnectionFailed(e.to_string()));
      }
    }
  }

  fn poll_event(&mut self) -> Option<TransportEvent> {
    if let Some(event) = self.pending.pop_front() {
      return Some(event);
    }

    let socket = self.socket.as_mut()?;
    match socket.read() {
      Ok(Message::Binary(data)) => Some(TransportEvent::Fragment {
        data,
        is_final: true,
      }),
      Ok(Message::Text(text)) => {
        warn!("忽略文本消息 ({} 字节)", text.len());
        None
      }
      Ok(Message::Close(frame)) => {
        info!("服务器关闭连接: {:?}", frame);
        Some(TransportEvent::Closed)
      }
      Ok(Message::Ping(_)) | Ok(Message::Pong(_)) | Ok(Message::Frame(_)) => None,
      Err(tungstenite::Error::Io(err))
        if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) =>
      {
        None
      }
      Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => {
        self.socket = None;
        Some(TransportEvent::Closed)
      }
      Err(e) => {
        self.socket = None;
        Some(TransportEvent::Error(e.to_string()))
      }
    }
  }

  fn send(&mut self, bytes: Vec<u8>) -> Result<(), TransportError> {
    let socket = self.socket.as_mut().ok_or(TransportError::NotConnected)?;
    debug!("发送 {} 字节", bytes.len());
    socket.send(Message::Binary(bytes))?;
    Ok(())
  }

  fn close(&mut self) {
    if let Some(mut socket) = self.socket.take() {
      if let Err(e) = socket.close(None) {
        debug!("关闭连接: {}", e);
      }
      // 尽力把 Close 帧发出去
      let _ = socket.flush();
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn only_ws_scheme_is_accepted() {
    let url = Url::parse("http://127.0.0.1:8080/ws_connect").unwrap();
    assert!(matches!(
      WebSocketTransport::from_url(&url),
      Err(TransportError::SchemeMismatch(_))
    ));
  }

  #[test]
  fn failed_connect_is_reported_as_event() {
    // 端口 1 上通常没有服务
    let url = Url::parse("ws://127.0.0.1:1/ws_connect").unwrap();
    let mut transport = WebSocketTransport::from_url(&url).unwrap();
    transport.connect();
    assert!(matches!(
      transport.poll_event(),
      Some(TransportEvent::ConnectionFailed(_))
    ));
    assert!(transport.poll_event().is_none());
    assert!(matches!(
      transport.send(vec![1]),
      Err(TransportError::NotConnected)
    ));
  }
}
