// 该文件是 SegRelay （山南西风） 项目的一部分。
// src/session.rs - 连接会话状态机
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
use tracing::{debug, error, info, warn};

use crate::{
  protocol::{
    DEFAULT_MAX_MESSAGE_SIZE, DecodedRequest, OutgoingResponse, Reassembler, ReassemblyError,
    decode, encode_response,
  },
  transport::TransportEvent,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
  Disconnected,
  Connecting,
  Established,
  Receiving,
  Closing,
  Error,
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum DispatchError {
  #[error("处理队列已关闭")]
  Closed,
}

/// 会话把解码后的请求交给处理方，并从处理方取回已完成的响应
pub trait Dispatch {
  fn dispatch(&mut self, request: DecodedRequest) -> Result<(), DispatchError>;
  fn poll_response(&mut self) -> Option<OutgoingResponse>;
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum SessionError {
  #[error("会话已结束")]
  Terminated,
  #[error("当前状态 {0:?} 不允许该操作")]
  InvalidState(SessionState),
  #[error("连接失败: {0}")]
  ConnectionFailed(String),
  #[error("传输层错误: {0}")]
  Transport(String),
  #[error("分片重组错误: {0}")]
  Reassembly(#[from] ReassemblyError),
  #[error("分发错误: {0}")]
  Dispatch(#[from] DispatchError),
}

#[derive(Debug, Clone, Copy)]
pub struct SessionConfig {
  pub max_message_size: usize,
}

impl Default for SessionConfig {
  fn default() -> Self {
    Self {
      max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
    }
  }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
  pub requests: u64,
  pub responses: u64,
  pub dropped: u64,
}

pub struct Session<D> {
  state: SessionState,
  terminated: bool,
  reassembler: Reassembler,
  dispatcher: D,
  stats: SessionStats,
}

impl<D: Dispatch> Session<D> {
  pub fn new(config: SessionConfig, dispatcher: D) -> Self {
    Self {
      state: SessionState::Disconnected,
      terminated: false,
      reassembler: Reassembler::new(config.max_message_size),
      dispatcher,
      stats: SessionStats::default(),
    }
  }

  pub fn state(&self) -> SessionState {
    self.state
  }

  /// 会话进入过 `Disconnected` 终态后不再处理任何事件
  pub fn is_terminated(&self) -> bool {
    self.terminated
  }

  pub fn stats(&self) -> SessionStats {
    self.stats
  }

  pub fn dispatcher(&self) -> &D {
    &self.dispatcher
  }

  fn transition(&mut self, next: SessionState) {
    if self.state != next {
      debug!("会话状态 {:?} -> {:?}", self.state, next);
      self.state = next;
    }
  }

  fn terminate(&mut self) {
    self.reassembler.reset();
    self.transition(SessionState::Disconnected);
    self.terminated = true;
  }

  fn fail(&mut self, err: SessionError) -> Result<(), SessionError> {
    error!("会话失败: {}", err);
    self.transition(SessionState::Error);
    self.terminate();
    Err(err)
  }

  pub fn connect(&mut self) -> Result<(), SessionError> {
    if self.terminated {
      return Err(SessionError::Terminated);
    }
    if self.state != SessionState::Disconnected {
      return Err(SessionError::InvalidState(self.state));
    }
    self.transition(SessionState::Connecting);
    Ok(())
  }

  /// 处理一个传输层事件。只有传输层错误、连接失败、消息超限和处理队列关闭会返回错误，
  /// 协议解析错误仅丢弃当前消息。
  pub fn handle_event(&mut self, event: TransportEvent) -> Result<(), SessionError> {
    if self.terminated {
      debug!("会话已结束，忽略事件 {:?}", event);
      return Ok(());
    }

    match event {
      TransportEvent::Established => {
        if self.state == SessionState::Connecting {
          info!("连接已建立");
          self.transition(SessionState::Established);
        } else {
          warn!("状态 {:?} 下收到连接建立事件，忽略", self.state);
        }
        Ok(())
      }
      TransportEvent::ConnectionFailed(reason) => self.fail(SessionError::ConnectionFailed(reason)),
      TransportEvent::Fragment { data, is_final } => match self.state {
        SessionState::Established | SessionState::Receiving => self.on_fragment(&data, is_final),
        state => {
          warn!("状态 {:?} 下收到 {} 字节分片，忽略", state, data.len());
          Ok(())
        }
      },
      TransportEvent::Error(reason) => self.fail(SessionError::Transport(reason)),
      TransportEvent::Closed => {
        info!("连接已关闭");
        self.transition(SessionState::Closing);
        self.terminate();
        Ok(())
      }
    }
  }

  fn on_fragment(&mut self, data: &[u8], is_final: bool) -> Result<(), SessionError> {
    self.transition(SessionState::Receiving);

    if let Err(e) = self.reassembler.append(data, is_final) {
      return self.fail(e.into());
    }
    if !self.reassembler.is_complete() {
      return Ok(());
    }

    let buffer = self.reassembler.take_buffer();
    match decode(&buffer) {
      Ok(request) => {
        info!(
          "收到请求 {} (图像 {} 字节)",
          request.request_id,
          request.image_bytes.len()
        );
        if let Err(e) = self.dispatcher.dispatch(request) {
          return self.fail(e.into());
        }
        self.stats.requests += 1;
      }
      Err(e) => {
        warn!("丢弃无法解析的消息 ({} 字节): {}", buffer.len(), e);
        self.stats.dropped += 1;
      }
    }

    self.transition(SessionState::Established);
    Ok(())
  }

  /// 取出下一条已完成的响应并编码为线格式
  pub fn poll_outgoing(&mut self) -> Option<Vec<u8>> {
    if self.terminated {
      return None;
    }

    let response = self.dispatcher.poll_response()?;
    if response.is_ok() {
      info!("请求 {} 处理完成", response.request_id);
    } else {
      warn!("请求 {} 处理失败: {:?}", response.request_id, response.status);
    }
    self.stats.responses += 1;
    Some(encode_response(&response))
  }
}

#[cfg(test)]
mod tests {
  use std::collections::VecDeque;

  use rstest::{fixture, rstest};

  use super::*;
  use crate::protocol::{ResponseStatus, decode_response, encode_request};

  /// 直接回显图像数据的处理方
  #[derive(Default)]
  struct Echo {
    received: Vec<DecodedRequest>,
    done: VecDeque<OutgoingResponse>,
    closed: bool,
  }

  impl Dispatch for Echo {
    fn dispatch(&mut self, request: DecodedRequest) -> Result<(), DispatchError> {
      if self.closed {
        return Err(DispatchError::Closed);
      }
      self
        .done
        .push_back(OutgoingResponse::ok(request.request_id.clone(), request.image_bytes.clone()));
      self.received.push(request);
      Ok(())
    }

    fn poll_response(&mut self) -> Option<OutgoingResponse> {
      self.done.pop_front()
    }
  }

  #[fixture]
  fn established() -> Session<Echo> {
    let mut session = Session::new(SessionConfig::default(), Echo::default());
    session.connect().unwrap();
    session.handle_event(TransportEvent::Established).unwrap();
    session
  }

  fn fragment(data: &[u8], is_final: bool) -> TransportEvent {
    TransportEvent::Fragment {
      data: data.to_vec(),
      is_final,
    }
  }

  #[test]
  fn connect_walks_through_connecting() {
    let mut session = Session::new(SessionConfig::default(), Echo::default());
    assert_eq!(session.state(), SessionState::Disconnected);
    session.connect().unwrap();
    assert_eq!(session.state(), SessionState::Connecting);
    assert_eq!(
      session.connect(),
      Err(SessionError::InvalidState(SessionState::Connecting))
    );
    session.handle_event(TransportEvent::Established).unwrap();
    assert_eq!(session.state(), SessionState::Established);
  }

  #[test]
  fn connection_failure_is_terminal() {
    let mut session = Session::new(SessionConfig::default(), Echo::default());
    session.connect().unwrap();
    assert_eq!(
      session.handle_event(TransportEvent::ConnectionFailed("refused".into())),
      Err(SessionError::ConnectionFailed("refused".into()))
    );
    assert_eq!(session.state(), SessionState::Disconnected);
    assert!(session.is_terminated());
    assert_eq!(session.connect(), Err(SessionError::Terminated));
  }

  #[rstest]
  fn fragments_stay_receiving_until_final(mut established: Session<Echo>) {
    let message = encode_request("r-1", b"jpeg-bytes");
    let (head, tail) = message.split_at(7);

    established.handle_event(fragment(head, false)).unwrap();
    assert_eq!(established.state(), SessionState::Receiving);
    assert!(established.dispatcher().received.is_empty());

    established.handle_event(fragment(tail, true)).unwrap();
    assert_eq!(established.state(), SessionState::Established);
    assert_eq!(
      established.dispatcher().received,
      vec![DecodedRequest {
        request_id: "r-1".into(),
        image_bytes: b"jpeg-bytes".to_vec(),
      }]
    );
  }

  #[rstest]
  fn response_is_correlated_and_encoded(mut established: Session<Echo>) {
    established
      .handle_event(fragment(&encode_request("corr-7", b"img"), true))
      .unwrap();

    let bytes = established.poll_outgoing().unwrap();
    let response = decode_response(&bytes).unwrap();
    assert_eq!(response.request_id, "corr-7");
    assert_eq!(response.status, ResponseStatus::Ok);
    assert_eq!(response.image_bytes, b"img");
    assert!(established.poll_outgoing().is_none());
    assert_eq!(
      established.stats(),
      SessionStats {
        requests: 1,
        responses: 1,
        dropped: 0
      }
    );
  }

  #[rstest]
  #[case::too_short(vec![1, 2])]
  #[case::truncated(vec![200, 0, 0, 0, b'{'])]
  #[case::bad_json({
    let mut v = 3u32.to_le_bytes().to_vec();
    v.extend_from_slice(b"???payload");
    v
  })]
  fn malformed_message_is_dropped_and_session_recovers(
    mut established: Session<Echo>,
    #[case] garbage: Vec<u8>,
  ) {
    established.handle_event(fragment(&garbage, true)).unwrap();
    assert_eq!(established.state(), SessionState::Established);
    assert!(!established.is_terminated());
    assert_eq!(established.stats().dropped, 1);

    established
      .handle_event(fragment(&encode_request("next", b"x"), true))
      .unwrap();
    assert_eq!(established.dispatcher().received.len(), 1);
  }

  #[test]
  fn oversized_message_fails_the_session() {
    let mut session = Session::new(
      SessionConfig {
        max_message_size: 8,
      },
      Echo::default(),
    );
    session.connect().unwrap();
    session.handle_event(TransportEvent::Established).unwrap();

    session.handle_event(fragment(&[0; 6], false)).unwrap();
    assert!(matches!(
      session.handle_event(fragment(&[0; 6], true)),
      Err(SessionError::Reassembly(ReassemblyError::MessageTooLarge { limit: 8, size: 12 }))
    ));
    assert_eq!(session.state(), SessionState::Disconnected);
    assert!(session.is_terminated());
  }

  #[rstest]
  fn transport_error_discards_partial_message(mut established: Session<Echo>) {
    established.handle_event(fragment(b"partial", false)).unwrap();
    assert_eq!(
      established.handle_event(TransportEvent::Error("reset by peer".into())),
      Err(SessionError::Transport("reset by peer".into()))
    );
    assert_eq!(established.state(), SessionState::Disconnected);

    // 终态后事件被忽略
    established
      .handle_event(fragment(&encode_request("late", b"x"), true))
      .unwrap();
    assert!(established.dispatcher().received.is_empty());
  }

  #[rstest]
  fn closed_event_ends_session_cleanly(mut established: Session<Echo>) {
    established.handle_event(TransportEvent::Closed).unwrap();
    assert_eq!(established.state(), SessionState::Disconnected);
    assert!(established.is_terminated());
    assert!(established.poll_outgoing().is_none());
  }

  #[rstest]
  fn closed_dispatcher_is_fatal(mut established: Session<Echo>) {
    established.dispatcher.closed = true;
    assert_eq!(
      established.handle_event(fragment(&encode_request("r", b"x"), true)),
      Err(SessionError::Dispatch(DispatchError::Closed))
    );
    assert!(established.is_terminated());
  }

  #[test]
  fn fragments_before_established_are_ignored() {
    let mut session = Session::new(SessionConfig::default(), Echo::default());
    session.connect().unwrap();
    session
      .handle_event(fragment(&encode_request("early", b"x"), true))
      .unwrap();
    assert_eq!(session.state(), SessionState::Connecting);
    assert!(session.dispatcher().received.is_empty());
  }
}
