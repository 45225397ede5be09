// 该文件是 SegRelay （山南西风） 项目的一部分。
// src/task.rs - 请求处理与连接任务
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

use std::{
  sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
    mpsc::{self, Receiver, SyncSender, TrySendError},
  },
  thread::{self, JoinHandle},
  time::{Duration, Instant},
};

use ab_glyph::FontArc;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::{
  frame::RgbNhwcFrame,
  model::{Model, SegmentResult},
  output::{Draw, ImageCodecError, OutputFormat, Render, RenderError, decode_image, encode_image},
  protocol::{DecodedRequest, OutgoingResponse},
  session::{Dispatch, DispatchError, Session, SessionError, SessionStats},
  transport::{Transport, TransportEvent},
};

#[derive(Error, Debug)]
pub enum PipelineError {
  #[error("{0}")]
  Image(#[from] ImageCodecError),
  #[error("推理引擎错误: {0}")]
  EngineError(Box<dyn std::error::Error + Send + Sync>),
  #[error("绘制错误: {0}")]
  Render(#[from] RenderError),
}

/// 处理单个请求并总是给出一条关联响应
pub trait Process {
  fn process(&self, request: DecodedRequest) -> OutgoingResponse;
}

/// 请求编排：解码图像、缩放到工作分辨率、推理、绘制、编码
pub struct Pipeline<const W: u32, const H: u32, M> {
  model: M,
  draw: Draw,
  output_format: OutputFormat,
}

impl<const W: u32, const H: u32, M> Pipeline<W, H, M>
where
  M: Model<Input = RgbNhwcFrame<W, H>, Output = SegmentResult>,
  M::Error: std::error::Error + Send + Sync + 'static,
{
  pub fn new(model: M, font: Option<FontArc>, output_format: OutputFormat) -> Self {
    Self {
      model,
      draw: Draw::new(W, H, font),
      output_format,
    }
  }

  pub fn try_process(&self, request: &DecodedRequest) -> Result<Vec<u8>, PipelineError> {
    let mut image = decode_image(&request.image_bytes)?;
    debug!("图像尺寸: {}x{}", image.width(), image.height());

    let frame = RgbNhwcFrame::<W, H>::resized_from(&image);

    let now = Instant::now();
    let result = self
      .model
      .infer(&frame)
      .map_err(|e| PipelineError::EngineError(Box::new(e)))?;
    let infer_elapsed = now.elapsed();

    self.draw.render_result(&mut image, &result)?;
    let render_elapsed = now.elapsed();
    info!(
      "请求 {}: 检测到 {} 个对象, 推理耗时 {:.2?}, 累计 {:.2?}",
      request.request_id,
      result.items.len(),
      infer_elapsed,
      render_elapsed
    );

    Ok(encode_image(&image, self.output_format)?)
  }
}

impl<const W: u32, const H: u32, M> Process for Pipeline<W, H, M>
where
  M: Model<Input = RgbNhwcFrame<W, H>, Output = SegmentResult>,
  M::Error: std::error::Error + Send + Sync + 'static,
{
  fn process(&self, request: DecodedRequest) -> OutgoingResponse {
    match self.try_process(&request) {
      Ok(image_bytes) => OutgoingResponse::ok(request.request_id, image_bytes),
      Err(e) => {
        error!("请求 {} 处理失败: {}", request.request_id, e);
        OutgoingResponse::error(request.request_id, e.to_string())
      }
    }
  }
}

/// 有界请求队列与单个工作线程。工作线程独占处理流水线（包括推理上下文），响应按请求顺序返回。
pub struct WorkerQueue {
  requests: Option<SyncSender<DecodedRequest>>,
  responses: Receiver<OutgoingResponse>,
  worker: Option<JoinHandle<()>>,
}

impl WorkerQueue {
  pub fn spawn<P: Process + Send + 'static>(processor: P, depth: usize) -> std::io::Result<Self> {
    let (request_tx, request_rx) = mpsc::sync_channel::<DecodedRequest>(depth.max(1));
    let (response_tx, response_rx) = mpsc::channel();

    let worker = thread::Builder::new()
      .name("segrelay-worker".to_string())
      .spawn(move || {
        info!("工作线程启动");
        for request in request_rx {
          let response = processor.process(request);
          if response_tx.send(response).is_err() {
            warn!("响应通道已关闭，工作线程退出");
            break;
          }
        }
        info!("工作线程退出");
      })?;

    Ok(Self {
      requests: Some(request_tx),
      responses: response_rx,
      worker: Some(worker),
    })
  }

  /// 关闭请求队列并等待工作线程处理完已入队的请求
  pub fn shutdown(&mut self) {
    self.requests.take();
    if let Some(worker) = self.worker.take()
      && worker.join().is_err()
    {
      error!("工作线程异常退出");
    }
  }
}

impl Dispatch for WorkerQueue {
  fn dispatch(&mut self, request: DecodedRequest) -> Result<(), DispatchError> {
    let sender = self.requests.as_ref().ok_or(DispatchError::Closed)?;
    match sender.try_send(request) {
      Ok(()) => Ok(()),
      Err(TrySendError::Full(request)) => {
        warn!("处理队列已满，等待请求 {} 入队", request.request_id);
        sender.send(request).map_err(|_| DispatchError::Closed)
      }
      Err(TrySendError::Disconnected(_)) => Err(DispatchError::Closed),
    }
  }

  fn poll_response(&mut self) -> Option<OutgoingResponse> {
    self.responses.try_recv().ok()
  }
}

impl Drop for WorkerQueue {
  fn drop(&mut self) {
    self.shutdown();
  }
}

pub trait Task<T, D>: Sized {
  type Error;
  fn run_task(self, transport: T, session: Session<D>) -> Result<SessionStats, Self::Error>;
}

/// 单连接协作式轮询循环：取一个传输事件交给会话，再把已完成的响应全部发出
#[derive(Default, Debug)]
pub struct ConnectionTask {
  stop: Arc<AtomicBool>,
}

impl ConnectionTask {
  pub fn with_stop_flag(mut self, stop: Arc<AtomicBool>) -> Self {
    self.stop = stop;
    self
  }

  /// 安装 Ctrl-C 处理器。进程内只能安装一次。
  pub fn with_interrupt_handler(self) -> Result<Self, ctrlc::Error> {
    let stop = self.stop.clone();
    ctrlc::set_handler(move || {
      info!("收到中断信号，准备退出...");
      stop.store(true, Ordering::SeqCst);
      thread::spawn(|| {
        thread::sleep(Duration::from_secs(30));
        warn!("强制退出程序");
        std::process::exit(1);
      });
    })?;
    Ok(self)
  }
}

/// 发出所有已完成的响应；发送失败作为传输层错误交给会话
fn flush_outgoing<T: Transport, D: Dispatch>(
  transport: &mut T,
  session: &mut Session<D>,
) -> Result<(), SessionError> {
  while let Some(bytes) = session.poll_outgoing() {
    if let Err(e) = transport.send(bytes) {
      error!("发送失败: {}", e);
      session.handle_event(TransportEvent::Error(e.to_string()))?;
    }
  }
  Ok(())
}

impl<T: Transport, D: Dispatch> Task<T, D> for ConnectionTask {
  type Error = anyhow::Error;

  fn run_task(self, mut transport: T, mut session: Session<D>) -> Result<SessionStats, Self::Error> {
    info!("开始任务...");
    session.connect()?;
    transport.connect();

    while !session.is_terminated() {
      if self.stop.load(Ordering::SeqCst) {
        warn!("中断信号接收，退出任务循环");
        break;
      }

      // 读取可能阻塞一个轮询间隔，先把已完成的响应发出
      let step = flush_outgoing(&mut transport, &mut session).and_then(|()| {
        match transport.poll_event() {
          Some(event) => session.handle_event(event),
          None => Ok(()),
        }
      });
      if let Err(e) = step {
        transport.close();
        return Err(e.into());
      }
    }

    transport.close();
    let stats = session.stats();
    info!(
      "任务完成，退出: 请求 {} 个, 响应 {} 个, 丢弃 {} 个",
      stats.requests, stats.responses, stats.dropped
    );
    Ok(stats)
  }
}

#[cfg(test)]
mod tests {
  use image::{Rgb, RgbImage};

  use super::*;
  use crate::{
    model::{DetectItem, FixtureModel, PassthroughModel},
    output::palette::PALETTE,
    protocol::ResponseStatus,
  };

  fn png(image: &RgbImage) -> Vec<u8> {
    encode_image(image, OutputFormat::Png).unwrap()
  }

  fn request(id: &str, image_bytes: Vec<u8>) -> DecodedRequest {
    DecodedRequest {
      request_id: id.to_string(),
      image_bytes,
    }
  }

  #[test]
  fn passthrough_returns_same_pixels() {
    let pipeline: Pipeline<8, 8, PassthroughModel<8, 8>> =
      Pipeline::new(PassthroughModel, None, OutputFormat::Png);
    let image = RgbImage::from_fn(12, 6, |x, y| Rgb([x as u8, y as u8, 3]));

    let response = pipeline.process(request("p-1", png(&image)));
    assert_eq!(response.request_id, "p-1");
    assert!(response.is_ok());
    assert_eq!(decode_image(&response.image_bytes).unwrap(), image);
  }

  #[test]
  fn fixture_masks_are_blended_at_original_resolution() {
    let model = FixtureModel::<4, 4>::new(vec![DetectItem {
      class_id: 4,
      score: 0.9,
      bbox: [2.0, 2.0, 4.0, 4.0],
    }]);
    let pipeline = Pipeline::new(model, None, OutputFormat::Png);
    let image = RgbImage::from_pixel(64, 64, Rgb([0, 0, 0]));

    let response = pipeline.process(request("f-1", png(&image)));
    let annotated = decode_image(&response.image_bytes).unwrap();
    assert_eq!(annotated.dimensions(), (64, 64));

    // 掩码值 class_id + 1 = 5；工作像素 (3, 3) 映射到框内部的 (48, 48)
    let color = PALETTE[5];
    let blended = Rgb([
      (color[0] as f32 * 0.5).round() as u8,
      (color[1] as f32 * 0.5).round() as u8,
      (color[2] as f32 * 0.5).round() as u8,
    ]);
    assert_eq!(blended, Rgb([36, 125, 5]));
    assert_eq!(*annotated.get_pixel(48, 48), blended);
    assert_eq!(*annotated.get_pixel(40, 40), Rgb([0, 0, 0]));
    assert_eq!(*annotated.get_pixel(32, 40), Rgb([0, 0, 255]));
    assert_eq!(*annotated.get_pixel(10, 60), Rgb([0, 0, 0]));
  }

  #[test]
  fn undecodable_image_yields_error_response() {
    let pipeline: Pipeline<8, 8, PassthroughModel<8, 8>> =
      Pipeline::new(PassthroughModel, None, OutputFormat::default());
    let response = pipeline.process(request("bad-1", b"not an image".to_vec()));

    assert_eq!(response.request_id, "bad-1");
    assert!(matches!(response.status, ResponseStatus::Error(_)));
    assert!(response.image_bytes.is_empty());
  }

  #[derive(Debug, Error)]
  #[error("engine exploded")]
  struct Broken;

  struct BrokenModel;

  impl Model for BrokenModel {
    type Input = RgbNhwcFrame<4, 4>;
    type Output = SegmentResult;
    type Error = Broken;

    fn infer(&self, _input: &Self::Input) -> Result<Self::Output, Self::Error> {
      Err(Broken)
    }
  }

  #[test]
  fn engine_failure_yields_error_response() {
    let pipeline = Pipeline::new(BrokenModel, None, OutputFormat::Png);
    let image = RgbImage::from_pixel(4, 4, Rgb([1, 2, 3]));
    let response = pipeline.process(request("e-1", png(&image)));

    assert_eq!(response.request_id, "e-1");
    assert_eq!(
      response.status,
      ResponseStatus::Error("推理引擎错误: engine exploded".into())
    );
  }

  struct Tag;

  impl Process for Tag {
    fn process(&self, request: DecodedRequest) -> OutgoingResponse {
      OutgoingResponse::ok(request.request_id, request.image_bytes)
    }
  }

  #[test]
  fn worker_queue_preserves_order() {
    let mut queue = WorkerQueue::spawn(Tag, 2).unwrap();
    for i in 0..16 {
      queue
        .dispatch(request(&format!("q-{i}"), vec![i as u8]))
        .unwrap();
    }

    let mut ids = Vec::new();
    let deadline = Instant::now() + Duration::from_secs(10);
    while ids.len() < 16 && Instant::now() < deadline {
      match queue.poll_response() {
        Some(response) => ids.push(response.request_id),
        None => thread::sleep(Duration::from_millis(1)),
      }
    }

    let expected: Vec<String> = (0..16).map(|i| format!("q-{i}")).collect();
    assert_eq!(ids, expected);
  }

  #[test]
  fn shutdown_closes_the_queue() {
    let mut queue = WorkerQueue::spawn(Tag, 1).unwrap();
    queue.shutdown();
    assert_eq!(
      queue.dispatch(request("late", vec![])),
      Err(DispatchError::Closed)
    );
  }
}
