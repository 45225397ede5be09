// 该文件是 SegRelay （山南西风） 项目的一部分。
// src/main.rs - 项目主程序
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

mod args;

use anyhow::Result;
use clap::Parser;
use tracing::info;

use segrelay::{
  FromUrl,
  model::ModelWrapper,
  session::Session,
  task::{ConnectionTask, Pipeline, Task, WorkerQueue},
  transport::WebSocketTransport,
};

const WORKING_WIDTH: u32 = 640;
const WORKING_HEIGHT: u32 = 640;

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = args::Args::parse();

  info!("分发服务器: {}", args.server);
  info!("推理模型: {}", args.model);
  info!("返回格式: {:?}", args.output_format());
  info!("消息上限: {} 字节", args.max_message_bytes);

  let model: ModelWrapper<WORKING_WIDTH, WORKING_HEIGHT> = ModelWrapper::from_url(&args.model)?;
  let font = args.label_font()?;
  let pipeline = Pipeline::new(model, font, args.output_format());
  let worker = WorkerQueue::spawn(pipeline, args.queue_depth)?;

  let session = Session::new(args.session_config(), worker);
  let transport = WebSocketTransport::from_url(&args.server)?
    .with_poll_interval(args.poll_interval())
    .with_max_message_size(args.max_message_bytes);

  let stats = ConnectionTask::default()
    .with_interrupt_handler()?
    .run_task(transport, session)?;

  info!("处理完成! 共响应 {} 个请求", stats.responses);
  Ok(())
}
