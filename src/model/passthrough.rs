// 该文件是 SegRelay （山南西风） 项目的一部分。
// src/model/passthrough.rs - 直通模型
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::convert::Infallible;

use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::RgbNhwcFrame,
  model::{Model, SegmentResult},
};

/// 不做任何检测的模型，请求图像原样返回
#[derive(Debug, Default)]
pub struct PassthroughModel<const W: u32, const H: u32>;

impl<const W: u32, const H: u32> FromUrlWithScheme for PassthroughModel<W, H> {
  const SCHEME: &'static str = "passthrough";
}

impl<const W: u32, const H: u32> FromUrl for PassthroughModel<W, H> {
  type Error = Infallible;

  fn from_url(_url: &Url) -> Result<Self, Self::Error> {
    Ok(PassthroughModel)
  }
}

impl<const W: u32, const H: u32> Model for PassthroughModel<W, H> {
  type Input = RgbNhwcFrame<W, H>;
  type Output = SegmentResult;
  type Error = Infallible;

  fn infer(&self, _input: &Self::Input) -> Result<Self::Output, Self::Error> {
    Ok(SegmentResult::default())
  }
}
