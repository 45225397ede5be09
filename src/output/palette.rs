// 该文件是 SegRelay （山南西风） 项目的一部分。
// src/output/palette.rs - 分割掩码调色板
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

pub const PALETTE_SIZE: usize = 20;

/// 实例掩码配色，RGB 顺序
pub const PALETTE: [[u8; 3]; PALETTE_SIZE] = [
  [255, 56, 56],
  [255, 157, 151],
  [255, 112, 31],
  [255, 178, 29],
  [207, 210, 49],
  [72, 249, 10],
  [146, 204, 23],
  [61, 219, 134],
  [26, 147, 52],
  [0, 212, 187],
  [44, 153, 168],
  [0, 194, 255],
  [52, 69, 147],
  [100, 115, 255],
  [0, 24, 236],
  [132, 56, 255],
  [82, 0, 133],
  [203, 56, 255],
  [255, 149, 200],
  [255, 55, 199],
];

pub fn color_index(value: u32) -> usize {
  value as usize % PALETTE_SIZE
}

pub fn palette_color(value: u32) -> [u8; 3] {
  PALETTE[color_index(value)]
}
