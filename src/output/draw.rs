// 该文件是 Mingjing （明镜） 项目的一部分。
// src/output/draw.rs - 分割结果叠加图绘制
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::io::Cursor;

use ab_glyph::{FontArc, PxScale};
use image::{DynamicImage, ImageFormat, Pixel, Rgba, RgbaImage};
use imageproc::drawing::{draw_text_mut, text_size};
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::{
  config::OverlayStyle,
  model::{ClassMap, DetectItem, DetectResult},
  resolver::normalize_class_name,
};

static DEFAULT_FONT: &[u8] = include_bytes!("../../assets/DejaVuSans.ttf");

#[derive(Error, Debug)]
pub enum OverlayError {
  #[error("无法加载字体: {0}")]
  InvalidFont(#[from] ab_glyph::InvalidFont),
}

/// 叠加图绘制器
///
/// 在原图上依次叠加半透明掩码、检测框和标签，绘制的是模型的全部原始输出，
/// 与判决结果无关。绘制器本身不可变，可在多个线程间共享。
pub struct OverlayRenderer {
  style: OverlayStyle,
  font: FontArc,
}

struct Palette {
  mask: Rgba<u8>,
  outline: Rgba<u8>,
}

impl OverlayRenderer {
  pub fn new(style: OverlayStyle) -> Result<Self, OverlayError> {
    let font = FontArc::try_from_slice(DEFAULT_FONT)?;
    Ok(Self { style, font })
  }

  pub fn with_font(style: OverlayStyle, font: FontArc) -> Self {
    Self { style, font }
  }

  pub fn style(&self) -> &OverlayStyle {
    &self.style
  }

  /// 绘制叠加图并编码为 PNG
  ///
  /// 原图缺失或编码失败时返回 `None`，调用方应当跳过叠加图而不是报错。
  pub fn render(
    &self,
    original: Option<&DynamicImage>,
    detections: &DetectResult,
    class_map: &ClassMap,
  ) -> Option<Vec<u8>> {
    let Some(original) = original else {
      warn!("原图不可用，跳过叠加图绘制");
      return None;
    };

    let image = self.render_image(original, detections, class_map);
    let mut buffer = Cursor::new(Vec::new());
    match image.write_to(&mut buffer, ImageFormat::Png) {
      Ok(()) => Some(buffer.into_inner()),
      Err(e) => {
        error!("叠加图 PNG 编码失败: {}", e);
        None
      }
    }
  }

  /// 绘制叠加图，返回与原图同尺寸的 RGBA 图像
  pub fn render_image(
    &self,
    original: &DynamicImage,
    detections: &DetectResult,
    class_map: &ClassMap,
  ) -> RgbaImage {
    let mut image = original.to_rgba8();
    if image.width() == 0 || image.height() == 0 {
      return image;
    }

    // 先画全部掩码，再画框与标签，保证标签不被后面的掩码覆盖
    if detections.has_masks() {
      for item in detections.items.iter() {
        self.draw_mask(&mut image, item, class_map);
      }
    }

    for item in detections.items.iter() {
      let palette = self.palette(item.class_id, class_map);
      self.draw_bbox(&mut image, &item.bbox, palette.outline);
      self.draw_label(&mut image, item, class_map);
    }

    debug!(
      "叠加图绘制完成: {}x{}, {} 个检测",
      image.width(),
      image.height(),
      detections.len()
    );
    image
  }

  fn palette(&self, class_id: u32, class_map: &ClassMap) -> Palette {
    let highlighted = class_map
      .name(class_id)
      .map(|name| normalize_class_name(name) == self.style.highlight_class)
      .unwrap_or(false);

    if highlighted {
      Palette {
        mask: Rgba(self.style.highlight_mask),
        outline: Rgba(self.style.highlight_outline),
      }
    } else {
      Palette {
        mask: Rgba(self.style.default_mask),
        outline: Rgba(self.style.default_outline),
      }
    }
  }

  fn draw_mask(&self, image: &mut RgbaImage, item: &DetectItem, class_map: &ClassMap) {
    let Some(mask) = &item.mask else {
      return;
    };
    if !mask.any_above(self.style.mask_threshold) {
      return;
    }
    if (mask.width, mask.height) != image.dimensions() {
      warn!(
        "掩码尺寸 {}x{} 与图像 {}x{} 不一致，超出部分将被忽略",
        mask.width,
        mask.height,
        image.width(),
        image.height()
      );
    }

    let color = self.palette(item.class_id, class_map).mask;
    for (x, y) in mask.pixels_above(self.style.mask_threshold) {
      if x < image.width() && y < image.height() {
        image.get_pixel_mut(x, y).blend(&color);
      }
    }
  }

  // 绘制矩形边框，bbox 为像素坐标 [x_min, y_min, x_max, y_max]
  // 落在图像外的边不画，只画图像内可见的部分
  fn draw_bbox(&self, image: &mut RgbaImage, bbox: &[f32; 4], color: Rgba<u8>) {
    if !bbox.iter().all(|v| v.is_finite()) {
      return;
    }
    let (w, h) = (image.width() as f32, image.height() as f32);

    let x_min = bbox[0].floor();
    let y_min = bbox[1].floor();
    let x_max = bbox[2].ceil();
    let y_max = bbox[3].ceil();
    if x_min >= x_max || y_min >= y_max {
      return;
    }

    let inside = |v: f32, limit: f32| (v >= 0.0 && v < limit).then_some(v as i32);
    let left = inside(x_min, w);
    let top = inside(y_min, h);
    let right = inside(x_max, w);
    let bottom = inside(y_max, h);

    let (x_lo, x_hi) = (x_min.max(0.0) as i32, x_max.min(w - 1.0) as i32);
    let (y_lo, y_hi) = (y_min.max(0.0) as i32, y_max.min(h - 1.0) as i32);
    if x_lo > x_hi || y_lo > y_hi {
      return;
    }

    for thickness in 0..self.style.outline_width as i32 {
      if let Some(y) = top.map(|t| t + thickness).filter(|&y| y <= y_hi) {
        for x in x_lo..=x_hi {
          image.put_pixel(x as u32, y as u32, color);
        }
      }
      if let Some(y) = bottom.map(|b| b - thickness).filter(|&y| y >= y_lo) {
        for x in x_lo..=x_hi {
          image.put_pixel(x as u32, y as u32, color);
        }
      }
      if let Some(x) = left.map(|l| l + thickness).filter(|&x| x <= x_hi) {
        for y in y_lo..=y_hi {
          image.put_pixel(x as u32, y as u32, color);
        }
      }
      if let Some(x) = right.map(|r| r - thickness).filter(|&x| x >= x_lo) {
        for y in y_lo..=y_hi {
          image.put_pixel(x as u32, y as u32, color);
        }
      }
    }
  }

  // 在边框上方绘制标签，位置始终夹在图像内部
  fn draw_label(&self, image: &mut RgbaImage, item: &DetectItem, class_map: &ClassMap) {
    let name = class_map
      .name(item.class_id)
      .map(normalize_class_name)
      .filter(|name| !name.is_empty())
      .unwrap_or_else(|| item.class_id.to_string());
    let label = format!("{} {:.2}", name, item.score);

    let scale = PxScale::from(self.style.font_size);
    let (text_w, text_h) = text_size(scale, &self.font, &label);
    let pad = self.style.label_padding as i32;
    let tag_w = text_w as i32 + 2 * pad;
    let tag_h = text_h as i32 + 2 * pad;

    let (w, h) = (image.width() as i32, image.height() as i32);
    // 先把锚点夹到图像范围内，极端坐标不会参与整数运算
    let anchor = |v: f32, limit: i32| {
      if v.is_finite() { v.clamp(0.0, limit as f32) as i32 } else { 0 }
    };
    let anchor_x = anchor(item.bbox[0], w);
    let anchor_y = anchor(item.bbox[1], h);

    let tag_x = anchor_x.min(w - tag_w).max(0);
    let tag_y = (anchor_y - tag_h).min(h - tag_h).max(0);

    let background = Rgba(self.style.label_background);
    for y in tag_y..(tag_y + tag_h).min(h) {
      for x in tag_x..(tag_x + tag_w).min(w) {
        image.get_pixel_mut(x as u32, y as u32).blend(&background);
      }
    }

    draw_text_mut(
      image,
      Rgba(self.style.label_text),
      tag_x + pad,
      tag_y + pad,
      scale,
      &self.font,
      &label,
    );
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::Mask;

  fn renderer() -> OverlayRenderer {
    OverlayRenderer::new(OverlayStyle::default()).unwrap()
  }

  fn gray(width: u32, height: u32) -> DynamicImage {
    DynamicImage::ImageRgb8(image::RgbImage::from_pixel(width, height, image::Rgb([128, 128, 128])))
  }

  fn names() -> ClassMap {
    [(0, "Glioma"), (1, "Meningioma")].into_iter().collect()
  }

  #[test]
  fn empty_detections_keep_dimensions_and_pixels() {
    let original = gray(64, 48);
    let image = renderer().render_image(&original, &DetectResult::default(), &names());
    assert_eq!(image.dimensions(), (64, 48));
    assert_eq!(image, original.to_rgba8());

    let bytes = renderer()
      .render(Some(&original), &DetectResult::default(), &names())
      .unwrap();
    let decoded = image::load_from_memory(&bytes).unwrap();
    assert_eq!((decoded.width(), decoded.height()), (64, 48));
  }

  #[test]
  fn missing_original_gives_no_overlay() {
    let detections = DetectResult::new(vec![DetectItem::new(0, 0.5, [1.0, 1.0, 5.0, 5.0])]);
    assert!(renderer().render(None, &detections, &names()).is_none());
  }

  #[test]
  fn box_at_top_edge_keeps_label_inside() {
    let detections = DetectResult::new(vec![
      DetectItem::new(0, 0.91, [2.0, 0.0, 40.0, 30.0]),
      DetectItem::new(7, 0.33, [60.0, 0.0, 80.0, 10.0]),
    ]);
    let image = renderer().render_image(&gray(80, 60), &detections, &names());
    assert_eq!(image.dimensions(), (80, 60));
    // 标签背景贴着图像上边缘
    assert_ne!(*image.get_pixel(3, 0), Rgba([128, 128, 128, 255]));
  }

  #[test]
  fn outline_uses_category_colors() {
    let style = OverlayStyle::default();
    let detections = DetectResult::new(vec![
      DetectItem::new(1, 0.9, [10.0, 30.0, 30.0, 50.0]),
      DetectItem::new(0, 0.9, [50.0, 30.0, 70.0, 50.0]),
    ]);
    let image = renderer().render_image(&gray(80, 60), &detections, &names());

    assert_eq!(*image.get_pixel(10, 45), Rgba(style.highlight_outline));
    assert_eq!(*image.get_pixel(12, 45), Rgba(style.highlight_outline));
    assert_eq!(*image.get_pixel(13, 45), Rgba([128, 128, 128, 255]));
    assert_eq!(*image.get_pixel(70, 45), Rgba(style.default_outline));
  }

  #[test]
  fn masks_are_blended_in_category_color() {
    let mut data = vec![0.0; 80 * 60];
    data[45 * 80 + 20] = 0.8;
    let mask = Mask::new(80, 60, data).unwrap();
    let detections = DetectResult::new(vec![
      DetectItem::new(1, 0.9, [10.0, 30.0, 30.0, 50.0]).with_mask(mask),
    ]);
    let image = renderer().render_image(&gray(80, 60), &detections, &names());

    let tinted = image.get_pixel(20, 45);
    assert!(tinted[0] > 128);
    assert!(tinted[1] < 128);
    assert_eq!(tinted[3], 255);
    assert_eq!(*image.get_pixel(21, 45), Rgba([128, 128, 128, 255]));
  }

  #[test]
  fn boxes_outside_the_image_do_not_panic() {
    let detections = DetectResult::new(vec![
      DetectItem::new(0, 0.2, [-20.0, -20.0, 500.0, 500.0]),
      DetectItem::new(0, 0.2, [f32::NAN, 3.0, 4.0, f32::INFINITY]),
      DetectItem::new(0, 0.2, [5.0, 5.0, 5.0, 5.0]),
    ]);
    let image = renderer().render_image(&gray(16, 16), &detections, &names());
    assert_eq!(image.dimensions(), (16, 16));
  }

  #[test]
  fn huge_coordinates_degrade_instead_of_overflowing() {
    let detections = DetectResult::new(vec![
      DetectItem::new(0, 0.5, [0.0, -3.0e9, 10.0, 10.0]),
      DetectItem::new(0, 0.5, [-3.0e9, 0.0, 10.0, 10.0]),
      DetectItem::new(0, 0.5, [3.0e9, 3.0e9, 4.0e9, 4.0e9]),
    ]);
    let bytes = renderer().render(Some(&gray(32, 32)), &detections, &names());
    assert!(bytes.is_some());
  }

  #[test]
  fn sides_outside_the_image_are_not_drawn() {
    let style = OverlayStyle::default();
    let detections = DetectResult::new(vec![DetectItem::new(0, 0.5, [-5.0, 30.0, 20.0, 40.0])]);
    let image = renderer().render_image(&gray(48, 48), &detections, &names());

    // 左边界在图像外，不应贴着图像边缘画线
    assert_eq!(*image.get_pixel(0, 35), Rgba([128, 128, 128, 255]));
    assert_eq!(*image.get_pixel(20, 35), Rgba(style.default_outline));
    assert_eq!(*image.get_pixel(0, 40), Rgba(style.default_outline));
  }

  #[test]
  fn later_mask_is_painted_on_top() {
    let mut first = vec![0.0; 64 * 64];
    let mut second = vec![0.0; 64 * 64];
    first[10 * 64 + 10] = 0.9;
    second[10 * 64 + 10] = 0.9;
    let overlapping = |a: Vec<f32>, b: Vec<f32>, a_class: u32, b_class: u32| {
      DetectResult::new(vec![
        DetectItem::new(a_class, 0.9, [100.0; 4]).with_mask(Mask::new(64, 64, a).unwrap()),
        DetectItem::new(b_class, 0.9, [100.0; 4]).with_mask(Mask::new(64, 64, b).unwrap()),
      ])
    };

    let red_last = renderer().render_image(
      &gray(64, 64),
      &overlapping(first.clone(), second.clone(), 0, 1),
      &names(),
    );
    let blue_last = renderer().render_image(&gray(64, 64), &overlapping(first, second, 1, 0), &names());

    // 后绘制的实例颜色占优
    let red = red_last.get_pixel(10, 10);
    let blue = blue_last.get_pixel(10, 10);
    assert!(red[0] > red[2]);
    assert!(blue[2] > blue[0]);
  }
}
