// 该文件是 Mingjing （明镜） 项目的一部分。
// src/config.rs - 运行参数配置
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

use serde::Serialize;
use thiserror::Error;

/// 掩码二值化阈值
pub const MASK_THRESHOLD: f32 = 0.5;

const DEFAULT_IMG_SIZE: u32 = 1024;
const DEFAULT_CONF_TH: f32 = 0.01;
const DEFAULT_IOU_TH: f32 = 0.30;
const DEFAULT_MAX_DET: usize = 50;

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
  #[error("置信度阈值必须位于 0 与 1 之间: {0}")]
  ConfidenceOutOfRange(f32),
  #[error("IoU 阈值必须位于 0 与 1 之间: {0}")]
  IouOutOfRange(f32),
  #[error("图像尺寸必须大于 0")]
  ZeroImageSize,
}

/// 推理参数，交给检测模型使用
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InferenceParams {
  /// 推理时的图像缩放尺寸
  pub img_size: u32,
  /// 置信度阈值 (0.0 - 1.0)
  pub conf_th: f32,
  /// NMS IoU 阈值 (0.0 - 1.0)
  pub iou_th: f32,
  /// 最多返回的检测数量
  pub max_det: usize,
  /// 是否输出原图分辨率的掩码
  pub retina_masks: bool,
}

impl Default for InferenceParams {
  fn default() -> Self {
    Self {
      img_size: DEFAULT_IMG_SIZE,
      conf_th: DEFAULT_CONF_TH,
      iou_th: DEFAULT_IOU_TH,
      max_det: DEFAULT_MAX_DET,
      retina_masks: true,
    }
  }
}

impl InferenceParams {
  pub fn with_thresholds(mut self, conf_th: f32, iou_th: f32) -> Self {
    self.conf_th = conf_th;
    self.iou_th = iou_th;
    self
  }
}

/// 二分类判决参数
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecisionConfig {
  /// 掩码最小面积（像素），0 表示不做面积过滤
  pub min_mask_area: u32,
  /// 掩码二值化阈值
  pub mask_threshold: f32,
}

impl Default for DecisionConfig {
  fn default() -> Self {
    Self {
      min_mask_area: 0,
      mask_threshold: MASK_THRESHOLD,
    }
  }
}

/// 类别名称别名表（名称均为归一化之后的形式）
#[derive(Debug, Clone, PartialEq)]
pub struct AliasTable {
  pub positive: Vec<String>,
  pub negative: Vec<String>,
}

impl Default for AliasTable {
  fn default() -> Self {
    Self {
      positive: vec!["tumor".into(), "meningioma".into()],
      negative: vec![
        "notumor".into(),
        "healthy".into(),
        "normal".into(),
        "background".into(),
      ],
    }
  }
}

impl AliasTable {
  pub fn is_positive(&self, normalized: &str) -> bool {
    self.positive.iter().any(|alias| alias == normalized)
  }

  pub fn is_negative(&self, normalized: &str) -> bool {
    self.negative.iter().any(|alias| alias == normalized)
  }
}

/// 叠加图绘制样式
#[derive(Debug, Clone, PartialEq)]
pub struct OverlayStyle {
  /// 使用高亮色绘制的类别（归一化名称）
  pub highlight_class: String,
  pub highlight_mask: [u8; 4],
  pub highlight_outline: [u8; 4],
  pub default_mask: [u8; 4],
  pub default_outline: [u8; 4],
  pub label_background: [u8; 4],
  pub label_text: [u8; 4],
  /// 边框线宽（像素）
  pub outline_width: u32,
  pub font_size: f32,
  /// 标签文字四周留白（像素）
  pub label_padding: u32,
  pub mask_threshold: f32,
}

impl Default for OverlayStyle {
  fn default() -> Self {
    Self {
      highlight_class: "meningioma".into(),
      highlight_mask: [255, 0, 0, 120],
      highlight_outline: [255, 0, 0, 255],
      default_mask: [30, 144, 255, 120],
      default_outline: [30, 144, 255, 255],
      label_background: [0, 0, 0, 160],
      label_text: [255, 255, 255, 255],
      outline_width: 3,
      font_size: 16.0,
      label_padding: 2,
      mask_threshold: MASK_THRESHOLD,
    }
  }
}

/// 整体运行配置
#[derive(Debug, Clone, Default)]
pub struct Settings {
  pub inference: InferenceParams,
  pub decision: DecisionConfig,
  pub overlay: OverlayStyle,
  pub aliases: AliasTable,
  /// 类别表无法判定时使用的阳性类别
  pub default_positive_class: u32,
  /// 是否在结果中附带诊断信息
  pub debug: bool,
}

impl Settings {
  /// 在调用方边界检查阈值，判决过程本身不再检查
  pub fn validate(&self) -> Result<(), ConfigError> {
    let InferenceParams {
      img_size,
      conf_th,
      iou_th,
      ..
    } = self.inference;

    if !(0.0..=1.0).contains(&conf_th) {
      return Err(ConfigError::ConfidenceOutOfRange(conf_th));
    }
    if !(0.0..=1.0).contains(&iou_th) {
      return Err(ConfigError::IouOutOfRange(iou_th));
    }
    if img_size == 0 {
      return Err(ConfigError::ZeroImageSize);
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn defaults_follow_deployment_values() {
    let settings = Settings::default();
    assert_eq!(settings.inference.img_size, 1024);
    assert_eq!(settings.inference.max_det, 50);
    assert_eq!(settings.decision.min_mask_area, 0);
    assert_eq!(settings.default_positive_class, 0);
    assert!(!settings.debug);
    assert!(settings.validate().is_ok());
  }

  #[test]
  fn validate_rejects_thresholds_outside_unit_range() {
    let mut settings = Settings::default();
    settings.inference.conf_th = 1.5;
    assert_eq!(
      settings.validate(),
      Err(ConfigError::ConfidenceOutOfRange(1.5))
    );

    settings.inference.conf_th = 0.2;
    settings.inference.iou_th = -0.1;
    assert_eq!(settings.validate(), Err(ConfigError::IouOutOfRange(-0.1)));
  }

  #[test]
  fn alias_table_matches_normalized_names_only() {
    let aliases = AliasTable::default();
    assert!(aliases.is_positive("meningioma"));
    assert!(aliases.is_negative("notumor"));
    assert!(!aliases.is_negative("No Tumor"));
  }
}
