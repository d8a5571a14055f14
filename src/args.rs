// 该文件是 Mingjing （明镜） 项目的一部分。
// src/args.rs - 项目参数配置
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use clap::{ArgAction, Args};

use crate::config::{ConfigError, DecisionConfig, InferenceParams, Settings};

/// 筛查参数，命令行未给出时读取同名环境变量
#[derive(Args, Debug, Clone)]
pub struct SettingsArgs {
  /// 推理时的图像尺寸
  #[arg(long, env = "INFER_IMG_SIZE", default_value = "1024", value_name = "PIXELS")]
  pub img_size: u32,

  /// 置信度阈值 (0.0 - 1.0)
  #[arg(long, env = "CONF_TH", default_value = "0.01", value_name = "THRESHOLD")]
  pub conf_th: f32,

  /// NMS IoU 阈值 (0.0 - 1.0)
  #[arg(long, env = "IOU_TH", default_value = "0.30", value_name = "THRESHOLD")]
  pub iou_th: f32,

  /// 掩码最小面积（像素），0 表示不过滤
  #[arg(long, env = "MIN_MASK_AREA", default_value = "0", value_name = "PIXELS")]
  pub min_mask_area: u32,

  /// 最大检测数量
  #[arg(long, default_value = "50", value_name = "COUNT")]
  pub max_det: usize,

  /// 无法从类别名称判断时使用的阳性类别编号
  #[arg(long, default_value = "0", value_name = "CLASS_ID")]
  pub default_class: u32,

  /// 在报告中附带诊断信息
  #[arg(long, env = "DEBUG", action = ArgAction::Set, value_parser = parse_flag, default_value = "false")]
  pub debug: bool,
}

// 兼容 "1"、"true"、"yes" 这类写法
fn parse_flag(value: &str) -> Result<bool, String> {
  match value.trim().to_ascii_lowercase().as_str() {
    "1" | "true" | "yes" => Ok(true),
    "" | "0" | "false" | "no" => Ok(false),
    other => Err(format!("无法识别的开关值: {}", other)),
  }
}

impl SettingsArgs {
  pub fn into_settings(self) -> Result<Settings, ConfigError> {
    let settings = Settings {
      inference: InferenceParams {
        img_size: self.img_size,
        conf_th: self.conf_th,
        iou_th: self.iou_th,
        max_det: self.max_det,
        ..InferenceParams::default()
      },
      decision: DecisionConfig {
        min_mask_area: self.min_mask_area,
        ..DecisionConfig::default()
      },
      default_positive_class: self.default_class,
      debug: self.debug,
      ..Settings::default()
    };
    settings.validate()?;
    Ok(settings)
  }
}
