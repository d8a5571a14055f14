// 该文件是 Mingjing （明镜） 项目的一部分。
// src/main.rs - 项目主程序
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use anyhow::Result;
use clap::Parser;
use tracing::info;
use url::Url;

use mingjing::{
  FromUrl,
  args::SettingsArgs,
  input::ImageFileInput,
  model::ReplayDetector,
  output::OutputWrapper,
  task::{OneShotTask, Screening, Task},
};

/// Mingjing 脑部 MRI 肿瘤筛查
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 模型输出来源，例如 replay:///path/to/detections.json
  #[arg(long, value_name = "MODEL")]
  pub model: Url,
  /// 输入图像，例如 image:///path/to/scan.png
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,
  /// 输出路径，image:///path/overlay.png 或 folder:///path/records
  #[arg(long, value_name = "OUTPUT")]
  pub output: Url,

  #[command(flatten)]
  pub settings: SettingsArgs,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("模型输出来源: {}", args.model);
  info!("输入来源: {}", args.input);
  info!("输出路径: {}", args.output);

  let settings = args.settings.into_settings()?;
  info!(
    "置信度阈值: {}, NMS 阈值: {}, 掩码最小面积: {}",
    settings.inference.conf_th, settings.inference.iou_th, settings.decision.min_mask_area
  );

  let input = ImageFileInput::from_url(&args.input)?;
  let model = ReplayDetector::from_url(&args.model)?;
  let output = OutputWrapper::from_url(&args.output)?;

  OneShotTask::new(Screening::new(settings)?).run_task(input, model, output)?;

  Ok(())
}
