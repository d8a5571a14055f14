// 该文件是 Mingjing （明镜） 项目的一部分。
// src/bin/threshold_sweep.rs - 阈值网格扫描
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
  task::{Screening, SweepTask, Task},
};

/// 在置信度与 IoU 阈值网格上统计掩码数量与最高置信度
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 模型输出来源
  #[arg(long, value_name = "MODEL")]
  pub model: Url,
  /// 输入图像
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,
  /// 置信度阈值列表
  #[arg(long, value_delimiter = ',', default_value = "0.05,0.10,0.15,0.20")]
  pub conf_values: Vec<f32>,
  /// IoU 阈值列表
  #[arg(long, value_delimiter = ',', default_value = "0.40,0.50,0.60")]
  pub iou_values: Vec<f32>,

  #[command(flatten)]
  pub settings: SettingsArgs,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("模型输出来源: {}", args.model);
  info!("输入来源: {}", args.input);

  let settings = args.settings.into_settings()?;
  let input = ImageFileInput::from_url(&args.input)?;
  let model = ReplayDetector::from_url(&args.model)?;

  SweepTask::new(Screening::new(settings)?)
    .with_grid(args.conf_values, args.iou_values)
    .run_task(input, model, std::io::stdout().lock())?;

  Ok(())
}
