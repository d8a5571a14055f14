// 该文件是 Mingjing （明镜） 项目的一部分。
// src/output/save_image_file.rs - 保存叠加图与报告文件
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

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{info, warn};
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, output::Render, task::ScreeningOutcome};

/// 将叠加图写入 PNG 文件，同名 `.json` 文件保存筛查报告
pub struct SaveImageFileOutput {
  path: PathBuf,
}

#[derive(Error, Debug)]
pub enum SaveImageFileError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("报告序列化错误: {0}")]
  JsonError(#[from] serde_json::Error),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

impl FromUrlWithScheme for SaveImageFileOutput {
  const SCHEME: &'static str = "image";
}

impl FromUrl for SaveImageFileOutput {
  type Error = SaveImageFileError;

  fn from_url(uri: &Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(SaveImageFileError::SchemeMismatch(format!(
        "期望保存方式 '{}', 实际保存方式 '{}'",
        Self::SCHEME,
        uri.scheme()
      )));
    }

    Ok(SaveImageFileOutput::new(uri.path()))
  }
}

impl SaveImageFileOutput {
  pub fn new<P: AsRef<Path>>(path: P) -> Self {
    Self {
      path: path.as_ref().to_path_buf(),
    }
  }

  pub fn path(&self) -> &Path {
    &self.path
  }
}

/// 写入叠加图（若有）与报告，叠加图缺失时只写报告
pub(crate) fn save_outcome(path: &Path, outcome: &ScreeningOutcome) -> Result<(), SaveImageFileError> {
  if let Some(parent) = path.parent()
    && !parent.as_os_str().is_empty()
  {
    std::fs::create_dir_all(parent)?;
  }

  match &outcome.overlay {
    Some(png) => {
      std::fs::write(path, png)?;
      info!("保存叠加图到文件: {}", path.display());
    }
    None => warn!("没有可用的叠加图，跳过: {}", path.display()),
  }

  let report_path = path.with_extension("json");
  std::fs::write(&report_path, serde_json::to_vec_pretty(&outcome.report)?)?;
  info!("保存筛查报告到文件: {}", report_path.display());

  Ok(())
}

impl Render<ScreeningOutcome> for SaveImageFileOutput {
  type Error = SaveImageFileError;

  fn render_result(&self, result: &ScreeningOutcome) -> Result<(), Self::Error> {
    save_outcome(&self.path, result)
  }
}
