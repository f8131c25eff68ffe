use thiserror::Error;

/// CLI 统一错误类型
#[derive(Error, Debug)]
pub enum CliError {
  /// 用法错误：未知流、非法选项值、参数 JSON 不合法。退出码 2
  #[error("用法错误: {message}")]
  UsageError { message: String },

  /// 流构建或任务执行失败。退出码 1
  #[error("运行失败: {message}")]
  RunFailed { message: String },
}

/// CLI 结果类型
pub type CliResult<T> = Result<T, CliError>;

impl CliError {
  pub fn usage(message: impl Into<String>) -> Self {
    Self::UsageError { message: message.into() }
  }

  pub fn run_failed(message: impl Into<String>) -> Self {
    Self::RunFailed { message: message.into() }
  }

  /// 进程退出码：1 表示任务/流失败，2 表示用法错误
  pub fn exit_code(&self) -> u8 {
    match self {
      CliError::UsageError { .. } => 2,
      CliError::RunFailed { .. } => 1,
    }
  }
}
