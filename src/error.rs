//! プロキシ全体のエラー型。
//!
//! 設定不備 (`ConfigError`) と子エンジンのプロトコル異常 (`EngineError`) は
//! どちらも致命扱いで、呼び出し側は `info string Error ...` をホストへ流した
//! うえでプロセスを終了させる。

use std::path::PathBuf;

use thiserror::Error;

/// optionfile の読み込み・検証エラー。
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read option file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse option file {}: {message}", path.display())]
    Parse { path: PathBuf, message: String },

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// 子エンジンとの通信エラー。
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("{label}: failed to spawn {}: {source}", exe.display())]
    Spawn {
        label: String,
        exe: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// stdout の読み取りスレッドが切断された。プロセスの異常終了とみなす。
    #[error("{label}: engine exited unexpectedly (waiting for {expected})")]
    Exited { label: String, expected: String },

    #[error("{label}: failed to write to engine stdin: {source}")]
    Io {
        label: String,
        #[source]
        source: std::io::Error,
    },
}
