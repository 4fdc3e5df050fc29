//! USIエンジンとして振る舞い、複数のUSIエンジンを並列に思考させて
//! 指し手を合議で決めるプロキシ。
//!
//! ホストから見れば普通のUSIエンジンで、実体は `setoption name optionfile`
//! で渡された設定に従って子エンジン群を駆動する中継器である。
//! ponder は考えない (思考中にホストからメッセージが来ることには対応しない)。

pub mod config;
pub mod consult;
pub mod engine;
pub mod error;
pub mod pv;
pub mod supervisor;
pub mod usi;

pub use config::{ConsultMethod, EngineEntry, ProxyConfig, TimeBudget, WinrateRegression};
pub use consult::{
    consult, score_cp_to_winrate, winrate_to_score_cp_standard, ConsultationInfo,
    ConsultationResult,
};
pub use engine::EngineClient;
pub use error::{ConfigError, EngineError};
pub use pv::{extract_latest_pvs, PvEntry};
pub use supervisor::{Consultation, EngineSnapshot};
pub use usi::HostSink;
