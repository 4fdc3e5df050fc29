//! optionfile (YAML / JSON) の読み込みと検証。
//!
//! ホストから `setoption name optionfile value <path>` で渡されたファイルを
//! 一度だけ読み込み、以降は凍結して使い回す。スキーマは次の通り:
//!
//! ```yaml
//! engines:
//!   - exe: /path/to/engine
//!     option: |
//!       setoption name USI_Hash value 1024
//!       setoption name Threads value 4
//!     winrate_regression:
//!       weight: 0.0016
//!       bias: 0.0
//! params:
//!   method: max_union   # or blend
//!   max_move_count: 256
//!   engine_weights: [0.5, 0.5]   # blend のとき必須
//!   time_override: {byoyomi: 1000}
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use log::warn;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// score_cp を勝率へ写像するシグモイドの係数。オフラインの回帰で求めた値を
/// エンジンごとに持つ。
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct WinrateRegression {
    /// cp に掛ける係数
    pub weight: f64,
    /// シグモイド内部の加算バイアス
    pub bias: f64,
}

/// 子エンジン1本の設定。
#[derive(Debug, Clone, Deserialize)]
pub struct EngineEntry {
    pub exe: PathBuf,
    /// setoption 文を1行1文で並べた複数行文字列。
    #[serde(default)]
    pub option: String,
    pub winrate_regression: WinrateRegression,
}

impl EngineEntry {
    /// option 欄の各行から (name, value) を取り出す。
    ///
    /// 行は空白区切りで最大6トークンに分割し、3番目と5番目を name / value と
    /// して採用する。6トークン目以降は value に残りがそのまま含まれるため、
    /// 空白を含む値も1行で書ける。5トークンに満たない行は読み飛ばす。
    pub fn setoptions(&self) -> Vec<(String, String)> {
        let mut pairs = Vec::new();
        for line in self.option.lines() {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let elems: Vec<&str> = trimmed.splitn(6, char::is_whitespace).collect();
            if elems.len() < 5 {
                warn!("skipping malformed option line: {trimmed}");
                continue;
            }
            pairs.push((elems[2].to_string(), elems[4].to_string()));
        }
        pairs
    }
}

/// `go` に渡す持ち時間。未指定のキーは 0 としてそのまま子エンジンへ転送する。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct TimeBudget {
    #[serde(default)]
    pub btime: u64,
    #[serde(default)]
    pub wtime: u64,
    #[serde(default)]
    pub byoyomi: u64,
    #[serde(default)]
    pub binc: u64,
    #[serde(default)]
    pub winc: u64,
}

impl TimeBudget {
    /// `go` コマンドの引数列。5キーとも常に明示する。
    pub fn go_args(&self) -> String {
        format!(
            "btime {} wtime {} byoyomi {} binc {} winc {}",
            self.btime, self.wtime, self.byoyomi, self.binc, self.winc
        )
    }
}

/// 合議方法。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsultMethod {
    /// 楽観合議: 全エンジンの候補の和集合から勝率最大の手を選ぶ。
    MaxUnion,
    /// 2エンジンの勝率を重み付き和で混合する。
    Blend,
}

fn default_gameover_result() -> String {
    "draw".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConsultParams {
    pub method: ConsultMethod,
    /// この手数を超えたら合議をやめ、エンジン0単独で指す。
    pub max_move_count: u32,
    /// blend のときのみ必須。[エンジン0, エンジン1] の重み。
    #[serde(default)]
    pub engine_weights: Option<[f64; 2]>,
    /// 設定時はホストから受けた持ち時間を無視してこちらを使う。
    #[serde(default)]
    pub time_override: Option<TimeBudget>,
    /// gameover の結果引数が省略されたとき子エンジンへ渡す値。
    /// ホスト実装によっては結果を送ってこないため既定で draw に丸める。
    #[serde(default = "default_gameover_result")]
    pub gameover_default: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProxyConfig {
    pub engines: Vec<EngineEntry>,
    pub params: ConsultParams,
}

impl ProxyConfig {
    /// 拡張子で YAML / JSON を切り替えて読み込む。未知の拡張子は YAML として
    /// 解釈を試みる (YAML 1.2 は JSON を包含するため JSON でも通る)。
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or_default();
        let config: ProxyConfig = if ext.eq_ignore_ascii_case("json") {
            serde_json::from_str(&text).map_err(|e| ConfigError::Parse {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?
        } else {
            serde_yaml::from_str(&text).map_err(|e| ConfigError::Parse {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.engines.is_empty() {
            return Err(ConfigError::Invalid("engines must not be empty".to_string()));
        }
        if self.params.method == ConsultMethod::Blend {
            // 3エンジン以上の blend は未定義のため設定段階で拒否する
            if self.engines.len() != 2 {
                return Err(ConfigError::Invalid(format!(
                    "method=blend requires exactly 2 engines, got {}",
                    self.engines.len()
                )));
            }
            if self.params.engine_weights.is_none() {
                return Err(ConfigError::Invalid(
                    "method=blend requires params.engine_weights".to_string(),
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const YAML_TWO_ENGINES: &str = r#"
engines:
  - exe: /opt/engines/alpha
    option: |
      setoption name USI_Hash value 1024
      setoption name Threads value 4
    winrate_regression:
      weight: 0.00166
      bias: 0.0
  - exe: /opt/engines/beta
    winrate_regression:
      weight: 0.0012
      bias: 0.1
params:
  method: max_union
  max_move_count: 256
"#;

    #[test]
    fn loads_yaml_config() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        file.write_all(YAML_TWO_ENGINES.as_bytes()).unwrap();
        let config = ProxyConfig::load(file.path()).unwrap();
        assert_eq!(config.engines.len(), 2);
        assert_eq!(config.engines[0].exe, PathBuf::from("/opt/engines/alpha"));
        assert_eq!(config.params.method, ConsultMethod::MaxUnion);
        assert_eq!(config.params.max_move_count, 256);
        assert_eq!(config.params.gameover_default, "draw");
        assert!(config.params.time_override.is_none());
    }

    #[test]
    fn loads_json_config() {
        let json = r#"{
            "engines": [
                {"exe": "/opt/engines/alpha",
                 "winrate_regression": {"weight": 0.001, "bias": 0.0}}
            ],
            "params": {"method": "max_union", "max_move_count": 100,
                       "time_override": {"byoyomi": 2000}}
        }"#;
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        file.write_all(json.as_bytes()).unwrap();
        let config = ProxyConfig::load(file.path()).unwrap();
        assert_eq!(config.engines.len(), 1);
        let over = config.params.time_override.unwrap();
        assert_eq!(over.byoyomi, 2000);
        assert_eq!(over.btime, 0);
    }

    #[test]
    fn setoption_lines_take_tokens_2_and_4() {
        let entry = EngineEntry {
            exe: PathBuf::from("engine"),
            option: "setoption name USI_Hash value 1024\n\
                     setoption name EvalDir value /path/with trailing words\n\
                     short line\n"
                .to_string(),
            winrate_regression: WinrateRegression {
                weight: 1.0,
                bias: 0.0,
            },
        };
        let pairs = entry.setoptions();
        assert_eq!(
            pairs,
            vec![
                ("USI_Hash".to_string(), "1024".to_string()),
                ("EvalDir".to_string(), "/path/with".to_string()),
            ]
        );
    }

    #[test]
    fn unknown_method_is_rejected() {
        let yaml = YAML_TWO_ENGINES.replace("max_union", "majority_vote");
        let err = serde_yaml::from_str::<ProxyConfig>(&yaml).unwrap_err();
        assert!(err.to_string().contains("unknown variant"));
    }

    #[test]
    fn blend_requires_two_engines_and_weights() {
        let yaml = YAML_TWO_ENGINES.replace("method: max_union", "method: blend");
        let config: ProxyConfig = serde_yaml::from_str(&yaml).unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let yaml = yaml.replace(
            "max_move_count: 256",
            "max_move_count: 256\n  engine_weights: [0.7, 0.3]",
        );
        let config: ProxyConfig = serde_yaml::from_str(&yaml).unwrap();
        config.validate().unwrap();
    }

    #[test]
    fn time_budget_formats_all_five_keys() {
        let tb = TimeBudget {
            byoyomi: 1000,
            ..TimeBudget::default()
        };
        assert_eq!(tb.go_args(), "btime 0 wtime 0 byoyomi 1000 binc 0 winc 0");
    }
}
