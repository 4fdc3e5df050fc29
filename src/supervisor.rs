//! 合議セッション本体。子エンジン群の起動・採配と診断出力を担う。
//!
//! ホスト側のループは厳密な逐次処理なので、ここでの並列性は `go` の
//! fan-out だけに閉じている。各エンジンの結果はインデックスで固定された
//! スロットにミューテックス越しに書き込み、全員の `bestmove` が揃ってから
//! 診断行と最終手を出力する。

use std::sync::Mutex;
use std::thread;

use anyhow::{bail, Context, Result};
use log::{debug, info};
use serde::Serialize;

use crate::config::{ProxyConfig, TimeBudget};
use crate::consult::{consult, winrate_to_score_cp_standard, ConsultationInfo};
use crate::engine::EngineClient;
use crate::error::EngineError;
use crate::pv::{extract_latest_pvs, PvEntry};
use crate::usi::HostSink;

/// 1回の `go` で1エンジンから得られる成果物。`info string engine_outputs`
/// としてそのまま JSON 化される。
#[derive(Debug, Serialize)]
pub struct EngineSnapshot {
    pub bestmove: String,
    pub pondermove: Option<String>,
    pub raw_lines: Vec<String>,
    pub pvs: Vec<PvEntry>,
}

/// 合議エンジンの本体。エンジン群は最初の `isready` で遅延起動し、
/// 対局をまたいで使い回す。
pub struct Consultation {
    config: ProxyConfig,
    engines: Vec<EngineClient>,
    sink: HostSink,
}

impl Consultation {
    pub fn new(config: ProxyConfig, sink: HostSink) -> Self {
        Self {
            config,
            engines: Vec::new(),
            sink,
        }
    }

    /// 初回は全エンジンを起動して optionfile の setoption を流し込み、
    /// それぞれの readyok を順に待つ。2回目以降は isready の転送のみ。
    pub fn isready(&mut self) -> Result<()> {
        if self.engines.is_empty() {
            for (idx, entry) in self.config.engines.iter().enumerate() {
                let label = format!("engine{idx}");
                let mut engine = EngineClient::spawn(&entry.exe, label)?;
                for (name, value) in entry.setoptions() {
                    engine.setoption(&name, &value)?;
                }
                engine.isready()?;
                self.engines.push(engine);
            }
            info!("all {} engines ready", self.engines.len());
        } else {
            for engine in &mut self.engines {
                engine.isready()?;
            }
        }
        Ok(())
    }

    pub fn usinewgame(&mut self) -> Result<()> {
        for engine in &mut self.engines {
            engine.usinewgame()?;
        }
        Ok(())
    }

    /// 結果引数が省略されたホスト向けに、設定された既定値で補う。
    pub fn gameover(&mut self, result: Option<&str>) -> Result<()> {
        let result = result.unwrap_or(&self.config.params.gameover_default);
        for engine in &mut self.engines {
            engine.gameover(result)?;
        }
        Ok(())
    }

    /// 1手分の合議。全エンジンへ `position` + `go` を同時に投げ、全員の
    /// `bestmove` を待ってから勝率を融合する。`max_move_count` を超えた
    /// 終盤はエンジン0単独に切り替える。
    pub fn go(
        &mut self,
        moves: Option<&[String]>,
        sfen: &str,
        time: &TimeBudget,
    ) -> Result<String> {
        if self.engines.is_empty() {
            bail!("go received before isready: engines are not running");
        }
        let time = self.config.params.time_override.unwrap_or(*time);
        let move_count = moves.map_or(0, |m| m.len() as u32) + 1;

        if move_count > self.config.params.max_move_count {
            debug!(
                "move_count {move_count} > max_move_count {}: consultation disabled",
                self.config.params.max_move_count
            );
            return self.go_primary_only(moves, sfen, &time);
        }

        let engine_count = self.engines.len();
        let sink = self.sink.clone();
        let slots: Mutex<Vec<Option<Result<EngineSnapshot, EngineError>>>> =
            Mutex::new((0..engine_count).map(|_| None).collect());
        thread::scope(|scope| {
            for (idx, engine) in self.engines.iter_mut().enumerate() {
                let slots = &slots;
                // 合議中のホストへの telemetry はエンジン0のものだけを流す
                let forward = (idx == 0).then_some(&sink);
                scope.spawn(move || {
                    let outcome = drive_search(engine, moves, sfen, &time, forward);
                    let mut slots = slots.lock().unwrap_or_else(|e| e.into_inner());
                    slots[idx] = Some(outcome);
                });
            }
        });

        let mut snapshots = Vec::with_capacity(engine_count);
        let slots = slots.into_inner().unwrap_or_else(|e| e.into_inner());
        for (idx, slot) in slots.into_iter().enumerate() {
            let outcome =
                slot.with_context(|| format!("engine{idx} worker vanished without a result"))?;
            snapshots.push(outcome?);
        }

        self.sink.send(&format!(
            "info string engine_outputs {}",
            serde_json::to_string(&snapshots)?
        ));
        let bests: Vec<String> = snapshots
            .iter()
            .enumerate()
            .map(|(idx, snapshot)| format!("engine{idx}={}", snapshot.bestmove))
            .collect();
        self.sink.send(&format!("info string {}", bests.join(" ")));

        let consult_info = ConsultationInfo {
            move_count,
            moves,
            sfen,
            engine_pvs: snapshots.iter().map(|s| s.pvs.clone()).collect(),
        };
        let result = consult(&self.config, &consult_info)?;
        self.sink.send(&format!(
            "info string consult {}",
            serde_json::to_string(&result.comment)?
        ));
        self.sink.send(&format!(
            "info depth 1 score cp {} pv {}",
            winrate_to_score_cp_standard(result.winrate),
            result.bestmove
        ));
        Ok(result.bestmove)
    }

    /// エンジン0単独で指す縮退パス。telemetry はそのまま転送し、
    /// bestmove も無加工で返す。
    fn go_primary_only(
        &mut self,
        moves: Option<&[String]>,
        sfen: &str,
        time: &TimeBudget,
    ) -> Result<String> {
        let engine = self
            .engines
            .first_mut()
            .context("no engines are running")?;
        engine.setoption("MultiPV", "1")?;
        let snapshot = drive_search(engine, moves, sfen, time, Some(&self.sink))?;
        Ok(snapshot.bestmove)
    }
}

/// 1エンジン分の `position` + `go` を実行し、受信行ログと抽出済みPVを
/// まとめる。`forward` が Some のときだけ info 行をホストへ中継する。
fn drive_search(
    engine: &mut EngineClient,
    moves: Option<&[String]>,
    sfen: &str,
    time: &TimeBudget,
    forward: Option<&HostSink>,
) -> Result<EngineSnapshot, EngineError> {
    engine.position(moves, sfen)?;
    let mut raw_lines: Vec<String> = Vec::new();
    let (bestmove, pondermove) = engine.go(time, &mut |line| {
        if let Some(sink) = forward {
            if line.starts_with("info ") {
                sink.send(line);
            }
        }
        raw_lines.push(line.to_string());
    })?;
    let pvs = extract_latest_pvs(&raw_lines);
    Ok(EngineSnapshot {
        bestmove,
        pondermove,
        raw_lines,
        pvs,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_serializes_with_wire_field_names() {
        let snapshot = EngineSnapshot {
            bestmove: "8h7g".to_string(),
            pondermove: None,
            raw_lines: vec!["info depth 3 multipv 1 score cp 376 pv 8h7g".to_string()],
            pvs: extract_latest_pvs(&[
                "info depth 3 multipv 1 score cp 376 pv 8h7g".to_string(),
            ]),
        };
        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["bestmove"], "8h7g");
        assert!(json["pondermove"].is_null());
        assert_eq!(json["pvs"][0]["move"], "8h7g");
        assert_eq!(json["pvs"][0]["multipv_rank"], 1);
    }
}
