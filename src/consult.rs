//! 各エンジンの読み筋を勝率へ写像し、合議で1手を選ぶ。
//!
//! エンジンごとの評価値スケールの差は、オフラインで回帰した
//! シグモイド係数 (`winrate_regression`) で吸収する。合議後の勝率は
//! ホスト向け表示のために標準スケール (1/(1+exp(-cp/600))) の cp へ
//! 逆変換して報告する。

use std::cmp::Ordering;
use std::collections::BTreeMap;

use anyhow::{bail, Context, Result};
use serde::Serialize;

use crate::config::{ConsultMethod, ProxyConfig, WinrateRegression};
use crate::pv::PvEntry;

/// 標準の cp → 勝率変換で使うスケール。
const STANDARD_WINRATE_SCALE: f64 = 600.0;

/// 合議の入力。engine_pvs は設定ファイルの engines と同じ並び。
pub struct ConsultationInfo<'a> {
    /// 現在何手目か (1始まり)
    pub move_count: u32,
    pub moves: Option<&'a [String]>,
    pub sfen: &'a str,
    pub engine_pvs: Vec<Vec<PvEntry>>,
}

/// 合議結果。comment は可視化ツールが読む機械可読ペイロード。
#[derive(Debug)]
pub struct ConsultationResult {
    pub bestmove: String,
    pub winrate: f64,
    pub comment: ConsultComment,
}

/// `info string consult <json>` として出力される診断レコード。
/// 可視化側が局面を再現できるよう sfen / moves も含める。
#[derive(Debug, Serialize)]
pub struct ConsultComment {
    /// 勝率降順の (指し手, 勝率)
    pub score_tuples: Vec<(String, f64)>,
    /// エンジンごとの指し手→勝率表
    pub engine_score_dicts: Vec<BTreeMap<String, f64>>,
    pub sfen: String,
    pub moves: Option<Vec<String>>,
}

pub fn score_cp_to_winrate(score_cp: i32, regression: &WinrateRegression) -> f64 {
    let x = f64::from(score_cp) * regression.weight + regression.bias;
    1.0 / (1.0 + (-x).exp())
}

/// 勝率を標準スケールの cp へ逆変換する。勝率 0 / 1 の境界では対数が
/// 発散するため 0 に丸める。
pub fn winrate_to_score_cp_standard(winrate: f64) -> i32 {
    let score_cp = (1.0 / winrate - 1.0).ln() * -STANDARD_WINRATE_SCALE;
    if score_cp.is_finite() {
        score_cp as i32
    } else {
        0
    }
}

/// エンジンごとに指し手→勝率の表を作る。挿入順 (rank 昇順) を保つため
/// Vec で持ち、同じ指し手が再び現れたら後勝ちで上書きする。
fn winrate_tables(config: &ProxyConfig, info: &ConsultationInfo<'_>) -> Vec<Vec<(String, f64)>> {
    info.engine_pvs
        .iter()
        .zip(&config.engines)
        .map(|(pvs, entry)| {
            let mut table: Vec<(String, f64)> = Vec::with_capacity(pvs.len());
            for pv in pvs {
                let winrate = score_cp_to_winrate(pv.score_cp, &entry.winrate_regression);
                match table.iter_mut().find(|(mv, _)| *mv == pv.mv) {
                    Some(slot) => slot.1 = winrate,
                    None => table.push((pv.mv.clone(), winrate)),
                }
            }
            table
        })
        .collect()
}

/// 勝率降順に安定ソートして先頭を選ぶ。同率なら挿入順 (エンジン0の
/// rank 上位) が先に残る。
fn pick_best(mut merged: Vec<(String, f64)>) -> Result<(String, f64, Vec<(String, f64)>)> {
    merged.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));
    let (bestmove, winrate) = merged
        .first()
        .cloned()
        .context("consultation produced no candidate moves")?;
    Ok((bestmove, winrate, merged))
}

pub fn consult(config: &ProxyConfig, info: &ConsultationInfo<'_>) -> Result<ConsultationResult> {
    let tables = winrate_tables(config, info);
    let merged: Vec<(String, f64)> = match config.params.method {
        ConsultMethod::MaxUnion => {
            // 楽観合議: 全エンジンの候補の和集合を取り、指し手ごとに最大勝率を残す
            let mut merged: Vec<(String, f64)> = Vec::new();
            for table in &tables {
                for (mv, winrate) in table {
                    match merged.iter_mut().find(|(m, _)| m == mv) {
                        Some(slot) => slot.1 = slot.1.max(*winrate),
                        None => merged.push((mv.clone(), *winrate)),
                    }
                }
            }
            merged
        }
        ConsultMethod::Blend => {
            // エンジン0の候補を土台に、両者が読んだ手だけ重み付き和にする。
            // エンジン1しか読んでいない手は採用しない。
            let [w0, w1] = config
                .params
                .engine_weights
                .context("method=blend requires params.engine_weights")?;
            if tables.len() != 2 {
                bail!("method=blend requires exactly 2 engines, got {}", tables.len());
            }
            let mut merged = tables[0].clone();
            for (mv, winrate) in &tables[1] {
                if let Some(slot) = merged.iter_mut().find(|(m, _)| m == mv) {
                    slot.1 = slot.1 * w0 + winrate * w1;
                }
            }
            merged
        }
    };

    let (bestmove, winrate, score_tuples) = pick_best(merged)?;
    let comment = ConsultComment {
        score_tuples,
        engine_score_dicts: tables
            .into_iter()
            .map(|table| table.into_iter().collect())
            .collect(),
        sfen: info.sfen.to_string(),
        moves: info.moves.map(<[String]>::to_vec),
    };
    Ok(ConsultationResult {
        bestmove,
        winrate,
        comment,
    })
}
