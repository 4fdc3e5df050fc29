//! `info` 行のバックログから最新の multipv スナップショットを取り出す。
//!
//! 1回の `go` で子エンジンが出力した行を後ろから走査し、最後に完了した
//! 深さの読み筋一式 (multipv 1 が先頭) を復元する。エンジン独自の info
//! トークンで解釈できない行は黙って読み飛ばす。

use serde::Serialize;

/// 詰みスコアの丸め先。数値付き mate は 32000 から手数を引いた値になり、
/// 手数が長いほど 0 に近づく (mate -10 → -31990)。
const MATE_SCORE: i32 = 32000;

/// multipv 2位以下でこの深さに満たない読み筋は捨てる。DL系エンジンは
/// 読んでいない指し手の PV も便宜上出力するため。
const MIN_SUB_PV_DEPTH: i32 = 5;

/// 読み筋1本。`multipv_rank` 0 は multipv 指定なし (単一PVモード) を表す。
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PvEntry {
    #[serde(rename = "move")]
    pub mv: String,
    pub score_cp: i32,
    pub multipv_rank: u32,
}

/// 1行分の解析結果。score と pv の両方が揃った行だけが採用候補になる。
struct ParsedInfo {
    first_move: String,
    score_cp: i32,
    multipv_rank: Option<u32>,
    depth: Option<i32>,
}

/// `score mate` の引数を cp 相当へ丸める。`+` / `-` は手数不明の番兵。
fn mate_to_cp(token: &str) -> Option<i32> {
    match token {
        "+" => Some(MATE_SCORE),
        "-" => Some(-MATE_SCORE),
        _ => {
            let m: i32 = token.parse().ok()?;
            if m > 0 {
                Some(MATE_SCORE - m)
            } else {
                Some(-MATE_SCORE - m)
            }
        }
    }
}

fn parse_info_line(line: &str) -> Option<ParsedInfo> {
    let mut tokens = line.split_whitespace();
    if tokens.next() != Some("info") {
        return None;
    }
    let mut first_move = None;
    let mut score_cp = None;
    let mut multipv_rank = None;
    let mut depth = None;
    while let Some(key) = tokens.next() {
        match key {
            // 引数1個、読み飛ばす
            "seldepth" | "time" | "nodes" | "currmove" | "hashfull" | "nps" => {
                tokens.next()?;
            }
            "depth" => depth = Some(tokens.next()?.parse().ok()?),
            "multipv" => multipv_rank = Some(tokens.next()?.parse().ok()?),
            "score" => match tokens.next()? {
                "cp" => score_cp = Some(tokens.next()?.parse().ok()?),
                "mate" => score_cp = Some(mate_to_cp(tokens.next()?)?),
                _ => return None,
            },
            // PVではなくコメント行
            "string" => return None,
            "pv" => {
                first_move = Some(tokens.next()?.to_string());
                break;
            }
            _ => {}
        }
    }
    Some(ParsedInfo {
        first_move: first_move?,
        score_cp: score_cp?,
        multipv_rank,
        depth,
    })
}

/// 行ログを後ろから走査し、最新のスナップショットを rank 昇順で返す。
///
/// multipv ありの場合は rank 1 の行が見えた時点で、multipv なしの場合は
/// 最初に採用できた行でスナップショットが完結する。同じ rank が複数回
/// 現れたときは走査順で先に見えたもの (= 後に出力されたもの) が勝つ。
pub fn extract_latest_pvs(lines: &[String]) -> Vec<PvEntry> {
    let mut pvs: Vec<PvEntry> = Vec::new();
    for line in lines.iter().rev() {
        let Some(parsed) = parse_info_line(line) else {
            continue;
        };
        let rank = parsed.multipv_rank.unwrap_or(0);
        if rank > 1 && parsed.depth.unwrap_or(0) < MIN_SUB_PV_DEPTH {
            continue;
        }
        if pvs.iter().any(|pv| pv.multipv_rank == rank) {
            continue;
        }
        // 逆順に走査しているので通常は先頭挿入だが、途中で打ち切られた
        // パスでは rank が飛ぶことがあるため挿入位置は rank で決める
        let pos = pvs
            .iter()
            .position(|pv| pv.multipv_rank >= rank)
            .unwrap_or(pvs.len());
        pvs.insert(
            pos,
            PvEntry {
                mv: parsed.first_move,
                score_cp: parsed.score_cp,
                multipv_rank: rank,
            },
        );
        if parsed.multipv_rank.is_none() || parsed.multipv_rank == Some(1) {
            break;
        }
    }
    pvs
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn extracts_latest_multipv_snapshot() {
        let log = lines(&[
            "info depth 10 multipv 1 score cp 361 pv 2g2f",
            "info depth 10 multipv 2 score cp 318 pv 4i5h",
            "info depth 11 multipv 1 score cp 341 pv 3g3f",
            "info depth 11 multipv 2 score cp 332 pv 2g2f",
            "info depth 12 multipv 1 score cp 376 pv 8h7g",
            "info depth 12 multipv 2 score cp 296 pv 4g4f",
            "bestmove 8h7g ponder 8c8d",
        ]);
        let pvs = extract_latest_pvs(&log);
        assert_eq!(
            pvs,
            vec![
                PvEntry {
                    mv: "8h7g".to_string(),
                    score_cp: 376,
                    multipv_rank: 1,
                },
                PvEntry {
                    mv: "4g4f".to_string(),
                    score_cp: 296,
                    multipv_rank: 2,
                },
            ]
        );
    }

    #[test]
    fn shallow_sub_pvs_are_filtered() {
        let log = lines(&[
            "info depth 1 multipv 1 score cp 361 pv 2g2f",
            "info depth 10 multipv 1 score cp 376 pv 8h7g",
            "info depth 10 multipv 2 score cp 296 pv 4g4f",
            "info depth 2 multipv 3 score cp 200 pv 9i9h",
            "bestmove 8h7g ponder 8c8d",
        ]);
        let pvs = extract_latest_pvs(&log);
        assert!(pvs.iter().all(|pv| pv.mv != "9i9h"));
        assert_eq!(pvs.len(), 2);
        assert_eq!(pvs[0].multipv_rank, 1);
    }

    #[test]
    fn primary_pv_survives_regardless_of_depth() {
        // 深さ1でも rank 1 (または rank 指定なし) はフィルタしない
        let log = lines(&[
            "info depth 1 multipv 1 score cp 361 pv 2g2f",
            "info depth 1 multipv 2 score cp 318 pv 4i5h",
        ]);
        let pvs = extract_latest_pvs(&log);
        assert_eq!(pvs.len(), 1);
        assert_eq!(pvs[0].mv, "2g2f");
    }

    #[test]
    fn single_pv_mode_yields_at_most_one_entry() {
        let log = lines(&[
            "info depth 5 seldepth 7 score cp 12 nodes 100 pv 7g7f 3c3d",
            "info depth 6 seldepth 9 score cp -3 nodes 300 pv 2g2f 8c8d",
            "bestmove 2g2f",
        ]);
        let pvs = extract_latest_pvs(&log);
        assert_eq!(pvs.len(), 1);
        assert_eq!(pvs[0].mv, "2g2f");
        assert_eq!(pvs[0].score_cp, -3);
        assert_eq!(pvs[0].multipv_rank, 0);
    }

    #[test]
    fn mate_scores_follow_asymmetric_convention() {
        assert_eq!(mate_to_cp("+"), Some(32000));
        assert_eq!(mate_to_cp("-"), Some(-32000));
        assert_eq!(mate_to_cp("3"), Some(31997));
        assert_eq!(mate_to_cp("-10"), Some(-31990));
        assert_eq!(mate_to_cp("x"), None);

        let log = lines(&["info depth 20 score mate -10 pv 5i5h"]);
        assert_eq!(extract_latest_pvs(&log)[0].score_cp, -31990);
    }

    #[test]
    fn ranks_are_unique_and_ascending() {
        // 深さ6のパスの途中で打ち切られ、rank 2 が2回現れるログ
        let log = lines(&[
            "info depth 5 multipv 1 score cp 10 pv 7g7f",
            "info depth 5 multipv 2 score cp 5 pv 2g2f",
            "info depth 6 multipv 3 score cp -2 pv 6g6f",
            "info depth 6 multipv 2 score cp 7 pv 3g3f",
        ]);
        let pvs = extract_latest_pvs(&log);
        let ranks: Vec<u32> = pvs.iter().map(|pv| pv.multipv_rank).collect();
        assert_eq!(ranks, vec![1, 2, 3]);
        // 後に出力された rank 2 (3g3f) が採用される
        assert_eq!(pvs[1].mv, "3g3f");
    }

    #[test]
    fn malformed_and_comment_lines_are_skipped() {
        let log = lines(&[
            "info depth 4 score cp 55 pv 7g7f",
            "info string this is not a pv",
            "info depth x score cp 1 pv 2g2f",
            "info depth 5 score cp notanumber pv 2g2f",
            "info nps",
            "go btime 0 wtime 0",
        ]);
        let pvs = extract_latest_pvs(&log);
        assert_eq!(pvs.len(), 1);
        assert_eq!(pvs[0].mv, "7g7f");
    }

    #[test]
    fn no_usable_lines_yield_empty_snapshot() {
        let log = lines(&["bestmove resign"]);
        assert!(extract_latest_pvs(&log).is_empty());
    }
}
