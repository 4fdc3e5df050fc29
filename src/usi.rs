//! ホスト (GUI / 対局サーバ) と向き合う USI フロントエンド。
//!
//! ホスト側は厳密なリクエスト/レスポンス型で、`go` の思考中に新しい
//! コマンドは来ない前提 (ponder 非対応)。よってループは1本のスレッドで
//! 逐次に回し、エンジン側の push 型ストリームは supervisor 配下の
//! ワーカーに任せる。

use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use log::{debug, warn};

use crate::config::{ProxyConfig, TimeBudget};
use crate::supervisor::Consultation;

/// ホストへの出力を直列化する書き込み口。
///
/// 合議中はエンジン0の telemetry 中継と supervisor の診断行が同じ
/// チャネルへ流れ込むため、すべての書き込みを1行単位のロックで直列化し、
/// 行が途中で混ざらないことを保証する。書き込みごとに flush する。
#[derive(Clone)]
pub struct HostSink {
    inner: Arc<Mutex<Box<dyn Write + Send>>>,
}

impl HostSink {
    pub fn stdout() -> Self {
        Self::from_writer(Box::new(std::io::stdout()))
    }

    pub fn from_writer(writer: Box<dyn Write + Send>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(writer)),
        }
    }

    /// 1行書いて即 flush する。ホストが先に消えた場合に備えて失敗は
    /// 警告ログに落とすだけでパニックさせない。
    pub fn send(&self, line: &str) {
        let mut writer = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let outcome = writeln!(writer, "{line}").and_then(|()| writer.flush());
        if let Err(err) = outcome {
            warn!("failed to write to host: {err} (line: {line})");
        }
    }
}

#[derive(Debug, PartialEq)]
enum HostCommand {
    Usi,
    IsReady,
    UsiNewGame,
    SetOption { name: String, value: String },
    Position { moves: Option<Vec<String>>, sfen: String },
    GoPonder,
    Go(TimeBudget),
    GameOver(Option<String>),
    Quit,
    Unknown(String),
}

fn parse_host_command(line: &str) -> HostCommand {
    let parts: Vec<&str> = line.split_whitespace().collect();
    let Some(&command) = parts.first() else {
        return HostCommand::Unknown(String::new());
    };
    match command {
        "usi" => HostCommand::Usi,
        "isready" => HostCommand::IsReady,
        "usinewgame" => HostCommand::UsiNewGame,
        "quit" => HostCommand::Quit,
        "setoption" => parse_setoption(&parts[1..]),
        "position" => parse_position(&parts[1..]),
        "go" => parse_go(&parts[1..]),
        "gameover" => HostCommand::GameOver(parts.get(1).map(|s| s.to_string())),
        other => HostCommand::Unknown(other.to_string()),
    }
}

/// `setoption name <N> value <V>`。値は空白を含み得るので `value` 以降を
/// そのまま連結する。
fn parse_setoption(parts: &[&str]) -> HostCommand {
    if parts.len() < 2 || parts[0] != "name" {
        return HostCommand::Unknown("setoption".to_string());
    }
    let value_pos = parts.iter().position(|&p| p == "value");
    let name = parts[1..value_pos.unwrap_or(parts.len())].join(" ");
    let value = value_pos
        .map(|pos| parts[pos + 1..].join(" "))
        .unwrap_or_default();
    HostCommand::SetOption { name, value }
}

/// `position startpos [moves ...]` / `position sfen <...> [moves ...]`。
/// キャッシュする sfen は子エンジンへそのまま再送できる形
/// (`startpos` または `sfen <body>`) で保持する。
fn parse_position(parts: &[&str]) -> HostCommand {
    let Some(&head) = parts.first() else {
        return HostCommand::Unknown("position".to_string());
    };
    let moves_pos = parts.iter().position(|&p| p == "moves");
    let sfen = match head {
        "startpos" => "startpos".to_string(),
        "sfen" => parts[..moves_pos.unwrap_or(parts.len())].join(" "),
        _ => return HostCommand::Unknown("position".to_string()),
    };
    let moves = moves_pos.map(|pos| parts[pos + 1..].iter().map(|s| s.to_string()).collect());
    HostCommand::Position { moves, sfen }
}

fn next_u64(iter: &mut std::slice::Iter<'_, &str>, key: &str) -> u64 {
    match iter.next().and_then(|v| v.parse().ok()) {
        Some(value) => value,
        None => {
            warn!("go parameter {key} is missing a numeric value; treating as 0");
            0
        }
    }
}

/// `go [ponder] [btime ..] [wtime ..] [byoyomi ..] [binc ..] [winc ..]`。
/// 認識しないパラメータは値ごと読み捨てず、キー単体としてスキップする。
fn parse_go(parts: &[&str]) -> HostCommand {
    if parts.first() == Some(&"ponder") {
        return HostCommand::GoPonder;
    }
    let mut time = TimeBudget::default();
    let mut iter = parts.iter();
    while let Some(&key) = iter.next() {
        match key {
            "btime" => time.btime = next_u64(&mut iter, key),
            "wtime" => time.wtime = next_u64(&mut iter, key),
            "byoyomi" => time.byoyomi = next_u64(&mut iter, key),
            "binc" => time.binc = next_u64(&mut iter, key),
            "winc" => time.winc = next_u64(&mut iter, key),
            "infinite" => {}
            other => warn!("unknown go parameter: {other}"),
        }
    }
    HostCommand::Go(time)
}

/// キャッシュ済みの最終 `position`。
struct CachedPosition {
    moves: Option<Vec<String>>,
    sfen: String,
}

/// ホストのコマンドループ。EOF または `quit` まで回り、致命的エラーは
/// Err で抜けて呼び出し側が `info string Error ...` を出す。
pub fn run<R: BufRead>(input: R, sink: &HostSink, name: &str, author: &str) -> Result<()> {
    let mut consultation: Option<Consultation> = None;
    let mut last_position: Option<CachedPosition> = None;

    for line in input.lines() {
        let line = line.context("failed to read from host")?;
        if line.trim().is_empty() {
            continue;
        }
        match parse_host_command(&line) {
            HostCommand::Usi => {
                sink.send(&format!("id name {name}"));
                sink.send(&format!("id author {author}"));
                sink.send("option name optionfile type filename default <empty>");
                sink.send("usiok");
            }
            HostCommand::SetOption { name, value } => {
                if name == "optionfile" {
                    if consultation.is_none() {
                        let config = ProxyConfig::load(&PathBuf::from(&value))?;
                        consultation = Some(Consultation::new(config, sink.clone()));
                    } else {
                        // 2局目以降は起動済みエンジンをそのまま使う
                        debug!("optionfile is frozen; ignoring {value}");
                    }
                } else {
                    debug!("ignoring setoption for unknown option {name}");
                }
            }
            HostCommand::IsReady => {
                consultation
                    .as_mut()
                    .context("isready received before optionfile was set")?
                    .isready()?;
                sink.send("readyok");
            }
            HostCommand::UsiNewGame => {
                consultation
                    .as_mut()
                    .context("usinewgame received before optionfile was set")?
                    .usinewgame()?;
            }
            HostCommand::Position { moves, sfen } => {
                last_position = Some(CachedPosition { moves, sfen });
            }
            HostCommand::GoPonder => {
                debug!("go ponder is not supported; ignored");
            }
            HostCommand::Go(time) => {
                let consultation = consultation
                    .as_mut()
                    .context("go received before optionfile was set")?;
                let position = last_position
                    .as_ref()
                    .context("go received before position")?;
                let bestmove =
                    consultation.go(position.moves.as_deref(), &position.sfen, &time)?;
                sink.send(&format!("bestmove {bestmove}"));
            }
            HostCommand::GameOver(result) => {
                consultation
                    .as_mut()
                    .context("gameover received before optionfile was set")?
                    .gameover(result.as_deref())?;
            }
            HostCommand::Quit => break,
            HostCommand::Unknown(cmd) => {
                sink.send(&format!("info string unknown command {cmd}"));
            }
        }
    }
    Ok(())
}
