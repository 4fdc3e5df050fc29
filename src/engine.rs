//! 子エンジンプロセス1本との入出力。
//!
//! stdout は専用スレッドで行単位に読み、チャネル経由で受け取る。ホスト側の
//! ループと違い、エンジン側は `bestmove` を番兵とする push 型のストリームで
//! あるため、読み取りを待ち受けるスレッドを分離しておく。

use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::mpsc::{self, Receiver};
use std::time::{Duration, Instant};

use log::{debug, info};

use crate::config::TimeBudget;
use crate::error::EngineError;

const ENGINE_QUIT_TIMEOUT: Duration = Duration::from_millis(300);
const ENGINE_QUIT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// 1本の子エンジンに対する入出力をカプセル化する。
pub struct EngineClient {
    child: Child,
    stdin: BufWriter<ChildStdin>,
    rx: Receiver<String>,
    pub label: String,
}

impl EngineClient {
    /// エンジンを起動し、`usi` → `usiok` のハンドシェイクまで済ませる。
    /// 以降は setoption を受け付けられる状態になる。
    pub fn spawn(exe: &Path, label: String) -> Result<Self, EngineError> {
        let mut child = Command::new(exe)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .spawn()
            .map_err(|source| EngineError::Spawn {
                label: label.clone(),
                exe: exe.to_path_buf(),
                source,
            })?;
        let stdin = child.stdin.take().ok_or_else(|| EngineError::Exited {
            label: label.clone(),
            expected: "stdin pipe".to_string(),
        })?;
        let stdout = child.stdout.take().ok_or_else(|| EngineError::Exited {
            label: label.clone(),
            expected: "stdout pipe".to_string(),
        })?;
        let (tx, rx) = mpsc::channel::<String>();
        std::thread::spawn(move || {
            let reader = BufReader::new(stdout);
            for line in reader.lines() {
                match line {
                    Ok(l) => {
                        if tx.send(l).is_err() {
                            break;
                        }
                    }
                    Err(_) => break,
                }
            }
        });

        let mut client = Self {
            child,
            stdin: BufWriter::new(stdin),
            rx,
            label,
        };
        client.write_line("usi")?;
        loop {
            let line = client.recv_line("usiok")?;
            if line == "usiok" {
                break;
            }
        }
        info!("{}: spawned {}", client.label, exe.display());
        Ok(client)
    }

    pub fn setoption(&mut self, name: &str, value: &str) -> Result<(), EngineError> {
        self.write_line(&format!("setoption name {name} value {value}"))
    }

    /// `readyok` が返るまでブロックする。途中でエンジンが落ちたらエラー。
    pub fn isready(&mut self) -> Result<(), EngineError> {
        self.write_line("isready")?;
        loop {
            let line = self.recv_line("readyok")?;
            if line == "readyok" {
                return Ok(());
            }
        }
    }

    pub fn usinewgame(&mut self) -> Result<(), EngineError> {
        self.write_line("usinewgame")
    }

    /// 局面を送る。`sfen` は `startpos` または `sfen <body>` をそのまま渡す。
    pub fn position(&mut self, moves: Option<&[String]>, sfen: &str) -> Result<(), EngineError> {
        let mut cmd = format!("position {sfen}");
        if let Some(moves) = moves {
            if !moves.is_empty() {
                cmd.push_str(" moves ");
                cmd.push_str(&moves.join(" "));
            }
        }
        self.write_line(&cmd)
    }

    /// 探索を開始し、`bestmove` が観測されるまで受信した全行を `listener` へ
    /// 流す (`bestmove` 行自体も含む)。戻り値は (bestmove, pondermove)。
    /// bestmove にはリテラルの `resign` / `win` も来る。
    ///
    /// タイムアウトは設けない: 時間管理は子エンジンに委ねており、`bestmove`
    /// を返さないエンジンはこの呼び出しを永久に待たせる。
    pub fn go(
        &mut self,
        time: &TimeBudget,
        listener: &mut dyn FnMut(&str),
    ) -> Result<(String, Option<String>), EngineError> {
        self.write_line(&format!("go {}", time.go_args()))?;
        loop {
            let line = self.recv_line("bestmove")?;
            listener(&line);
            if let Some(rest) = line.strip_prefix("bestmove ") {
                let mut parts = rest.split_whitespace();
                let bestmove = parts
                    .next()
                    .ok_or_else(|| EngineError::Exited {
                        label: self.label.clone(),
                        expected: "bestmove argument".to_string(),
                    })?
                    .to_string();
                let pondermove = match parts.next() {
                    Some("ponder") => parts.next().map(str::to_string),
                    _ => None,
                };
                return Ok((bestmove, pondermove));
            }
        }
    }

    pub fn gameover(&mut self, result: &str) -> Result<(), EngineError> {
        self.write_line(&format!("gameover {result}"))
    }

    fn recv_line(&self, expected: &str) -> Result<String, EngineError> {
        let line = self.rx.recv().map_err(|_| EngineError::Exited {
            label: self.label.clone(),
            expected: expected.to_string(),
        })?;
        debug!("{} < {line}", self.label);
        Ok(line)
    }

    fn write_line(&mut self, msg: &str) -> Result<(), EngineError> {
        debug!("{} > {msg}", self.label);
        let io_err = |source| EngineError::Io {
            label: self.label.clone(),
            source,
        };
        self.stdin.write_all(msg.as_bytes()).map_err(io_err)?;
        self.stdin.write_all(b"\n").map_err(io_err)?;
        self.stdin.flush().map_err(io_err)
    }
}

impl Drop for EngineClient {
    fn drop(&mut self) {
        let _ = self.write_line("quit");
        let deadline = Instant::now() + ENGINE_QUIT_TIMEOUT;
        while Instant::now() < deadline {
            if let Ok(Some(_)) = self.child.try_wait() {
                return;
            }
            std::thread::sleep(ENGINE_QUIT_POLL_INTERVAL);
        }
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}
