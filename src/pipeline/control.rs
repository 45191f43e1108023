//! 控制输入 - 标准输入按键 (每行一个字符)
//!
//! 输入结束 (EOF) 只结束读取线程, 不会停止系统

use crossbeam_channel::Sender;
use std::io::BufRead;
use std::thread::{self, JoinHandle};
use tracing::{info, warn};

use super::ControlCommand;
use crate::config::ControlKeys;

/// 按键 → 命令 (不区分大小写)
pub fn parse_command(keys: &ControlKeys, input: &str) -> Option<ControlCommand> {
    let c = input.trim().chars().next()?.to_ascii_lowercase();
    let matches = |k: char| k.to_ascii_lowercase() == c;
    if matches(keys.exit) {
        Some(ControlCommand::Exit)
    } else if matches(keys.start_detection) {
        Some(ControlCommand::StartDetection)
    } else if matches(keys.stop_detection) {
        Some(ControlCommand::StopDetection)
    } else if matches(keys.start_recording) {
        Some(ControlCommand::StartRecording)
    } else if matches(keys.stop_recording) {
        Some(ControlCommand::StopRecording)
    } else {
        None
    }
}

/// 读取任意输入流中的命令, 直到输入结束或接收端关闭
pub fn read_commands<R: BufRead>(reader: R, keys: &ControlKeys, tx: &Sender<ControlCommand>) {
    for line in reader.lines() {
        let line = match line {
            Ok(l) => l,
            Err(e) => {
                warn!("⚠️ 读取控制输入失败: {}", e);
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        match parse_command(keys, &line) {
            Some(cmd) => {
                if tx.send(cmd).is_err() {
                    break;
                }
                if cmd == ControlCommand::Exit {
                    break;
                }
            }
            None => warn!("❓ 未知按键: {}", line.trim()),
        }
    }
}

/// 后台线程读取标准输入
pub fn spawn_stdin_reader(keys: ControlKeys, tx: Sender<ControlCommand>) -> JoinHandle<()> {
    print_controls(&keys);
    thread::spawn(move || {
        let stdin = std::io::stdin();
        read_commands(stdin.lock(), &keys, &tx);
        info!("⌨️ 控制输入已结束");
    })
}

fn print_controls(keys: &ControlKeys) {
    info!("==================================================");
    info!("控制按键 (输入字符后回车):");
    info!("  {} - 开始检测", keys.start_detection);
    info!("  {} - 停止检测", keys.stop_detection);
    info!("  {} - 开始录像", keys.start_recording);
    info!("  {} - 停止录像", keys.stop_recording);
    info!("  {} - 退出", keys.exit);
    info!("==================================================");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::unbounded;

    #[test]
    fn test_parse_default_keys() {
        let keys = ControlKeys::default();
        assert_eq!(parse_command(&keys, "f"), Some(ControlCommand::StartDetection));
        assert_eq!(parse_command(&keys, "G\n"), Some(ControlCommand::StopDetection));
        assert_eq!(parse_command(&keys, " r "), Some(ControlCommand::StartRecording));
        assert_eq!(parse_command(&keys, "t"), Some(ControlCommand::StopRecording));
        assert_eq!(parse_command(&keys, "q"), Some(ControlCommand::Exit));
        assert_eq!(parse_command(&keys, "x"), None);
        assert_eq!(parse_command(&keys, ""), None);
    }

    #[test]
    fn test_read_until_exit() {
        let keys = ControlKeys::default();
        let (tx, rx) = unbounded();
        let input = "r\n\nz\nf\nq\nt\n";
        read_commands(input.as_bytes(), &keys, &tx);
        let got: Vec<_> = rx.try_iter().collect();
        assert_eq!(
            got,
            vec![
                ControlCommand::StartRecording,
                ControlCommand::StartDetection,
                ControlCommand::Exit
            ]
        );
    }

    #[test]
    fn test_eof_sends_nothing() {
        let keys = ControlKeys::default();
        let (tx, rx) = unbounded();
        read_commands("".as_bytes(), &keys, &tx);
        assert!(rx.try_recv().is_err());
    }
}
