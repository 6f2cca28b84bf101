//! 聊天客户端入口
//!
//! 以命令行参数给出的身份加入聊天室，标准输入的每一行作为一条消息发送。
//! 支持的命令：`/leave` 离开房间，`/who` 查看在线人数，
//! `/user <id> <username> <email>` 切换身份。

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use application::{ChatSession, SessionObserver, SessionSettings};
use clap::Parser;
use config::ClientConfig;
use domain::User;
use infrastructure::SocketIoTransport;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "chat-client", version, about = "Realtime chat room client")]
struct Cli {
    /// 用户 ID
    #[arg(long)]
    user_id: String,
    /// 显示名称
    #[arg(long)]
    username: String,
    /// 邮箱
    #[arg(long)]
    email: String,
    /// 配置文件路径（YAML/JSON/TOML），默认读取 CHAT_CONFIG_FILE
    #[arg(long, value_name = "FILE")]
    config: Option<String>,
    /// 覆盖配置中的服务器地址
    #[arg(long)]
    endpoint: Option<String>,
}

#[derive(Debug, PartialEq)]
enum Input {
    Empty,
    Leave,
    Who,
    Switch(User),
    Say(String),
    Invalid(String),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志，输出到 stderr 避免干扰聊天内容
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut cfg = match cli.config.as_deref() {
        Some(path) => ClientConfig::load_from(Some(path)),
        None => ClientConfig::load(),
    }
    .context("加载配置失败")?;
    if let Some(endpoint) = cli.endpoint {
        cfg.server.endpoint = endpoint;
        cfg.validate_config().context("服务器地址无效")?;
    }

    let user = User::new(cli.user_id.as_str(), cli.username.as_str(), cli.email.as_str())
        .context("用户信息无效")?;

    tracing::info!(endpoint = %cfg.server.endpoint, "连接聊天服务器");

    let transport = Arc::new(SocketIoTransport::from_config(&cfg));
    let mut session = ChatSession::start(user, transport, SessionSettings::from(&cfg));
    let renderer = tokio::spawn(render(session.observe()));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("读取标准输入失败")? else {
                    // 输入结束：直接销毁会话，不发送离开信号
                    session.teardown();
                    break;
                };
                match parse_input(&line) {
                    Input::Empty => {}
                    Input::Leave => {
                        session.leave().await;
                        break;
                    }
                    Input::Who => {
                        let online = session.online_users();
                        let ids: Vec<_> = online.iter().map(|id| id.as_str()).collect();
                        println!("在线 {} 人: {}", online.len(), ids.join(", "));
                    }
                    Input::Switch(user) => {
                        if let Err(err) = session.switch_user(user) {
                            println!("无法切换身份: {err}");
                        }
                    }
                    Input::Say(text) => {
                        if !session.send_message(&text) {
                            println!("消息未发送（未连接）");
                        }
                    }
                    Input::Invalid(reason) => println!("{reason}"),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                session.leave().await;
                break;
            }
        }
    }

    drop(session);
    let _ = tokio::time::timeout(Duration::from_secs(1), renderer).await;
    Ok(())
}

fn parse_input(line: &str) -> Input {
    let line = line.trim();
    let mut parts = line.split_whitespace();
    match parts.next() {
        None => Input::Empty,
        Some("/leave") => Input::Leave,
        Some("/who") => Input::Who,
        Some("/user") => {
            let (Some(id), Some(name), Some(email)) = (parts.next(), parts.next(), parts.next())
            else {
                return Input::Invalid("用法: /user <id> <username> <email>".into());
            };
            match User::new(id, name, email) {
                Ok(user) => Input::Switch(user),
                Err(err) => Input::Invalid(err.to_string()),
            }
        }
        _ => Input::Say(line.to_string()),
    }
}

/// 把会话状态变化打印到终端，会话结束后退出
async fn render(mut view: SessionObserver) {
    let mut printed = 0;
    loop {
        tokio::select! {
            changed = view.messages.changed() => {
                if changed.is_err() {
                    break;
                }
                let log = view.messages.borrow_and_update().clone();
                if log.len() < printed {
                    printed = 0;
                }
                for message in &log[printed..] {
                    println!("[{}] {}", message.username, message.text);
                }
                printed = log.len();
            }
            changed = view.presence.changed() => {
                if changed.is_err() {
                    break;
                }
                println!("* 在线人数: {}", view.presence.borrow_and_update().len());
            }
            changed = view.typing.changed() => {
                if changed.is_err() {
                    break;
                }
                if let Some(announcement) = view.typing.borrow_and_update().as_ref() {
                    println!("* {}", announcement.text);
                }
            }
            changed = view.connection.changed() => {
                if changed.is_err() {
                    break;
                }
                println!("* 连接状态: {:?}", *view.connection.borrow_and_update());
            }
            changed = view.ended.changed() => {
                if changed.is_err() || view.ended.borrow().is_some() {
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_commands() {
        assert_eq!(parse_input("/leave"), Input::Leave);
        assert_eq!(parse_input("  /who "), Input::Who);
        assert_eq!(parse_input("hello there"), Input::Say("hello there".into()));
        assert_eq!(parse_input(""), Input::Empty);
        assert_eq!(parse_input("  \t "), Input::Empty);
        assert!(matches!(parse_input("/user"), Input::Invalid(_)));
        assert!(matches!(parse_input("/user u-bob bob"), Input::Invalid(_)));
    }

    #[test]
    fn parses_switch_user() {
        match parse_input("/user u-bob bob bob@example.com") {
            Input::Switch(user) => {
                assert_eq!(user.id.as_str(), "u-bob");
                assert_eq!(user.username.as_str(), "bob");
            }
            other => panic!("unexpected input: {other:?}"),
        }
        assert!(matches!(parse_input("/user u-x x not-an-email"), Input::Invalid(_)));
    }
}
