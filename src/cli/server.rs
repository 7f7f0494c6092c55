use anyhow::{Context, anyhow};
use clap::Parser;
use log::{debug, error, info};
use prometheus::{BasicAuthentication, labels};
use rand::distr::{Alphanumeric, SampleString};
use tokio::net::TcpListener;
use tokio::task::{block_in_place, spawn_blocking};
use tokio::time::{Duration, MissedTickBehavior, interval};

use crate::cli::SubCommandExtend;
use crate::config::Config;
use crate::encoder::load_encoder;
use crate::search::SearchEngine;
use crate::server;

#[derive(Parser, Debug, Clone)]
pub struct ServerCommand {
    /// 监听地址
    #[arg(long, default_value = "127.0.0.1:8000")]
    pub addr: String,
    /// 请求验证 token，不填则随机生成
    #[arg(long, default_value_t = String::new())]
    pub token: String,
    /// prometheus 主动推送地址
    #[arg(long, value_name = "URL")]
    pub prometheus_push: Option<String>,
    /// 自定义 instance 标签值
    #[arg(long, value_name = "NAME")]
    pub prometheus_instance: Option<String>,
    /// prometheus 认证信息，格式为 username:password
    #[arg(long, value_name = "AUTH")]
    pub prometheus_auth: Option<String>,
}

impl SubCommandExtend for ServerCommand {
    async fn run(&self, config: &Config) -> anyhow::Result<()> {
        let engine = block_in_place(|| SearchEngine::open(&config.features_dir()))?;
        // 远程编码器内部使用阻塞客户端，需要在阻塞线程中创建
        let model = config.model.clone();
        let encoder = spawn_blocking(move || load_encoder(&model)).await??;

        let mut token = self.token.clone();
        if token.is_empty() {
            token = Alphanumeric.sample_string(&mut rand::rng(), 32);
            info!("鉴权 token: {}", token);
        }

        // 创建应用状态
        let state = server::AppState::new(engine, encoder, config.display_num, token);

        // 创建应用
        let app = server::create_app(state);

        if let Some(url) = self.prometheus_push.clone() {
            let instance = self.prometheus_instance.clone().unwrap_or_else(|| self.addr.clone());
            let auth = match &self.prometheus_auth {
                Some(s) => {
                    let (username, password) =
                        s.split_once(':').ok_or_else(|| anyhow!("prometheus 认证信息格式错误"))?;
                    Some((username.to_string(), password.to_string()))
                }
                None => None,
            };
            tokio::spawn(push_metrics(PushTarget { url, instance, auth }));
        }

        // 启动服务器
        info!("服务器启动：http://{}", &self.addr);
        let listener =
            TcpListener::bind(&self.addr).await.with_context(|| format!("无法监听 {}", self.addr))?;
        axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;
        info!("服务器已停止");

        Ok(())
    }
}

/// 指标推送目标
#[derive(Debug, Clone)]
struct PushTarget {
    url: String,
    instance: String,
    auth: Option<(String, String)>,
}

impl PushTarget {
    fn push(self) -> prometheus::Result<()> {
        prometheus::push_metrics(
            "clipsearch",
            labels! { "instance".to_string() => self.instance, },
            &self.url,
            prometheus::gather(),
            self.auth.map(|(username, password)| BasicAuthentication { username, password }),
        )
    }
}

/// 每 30 秒推送一次指标，推送失败只记录日志
async fn push_metrics(target: PushTarget) {
    let mut ticker = interval(Duration::from_secs(30));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let target = target.clone();
        match spawn_blocking(move || target.push()).await {
            Ok(Ok(())) => debug!("指标推送成功"),
            Ok(Err(e)) => error!("推送指标失败: {e}"),
            Err(e) => error!("推送任务异常退出: {e}"),
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("无法监听退出信号: {e}");
        std::future::pending::<()>().await;
    }
}
