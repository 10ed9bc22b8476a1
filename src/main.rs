use anyhow::Context;
use hostsync_lib::commands::run_request;
use hostsync_lib::logging::{data_dir, init_logging};
use hostsync_lib::{Deployer, EngineConfig};
use std::io::Read;

/// 用法: hostsync [request.json]
///
/// 未指定文件或为 `-` 时从标准输入读取部署请求，结果 JSON 写到标准输出。
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_dir = data_dir();
    std::fs::create_dir_all(&config_dir)
        .with_context(|| format!("failed to create data directory {:?}", config_dir))?;

    init_logging(&config_dir);

    let engine_config = EngineConfig::load(&config_dir);
    tracing::debug!("引擎配置: {:?}", engine_config);

    let request = match std::env::args().nth(1).filter(|a| a != "-") {
        Some(path) => std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read request file {}", path))?,
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("failed to read request from stdin")?;
            buf
        }
    };

    let deployer = Deployer::new(engine_config);
    let output = run_request(&deployer, &request).await;
    println!("{}", output);

    Ok(())
}
