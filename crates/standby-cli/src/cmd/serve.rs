use std::path::Path;
use std::sync::Arc;

pub fn run(root: &Path, port: Option<u16>) -> anyhow::Result<()> {
    // Open before starting the runtime: the webhook client must not be
    // created or dropped on an async thread.
    let engine = Arc::new(super::open(root)?);
    let port = port.unwrap_or(engine.config().server.port);

    let rt = tokio::runtime::Runtime::new()?;
    let served = engine.clone();
    let result: anyhow::Result<()> = rt.block_on(async move {
        let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}")).await?;
        let actual_port = listener.local_addr()?.port();
        println!(
            "standby API → http://localhost:{actual_port}  (sweep every {}s)",
            served.sweep_interval().as_secs()
        );

        tokio::select! {
            res = standby_server::serve_on(served, listener) => res,
            _ = tokio::signal::ctrl_c() => Ok(()),
        }
    });
    drop(rt);
    drop(engine);
    result
}
