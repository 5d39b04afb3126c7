#[tokio::main]
async fn main() -> anyhow::Result<()> {
    ofcontrol::node::run_cli().await
}
