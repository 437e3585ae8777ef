#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    lib_horizon_sim::init().await
}
