use clearblade_google_provider::{init_logging, serve, ClearBladeGoogleProvider};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging();
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting clearblade-google provider");
    serve(ClearBladeGoogleProvider::new()).await
}
