//! cotask-web: shared todo lists and notes over HTTP and WebSocket.

#[tokio::main]
async fn main() {
    if let Err(e) = cotask::web::run().await {
        eprintln!("cotask-web: {e}");
        std::process::exit(1);
    }
}
