#[tokio::main]
async fn main() {
    let code = courier::app::startup::startup().await;
    std::process::exit(code);
}
