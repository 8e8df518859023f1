use solakon_bridge::prelude::*;

#[tokio::main]
async fn main() {
    let options = Options::new();

    if let Err(e) = solakon_bridge::run(options).await {
        error!("{:#}", e);
        std::process::exit(255);
    }
}
