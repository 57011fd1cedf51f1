mod app;

#[tokio::main]
async fn main() {
    let res = crate::app::run().await;
    if let Err(err) = res {
        eprintln!("Error: {err:#}");
        std::process::exit(1);
    }
}
