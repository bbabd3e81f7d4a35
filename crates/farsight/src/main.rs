#[tokio::main]
async fn main() {
    if let Err(err) = lib_farsight::init().await {
        eprintln!("fatal: {err:?}");
        std::process::exit(1);
    }
}
