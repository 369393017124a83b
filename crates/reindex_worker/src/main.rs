use reindex_worker_lib::{cli::parse_args, commands::run};

#[tokio::main]
async fn main() {
    let cli = parse_args();
    let exit_code = run(cli).await;
    std::process::exit(exit_code);
}
