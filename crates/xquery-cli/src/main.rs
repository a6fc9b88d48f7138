fn main() {
    if let Err(error) = platynui_xquery_cli::run() {
        tracing::error!(%error, "query failed");
        eprintln!("{error:#}");
        std::process::exit(1);
    }
}
