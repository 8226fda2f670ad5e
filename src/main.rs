fn main() {
    if let Err(e) = certdeploy::cli::run() {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}
