fn main() {
    if let Err(e) = cascade::core::Engine::run() {
        eprintln!("Cascade failed to start: {}", e);
        std::process::exit(1);
    }
}
