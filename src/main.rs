fn main() {
    let args: Vec<String> = std::env::args().collect();
    if let Err(err) = mapsim::run(&args) {
        eprintln!("mapsim: {err}");
        std::process::exit(1);
    }
}
