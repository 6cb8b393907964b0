fn main() {
    std::process::exit(ebb::run::run());
}
