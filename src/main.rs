fn main() {
    std::process::exit(setup_report::run());
}
