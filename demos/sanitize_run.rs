use std::error::Error;

fn main() -> Result<(), Box<dyn Error>> {
    mos_sanitizer::example_apps::run_sanitize_cli(std::env::args().skip(1))
}
