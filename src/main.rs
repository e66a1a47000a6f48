use std::error::Error;

fn main() -> Result<(), Box<dyn Error>> {
    capdeck::cli::main()
}
