pub mod app_error;
pub mod cli;
pub mod config;
pub mod markers;
pub mod model;
pub mod output;
pub mod parser;
pub mod report;
pub mod runner;
pub mod session;
pub mod store;
pub mod tracker;
pub mod validation;
pub mod version;

pub fn run() -> i32 {
    match cli::run_cli() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{err}");
            err.code()
        }
    }
}
