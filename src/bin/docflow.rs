//! docflow - epic/story/ticket workflow tracker client
//!
//! See `docflow --help` for the subcommands.

fn main() -> anyhow::Result<()> {
    docflow_cli::cli::run()
}
