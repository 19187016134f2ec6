//! docflowd - project state, event bus and command bridge daemon
//!
//! See `docflowd --help` for the subcommands.

fn main() -> anyhow::Result<()> {
    docflowd::cli::run()
}
