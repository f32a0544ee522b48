mod cli;
mod console;

fn main() {
    if let Err(err) = run() {
        eprintln!("{err:?}");
        std::process::exit(1);
    }
}

fn run() -> anyhow::Result<()> {
    let cli = <cli::Cli as clap::Parser>::parse();
    cli::handle_command(cli)
}
