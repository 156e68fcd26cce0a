//! The `toaster` binary.

mod cli;

use clap::Parser;
use console::style;

fn main() {
  let args = match cli::Toaster::try_parse() {
    Ok(args) => args,
    Err(e) => {
      // `--help` and `--version` also arrive here, on stdout.
      let code = if e.use_stderr() { 1 } else { 0 };
      let _ = e.print();
      std::process::exit(code);
    }
  };
  cli::setup_logging(args.verbosity());
  // Errors are printed with their kind and message, never their Debug form.
  if let Err(e) = args.run() {
    eprintln!("{}: {}", style(e.kind()).red().bold(), e);
    std::process::exit(1);
  }
}
