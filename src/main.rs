use std::path::Path;
use std::process::ExitCode;

fn main() -> ExitCode {
  let mut args = std::env::args().skip(1);
  let (Some(path), None) = (args.next(), args.next()) else {
    eprintln!("usage: el2c <file>.el2");
    return ExitCode::FAILURE
  };
  let mut comp = el2c::Compiler::new(".");
  match comp.compile_file(Path::new(&path)) {
    Ok(c) => {
      print!("{c}");
      ExitCode::SUCCESS
    }
    Err(e) => {
      eprintln!("el2c: {e}");
      ExitCode::FAILURE
    }
  }
}
