//! The rell REPL: read a line, evaluate, mold the result.

use std::io::{BufRead, Write};

use rell::{Session, StdPrint};

fn main() {
    let mut session = Session::new();
    let stdin = std::io::stdin();
    let mut stdout = std::io::stdout();
    let mut print = StdPrint;

    println!("rell (type `quit` to exit)");
    loop {
        print!(">> ");
        let _ = stdout.flush();
        let mut line = String::new();
        match stdin.lock().read_line(&mut line) {
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }
        let source = line.trim();
        if source.is_empty() {
            continue;
        }
        if source == "quit" {
            break;
        }
        match session.execute_molded(source, &mut print) {
            Ok(molded) => println!("== {molded}"),
            Err(report) => eprintln!("{report}"),
        }
    }
}
